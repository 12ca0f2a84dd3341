//! OpenAI-compatible chat completions adapter
//!
//! Works against any server exposing `/chat/completions` and `/models` in the
//! OpenAI shape (hosted APIs, vLLM, llama.cpp server, Ollama's compatibility
//! layer).

use crate::error::Error;
use async_trait::async_trait;
use content_forge_core::backend::{
    BackendDescriptor, Capability, GenerationParams, ModelBackend,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Configuration of one OpenAI-compatible backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiBackendConfig {
    pub id: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key; keyless servers omit it
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub cost_per_call: f64,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP backend speaking the chat completions protocol
pub struct OpenAiCompatibleBackend {
    config: OpenAiBackendConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    /// Build the adapter, resolving the API key from the environment
    pub fn new(config: OpenAiBackendConfig) -> content_forge_core::Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                content_forge_core::Error::configuration(format!(
                    "backend {} expects its API key in ${}",
                    config.id, var
                ))
            })?),
            None => None,
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: OpenAiBackendConfig,
        api_key: Option<String>,
    ) -> content_forge_core::Result<Self> {
        if config.base_url.trim().is_empty() || config.model.trim().is_empty() {
            return Err(content_forge_core::Error::configuration(format!(
                "backend {} needs a base_url and a model",
                config.id
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("content-forge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::http(config.id.clone(), e))?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn complete(&self, prompt: &str, params: &GenerationParams) -> crate::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &params.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = self
            .authorize(self.client.post(self.endpoint("chat/completions")))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::http(self.config.id.clone(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                backend: self.config.id.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::http(self.config.id.clone(), e))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| {
                content_forge_core::Error::backend(&self.config.id, "response carried no content")
            })?;

        debug!(backend_id = %self.config.id, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    fn descriptor(&self) -> BackendDescriptor {
        self.config.capabilities.iter().fold(
            BackendDescriptor::new(self.config.id.clone(), self.config.cost_per_call),
            |descriptor, capability| descriptor.with_capability(*capability),
        )
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> content_forge_core::Result<String> {
        Ok(self.complete(prompt, params).await?)
    }

    async fn probe(&self) -> content_forge_core::Result<()> {
        let response = self
            .authorize(self.client.get(self.endpoint("models")))
            .send()
            .await
            .map_err(|e| Error::http(self.config.id.clone(), e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(content_forge_core::Error::backend(
                &self.config.id,
                format!("probe returned status {}", response.status()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> OpenAiBackendConfig {
        OpenAiBackendConfig {
            id: "local".into(),
            base_url,
            model: "writer-small".into(),
            api_key_env: None,
            cost_per_call: 0.02,
            capabilities: vec![Capability::LongContext],
        }
    }

    #[tokio::test]
    async fn test_generate_posts_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "writer-small",
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Write about heat pumps"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Heat pumps move heat."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::with_api_key(
            config(format!("{}/v1/", server.uri())),
            Some("secret".into()),
        )
        .unwrap();
        let params = GenerationParams {
            system: Some("Be brief.".into()),
            ..Default::default()
        };
        let text = backend
            .generate("Write about heat pumps", &params)
            .await
            .unwrap();
        assert_eq!(text, "Heat pumps move heat.");
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::with_api_key(config(server.uri()), None).unwrap();
        let err = backend
            .generate("prompt", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(backend.probe().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_choices_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let backend = OpenAiCompatibleBackend::with_api_key(config(server.uri()), None).unwrap();
        let err = backend
            .generate("prompt", &GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "backend");
    }

    #[test]
    fn test_descriptor_and_missing_key() {
        let backend =
            OpenAiCompatibleBackend::with_api_key(config("http://localhost:8000".into()), None)
                .unwrap();
        let descriptor = backend.descriptor();
        assert_eq!(descriptor.id, "local");
        assert!(descriptor.supports_all(&[Capability::LongContext]));

        let mut keyed = config("http://localhost:8000".into());
        keyed.api_key_env = Some("CONTENT_FORGE_TEST_KEY_THAT_IS_NEVER_SET".into());
        let err = OpenAiCompatibleBackend::new(keyed).err().unwrap();
        assert_eq!(err.category(), "configuration");
    }
}
