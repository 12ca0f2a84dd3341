//! Error types for the engine's I/O adapters

use thiserror::Error;

/// Engine adapter error type
///
/// Public engine operations speak [`content_forge_core::Error`]; this type
/// collects the failures of the HTTP backend and the file publisher before
/// they are classified at the trait boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Core domain error: {0}")]
    Core(#[from] content_forge_core::Error),

    #[error("Prompt error: {0}")]
    Prompt(#[from] content_forge_prompts::Error),

    #[error("HTTP error from {backend}: {source}")]
    Http {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Backend {backend} returned status {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result type for engine adapters
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn http<S: Into<String>>(backend: S, source: reqwest::Error) -> Self {
        Self::Http {
            backend: backend.into(),
            source,
        }
    }

    pub fn io<P: AsRef<std::path::Path>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<Error> for content_forge_core::Error {
    fn from(err: Error) -> Self {
        use content_forge_core::Error as CoreError;
        match err {
            Error::Core(inner) => inner,
            Error::Prompt(inner) => inner.into(),
            Error::Http { ref backend, ref source } if source.is_timeout() => {
                CoreError::backend(backend.clone(), format!("request timed out: {}", source))
            }
            Error::Http { backend, source } => CoreError::backend(backend, source.to_string()),
            // Credentials and malformed requests do not heal on retry
            Error::Status {
                backend,
                status: status @ (400 | 401 | 403 | 404 | 422),
                body,
            } => CoreError::configuration(format!(
                "backend {} rejected the request with status {}: {}",
                backend, status, body
            )),
            Error::Status {
                backend,
                status,
                body,
            } => CoreError::backend(backend, format!("status {}: {}", status, body)),
            Error::Io { .. } => CoreError::Internal(err.to_string()),
            Error::Serialization(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let throttled: content_forge_core::Error = Error::Status {
            backend: "primary".into(),
            status: 429,
            body: "slow down".into(),
        }
        .into();
        assert!(throttled.is_transient());

        let unauthorized: content_forge_core::Error = Error::Status {
            backend: "primary".into(),
            status: 401,
            body: "bad key".into(),
        }
        .into();
        assert!(!unauthorized.is_transient());
        assert_eq!(unauthorized.category(), "configuration");
    }

    #[test]
    fn test_core_errors_pass_through() {
        let original = content_forge_core::Error::validation("bad topic");
        let converted: content_forge_core::Error = Error::from(original.clone()).into();
        assert_eq!(converted, original);
    }
}
