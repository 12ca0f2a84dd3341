//! Cost-ranked model routing with fallback
//!
//! Candidates for a stage are the available, fresh backends advertising the
//! stage's required capabilities, ordered by estimated cost. Equal costs are
//! broken by the most recent success, then by id, so repeated calls stick to
//! the backend that last worked. A failing backend hands over to the next
//! ranked one until the attempt cap is reached.

use super::registry::BackendRegistry;
use content_forge_core::backend::{Availability, BackendDescriptor, GenerationParams};
use content_forge_core::budget::CostLedger;
use content_forge_core::config::RouterSettings;
use content_forge_core::task::Stage;
use content_forge_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Output of a routed generate call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub backend_id: String,
    /// Estimated cost charged to the ledger, failed attempts included
    pub cost: f64,
    /// Backends tried, including the one that answered
    pub attempts: u32,
}

impl Generation {
    pub fn used_fallback(&self) -> bool {
        self.attempts > 1
    }
}

/// Selects backends for pipeline stages and calls them
pub struct ModelRouter {
    registry: Arc<BackendRegistry>,
    settings: RouterSettings,
}

impl ModelRouter {
    pub fn new(registry: Arc<BackendRegistry>, settings: RouterSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Eligible backends for a stage, best first
    ///
    /// An eligible preferred backend moves to the front; an ineligible one is
    /// ignored.
    pub fn rank(&self, stage: Stage, preference: Option<&str>) -> Vec<BackendDescriptor> {
        let now = chrono::Utc::now();
        let required = self.settings.requirements(stage);
        let staleness = self.settings.staleness();

        let mut candidates: Vec<BackendDescriptor> = self
            .registry
            .descriptors()
            .into_iter()
            .filter(|d| d.is_routable(staleness, now) && d.supports_all(required))
            .collect();

        candidates.sort_by(|a, b| {
            a.cost_per_call
                .partial_cmp(&b.cost_per_call)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    // Most recent success first; never-successful last
                    let a_success = self.registry.last_success(&a.id);
                    let b_success = self.registry.last_success(&b.id);
                    b_success.cmp(&a_success)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        if let Some(preferred) = preference {
            match candidates.iter().position(|d| d.id == preferred) {
                Some(index) => {
                    let descriptor = candidates.remove(index);
                    candidates.insert(0, descriptor);
                }
                None => warn!(
                    stage = %stage,
                    backend_id = %preferred,
                    "Preferred backend is not eligible, using ranked order"
                ),
            }
        }

        candidates
    }

    /// Pick the backend a call for this stage would go to first
    pub fn route(&self, stage: Stage, preference: Option<&str>) -> Result<BackendDescriptor> {
        self.rank(stage, preference)
            .into_iter()
            .next()
            .ok_or_else(|| no_backend(stage))
    }

    /// Generate text for a stage, falling back across ranked backends
    ///
    /// Every attempt is checked against the ledger and charged before the
    /// call goes out, so timed-out and failed calls count toward the ceiling.
    /// A call that would overspend is never made. When nothing answered and
    /// some candidate was refused by the ceiling, the refusal is returned.
    pub async fn generate(
        &self,
        stage: Stage,
        prompt: &str,
        params: &GenerationParams,
        preference: Option<&str>,
        ledger: &mut CostLedger,
    ) -> Result<Generation> {
        let candidates = self.rank(stage, preference);
        if candidates.is_empty() {
            return Err(no_backend(stage));
        }

        let call_timeout = self.settings.call_timeout();
        let max_attempts = self.settings.max_attempts as usize;
        let spent_before = ledger.spent();
        let mut attempts = 0u32;
        let mut last_error: Option<Error> = None;
        let mut budget_error: Option<Error> = None;

        for descriptor in candidates.iter().take(max_attempts) {
            if let Err(refused) = ledger.check(descriptor.cost_per_call) {
                warn!(
                    stage = %stage,
                    backend_id = %descriptor.id,
                    spent = ledger.spent(),
                    ceiling = ?ledger.ceiling(),
                    estimated = descriptor.cost_per_call,
                    "Budget ceiling refuses call"
                );
                budget_error.get_or_insert(refused);
                continue;
            }
            let Some(backend) = self.registry.get(&descriptor.id) else {
                continue;
            };

            attempts += 1;
            ledger.charge(descriptor.cost_per_call);
            debug!(stage = %stage, backend_id = %descriptor.id, attempt = attempts, "Calling backend");
            let outcome = match timeout(call_timeout, backend.generate(prompt, params)).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(
                    format!("generate via {}", descriptor.id),
                    call_timeout.as_secs(),
                )),
            };

            match outcome {
                Ok(text) => {
                    self.registry.record_success(&descriptor.id);
                    let cost = ledger.spent() - spent_before;
                    info!(
                        stage = %stage,
                        backend_id = %descriptor.id,
                        attempts,
                        cost,
                        "Generation succeeded"
                    );
                    return Ok(Generation {
                        text,
                        backend_id: descriptor.id.clone(),
                        cost,
                        attempts,
                    });
                }
                Err(e) => {
                    warn!(
                        stage = %stage,
                        backend_id = %descriptor.id,
                        attempt = attempts,
                        category = e.category(),
                        "Backend call failed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        match (budget_error, last_error) {
            (Some(refused), _) => Err(refused),
            (None, Some(e)) => Err(e),
            (None, None) => Err(no_backend(stage)),
        }
    }

    /// Probe every backend concurrently and store the results
    ///
    /// Returns how many backends answered.
    pub async fn refresh_availability(&self) -> usize {
        let call_timeout = self.settings.call_timeout();
        let probes = self
            .registry
            .backends()
            .into_iter()
            .map(|(id, backend)| async move {
                let up = matches!(timeout(call_timeout, backend.probe()).await, Ok(Ok(())));
                (id, up)
            });

        let results = futures::future::join_all(probes).await;
        let mut available = 0;
        for (id, up) in results {
            if up {
                available += 1;
            } else {
                warn!(backend_id = %id, "Backend probe failed");
            }
            let availability = if up {
                Availability::up()
            } else {
                Availability::down()
            };
            self.registry.set_availability(&id, availability);
        }
        debug!(available, total = self.registry.len(), "Availability refreshed");
        available
    }

    /// Refresh availability on the configured interval in a background task
    pub fn spawn_availability_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(router.settings.probe_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_secs = router.settings.probe_interval_secs,
                "Starting backend availability refresh"
            );
            loop {
                ticker.tick().await;
                router.refresh_availability().await;
            }
        })
    }
}

fn no_backend(stage: Stage) -> Error {
    Error::backend(
        "router",
        format!("no available backend satisfies the {} stage", stage),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use assert_matches::assert_matches;
    use content_forge_core::backend::Capability;

    fn router_with(backends: Vec<ScriptedBackend>) -> (ModelRouter, Vec<Arc<ScriptedBackend>>) {
        let registry = Arc::new(BackendRegistry::new());
        let mut handles = Vec::new();
        for backend in backends {
            let backend = Arc::new(backend);
            registry.register(backend.clone()).unwrap();
            handles.push(backend);
        }
        let settings = RouterSettings {
            call_timeout_secs: 1,
            ..Default::default()
        };
        (ModelRouter::new(registry, settings), handles)
    }

    fn ids(ranked: &[BackendDescriptor]) -> Vec<&str> {
        ranked.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_rank_prefers_lowest_cost() {
        let (router, _) = router_with(vec![
            ScriptedBackend::new("premium", 0.5),
            ScriptedBackend::new("budget", 0.1),
            ScriptedBackend::new("standard", 0.2),
        ]);
        let ranked = router.rank(Stage::Draft, None);
        assert_eq!(ids(&ranked), vec!["budget", "standard", "premium"]);
        assert_eq!(router.route(Stage::Draft, None).unwrap().id, "budget");
    }

    #[test]
    fn test_equal_cost_prefers_most_recent_success() {
        let (router, _) = router_with(vec![
            ScriptedBackend::new("alpha", 0.1),
            ScriptedBackend::new("beta", 0.1),
        ]);
        assert_eq!(router.route(Stage::Draft, None).unwrap().id, "alpha");

        router.registry().record_success("beta");
        assert_eq!(router.route(Stage::Draft, None).unwrap().id, "beta");
    }

    #[test]
    fn test_unavailable_stale_and_incapable_backends_skipped() {
        let stale = ScriptedBackend::new("stale", 0.01);
        stale.set_checked_at(chrono::Utc::now() - chrono::Duration::hours(1));
        let (router, _) = router_with(vec![
            stale,
            ScriptedBackend::new("down", 0.02),
            ScriptedBackend::new("plain", 0.03),
            ScriptedBackend::new("judge", 0.04).with_capability(Capability::StructuredOutput),
        ]);
        router
            .registry()
            .set_availability("down", Availability::down());

        assert_eq!(ids(&router.rank(Stage::Draft, None)), vec!["plain", "judge"]);
        assert_eq!(ids(&router.rank(Stage::QualityReview, None)), vec!["judge"]);
    }

    #[test]
    fn test_preference_moves_eligible_backend_first() {
        let (router, _) = router_with(vec![
            ScriptedBackend::new("cheap", 0.1),
            ScriptedBackend::new("fancy", 0.9),
        ]);
        assert_eq!(
            ids(&router.rank(Stage::Draft, Some("fancy"))),
            vec!["fancy", "cheap"]
        );
        assert_eq!(
            ids(&router.rank(Stage::Draft, Some("missing"))),
            vec!["cheap", "fancy"]
        );
    }

    #[tokio::test]
    async fn test_generate_falls_back_after_timeout() {
        let (router, backends) = router_with(vec![
            ScriptedBackend::new("primary", 0.1).hanging(),
            ScriptedBackend::new("secondary", 0.2).replying("from secondary"),
        ]);
        let mut ledger = CostLedger::unlimited();

        let generation = router
            .generate(Stage::Draft, "prompt", &GenerationParams::default(), None, &mut ledger)
            .await
            .unwrap();

        assert_eq!(generation.backend_id, "secondary");
        assert_eq!(generation.text, "from secondary");
        assert_eq!(generation.attempts, 2);
        assert!(generation.used_fallback());
        assert_eq!(backends[0].calls(), 1);
        // The timed-out call still counts
        assert!((ledger.spent() - 0.3).abs() < 1e-9);
        assert!((generation.cost - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_generate_caps_total_attempts() {
        let (router, backends) = router_with(vec![
            ScriptedBackend::new("a", 0.1).failing("down"),
            ScriptedBackend::new("b", 0.2).failing("down"),
            ScriptedBackend::new("c", 0.3).failing("down"),
            ScriptedBackend::new("d", 0.4),
        ]);
        let mut ledger = CostLedger::unlimited();

        let err = router
            .generate(Stage::Draft, "prompt", &GenerationParams::default(), None, &mut ledger)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(backends[3].calls(), 0);
        assert!((ledger.spent() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_attempts_count_toward_ceiling() {
        let (router, backends) = router_with(vec![
            ScriptedBackend::new("primary", 0.4).hanging(),
            ScriptedBackend::new("secondary", 0.4),
        ]);
        let mut ledger = CostLedger::new(0.4, Some(1.0));

        let err = router
            .generate(Stage::Draft, "prompt", &GenerationParams::default(), None, &mut ledger)
            .await
            .unwrap_err();

        assert_matches!(err, Error::BudgetExceeded { .. });
        assert_eq!(backends[0].calls(), 1);
        assert_eq!(backends[1].calls(), 0);
        assert!((ledger.spent() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_budget_refusal_wins_over_backend_error() {
        let (router, backends) = router_with(vec![
            ScriptedBackend::new("cheap", 0.1).failing("overloaded"),
            ScriptedBackend::new("pricey", 0.6),
        ]);
        let mut ledger = CostLedger::new(0.0, Some(0.5));

        let err = router
            .generate(Stage::Research, "prompt", &GenerationParams::default(), None, &mut ledger)
            .await
            .unwrap_err();

        assert_matches!(err, Error::BudgetExceeded { ceiling, .. } if ceiling == 0.5);
        assert_eq!(backends[0].calls(), 1);
        assert_eq!(backends[1].calls(), 0);
    }

    #[tokio::test]
    async fn test_budget_refusal_makes_no_call() {
        let (router, backends) = router_with(vec![ScriptedBackend::new("primary", 0.4)]);
        let mut ledger = CostLedger::new(0.8, Some(1.0));

        let err = router
            .generate(Stage::Format, "prompt", &GenerationParams::default(), None, &mut ledger)
            .await
            .unwrap_err();

        assert_matches!(err, Error::BudgetExceeded { .. });
        assert_eq!(backends[0].calls(), 0);
        assert!((ledger.spent() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_eligible_backend() {
        let (router, _) = router_with(vec![ScriptedBackend::new("plain", 0.1)]);
        let mut ledger = CostLedger::unlimited();
        let err = router
            .generate(
                Stage::QualityReview,
                "prompt",
                &GenerationParams::default(),
                None,
                &mut ledger,
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(router.route(Stage::QualityReview, None).is_err());
    }

    #[tokio::test]
    async fn test_refresh_marks_unreachable_backends_down() {
        let (router, backends) = router_with(vec![
            ScriptedBackend::new("healthy", 0.1),
            ScriptedBackend::new("sick", 0.05),
        ]);
        backends[1].set_probe_ok(false);

        assert_eq!(router.refresh_availability().await, 1);
        assert_eq!(ids(&router.rank(Stage::Draft, None)), vec!["healthy"]);

        backends[1].set_probe_ok(true);
        assert_eq!(router.refresh_availability().await, 2);
        assert_eq!(router.route(Stage::Draft, None).unwrap().id, "sick");
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_tracks_availability() {
        let (router, backends) = router_with(vec![ScriptedBackend::new("flaky", 0.1)]);
        let router = Arc::new(router);
        backends[0].set_probe_ok(false);

        let refresh = router.spawn_availability_refresh();
        // The first tick fires immediately
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(router.rank(Stage::Draft, None).is_empty());

        backends[0].set_probe_ok(true);
        tokio::time::sleep(router.settings().probe_interval()).await;
        assert_eq!(ids(&router.rank(Stage::Draft, None)), vec!["flaky"]);

        refresh.abort();
    }
}
