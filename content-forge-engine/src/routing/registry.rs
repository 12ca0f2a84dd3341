//! Backend registry
//!
//! Backends, their probed availability and the time of their last successful
//! call live in concurrent maps. The hot path only reads; the availability
//! refresh and the router's success bookkeeping write single entries.

use chrono::{DateTime, Utc};
use content_forge_core::backend::{Availability, BackendDescriptor, ModelBackend};
use content_forge_core::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registered generation backends keyed by descriptor id
#[derive(Default)]
pub struct BackendRegistry {
    backends: DashMap<String, Arc<dyn ModelBackend>>,
    availability: DashMap<String, Availability>,
    last_success: DashMap<String, DateTime<Utc>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend; ids must be unique and costs non-negative
    pub fn register(&self, backend: Arc<dyn ModelBackend>) -> Result<()> {
        let descriptor = backend.descriptor();
        if descriptor.id.trim().is_empty() {
            return Err(Error::validation("Backend id cannot be empty"));
        }
        if !descriptor.cost_per_call.is_finite() || descriptor.cost_per_call < 0.0 {
            return Err(Error::validation(format!(
                "Backend {} has an invalid cost estimate {}",
                descriptor.id, descriptor.cost_per_call
            )));
        }
        if self.backends.contains_key(&descriptor.id) {
            return Err(Error::validation(format!(
                "Backend {} is already registered",
                descriptor.id
            )));
        }

        info!(
            backend_id = %descriptor.id,
            cost_per_call = descriptor.cost_per_call,
            capabilities = ?descriptor.capabilities,
            "Registered model backend"
        );
        self.backends.insert(descriptor.id, backend);
        Ok(())
    }

    pub fn deregister(&self, id: &str) -> bool {
        self.availability.remove(id);
        self.last_success.remove(id);
        self.backends.remove(id).is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ModelBackend>> {
        self.backends.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Snapshot of all backends, sorted by id
    pub fn backends(&self) -> Vec<(String, Arc<dyn ModelBackend>)> {
        let mut backends: Vec<_> = self
            .backends
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        backends.sort_by(|a, b| a.0.cmp(&b.0));
        backends
    }

    /// Descriptor with the last probe result applied
    ///
    /// Until its first probe a backend reports its own availability.
    pub fn descriptor(&self, id: &str) -> Option<BackendDescriptor> {
        let backend = self.get(id)?;
        let mut descriptor = backend.descriptor();
        if let Some(probed) = self.availability.get(id) {
            descriptor.availability = *probed;
        }
        Some(descriptor)
    }

    /// All descriptors, sorted by id
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends()
            .into_iter()
            .filter_map(|(id, _)| self.descriptor(&id))
            .collect()
    }

    pub fn set_availability(&self, id: &str, availability: Availability) {
        if !self.backends.contains_key(id) {
            return;
        }
        debug!(backend_id = %id, available = availability.available, "Updated availability");
        self.availability.insert(id.to_string(), availability);
    }

    pub fn record_success(&self, id: &str) {
        self.last_success.insert(id.to_string(), Utc::now());
    }

    pub fn last_success(&self, id: &str) -> Option<DateTime<Utc>> {
        self.last_success.get(id).map(|entry| *entry.value())
    }
}
