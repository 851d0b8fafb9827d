//! Classifier client factory
//!
//! Explicitly constructed at the composition root and handed to the
//! analyzer. Clients are built on first use and cached per model name
//! until [`ClientFactory::shutdown`].

use super::heuristic::{HeuristicClassifier, HEURISTIC_MODEL};
use super::{CapabilityError, Classifier, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

#[derive(Default)]
pub struct ClientFactory {
    classifiers: RwLock<HashMap<String, Arc<dyn Classifier>>>,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a prebuilt classifier under `model`, replacing any cached one
    pub fn register(&self, model: impl Into<String>, classifier: Arc<dyn Classifier>) {
        let model = model.into();
        debug!(model = %model, "Registering classifier");
        self.write().insert(model, classifier);
    }

    /// Cached classifier for `model`, building it on first use
    pub fn classifier(&self, model: &str) -> Result<Arc<dyn Classifier>> {
        if let Some(existing) = self.read().get(model) {
            return Ok(Arc::clone(existing));
        }

        let built: Arc<dyn Classifier> = match model {
            HEURISTIC_MODEL => Arc::new(
                HeuristicClassifier::new(model)
                    .map_err(|e| CapabilityError::Unavailable(e.to_string()))?,
            ),
            other => {
                return Err(CapabilityError::Unavailable(format!(
                    "No classifier registered for model '{}'",
                    other
                )))
            }
        };

        info!(model, "Classifier client created");

        // Another caller may have raced us; keep whichever landed first
        let mut classifiers = self.write();
        let entry = classifiers
            .entry(model.to_string())
            .or_insert_with(|| built);
        Ok(Arc::clone(entry))
    }

    pub fn cached_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.read().keys().cloned().collect();
        models.sort();
        models
    }

    /// Drop every cached client
    pub fn shutdown(&self) {
        let mut classifiers = self.write();
        let count = classifiers.len();
        classifiers.clear();
        info!(count, "Classifier clients released");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Classifier>>> {
        match self.classifiers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Classifier>>> {
        match self.classifiers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
