//! [`ModelRegistry`] – named detection models with one active model.
//!
//! Models are registered under a name at startup.  Exactly one model is active
//! at a time; the orchestrator swaps it while the perception loop is paused so
//! no cycle ever observes a half-switched registry.

use std::collections::HashMap;
use std::sync::Arc;

use stagehand_types::StageError;

use crate::vision::Detector;

/// Registry of named [`Detector`]s.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn Detector>>,
    active: Option<String>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector.  Any previously registered model with the same
    /// name is replaced.  The first registered model becomes active.
    pub fn register(&mut self, name: impl Into<String>, detector: Arc<dyn Detector>) {
        let name = name.into();
        if self.active.is_none() {
            self.active = Some(name.clone());
        }
        self.models.insert(name, detector);
    }

    /// Make `name` the active model.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::UnknownModel`] when no model of that name is
    /// registered; the active model is left unchanged.
    pub fn activate(&mut self, name: &str) -> Result<(), StageError> {
        if !self.models.contains_key(name) {
            return Err(StageError::UnknownModel(name.to_string()));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    /// The active model, if any model is registered.
    pub fn active(&self) -> Option<Arc<dyn Detector>> {
        self.active
            .as_ref()
            .and_then(|name| self.models.get(name))
            .cloned()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_types::{Detection, Frame, Rect};

    struct LabelDetector(&'static str);

    impl Detector for LabelDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, StageError> {
            Ok(vec![Detection {
                label: self.0.to_string(),
                rect: Rect::new(0, 0, 1, 1),
                confidence: 1.0,
            }])
        }
    }

    fn active_label(registry: &ModelRegistry) -> String {
        let frame = Frame::filled(1, 1, [0, 0, 0]);
        registry.active().unwrap().detect(&frame).unwrap()[0]
            .label
            .clone()
    }

    #[test]
    fn first_registered_model_is_active() {
        let mut registry = ModelRegistry::new();
        assert!(registry.active().is_none());
        registry.register("base", Arc::new(LabelDetector("a")));
        registry.register("event", Arc::new(LabelDetector("b")));
        assert_eq!(registry.active_name(), Some("base"));
        assert_eq!(active_label(&registry), "a");
    }

    #[test]
    fn activate_switches_model() {
        let mut registry = ModelRegistry::new();
        registry.register("base", Arc::new(LabelDetector("a")));
        registry.register("event", Arc::new(LabelDetector("b")));
        registry.activate("event").unwrap();
        assert_eq!(active_label(&registry), "b");
        assert_eq!(registry.names(), vec!["base", "event"]);
    }

    #[test]
    fn activate_unknown_keeps_current() {
        let mut registry = ModelRegistry::new();
        registry.register("base", Arc::new(LabelDetector("a")));
        let err = registry.activate("missing").unwrap_err();
        assert!(matches!(err, StageError::UnknownModel(_)));
        assert_eq!(registry.active_name(), Some("base"));
    }

    #[test]
    fn re_registering_replaces_detector() {
        let mut registry = ModelRegistry::new();
        registry.register("base", Arc::new(LabelDetector("a")));
        registry.register("base", Arc::new(LabelDetector("c")));
        assert_eq!(active_label(&registry), "c");
    }
}
