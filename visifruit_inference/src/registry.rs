//! Registry of local fallback models.
//!
//! Maps model names from configuration (`inference.local_model`) to factory
//! functions. Constructed at startup and passed by reference; no global
//! state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use visifruit::inference::InferenceConfig;

use crate::error::InferenceError;
use crate::local::{EmptyModel, LocalModel, ReplayModel};
use crate::onnx::{OnnxYoloModel, YoloParams};

/// Builds a model from the inference settings (artifact path, thresholds).
pub type LocalModelFactory = fn(&InferenceConfig) -> Result<Arc<dyn LocalModel>, InferenceError>;

/// Registry of available local models.
pub struct LocalModelRegistry {
    factories: HashMap<&'static str, LocalModelFactory>,
}

impl LocalModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in models: `onnx` (alias `yolo`), `empty`
    /// and `replay`.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register("onnx", create_onnx);
        reg.register("yolo", create_onnx);
        reg.register("empty", create_empty);
        reg.register("replay", create_replay);
        reg
    }

    /// Register a model factory.
    ///
    /// # Panics
    /// Panics if a model with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: LocalModelFactory) {
        if self.factories.contains_key(name) {
            panic!("Local model '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Create a model instance by name.
    ///
    /// # Errors
    /// `LocalModelUnavailable` if the name is unknown or the factory fails.
    pub fn create(
        &self,
        name: &str,
        config: &InferenceConfig,
    ) -> Result<Arc<dyn LocalModel>, InferenceError> {
        let factory = self.factories.get(name).copied().ok_or_else(|| {
            InferenceError::LocalModelUnavailable(format!("unknown local model '{name}'"))
        })?;
        factory(config)
    }

    /// All registered model names.
    pub fn list_models(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for LocalModelRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

fn required_path<'a>(config: &'a InferenceConfig, model: &str) -> Result<&'a Path, InferenceError> {
    config.local_model_path.as_deref().ok_or_else(|| {
        InferenceError::LocalModelUnavailable(format!(
            "{model} model requires inference.local_model_path"
        ))
    })
}

fn create_onnx(config: &InferenceConfig) -> Result<Arc<dyn LocalModel>, InferenceError> {
    let path = required_path(config, "onnx")?;
    Ok(Arc::new(OnnxYoloModel::load(path, YoloParams::from_config(config))?))
}

fn create_empty(_config: &InferenceConfig) -> Result<Arc<dyn LocalModel>, InferenceError> {
    Ok(Arc::new(EmptyModel))
}

fn create_replay(config: &InferenceConfig) -> Result<Arc<dyn LocalModel>, InferenceError> {
    Ok(Arc::new(ReplayModel::load(required_path(config, "replay")?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_models_listed() {
        let mut names = LocalModelRegistry::with_builtin().list_models();
        names.sort();
        assert_eq!(names, vec!["empty", "onnx", "replay", "yolo"]);
    }

    #[test]
    fn create_empty_model() {
        let model = LocalModelRegistry::with_builtin()
            .create("empty", &InferenceConfig::default())
            .expect("should create");
        assert_eq!(model.name(), "empty");
    }

    #[test]
    fn unknown_model_is_unavailable() {
        let reg = LocalModelRegistry::with_builtin();
        assert!(matches!(
            reg.create("yolo-cpu", &InferenceConfig::default()),
            Err(InferenceError::LocalModelUnavailable(_))
        ));
    }

    #[test]
    fn replay_without_path_fails() {
        let reg = LocalModelRegistry::with_builtin();
        assert!(reg.create("replay", &InferenceConfig::default()).is_err());
    }

    #[test]
    fn onnx_without_path_fails() {
        let reg = LocalModelRegistry::with_builtin();
        for name in ["onnx", "yolo"] {
            assert!(matches!(
                reg.create(name, &InferenceConfig::default()),
                Err(InferenceError::LocalModelUnavailable(m)) if m.contains("local_model_path")
            ));
        }
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = LocalModelRegistry::new();
        reg.register("dup", create_empty);
        reg.register("dup", create_empty);
    }
}
