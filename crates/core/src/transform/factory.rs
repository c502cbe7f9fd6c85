use std::collections::HashMap;
use std::sync::Arc;

use super::builtin::{MidTransformer, SpreadTransformer};
use super::definition::TransformerDefinition;
use super::traits::Transformer;
use crate::errors::ConfigError;

type Constructor =
    Arc<dyn Fn(&TransformerDefinition) -> Result<Box<dyn Transformer>, ConfigError> + Send + Sync>;

/// Transformer implementations by kind name.
#[derive(Clone, Default)]
pub struct TransformerFactory {
    constructors: HashMap<String, Constructor>,
}

impl TransformerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with `spread` and `mid` registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory
            .register("spread", |def| {
                Ok(Box::new(SpreadTransformer::from_definition(def)?) as Box<dyn Transformer>)
            })
            .register("mid", |def| {
                Ok(Box::new(MidTransformer::from_definition(def)?) as Box<dyn Transformer>)
            });
        factory
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&TransformerDefinition) -> Result<Box<dyn Transformer>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
        self
    }

    pub fn build(&self, def: &TransformerDefinition) -> Result<Box<dyn Transformer>, ConfigError> {
        let constructor =
            self.constructors
                .get(&def.kind)
                .ok_or_else(|| ConfigError::InvalidTransformer {
                    transformer: def.id.clone(),
                    message: format!("unknown transformer kind '{}'", def.kind),
                })?;
        constructor(def)
    }
}
