use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::catalog::SchemaCatalog;
use super::schema_model::SchemaModel;
use crate::errors::SchemaError;

/// Process-wide schema cache.
///
/// Reads take the shared lock; a schema is validated and inserted under the
/// write lock the first time it is resolved and never replaced.
pub struct SchemaResolver {
    catalog: Arc<dyn SchemaCatalog>,
    cache: RwLock<HashMap<String, Arc<SchemaModel>>>,
}

impl SchemaResolver {
    pub fn new(catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self {
            catalog,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &dyn SchemaCatalog {
        self.catalog.as_ref()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<SchemaModel>, SchemaError> {
        if let Some(model) = self.read_cache().get(name) {
            return Ok(Arc::clone(model));
        }

        let mut cache = self.write_cache();
        // Another caller may have resolved it between the two locks.
        if let Some(model) = cache.get(name) {
            return Ok(Arc::clone(model));
        }

        let spec = self
            .catalog
            .lookup(name)
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))?;
        let model = Arc::new(SchemaModel::from_spec(spec)?);
        debug!(
            "Resolved schema '{}' with {} fields",
            name,
            model.fields().len()
        );
        cache.insert(name.to_string(), Arc::clone(&model));
        Ok(model)
    }

    /// Number of schemas resolved so far.
    pub fn cached(&self) -> usize {
        self.read_cache().len()
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SchemaModel>>> {
        self.cache.read().unwrap_or_else(|poisoned| {
            warn!("Schema cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SchemaModel>>> {
        self.cache.write().unwrap_or_else(|poisoned| {
            warn!("Schema cache lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
