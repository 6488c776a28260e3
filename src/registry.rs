use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::metadata::EntityFields;
use crate::traits::TreeModel;
use crate::validator::validate;

/// Caller-owned cache of validated tree configurations, keyed by model type.
///
/// Configurations are loaded once and stay cached until [`invalidate`](Self::invalidate) or
/// [`clear`](Self::clear) is called, for example after a schema change.
#[derive(Debug, Default)]
pub struct TreeConfigRegistry {
    entries: RwLock<HashMap<TypeId, Arc<TreeConfig>>>,
}

impl TreeConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached configuration of `M`, reading and validating its mapping on first use.
    pub fn load<M: TreeModel>(&self) -> Result<Arc<TreeConfig>, TreeError> {
        if let Some(config) = self.get::<M>() {
            return Ok(config);
        }
        self.register::<M>(M::tree_config())
    }

    /// Validate `config` against the columns of `M` and cache it, replacing any previous entry.
    pub fn register<M: TreeModel>(&self, config: TreeConfig) -> Result<Arc<TreeConfig>, TreeError> {
        validate(&config, &EntityFields::of::<M::Entity>())?;
        debug!(
            entity = config.entity_name(),
            strategy = config.strategy().as_str(),
            "registered tree mapping"
        );

        let config = Arc::new(config);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<M>(), Arc::clone(&config));
        Ok(config)
    }

    pub fn get<M: TreeModel>(&self) -> Option<Arc<TreeConfig>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<M>())
            .cloned()
    }

    /// Drop the cached entry of `M`. Returns whether one was present.
    pub fn invalidate<M: TreeModel>(&self) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&TypeId::of::<M>())
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
