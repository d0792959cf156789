//! Registry of feature units.
//!
//! Built once from a fixed set of features and never mutated afterwards.
//! Every listing is sorted by simple type name (ties by path), so views are
//! stable across runs.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::EngineContext;
use crate::feature::{Feature, FeatureCategory, FeatureUnit};
use crate::process::ProcessRole;
use crate::{EngineError, Result};

/// Diagnostics row for one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureStatus {
    pub path: String,
    pub name: String,
    pub description: String,
    pub category: FeatureCategory,
    pub target_process: ProcessRole,
    pub enabled: bool,
    pub loaded: bool,
    pub always_run: bool,
    pub intercepts: usize,
    pub faults: usize,
}

/// Collects features before the registry is frozen.
pub struct FeatureRegistryBuilder {
    ctx: Arc<EngineContext>,
    units: Vec<FeatureUnit>,
}

impl FeatureRegistryBuilder {
    /// Start an empty builder.
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            units: Vec::new(),
        }
    }

    /// Add a feature. Fails on an empty path, a duplicate path or type, or
    /// a feature exposing both capabilities.
    pub fn register<T: Feature>(mut self, feature: T) -> Result<Self> {
        let unit = FeatureUnit::new(feature, self.ctx.clone())?;

        if self.units.iter().any(|u| u.path() == unit.path()) {
            return Err(EngineError::AlreadyExists(unit.path().to_string()));
        }
        if self.units.iter().any(|u| u.type_id() == unit.type_id()) {
            return Err(EngineError::AlreadyExists(unit.type_name().to_string()));
        }

        tracing::debug!("Registered feature {} ({})", unit.path(), unit.category());
        self.units.push(unit);
        Ok(self)
    }

    /// Number of features collected so far.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Freeze into a registry.
    pub fn build(self) -> FeatureRegistry {
        let mut units: Vec<Arc<FeatureUnit>> = self.units.into_iter().map(Arc::new).collect();
        units.sort_by(|a, b| {
            a.simple_name()
                .cmp(b.simple_name())
                .then_with(|| a.path().cmp(b.path()))
        });

        let by_path = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.path().to_string(), i))
            .collect();
        let by_type = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.type_id(), i))
            .collect();

        tracing::info!("Feature registry built with {} features", units.len());

        FeatureRegistry {
            ctx: self.ctx,
            units,
            by_path,
            by_type,
        }
    }
}

/// Immutable index of every feature unit.
pub struct FeatureRegistry {
    ctx: Arc<EngineContext>,
    units: Vec<Arc<FeatureUnit>>,
    by_path: HashMap<String, usize>,
    by_type: HashMap<TypeId, usize>,
}

impl FeatureRegistry {
    /// Start building a registry bound to `ctx`.
    pub fn builder(ctx: Arc<EngineContext>) -> FeatureRegistryBuilder {
        FeatureRegistryBuilder::new(ctx)
    }

    /// Look up a unit by path. `None` means the feature is not present.
    pub fn find_by_path(&self, path: &str) -> Option<&Arc<FeatureUnit>> {
        self.by_path.get(path).map(|&i| &self.units[i])
    }

    /// Every unit.
    pub fn all(&self) -> &[Arc<FeatureUnit>] {
        &self.units
    }

    /// Units with a persisted switch.
    pub fn all_switchable(&self) -> Vec<Arc<FeatureUnit>> {
        self.by_category(FeatureCategory::Switch)
    }

    /// Units with a click action.
    pub fn all_clickable(&self) -> Vec<Arc<FeatureUnit>> {
        self.by_category(FeatureCategory::Clickable)
    }

    /// Units with neither capability.
    pub fn all_uncategorized(&self) -> Vec<Arc<FeatureUnit>> {
        self.by_category(FeatureCategory::Api)
    }

    fn by_category(&self, category: FeatureCategory) -> Vec<Arc<FeatureUnit>> {
        self.units
            .iter()
            .filter(|u| u.category() == category)
            .cloned()
            .collect()
    }

    /// Unit wrapping the feature of type `T`.
    pub fn get<T: Feature>(&self) -> Option<&Arc<FeatureUnit>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&i| &self.units[i])
    }

    /// The feature of type `T` itself.
    pub fn feature<T: Feature>(&self) -> Option<Arc<T>> {
        self.get::<T>().and_then(|u| u.downcast::<T>())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Diagnostics snapshot of every unit.
    pub fn status(&self) -> Vec<FeatureStatus> {
        let faults = self.ctx.faults();
        self.units
            .iter()
            .map(|u| FeatureStatus {
                path: u.path().to_string(),
                name: u.simple_name().to_string(),
                description: u.description().to_string(),
                category: u.category(),
                target_process: u.target_process(),
                enabled: u.is_enabled(),
                loaded: u.is_loaded(),
                always_run: u.always_run(),
                intercepts: u.installed_intercepts(),
                faults: faults.count_for(u.path()),
            })
            .collect()
    }
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("units", &self.units)
            .finish_non_exhaustive()
    }
}
