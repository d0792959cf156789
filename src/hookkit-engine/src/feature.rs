//! Feature units and their load/unload state machine.
//!
//! A feature implements [`Feature`] and optionally exposes one capability:
//! [`Toggleable`] for a persisted on/off switch, or [`Clickable`] for a
//! one-shot action. The engine wraps each feature in a [`FeatureUnit`], which
//! owns its intercept handles and drives the lifecycle:
//!
//! ```text
//! Unloaded --start_load--> Loading --entry ok--> Loaded
//!                             |                    |
//!                        entry failed            unload
//!                             v                    v
//!                          Unloaded             Unloaded
//! ```
//!
//! Intercepts are installed only while a unit is loading or loaded. A failed
//! load rolls back every intercept installed so far.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{self, EngineSettings};
use crate::dispatch::{FeatureOwner, InterceptCallback, InterceptionHandle, Phase, Priority};
use crate::engine::EngineContext;
use crate::fault::{self, FaultCause, FaultKind};
use crate::host::{HostContext, Invocation, TargetOperation};
use crate::process::ProcessRole;
use crate::{EngineError, Result};

/// A feature implementation.
///
/// `entry` installs intercepts through the [`LoadContext`]; every intercept it
/// installs is removed automatically when the unit unloads.
pub trait Feature: Any + Send + Sync {
    /// Stable identifier, `/`-separated. Also the persisted config key.
    fn path(&self) -> &str;

    /// Human-readable summary.
    fn description(&self) -> &str {
        ""
    }

    /// Process roles this feature may run in.
    fn target_process(&self) -> ProcessRole {
        ProcessRole::MAIN
    }

    /// One-time preparation before `entry`.
    ///
    /// Returning `Ok(false)` means the feature finished loading on its own and
    /// `entry` is skipped.
    fn init_once(&self, _host: &HostContext) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// Install intercepts.
    fn entry(&self, ctx: &mut LoadContext<'_>) -> anyhow::Result<()>;

    /// Release anything `entry` set up beyond its intercepts.
    fn unload(&self, _host: &HostContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Persisted on/off capability.
    fn toggleable(&self) -> Option<&dyn Toggleable> {
        None
    }

    /// One-shot action capability.
    fn clickable(&self) -> Option<&dyn Clickable> {
        None
    }
}

/// Capability of features with a persisted on/off switch.
pub trait Toggleable: Send + Sync {
    /// Load whenever eligible, ignoring the persisted switch.
    fn always_run(&self) -> bool {
        false
    }

    /// State assumed when nothing is persisted yet.
    fn default_enabled(&self) -> bool {
        false
    }

    /// Gate consulted before a user toggle. Returning `false` cancels it; the
    /// caller may apply it later with [`FeatureUnit::apply_toggle`].
    fn on_before_toggle(&self, _new_state: bool, _ctx: &InteractionContext) -> bool {
        true
    }
}

/// Capability of features triggered by a one-shot action.
pub trait Clickable: Send + Sync {
    /// Load whenever eligible, ignoring the persisted flag.
    fn always_run(&self) -> bool {
        false
    }

    /// State assumed when nothing is persisted yet.
    fn default_enabled(&self) -> bool {
        false
    }

    /// Whether the entry shows a switch next to its action.
    fn has_switch(&self) -> bool {
        true
    }

    /// Run the action.
    fn on_click(&self, ctx: &InteractionContext) -> anyhow::Result<()>;
}

/// Category derived from a feature's capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    /// Has [`Toggleable`]
    Switch,
    /// Has [`Clickable`]
    Clickable,
    /// Neither; loads whenever eligible
    Api,
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Switch => write!(f, "switch"),
            Self::Clickable => write!(f, "clickable"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// Caller-supplied context for toggles and clicks.
#[derive(Debug, Clone, Default)]
pub struct InteractionContext {
    /// Who is asking (`"settings"`, `"startup"`, ...)
    pub origin: String,

    /// Free-form data for gates and actions
    pub data: Map<String, Value>,
}

impl InteractionContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Result of [`FeatureUnit::request_toggle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    /// The new state was persisted and applied
    Applied,
    /// The gate rejected the toggle; nothing changed
    Cancelled,
}

/// Called after [`FeatureUnit::apply_toggle`] finishes, with the new state.
pub type ToggleCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unloaded,
    Loading,
    Loaded,
}

struct UnitState {
    lifecycle: Lifecycle,
    handles: Vec<InterceptionHandle>,
}

/// A registered feature with its lifecycle state.
pub struct FeatureUnit {
    feature: Arc<dyn Feature>,
    instance: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    category: FeatureCategory,
    owner: FeatureOwner,
    ctx: Arc<EngineContext>,
    state: Mutex<UnitState>,
    enabled: AtomicBool,
    on_toggle_complete: RwLock<Option<ToggleCallback>>,
}

impl FeatureUnit {
    pub(crate) fn new<T: Feature>(feature: T, ctx: Arc<EngineContext>) -> Result<Self> {
        let path = feature.path().to_string();
        if path.trim().is_empty() {
            return Err(EngineError::invalid_feature(
                std::any::type_name::<T>(),
                "path must not be empty",
            ));
        }

        let category = match (feature.toggleable().is_some(), feature.clickable().is_some()) {
            (true, true) => {
                return Err(EngineError::invalid_feature(
                    path,
                    "a feature cannot be both toggleable and clickable",
                ));
            }
            (true, false) => FeatureCategory::Switch,
            (false, true) => FeatureCategory::Clickable,
            (false, false) => FeatureCategory::Api,
        };

        let type_name = std::any::type_name::<T>();
        let feature = Arc::new(feature);
        let owner = FeatureOwner::new(path, simple_type_name(type_name));
        owner.set_live(false);

        Ok(Self {
            instance: feature.clone(),
            feature,
            type_id: TypeId::of::<T>(),
            type_name,
            category,
            owner,
            ctx,
            state: Mutex::new(UnitState {
                lifecycle: Lifecycle::Unloaded,
                handles: Vec::new(),
            }),
            enabled: AtomicBool::new(category == FeatureCategory::Api),
            on_toggle_complete: RwLock::new(None),
        })
    }

    // ---------------------------------------------------------------------
    // Identity
    // ---------------------------------------------------------------------

    pub fn path(&self) -> &str {
        self.owner.path()
    }

    pub fn description(&self) -> &str {
        self.feature.description()
    }

    /// Last segment of the path.
    pub fn item_name(&self) -> &str {
        let path = self.path();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Type name without module path or generics.
    pub fn simple_name(&self) -> &str {
        self.owner.type_name()
    }

    /// Fully qualified type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn category(&self) -> FeatureCategory {
        self.category
    }

    pub fn target_process(&self) -> ProcessRole {
        self.feature.target_process()
    }

    /// The wrapped feature.
    pub fn feature(&self) -> &Arc<dyn Feature> {
        &self.feature
    }

    /// The wrapped feature as its concrete type.
    pub fn downcast<T: Feature>(&self) -> Option<Arc<T>> {
        self.instance.clone().downcast::<T>().ok()
    }

    /// Persisted config key, `None` for api features.
    pub fn config_key(&self) -> Option<String> {
        match self.category {
            FeatureCategory::Switch => Some(config::switch_key(self.path())),
            FeatureCategory::Clickable => Some(config::clickable_key(self.path())),
            FeatureCategory::Api => None,
        }
    }

    /// Whether the feature loads regardless of its persisted state.
    pub fn always_run(&self) -> bool {
        if let Some(t) = self.feature.toggleable() {
            t.always_run()
        } else if let Some(c) = self.feature.clickable() {
            c.always_run()
        } else {
            true
        }
    }

    /// Whether the entry shows a switch. Always true for switch features.
    pub fn has_switch(&self) -> bool {
        match self.feature.clickable() {
            Some(c) => c.has_switch(),
            None => self.category == FeatureCategory::Switch,
        }
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    /// Persisted switch state. Api features are always enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().lifecycle == Lifecycle::Loaded
    }

    /// Whether the current process is one this feature targets.
    pub fn is_eligible(&self) -> bool {
        self.ctx.host().process().is_eligible(self.target_process())
    }

    /// Number of intercepts currently owned.
    pub fn installed_intercepts(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Read the persisted switch into memory without loading anything.
    pub(crate) fn restore_enabled(&self) -> bool {
        let enabled = match self.config_key() {
            Some(key) => self.ctx.config().get_bool(&key, self.default_enabled()),
            None => true,
        };
        self.enabled.store(enabled, Ordering::Release);
        enabled
    }

    fn default_enabled(&self) -> bool {
        if let Some(t) = self.feature.toggleable() {
            t.default_enabled()
        } else if let Some(c) = self.feature.clickable() {
            c.default_enabled()
        } else {
            true
        }
    }

    fn verbose(&self) -> bool {
        self.ctx.settings().verbose_log
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Load the feature: run `init_once`, then `entry`.
    ///
    /// No-op when already loaded or loading. Failures are recorded in the
    /// fault log and leave the unit unloaded. Returns whether the unit is
    /// loaded afterwards.
    pub fn start_load(&self) -> bool {
        if !self.is_eligible() {
            let err = EngineError::NotEligible {
                feature: self.path().to_string(),
                process: self.ctx.host().process().to_string(),
            };
            self.record(FaultKind::Load, FaultCause::Error(err.to_string()));
            return false;
        }

        {
            let mut state = self.state.lock();
            match state.lifecycle {
                Lifecycle::Loaded => {
                    if self.verbose() {
                        tracing::debug!("Feature {} already loaded", self.path());
                    }
                    return true;
                }
                Lifecycle::Loading => {
                    if self.verbose() {
                        tracing::debug!("Feature {} is loading, skipping re-entrant load", self.path());
                    }
                    return false;
                }
                Lifecycle::Unloaded => state.lifecycle = Lifecycle::Loading,
            }
        }
        self.owner.set_live(true);

        let host = self.ctx.host();
        let mut load = LoadContext::new(self);

        let outcome = fault::guard(|| {
            if !self.feature.init_once(host)? {
                if self.verbose() {
                    tracing::debug!("Feature {} handled its own load in init_once", self.path());
                }
                return Ok(());
            }
            self.feature.entry(&mut load)
        });

        let handles = load.into_handles();

        match outcome {
            Ok(()) => {
                let count = handles.len();
                {
                    let mut state = self.state.lock();
                    state.handles = handles;
                    state.lifecycle = Lifecycle::Loaded;
                }
                tracing::info!("Loaded feature {} ({} intercepts)", self.path(), count);
                true
            }
            Err(cause) => {
                self.owner.set_live(false);
                for handle in &handles {
                    self.ctx.dispatcher().uninstall(handle);
                }
                self.state.lock().lifecycle = Lifecycle::Unloaded;
                tracing::error!("Failed to load feature {}: {}", self.path(), cause);
                self.record(FaultKind::Load, cause);
                false
            }
        }
    }

    /// Unload the feature if loaded: run `unload`, then remove every
    /// intercept it owns.
    pub fn stop_load(&self) {
        let handles = {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Loaded {
                return;
            }
            state.lifecycle = Lifecycle::Unloaded;
            std::mem::take(&mut state.handles)
        };
        self.owner.set_live(false);

        if let Err(cause) = fault::guard(|| self.feature.unload(self.ctx.host())) {
            tracing::error!("Failed to unload feature {}: {}", self.path(), cause);
            self.record(FaultKind::Unload, cause);
        }

        for handle in &handles {
            self.ctx.dispatcher().uninstall(handle);
        }
        tracing::info!("Unloaded feature {}", self.path());
    }

    /// Flip the in-memory switch, loading or unloading to match.
    ///
    /// No-op when the state is unchanged. Does not persist; see
    /// [`apply_toggle`](Self::apply_toggle).
    pub fn set_enabled(&self, new_state: bool) -> Result<()> {
        self.ensure_switchable()?;

        if self.enabled.swap(new_state, Ordering::AcqRel) == new_state {
            return Ok(());
        }

        if new_state {
            if self.is_eligible() {
                self.start_load();
            } else if self.verbose() {
                tracing::debug!(
                    "Feature {} enabled but not eligible in {}",
                    self.path(),
                    self.ctx.host().process()
                );
            }
        } else if !self.always_run() {
            self.stop_load();
        }

        Ok(())
    }

    /// Run the toggle gate, then apply the toggle if it passes.
    pub fn request_toggle(&self, new_state: bool, ctx: &InteractionContext) -> Result<ToggleOutcome> {
        self.ensure_switchable()?;

        let allowed = match self.feature.toggleable() {
            Some(t) => match fault::guard(|| Ok(t.on_before_toggle(new_state, ctx))) {
                Ok(allowed) => allowed,
                Err(cause) => {
                    self.record(FaultKind::Callback, cause);
                    false
                }
            },
            None => true,
        };

        if !allowed {
            tracing::info!("Toggle of {} to {} cancelled", self.path(), new_state);
            return Ok(ToggleOutcome::Cancelled);
        }

        self.apply_toggle(new_state)?;
        Ok(ToggleOutcome::Applied)
    }

    /// Persist the new state, apply it, then fire the completion callback.
    ///
    /// A persistence failure is logged and the toggle still takes effect.
    pub fn apply_toggle(&self, new_state: bool) -> Result<()> {
        self.ensure_switchable()?;

        if let Some(key) = self.config_key() {
            if let Err(e) = self.ctx.config().set_bool(&key, new_state) {
                tracing::warn!("Failed to persist {} for {}: {}", key, self.path(), e);
            }
        }

        self.set_enabled(new_state)?;

        let callback = self.on_toggle_complete.read().clone();
        if let Some(callback) = callback {
            if let Err(cause) = fault::guard(|| {
                callback(new_state);
                Ok(())
            }) {
                self.record(FaultKind::Callback, cause);
            }
        }

        Ok(())
    }

    /// Set the callback fired after every applied toggle.
    pub fn set_toggle_completion_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.on_toggle_complete.write() = Some(Arc::new(callback));
    }

    /// Remove the completion callback.
    pub fn clear_toggle_completion_callback(&self) {
        *self.on_toggle_complete.write() = None;
    }

    /// Run the click action. Failures are recorded, not returned.
    pub fn click(&self, ctx: &InteractionContext) -> Result<()> {
        let clickable = self
            .feature
            .clickable()
            .ok_or_else(|| EngineError::NotClickable(self.path().to_string()))?;

        if let Err(cause) = fault::guard(|| clickable.on_click(ctx)) {
            tracing::error!("Click action of {} failed: {}", self.path(), cause);
            self.record(FaultKind::Click, cause);
        }
        Ok(())
    }

    fn ensure_switchable(&self) -> Result<()> {
        if self.category == FeatureCategory::Api {
            return Err(EngineError::NotToggleable(self.path().to_string()));
        }
        Ok(())
    }

    fn record(&self, kind: FaultKind, cause: FaultCause) {
        self.ctx
            .faults()
            .record(self.path(), self.simple_name(), kind, cause);
    }
}

impl fmt::Debug for FeatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureUnit")
            .field("path", &self.path())
            .field("type", &self.simple_name())
            .field("category", &self.category)
            .field("enabled", &self.is_enabled())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Strip module path and generic arguments from a type name.
pub(crate) fn simple_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Handed to [`Feature::entry`] for installing intercepts.
pub struct LoadContext<'a> {
    unit: &'a FeatureUnit,
    handles: Vec<InterceptionHandle>,
}

impl<'a> LoadContext<'a> {
    fn new(unit: &'a FeatureUnit) -> Self {
        Self {
            unit,
            handles: Vec::new(),
        }
    }

    fn into_handles(self) -> Vec<InterceptionHandle> {
        self.handles
    }

    /// Host the feature is loading into.
    pub fn host(&self) -> &HostContext {
        self.unit.ctx.host()
    }

    /// Engine settings.
    pub fn settings(&self) -> &EngineSettings {
        self.unit.ctx.settings()
    }

    /// Priority used when none is given.
    pub fn default_priority(&self) -> Priority {
        Priority(self.settings().default_priority)
    }

    /// Intercepts installed so far during this load.
    pub fn installed(&self) -> usize {
        self.handles.len()
    }

    /// Install a callback at an explicit phase and priority.
    pub fn hook<F>(
        &mut self,
        operation: &TargetOperation,
        phase: Phase,
        priority: Priority,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.install(operation, phase, priority, Arc::new(callback))
    }

    pub fn hook_before<F>(&mut self, operation: &TargetOperation, callback: F) -> Result<()>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let priority = self.default_priority();
        self.hook(operation, Phase::Before, priority, callback)
    }

    pub fn hook_after<F>(&mut self, operation: &TargetOperation, callback: F) -> Result<()>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let priority = self.default_priority();
        self.hook(operation, Phase::After, priority, callback)
    }

    pub fn hook_before_with_priority<F>(
        &mut self,
        operation: &TargetOperation,
        priority: Priority,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(operation, Phase::Before, priority, callback)
    }

    pub fn hook_after_with_priority<F>(
        &mut self,
        operation: &TargetOperation,
        priority: Priority,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook(operation, Phase::After, priority, callback)
    }

    /// Install a BEFORE callback on every overload of `class#name`.
    /// Returns the number of operations hooked.
    pub fn hook_all_before<F>(&mut self, class: &str, name: &str, callback: F) -> Result<usize>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook_all(class, name, Phase::Before, Arc::new(callback))
    }

    /// Install an AFTER callback on every overload of `class#name`.
    pub fn hook_all_after<F>(&mut self, class: &str, name: &str, callback: F) -> Result<usize>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook_all(class, name, Phase::After, Arc::new(callback))
    }

    fn hook_all(
        &mut self,
        class: &str,
        name: &str,
        phase: Phase,
        callback: InterceptCallback,
    ) -> Result<usize> {
        let operations = self.host().resolver().resolve_all(class, name)?;
        let priority = self.default_priority();
        for operation in &operations {
            self.install(operation, phase, priority, callback.clone())?;
        }
        Ok(operations.len())
    }

    fn install(
        &mut self,
        operation: &TargetOperation,
        phase: Phase,
        priority: Priority,
        callback: InterceptCallback,
    ) -> Result<()> {
        let handle = self.unit.ctx.dispatcher().install_shared(
            operation,
            phase,
            priority,
            &self.unit.owner,
            callback,
        )?;
        self.handles.push(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, MemoryConfigStore};
    use crate::host::{NullBinding, OperationSignature, StaticResolver};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn op() -> TargetOperation {
        TargetOperation::new(OperationSignature::method("app.Chat", "send"))
    }

    fn context(process: ProcessRole) -> Arc<EngineContext> {
        Arc::new(EngineContext::new(
            Arc::new(MemoryConfigStore::new()),
            Arc::new(NullBinding),
            HostContext::new(process, Arc::new(StaticResolver::new([op().signature().clone()]))),
            EngineSettings::default(),
        ))
    }

    struct Echo;

    impl Feature for Echo {
        fn path(&self) -> &str {
            "chat/echo"
        }

        fn entry(&self, ctx: &mut LoadContext<'_>) -> anyhow::Result<()> {
            ctx.hook_after(&op(), |inv| {
                inv.set_result(json!("echo"));
                Ok(())
            })?;
            Ok(())
        }

        fn toggleable(&self) -> Option<&dyn Toggleable> {
            Some(self)
        }
    }

    impl Toggleable for Echo {}

    struct SelfLoading {
        entered: AtomicUsize,
    }

    impl Feature for SelfLoading {
        fn path(&self) -> &str {
            "core/self_loading"
        }

        fn init_once(&self, _host: &HostContext) -> anyhow::Result<bool> {
            Ok(false)
        }

        fn entry(&self, _ctx: &mut LoadContext<'_>) -> anyhow::Result<()> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Both;

    impl Feature for Both {
        fn path(&self) -> &str {
            "bad/both"
        }

        fn entry(&self, _ctx: &mut LoadContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        fn toggleable(&self) -> Option<&dyn Toggleable> {
            Some(self)
        }

        fn clickable(&self) -> Option<&dyn Clickable> {
            Some(self)
        }
    }

    impl Toggleable for Both {}

    impl Clickable for Both {
        fn on_click(&self, _ctx: &InteractionContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_simple_type_name() {
        assert_eq!(simple_type_name("a::b::Feature"), "Feature");
        assert_eq!(simple_type_name("a::Wrapper<b::Inner>"), "Wrapper");
        assert_eq!(simple_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_identity_helpers() {
        let unit = FeatureUnit::new(Echo, context(ProcessRole::MAIN)).unwrap();
        assert_eq!(unit.item_name(), "echo");
        assert_eq!(unit.simple_name(), "Echo");
        assert_eq!(unit.category(), FeatureCategory::Switch);
        assert_eq!(unit.config_key().unwrap(), "setting_switch_value_chat/echo");
        assert!(unit.downcast::<Echo>().is_some());
        assert!(unit.downcast::<Both>().is_none());
    }

    #[test]
    fn test_both_capabilities_rejected() {
        let result = FeatureUnit::new(Both, context(ProcessRole::MAIN));
        assert!(matches!(result, Err(EngineError::InvalidFeature { .. })));
    }

    #[test]
    fn test_load_unload_cycle() {
        let ctx = context(ProcessRole::MAIN);
        let unit = FeatureUnit::new(Echo, ctx.clone()).unwrap();

        assert!(unit.start_load());
        assert!(unit.is_loaded());
        assert_eq!(unit.installed_intercepts(), 1);
        assert_eq!(
            ctx.dispatcher().invoke(&op(), None, vec![], |_| json!("orig")),
            json!("echo")
        );

        unit.stop_load();
        assert!(!unit.is_loaded());
        assert_eq!(unit.installed_intercepts(), 0);
        assert_eq!(ctx.dispatcher().installed_count(&op()), 0);
    }

    #[test]
    fn test_init_once_false_skips_entry() {
        let unit = FeatureUnit::new(
            SelfLoading {
                entered: AtomicUsize::new(0),
            },
            context(ProcessRole::MAIN),
        )
        .unwrap();

        assert!(unit.start_load());
        assert!(unit.is_loaded());
        let feature = unit.downcast::<SelfLoading>().unwrap();
        assert_eq!(feature.entered.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ineligible_load_is_recorded() {
        let ctx = context(ProcessRole::PUSH);
        let unit = FeatureUnit::new(Echo, ctx.clone()).unwrap();

        assert!(!unit.start_load());
        assert!(!unit.is_loaded());
        assert_eq!(ctx.faults().count_for("chat/echo"), 1);
        assert_eq!(ctx.dispatcher().installed_count(&op()), 0);
    }

    #[test]
    fn test_api_feature_is_not_toggleable() {
        let unit = FeatureUnit::new(
            SelfLoading {
                entered: AtomicUsize::new(0),
            },
            context(ProcessRole::MAIN),
        )
        .unwrap();

        assert!(unit.is_enabled());
        assert!(unit.always_run());
        assert!(matches!(unit.set_enabled(false), Err(EngineError::NotToggleable(_))));
        assert!(matches!(
            unit.click(&InteractionContext::default()),
            Err(EngineError::NotClickable(_))
        ));
    }

    #[test]
    fn test_apply_toggle_persists_and_notifies() {
        let ctx = context(ProcessRole::MAIN);
        let unit = FeatureUnit::new(Echo, ctx.clone()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        unit.set_toggle_completion_callback(move |state| sink.lock().push(state));

        unit.apply_toggle(true).unwrap();
        assert!(unit.is_enabled());
        assert!(unit.is_loaded());
        assert!(ctx.config().get_bool("setting_switch_value_chat/echo", false));

        unit.apply_toggle(false).unwrap();
        assert!(!unit.is_loaded());
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn test_interaction_context() {
        let ctx = InteractionContext::new("settings").with("confirmed", json!(true));
        assert_eq!(ctx.origin, "settings");
        assert_eq!(ctx.get("confirmed"), Some(&json!(true)));
    }
}
