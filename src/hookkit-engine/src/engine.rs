//! Engine facade: shared context, construction and the startup load pass.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{ConfigStore, EngineSettings, MemoryConfigStore};
use crate::dispatch::InterceptionDispatcher;
use crate::fault::FaultRegistry;
use crate::feature::{Feature, FeatureUnit, InteractionContext, ToggleOutcome};
use crate::host::{HostBinding, HostContext, NullBinding, NullResolver, OperationResolver};
use crate::process::ProcessRole;
use crate::registry::{FeatureRegistry, FeatureRegistryBuilder, FeatureStatus};
use crate::{EngineError, Result};

/// Process-scoped state shared by every unit of one engine.
///
/// Each engine owns its own context; nothing here is global, so several
/// engines can coexist in one process.
pub struct EngineContext {
    config: Arc<dyn ConfigStore>,
    dispatcher: Arc<InterceptionDispatcher>,
    faults: Arc<FaultRegistry>,
    host: HostContext,
    settings: EngineSettings,
}

impl EngineContext {
    /// Create a context with a fresh dispatcher and fault log.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        binding: Arc<dyn HostBinding>,
        host: HostContext,
        settings: EngineSettings,
    ) -> Self {
        let faults = Arc::new(FaultRegistry::new());
        let dispatcher = Arc::new(InterceptionDispatcher::new(binding, faults.clone()));
        Self {
            config,
            dispatcher,
            faults,
            host,
            settings,
        }
    }

    pub fn config(&self) -> &dyn ConfigStore {
        self.config.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<InterceptionDispatcher> {
        &self.dispatcher
    }

    pub fn faults(&self) -> &Arc<FaultRegistry> {
        &self.faults
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("host", &self.host)
            .field("settings", &self.settings)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Why the startup pass did not load a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The unit does not target the current process
    NotEligible,
    /// The persisted switch is off
    Disabled,
}

/// A unit the startup pass left unloaded on purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFeature {
    pub path: String,
    pub reason: SkipReason,
}

/// Outcome of [`FeatureEngine::startup`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupReport {
    /// Units loaded successfully
    pub loaded: Vec<String>,
    /// Units whose load failed (see the fault log)
    pub failed: Vec<String>,
    /// Units not attempted
    pub skipped: Vec<SkippedFeature>,
}

impl StartupReport {
    /// Whether every attempted load succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Skip reason recorded for `path`, if any.
    pub fn skip_reason(&self, path: &str) -> Option<SkipReason> {
        self.skipped.iter().find(|s| s.path == path).map(|s| s.reason)
    }
}

type Registration = Box<dyn FnOnce(FeatureRegistryBuilder) -> Result<FeatureRegistryBuilder>>;

/// Builder for [`FeatureEngine`].
pub struct FeatureEngineBuilder {
    process: ProcessRole,
    config: Option<Arc<dyn ConfigStore>>,
    resolver: Option<Arc<dyn OperationResolver>>,
    binding: Option<Arc<dyn HostBinding>>,
    settings: Option<EngineSettings>,
    registrations: Vec<Registration>,
}

impl Default for FeatureEngineBuilder {
    fn default() -> Self {
        Self {
            process: ProcessRole::MAIN,
            config: None,
            resolver: None,
            binding: None,
            settings: None,
            registrations: Vec::new(),
        }
    }
}

impl FeatureEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Role of the current process.
    pub fn process(mut self, role: ProcessRole) -> Self {
        self.process = role;
        self
    }

    /// Classify the current process from its OS name.
    pub fn process_name(mut self, name: &str) -> Self {
        self.process = ProcessRole::from_process_name(name);
        self
    }

    /// Persisted configuration. Defaults to an in-memory store.
    pub fn config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    /// Operation resolver. Defaults to one that resolves nothing.
    pub fn resolver(mut self, resolver: Arc<dyn OperationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Host binding. Defaults to a no-op binding.
    pub fn binding(mut self, binding: Arc<dyn HostBinding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Override settings instead of reading them from the config store.
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Register a feature.
    pub fn feature<T: Feature>(mut self, feature: T) -> Self {
        self.registrations
            .push(Box::new(move |builder| builder.register(feature)));
        self
    }

    /// Build the engine. Nothing is loaded until [`FeatureEngine::startup`].
    pub fn build(self) -> Result<FeatureEngine> {
        let config: Arc<dyn ConfigStore> = self
            .config
            .unwrap_or_else(|| Arc::new(MemoryConfigStore::new()));
        let settings = self
            .settings
            .unwrap_or_else(|| EngineSettings::from_store(config.as_ref()));
        let resolver = self.resolver.unwrap_or_else(|| Arc::new(NullResolver));
        let binding = self.binding.unwrap_or_else(|| Arc::new(NullBinding));

        let ctx = Arc::new(EngineContext::new(
            config,
            binding,
            HostContext::new(self.process, resolver),
            settings,
        ));

        let mut builder = FeatureRegistry::builder(ctx.clone());
        for registration in self.registrations {
            builder = registration(builder)?;
        }

        Ok(FeatureEngine {
            registry: builder.build(),
            ctx,
        })
    }
}

/// The feature engine.
pub struct FeatureEngine {
    ctx: Arc<EngineContext>,
    registry: FeatureRegistry,
}

impl FeatureEngine {
    pub fn builder() -> FeatureEngineBuilder {
        FeatureEngineBuilder::new()
    }

    /// Restore persisted switches and load every unit that should run here.
    ///
    /// Api units load whenever eligible. Switch and clickable units load when
    /// eligible and either enabled or `always_run`. Every unit's switch is
    /// restored, eligible or not, so its in-memory state matches the store.
    pub fn startup(&self) -> StartupReport {
        let mut report = StartupReport::default();
        let verbose = self.ctx.settings().verbose_log;

        for unit in self.registry.all() {
            let enabled = unit.restore_enabled();

            if !unit.is_eligible() {
                if verbose {
                    tracing::debug!(
                        "Skipping {}: targets {}, running in {}",
                        unit.path(),
                        unit.target_process(),
                        self.ctx.host().process()
                    );
                }
                report.skipped.push(SkippedFeature {
                    path: unit.path().to_string(),
                    reason: SkipReason::NotEligible,
                });
                continue;
            }

            if !enabled && !unit.always_run() {
                report.skipped.push(SkippedFeature {
                    path: unit.path().to_string(),
                    reason: SkipReason::Disabled,
                });
                continue;
            }

            if unit.start_load() {
                report.loaded.push(unit.path().to_string());
            } else {
                report.failed.push(unit.path().to_string());
            }
        }

        tracing::info!(
            "Startup in {}: {} loaded, {} failed, {} skipped",
            self.ctx.host().process(),
            report.loaded.len(),
            report.failed.len(),
            report.skipped.len()
        );

        report
    }

    /// User toggle by path: gate, persist, apply.
    pub fn toggle(
        &self,
        path: &str,
        new_state: bool,
        ctx: &InteractionContext,
    ) -> Result<ToggleOutcome> {
        self.require(path)?.request_toggle(new_state, ctx)
    }

    /// Apply a previously gated toggle by path.
    pub fn apply_toggle(&self, path: &str, new_state: bool) -> Result<()> {
        self.require(path)?.apply_toggle(new_state)
    }

    /// Run a click action by path.
    pub fn click(&self, path: &str, ctx: &InteractionContext) -> Result<()> {
        self.require(path)?.click(ctx)
    }

    /// Look up a unit by path.
    pub fn find(&self, path: &str) -> Option<&Arc<FeatureUnit>> {
        self.registry.find_by_path(path)
    }

    fn require(&self, path: &str) -> Result<&Arc<FeatureUnit>> {
        self.registry
            .find_by_path(path)
            .ok_or_else(|| EngineError::NotFound(path.to_string()))
    }

    /// Diagnostics snapshot of every unit.
    pub fn status(&self) -> Vec<FeatureStatus> {
        self.registry.status()
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn dispatcher(&self) -> &Arc<InterceptionDispatcher> {
        self.ctx.dispatcher()
    }

    pub fn faults(&self) -> &Arc<FaultRegistry> {
        self.ctx.faults()
    }

    pub fn settings(&self) -> &EngineSettings {
        self.ctx.settings()
    }
}

impl std::fmt::Debug for FeatureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureEngine")
            .field("ctx", &self.ctx)
            .field("features", &self.registry.len())
            .finish()
    }
}
