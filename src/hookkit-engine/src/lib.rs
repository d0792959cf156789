//! # Hookkit Engine
//!
//! Feature-unit lifecycle and interception engine for a host process the
//! engine does not own.
//!
//! ## Features
//!
//! - **Feature units**: independently toggleable capabilities with a guarded
//!   load/unload state machine
//! - **Interception**: BEFORE/AFTER callbacks on host operations, priority
//!   ordered with onion nesting
//! - **Fault isolation**: every callback, load, unload and click runs behind
//!   its own boundary; failures land in an append-only fault log
//! - **Process roles**: features declare which host processes they run in
//! - **Persisted switches**: on/off state read from and written to a
//!   pluggable config store
//!
//! ## Host integration
//!
//! The engine never patches host code. The host-integration layer supplies an
//! [`OperationResolver`] and a [`HostBinding`], and routes every call of an
//! attached operation through [`InterceptionDispatcher::invoke`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use hookkit_engine::{
//!     Feature, FeatureEngine, LoadContext, OperationSignature, StaticResolver, TargetOperation,
//! };
//! use serde_json::json;
//!
//! struct Greeter;
//!
//! impl Feature for Greeter {
//!     fn path(&self) -> &str {
//!         "chat/greeter"
//!     }
//!
//!     fn entry(&self, ctx: &mut LoadContext<'_>) -> anyhow::Result<()> {
//!         let op = ctx.host().resolve(&OperationSignature::method("app.Chat", "greet"))?;
//!         ctx.hook_after(&op, |inv| {
//!             inv.set_result(json!("hello from hookkit"));
//!             Ok(())
//!         })?;
//!         Ok(())
//!     }
//! }
//!
//! let greet = OperationSignature::method("app.Chat", "greet");
//! let engine = FeatureEngine::builder()
//!     .resolver(Arc::new(StaticResolver::new([greet.clone()])))
//!     .feature(Greeter)
//!     .build()?;
//!
//! let report = engine.startup();
//! assert_eq!(report.loaded, vec!["chat/greeter".to_string()]);
//!
//! let result = engine
//!     .dispatcher()
//!     .invoke(&TargetOperation::new(greet), None, vec![], |_| json!("hi"));
//! assert_eq!(result, json!("hello from hookkit"));
//! # Ok::<(), hookkit_engine::EngineError>(())
//! ```

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fault;
pub mod feature;
pub mod host;
pub mod process;
pub mod registry;

// Re-exports for convenience
pub use config::{ConfigStore, EngineSettings, MemoryConfigStore, TomlConfigStore};
pub use dispatch::{
    FeatureOwner, InterceptCallback, InterceptInfo, InterceptionDispatcher, InterceptionHandle,
    Phase, Priority,
};
pub use engine::{
    EngineContext, FeatureEngine, FeatureEngineBuilder, SkipReason, SkippedFeature, StartupReport,
};
pub use error::{EngineError, Result};
pub use fault::{FaultCause, FaultKind, FaultRecord, FaultRegistry};
pub use feature::{
    Clickable, Feature, FeatureCategory, FeatureUnit, InteractionContext, LoadContext,
    ToggleCallback, ToggleOutcome, Toggleable,
};
pub use host::{
    HostBinding, HostContext, Invocation, NullBinding, NullResolver, OperationKind,
    OperationResolver, OperationSignature, StaticResolver, TargetOperation,
};
pub use process::ProcessRole;
pub use registry::{FeatureRegistry, FeatureRegistryBuilder, FeatureStatus};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
