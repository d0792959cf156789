//! Intercept installation and dispatch.
//!
//! Every target operation maps to an immutable, priority-sorted snapshot of
//! its intercepts. `install`/`uninstall` build a new snapshot and swap it in
//! under the chain lock; `invoke` clones the current snapshot and releases
//! the lock before running anything, so callbacks never run under a lock and
//! readers never observe a half-updated chain.
//!
//! Host attach/detach calls are serialized by a separate binding lock and
//! never run under the chain lock, so a binding may invoke intercepted
//! operations while it patches the host.
//!
//! # Ordering
//!
//! Within one invocation, BEFORE callbacks run by descending priority (ties in
//! install order). AFTER callbacks walk the same order backwards, so a
//! feature's before/after pair brackets every lower-priority feature.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::fault::{self, FaultKind, FaultRegistry};
use crate::host::{HostBinding, Invocation, TargetOperation};
use crate::{EngineError, Result};

/// When a callback runs relative to the host operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// Intercept priority - higher values run first in the BEFORE phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs last before, first after.
    pub const LOWEST: Self = Self(-10_000);

    /// Default priority.
    pub const DEFAULT: Self = Self(50);

    /// Runs first before, last after.
    pub const HIGHEST: Self = Self(10_000);

    /// Get the raw priority value.
    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Callback run for every invocation of an intercepted operation.
pub type InterceptCallback = Arc<dyn Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug)]
struct OwnerInner {
    path: String,
    type_name: String,
    live: AtomicBool,
}

/// Identity of the feature that owns an intercept.
///
/// Callbacks only run while their owner is live; feature units flip this as
/// they load and unload.
#[derive(Debug, Clone)]
pub struct FeatureOwner(Arc<OwnerInner>);

impl FeatureOwner {
    /// Create a live owner.
    pub fn new(path: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self(Arc::new(OwnerInner {
            path: path.into(),
            type_name: type_name.into(),
            live: AtomicBool::new(true),
        }))
    }

    /// Feature path.
    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Simple type name of the feature.
    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    /// Whether the owner is loading or loaded.
    pub fn is_live(&self) -> bool {
        self.0.live.load(Ordering::Acquire)
    }

    pub(crate) fn set_live(&self, live: bool) {
        self.0.live.store(live, Ordering::Release);
    }
}

struct Intercept {
    id: u64,
    operation: TargetOperation,
    phase: Phase,
    priority: Priority,
    owner: FeatureOwner,
    callback: InterceptCallback,
    active: AtomicBool,
}

impl Intercept {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Intercept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intercept")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("phase", &self.phase)
            .field("priority", &self.priority)
            .field("owner", &self.owner.path())
            .field("active", &self.is_active())
            .finish()
    }
}

/// A live installation. Returned by [`InterceptionDispatcher::install`] and
/// consumed by [`InterceptionDispatcher::uninstall`].
#[derive(Debug)]
pub struct InterceptionHandle {
    intercept: Arc<Intercept>,
    table: Weak<Table>,
}

impl InterceptionHandle {
    /// Dispatcher-unique id.
    pub fn id(&self) -> u64 {
        self.intercept.id
    }

    /// Intercepted operation.
    pub fn operation(&self) -> &TargetOperation {
        &self.intercept.operation
    }

    /// Phase.
    pub fn phase(&self) -> Phase {
        self.intercept.phase
    }

    /// Priority.
    pub fn priority(&self) -> Priority {
        self.intercept.priority
    }

    /// Owning feature.
    pub fn owner(&self) -> &FeatureOwner {
        &self.intercept.owner
    }

    /// Whether the handle is still installed.
    pub fn is_active(&self) -> bool {
        self.intercept.is_active()
    }

    /// Remove this intercept. Invocations already running it finish; later
    /// invocations never reach it. Returns `false` if it was already removed
    /// or its dispatcher is gone.
    pub fn uninstall(&self) -> bool {
        if !self.intercept.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.table.upgrade() {
            Some(table) => {
                table.remove(&self.intercept);
                true
            }
            None => false,
        }
    }
}

/// Read-only view of an installed intercept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptInfo {
    pub id: u64,
    pub phase: Phase,
    pub priority: Priority,
    pub owner: String,
}

type Chain = Arc<[Arc<Intercept>]>;

/// Per-operation chains plus the binding notified when a chain appears or
/// empties.
///
/// Lock order: `attached` before `chains`. An operation is in `attached`
/// exactly while it has a chain.
struct Table {
    chains: RwLock<HashMap<TargetOperation, Chain>>,
    attached: Mutex<HashSet<TargetOperation>>,
    binding: Arc<dyn HostBinding>,
}

impl Table {
    fn remove(&self, intercept: &Intercept) {
        let operation = &intercept.operation;
        let mut attached = self.attached.lock();

        let emptied = {
            let mut chains = self.chains.write();
            match chains.get(operation) {
                Some(chain) => {
                    let remaining: Vec<Arc<Intercept>> = chain
                        .iter()
                        .filter(|i| i.id != intercept.id)
                        .cloned()
                        .collect();

                    if remaining.is_empty() {
                        chains.remove(operation);
                        true
                    } else {
                        chains.insert(operation.clone(), remaining.into());
                        false
                    }
                }
                None => false,
            }
        };

        if emptied && attached.remove(operation) {
            self.binding.detach(operation);
        }

        tracing::debug!(
            "Uninstalled {} intercept #{} on {} for {}",
            intercept.phase,
            intercept.id,
            operation,
            intercept.owner.path()
        );
    }
}

/// Installs intercepts and runs them around host invocations.
pub struct InterceptionDispatcher {
    table: Arc<Table>,
    faults: Arc<FaultRegistry>,
    next_id: AtomicU64,
}

impl InterceptionDispatcher {
    /// Create a dispatcher over a host binding.
    pub fn new(binding: Arc<dyn HostBinding>, faults: Arc<FaultRegistry>) -> Self {
        Self {
            table: Arc::new(Table {
                chains: RwLock::new(HashMap::new()),
                attached: Mutex::new(HashSet::new()),
                binding,
            }),
            faults,
            next_id: AtomicU64::new(1),
        }
    }

    /// Fault log this dispatcher records into.
    pub fn faults(&self) -> &Arc<FaultRegistry> {
        &self.faults
    }

    /// Install a callback on `operation`.
    pub fn install<F>(
        &self,
        operation: &TargetOperation,
        phase: Phase,
        priority: Priority,
        owner: &FeatureOwner,
        callback: F,
    ) -> Result<InterceptionHandle>
    where
        F: Fn(&mut Invocation) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.install_shared(operation, phase, priority, owner, Arc::new(callback))
    }

    /// Install an already shared callback on `operation`.
    pub fn install_shared(
        &self,
        operation: &TargetOperation,
        phase: Phase,
        priority: Priority,
        owner: &FeatureOwner,
        callback: InterceptCallback,
    ) -> Result<InterceptionHandle> {
        let intercept = Arc::new(Intercept {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            operation: operation.clone(),
            phase,
            priority,
            owner: owner.clone(),
            callback,
            active: AtomicBool::new(true),
        });

        let mut attached = self.table.attached.lock();
        if !attached.contains(operation) {
            self.table
                .binding
                .attach(operation)
                .map_err(|e| EngineError::host_error(operation.to_string(), format!("{e:#}")))?;
            attached.insert(operation.clone());
        }

        {
            let mut chains = self.table.chains.write();
            let mut entries: Vec<Arc<Intercept>> = chains
                .get(operation)
                .map(|chain| chain.to_vec())
                .unwrap_or_default();
            entries.push(intercept.clone());
            entries.sort_by_key(|i| (Reverse(i.priority), i.id));
            chains.insert(operation.clone(), entries.into());
        }
        drop(attached);

        tracing::debug!(
            "Installed {} intercept #{} on {} for {} (priority {})",
            phase,
            intercept.id,
            operation,
            owner.path(),
            priority.value()
        );

        Ok(InterceptionHandle {
            intercept,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Remove an intercept; same as [`InterceptionHandle::uninstall`].
    pub fn uninstall(&self, handle: &InterceptionHandle) -> bool {
        handle.uninstall()
    }

    /// Run `operation` through its intercept chain.
    ///
    /// `original` is the host's own implementation; it is skipped when a
    /// BEFORE callback sets a result. Callback failures are recorded and
    /// never reach the caller.
    pub fn invoke<F>(
        &self,
        operation: &TargetOperation,
        this: Option<Value>,
        args: Vec<Value>,
        original: F,
    ) -> Value
    where
        F: FnOnce(&Invocation) -> Value,
    {
        let chain = self.snapshot(operation);
        let mut invocation = Invocation::new(operation.clone(), this, args);

        for intercept in chain.iter().filter(|i| i.phase == Phase::Before) {
            self.run(intercept, &mut invocation);
        }

        if !invocation.has_result() {
            let value = original(&invocation);
            invocation.set_result(value);
        }

        for intercept in chain.iter().rev().filter(|i| i.phase == Phase::After) {
            self.run(intercept, &mut invocation);
        }

        invocation.into_result()
    }

    fn run(&self, intercept: &Intercept, invocation: &mut Invocation) {
        // Re-checked per call: the snapshot may predate an uninstall or unload.
        if !intercept.is_active() || !intercept.owner.is_live() {
            return;
        }

        if let Err(cause) = fault::guard(|| (intercept.callback)(invocation)) {
            self.faults.record(
                intercept.owner.path(),
                intercept.owner.type_name(),
                FaultKind::Callback,
                cause,
            );
        }
    }

    fn snapshot(&self, operation: &TargetOperation) -> Chain {
        self.table
            .chains
            .read()
            .get(operation)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Whether any intercept is installed on `operation`.
    pub fn is_intercepted(&self, operation: &TargetOperation) -> bool {
        self.table.chains.read().contains_key(operation)
    }

    /// Intercepts on `operation` in BEFORE-phase order.
    pub fn installed(&self, operation: &TargetOperation) -> Vec<InterceptInfo> {
        self.snapshot(operation)
            .iter()
            .map(|i| InterceptInfo {
                id: i.id,
                phase: i.phase,
                priority: i.priority,
                owner: i.owner.path().to_string(),
            })
            .collect()
    }

    /// Number of intercepts installed on `operation`.
    pub fn installed_count(&self, operation: &TargetOperation) -> usize {
        self.snapshot(operation).len()
    }

    /// Number of intercepts installed by one feature, across all operations.
    pub fn count_for_owner(&self, path: &str) -> usize {
        self.table
            .chains
            .read()
            .values()
            .flat_map(|chain| chain.iter())
            .filter(|i| i.owner.path() == path)
            .count()
    }

    /// Every operation that currently has intercepts.
    pub fn operations(&self) -> Vec<TargetOperation> {
        self.table.chains.read().keys().cloned().collect()
    }
}

impl fmt::Debug for InterceptionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionDispatcher")
            .field("operations", &self.table.chains.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{NullBinding, OperationSignature};
    use parking_lot::Mutex;
    use serde_json::json;

    fn dispatcher() -> InterceptionDispatcher {
        InterceptionDispatcher::new(Arc::new(NullBinding), Arc::new(FaultRegistry::new()))
    }

    fn op(name: &str) -> TargetOperation {
        TargetOperation::new(OperationSignature::method("app.Host", name))
    }

    #[test]
    fn test_priority_default() {
        assert_eq!(Priority::default().value(), 50);
        assert!(Priority::HIGHEST > Priority::DEFAULT);
    }

    #[test]
    fn test_invoke_without_intercepts_runs_original() {
        let d = dispatcher();
        let result = d.invoke(&op("f"), None, vec![json!(2)], |inv| json!(inv.args[0].as_i64().unwrap() * 2));
        assert_eq!(result, json!(4));
    }

    #[test]
    fn test_before_can_rewrite_args() {
        let d = dispatcher();
        let owner = FeatureOwner::new("a", "A");
        d.install(&op("f"), Phase::Before, Priority::DEFAULT, &owner, |inv| {
            inv.args[0] = json!(10);
            Ok(())
        })
        .unwrap();

        let result = d.invoke(&op("f"), None, vec![json!(2)], |inv| inv.args[0].clone());
        assert_eq!(result, json!(10));
    }

    #[test]
    fn test_before_result_skips_original() {
        let d = dispatcher();
        let owner = FeatureOwner::new("a", "A");
        d.install(&op("f"), Phase::Before, Priority::DEFAULT, &owner, |inv| {
            inv.set_result(json!("short-circuit"));
            Ok(())
        })
        .unwrap();

        let called = AtomicBool::new(false);
        let result = d.invoke(&op("f"), None, vec![], |_| {
            called.store(true, Ordering::SeqCst);
            json!("original")
        });
        assert_eq!(result, json!("short-circuit"));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_after_can_replace_result() {
        let d = dispatcher();
        let owner = FeatureOwner::new("a", "A");
        d.install(&op("f"), Phase::After, Priority::DEFAULT, &owner, |inv| {
            let n = inv.result().and_then(Value::as_i64).unwrap_or(0);
            inv.set_result(json!(n + 1));
            Ok(())
        })
        .unwrap();

        assert_eq!(d.invoke(&op("f"), None, vec![], |_| json!(41)), json!(42));
    }

    #[test]
    fn test_ties_keep_install_order() {
        let d = dispatcher();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        for name in ["first", "second", "third"] {
            let owner = FeatureOwner::new(name, name);
            let before = order.clone();
            handles.push(
                d.install(&op("f"), Phase::Before, Priority::DEFAULT, &owner, move |_| {
                    before.lock().push(format!("before:{name}"));
                    Ok(())
                })
                .unwrap(),
            );
            let after = order.clone();
            handles.push(
                d.install(&op("f"), Phase::After, Priority::DEFAULT, &owner, move |_| {
                    after.lock().push(format!("after:{name}"));
                    Ok(())
                })
                .unwrap(),
            );
        }

        d.invoke(&op("f"), None, vec![], |_| Value::Null);
        assert_eq!(
            *order.lock(),
            vec![
                "before:first",
                "before:second",
                "before:third",
                "after:third",
                "after:second",
                "after:first",
            ]
        );
    }

    #[test]
    fn test_uninstall_is_idempotent_and_clears_chain() {
        let d = dispatcher();
        let owner = FeatureOwner::new("a", "A");
        let handle = d
            .install(&op("f"), Phase::Before, Priority::DEFAULT, &owner, |_| Ok(()))
            .unwrap();

        assert!(d.is_intercepted(&op("f")));
        assert!(d.uninstall(&handle));
        assert!(!handle.is_active());
        assert!(!d.uninstall(&handle));
        assert!(!d.is_intercepted(&op("f")));
        assert_eq!(d.installed_count(&op("f")), 0);
    }

    #[test]
    fn test_handle_uninstalls_itself() {
        let d = dispatcher();
        let owner = FeatureOwner::new("a", "A");
        let handle = d
            .install(&op("f"), Phase::After, Priority::DEFAULT, &owner, |_| Ok(()))
            .unwrap();

        assert!(handle.uninstall());
        assert!(!d.uninstall(&handle));
        assert!(!d.is_intercepted(&op("f")));
    }

    #[test]
    fn test_handle_outliving_dispatcher() {
        let owner = FeatureOwner::new("a", "A");
        let handle = {
            let d = dispatcher();
            d.install(&op("f"), Phase::Before, Priority::DEFAULT, &owner, |_| Ok(()))
                .unwrap()
        };
        assert!(!handle.uninstall());
        assert!(!handle.is_active());
    }

    #[test]
    fn test_dead_owner_is_skipped() {
        let d = dispatcher();
        let owner = FeatureOwner::new("a", "A");
        let hits = Arc::new(AtomicU64::new(0));
        let counter = hits.clone();
        d.install(&op("f"), Phase::Before, Priority::DEFAULT, &owner, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        d.invoke(&op("f"), None, vec![], |_| Value::Null);
        owner.set_live(false);
        d.invoke(&op("f"), None, vec![], |_| Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_error_is_recorded_not_propagated() {
        let d = dispatcher();
        let owner = FeatureOwner::new("broken", "Broken");
        d.install(&op("f"), Phase::After, Priority::DEFAULT, &owner, |_| {
            anyhow::bail!("callback exploded")
        })
        .unwrap();

        let result = d.invoke(&op("f"), None, vec![], |_| json!("ok"));
        assert_eq!(result, json!("ok"));

        let faults = d.faults().for_feature("broken");
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind, FaultKind::Callback);
        assert_eq!(faults[0].cause.message(), "callback exploded");
    }

    #[test]
    fn test_installed_view_and_owner_count() {
        let d = dispatcher();
        let a = FeatureOwner::new("a", "A");
        let b = FeatureOwner::new("b", "B");
        d.install(&op("f"), Phase::Before, Priority(10), &a, |_| Ok(())).unwrap();
        d.install(&op("f"), Phase::Before, Priority(90), &b, |_| Ok(())).unwrap();
        d.install(&op("g"), Phase::After, Priority(10), &a, |_| Ok(())).unwrap();

        let view = d.installed(&op("f"));
        assert_eq!(view[0].owner, "b");
        assert_eq!(view[1].owner, "a");
        assert_eq!(d.count_for_owner("a"), 2);
        assert_eq!(d.operations().len(), 2);
    }
}
