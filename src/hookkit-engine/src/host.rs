//! Host integration seams.
//!
//! The engine never patches or resolves host code itself. A host-integration
//! layer supplies:
//! - an [`OperationResolver`] that turns class/name lookups into opaque
//!   [`TargetOperation`] handles,
//! - a [`HostBinding`] that is told when an operation gains its first
//!   intercept or loses its last one, and that routes every host call of an
//!   attached operation through
//!   [`InterceptionDispatcher::invoke`](crate::dispatch::InterceptionDispatcher::invoke).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::process::ProcessRole;
use crate::{EngineError, Result};

/// Kind of callable surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Method,
    Constructor,
}

/// Resolved description of a host operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationSignature {
    /// Owning class or type
    pub class: String,

    /// Method name (`<init>` for constructors)
    pub name: String,

    /// Parameter type names
    #[serde(default)]
    pub params: Vec<String>,

    /// Method or constructor
    pub kind: OperationKind,
}

impl OperationSignature {
    /// Describe a method.
    pub fn method(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            params: Vec::new(),
            kind: OperationKind::Method,
        }
    }

    /// Describe a constructor.
    pub fn constructor(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: "<init>".to_string(),
            params: Vec::new(),
            kind: OperationKind::Constructor,
        }
    }

    /// Set parameter types.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for OperationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}({})", self.class, self.name, self.params.join(", "))
    }
}

/// Opaque, cheaply clonable handle to a host operation.
///
/// Two handles are equal when they describe the same signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetOperation(Arc<OperationSignature>);

impl TargetOperation {
    /// Wrap a resolved signature.
    pub fn new(signature: OperationSignature) -> Self {
        Self(Arc::new(signature))
    }

    /// Underlying signature.
    pub fn signature(&self) -> &OperationSignature {
        &self.0
    }
}

impl From<OperationSignature> for TargetOperation {
    fn from(signature: OperationSignature) -> Self {
        Self::new(signature)
    }
}

impl fmt::Display for TargetOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolves host operations by name.
pub trait OperationResolver: Send + Sync {
    /// Resolve one exact operation.
    fn resolve(&self, signature: &OperationSignature) -> Result<TargetOperation>;

    /// Resolve every overload named `name` on `class`.
    fn resolve_all(&self, class: &str, name: &str) -> Result<Vec<TargetOperation>>;
}

/// Resolver that knows no operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResolver;

impl OperationResolver for NullResolver {
    fn resolve(&self, signature: &OperationSignature) -> Result<TargetOperation> {
        Err(EngineError::OperationNotFound(signature.to_string()))
    }

    fn resolve_all(&self, class: &str, name: &str) -> Result<Vec<TargetOperation>> {
        Err(EngineError::OperationNotFound(format!("{class}#{name}")))
    }
}

/// Resolver over a fixed table of known operations.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    operations: Vec<TargetOperation>,
}

impl StaticResolver {
    /// Create a resolver from a list of signatures.
    pub fn new<I>(signatures: I) -> Self
    where
        I: IntoIterator<Item = OperationSignature>,
    {
        Self {
            operations: signatures.into_iter().map(TargetOperation::new).collect(),
        }
    }
}

impl OperationResolver for StaticResolver {
    fn resolve(&self, signature: &OperationSignature) -> Result<TargetOperation> {
        self.operations
            .iter()
            .find(|op| op.signature() == signature)
            .cloned()
            .ok_or_else(|| EngineError::OperationNotFound(signature.to_string()))
    }

    fn resolve_all(&self, class: &str, name: &str) -> Result<Vec<TargetOperation>> {
        let found: Vec<_> = self
            .operations
            .iter()
            .filter(|op| op.signature().class == class && op.signature().name == name)
            .cloned()
            .collect();

        if found.is_empty() {
            return Err(EngineError::OperationNotFound(format!("{class}#{name}")));
        }
        Ok(found)
    }
}

/// Patch-level contract implemented by the host-integration layer.
pub trait HostBinding: Send + Sync {
    /// First intercept installed on `operation`: start routing its calls
    /// through the dispatcher.
    fn attach(&self, operation: &TargetOperation) -> anyhow::Result<()>;

    /// Last intercept removed from `operation`.
    fn detach(&self, operation: &TargetOperation);
}

/// Binding for hosts that route every call through the dispatcher anyway.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBinding;

impl HostBinding for NullBinding {
    fn attach(&self, _operation: &TargetOperation) -> anyhow::Result<()> {
        Ok(())
    }

    fn detach(&self, _operation: &TargetOperation) {}
}

/// What features see of the host while loading and unloading.
#[derive(Clone)]
pub struct HostContext {
    process: ProcessRole,
    resolver: Arc<dyn OperationResolver>,
}

impl HostContext {
    /// Create a host context.
    pub fn new(process: ProcessRole, resolver: Arc<dyn OperationResolver>) -> Self {
        Self { process, resolver }
    }

    /// Role of the current process.
    pub fn process(&self) -> ProcessRole {
        self.process
    }

    /// Operation resolver.
    pub fn resolver(&self) -> &dyn OperationResolver {
        self.resolver.as_ref()
    }

    /// Resolve one exact operation.
    pub fn resolve(&self, signature: &OperationSignature) -> Result<TargetOperation> {
        self.resolver.resolve(signature)
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

/// One host call flowing through the intercept chain.
#[derive(Debug, Clone)]
pub struct Invocation {
    operation: TargetOperation,

    /// Receiver, `None` for static operations
    pub this: Option<Value>,

    /// Arguments, mutable by BEFORE callbacks
    pub args: Vec<Value>,

    result: Option<Value>,
}

impl Invocation {
    /// Create an invocation with no result yet.
    pub fn new(operation: TargetOperation, this: Option<Value>, args: Vec<Value>) -> Self {
        Self {
            operation,
            this,
            args,
            result: None,
        }
    }

    /// Operation being invoked.
    pub fn operation(&self) -> &TargetOperation {
        &self.operation
    }

    /// Current result.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Set the result. From a BEFORE callback this skips the host's own
    /// operation; from an AFTER callback it replaces its return value.
    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    /// Whether a result is set.
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// Consume into the final result.
    pub fn into_result(self) -> Value {
        self.result.unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> StaticResolver {
        StaticResolver::new([
            OperationSignature::method("app.Net", "send").with_params(["int"]),
            OperationSignature::method("app.Net", "send").with_params(["int", "String"]),
            OperationSignature::constructor("app.Net"),
        ])
    }

    #[test]
    fn test_signature_display() {
        let sig = OperationSignature::method("app.Net", "send").with_params(["int", "String"]);
        assert_eq!(sig.to_string(), "app.Net#send(int, String)");
        assert_eq!(OperationSignature::constructor("app.Net").to_string(), "app.Net#<init>()");
    }

    #[test]
    fn test_target_operation_equality_by_signature() {
        let a = TargetOperation::new(OperationSignature::method("A", "f"));
        let b = TargetOperation::new(OperationSignature::method("A", "f"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_static_resolver() {
        let resolver = table();
        assert_eq!(resolver.resolve_all("app.Net", "send").unwrap().len(), 2);
        assert!(resolver.resolve(&OperationSignature::constructor("app.Net")).is_ok());
        assert!(matches!(
            resolver.resolve_all("app.Net", "recv"),
            Err(EngineError::OperationNotFound(_))
        ));
    }

    #[test]
    fn test_null_resolver() {
        assert!(NullResolver.resolve(&OperationSignature::method("A", "f")).is_err());
    }

    #[test]
    fn test_invocation_result() {
        let op = TargetOperation::new(OperationSignature::method("A", "f"));
        let mut inv = Invocation::new(op, None, vec![json!(1)]);
        assert!(!inv.has_result());
        inv.set_result(json!("done"));
        assert_eq!(inv.result(), Some(&json!("done")));
        assert_eq!(inv.into_result(), json!("done"));
    }
}
