//! Fake host shared by the integration suites.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use hookkit_engine::{HostBinding, OperationSignature, StaticResolver, TargetOperation};

/// Class every fake operation lives on.
pub const HOST_CLASS: &str = "app.Messenger";

/// Records attach/detach calls and can be told to reject operations.
#[derive(Default)]
pub struct FakeHost {
    attached: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
    rejected: Mutex<HashSet<String>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `attach` fail for `operation`.
    pub fn reject(&self, operation: &TargetOperation) {
        self.rejected.lock().insert(operation.to_string());
    }

    pub fn attach_count(&self) -> usize {
        self.attached.lock().len()
    }

    pub fn detach_count(&self) -> usize {
        self.detached.lock().len()
    }

    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().clone()
    }
}

impl HostBinding for FakeHost {
    fn attach(&self, operation: &TargetOperation) -> anyhow::Result<()> {
        let key = operation.to_string();
        if self.rejected.lock().contains(&key) {
            anyhow::bail!("host refused to patch {key}");
        }
        self.attached.lock().push(key);
        Ok(())
    }

    fn detach(&self, operation: &TargetOperation) {
        self.detached.lock().push(operation.to_string());
    }
}

pub fn signature(name: &str) -> OperationSignature {
    OperationSignature::method(HOST_CLASS, name)
}

pub fn operation(name: &str) -> TargetOperation {
    TargetOperation::new(signature(name))
}

/// Resolver knowing `send(String)`, `send(String, int)`, `receive` and `render`.
pub fn resolver() -> Arc<StaticResolver> {
    Arc::new(StaticResolver::new([
        signature("send").with_params(["String"]),
        signature("send").with_params(["String", "int"]),
        signature("receive"),
        signature("render"),
    ]))
}
