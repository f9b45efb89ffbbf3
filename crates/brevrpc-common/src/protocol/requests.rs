use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub type RequestId = u64;

/// Builds the key under which a service version is registered and looked up.
pub fn service_key(interface: &str, version: &str) -> String {
    format!("{}#{}", interface, version)
}

/// Builds the dispatch key of a method: its name followed by its parameter
/// type names, e.g. `hello_rpc(String,String)`.
pub fn method_signature<S: AsRef<str>>(method: &str, param_types: &[S]) -> String {
    let params: Vec<&str> = param_types.iter().map(|p| p.as_ref()).collect();
    format!("{}({})", method, params.join(","))
}

/// A call to one method of one service version.
///
/// `args` holds the argument tuple, already encoded with the codec named by
/// the carrying frame's serialization tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub interface: String,
    pub method: String,
    pub param_types: Vec<String>,
    #[serde(with = "serde_bytes")]
    pub args: Vec<u8>,
    pub version: String,
}

impl Request {
    pub fn new(
        interface: impl Into<String>,
        method: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Request {
            interface: interface.into(),
            method: method.into(),
            param_types: Vec::new(),
            args: Vec::new(),
            version: version.into(),
        }
    }

    pub fn with_param_types<S: Into<String>>(mut self, param_types: impl IntoIterator<Item = S>) -> Self {
        self.param_types = param_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args(mut self, args: Vec<u8>) -> Self {
        self.args = args;
        self
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, &self.version)
    }

    pub fn signature(&self) -> String {
        method_signature(&self.method, &self.param_types)
    }
}

/// Monotonic request id source.
///
/// Ids start at 1 and are never reused for the lifetime of the generator.
/// Calls and heartbeats of one client draw from the same generator so that
/// their ids never collide in the correlation table.
#[derive(Debug)]
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> RequestId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
