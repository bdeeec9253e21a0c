//! Messages exchanged between the host and extension workers.
//!
//! Host → worker calls carry a request id; the worker answers with a
//! reply carrying the same id. Workers may also ask the host to perform a
//! network request (`FETCH`), answered with a `RESULT`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::ExtensionKey;
use crate::fetcher::ExtensionCode;

/// Correlates a call with its reply.
pub type RequestId = u64;

// ─── Calls ──────────────────────────────────────────────────────────────

/// Options passed to a worker's `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeOptions {
    /// Route outbound requests through the host's proxy bridge.
    #[serde(rename = "bypassCORS", default)]
    pub bypass_cors: bool,
}

/// Outcome of `initialize` as reported by the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResult {
    pub validated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InitializeResult {
    pub fn accepted() -> Self {
        Self {
            validated: true,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            validated: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug)]
pub enum WorkerCall {
    Initialize {
        key: ExtensionKey,
        code: ExtensionCode,
        options: InitializeOptions,
    },
    Validate,
}

#[derive(Debug)]
pub enum HostMessage {
    Call {
        request_id: RequestId,
        call: WorkerCall,
    },
    Terminate,
}

#[derive(Debug)]
pub enum WorkerReply {
    Initialized(InitializeResult),
    Validated(bool),
    Failed(String),
}

#[derive(Debug)]
pub enum WorkerMessage {
    Reply {
        request_id: RequestId,
        reply: WorkerReply,
    },
    Fetch(FetchRequest),
}

// ─── Proxy bridge ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub request_id: RequestId,
    pub url: String,
    #[serde(default)]
    pub options: FetchOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchOutcome {
    Response {
        ok: bool,
        status: u16,
        text: String,
        json: Value,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub outcome: FetchOutcome,
}

/// Wire form of bridge traffic as seen by the guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum BridgeMessage {
    Fetch(FetchRequest),
    Result(FetchResult),
}
