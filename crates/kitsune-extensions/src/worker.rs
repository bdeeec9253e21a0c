//! Extension workers.
//!
//! Every extension runs on its own OS thread that owns an
//! [`ExtensionRuntime`]. The host talks to it only through channels:
//! calls carry a request id and the matching reply resolves the caller's
//! future. A router task on the tokio runtime dispatches replies and
//! forwards `FETCH` requests of bridged workers to the [`ProxyBridge`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::descriptor::{ExtensionDescriptor, ExtensionKey};
use crate::error::ExtensionError;
use crate::fetcher::ExtensionCode;
use crate::protocol::{
    FetchOptions, FetchRequest, FetchResult, HostMessage, InitializeOptions, InitializeResult,
    RequestId, WorkerCall, WorkerMessage, WorkerReply,
};
use crate::proxy::ProxyBridge;

/// Code execution inside a worker thread.
pub trait ExtensionRuntime {
    fn initialize(
        &mut self,
        key: &ExtensionKey,
        code: ExtensionCode,
        options: InitializeOptions,
    ) -> Result<InitializeResult, ExtensionError>;

    fn validate(&mut self) -> Result<bool, ExtensionError>;
}

/// Builds the runtime of a new worker, on the worker's own thread.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, key: &ExtensionKey, bridge: Option<BridgeEndpoint>)
        -> Box<dyn ExtensionRuntime>;
}

// ─── Bridge endpoint ────────────────────────────────────────────────────

/// Worker side of the proxy bridge. Blocks the worker thread until the
/// host answers.
pub struct BridgeEndpoint {
    key: ExtensionKey,
    outbound: mpsc::UnboundedSender<WorkerMessage>,
    results: std::sync::mpsc::Receiver<FetchResult>,
    next_request: RequestId,
}

impl BridgeEndpoint {
    fn new(
        key: ExtensionKey,
        outbound: mpsc::UnboundedSender<WorkerMessage>,
        results: std::sync::mpsc::Receiver<FetchResult>,
    ) -> Self {
        Self {
            key,
            outbound,
            results,
            next_request: 0,
        }
    }

    pub fn fetch(
        &mut self,
        url: String,
        options: FetchOptions,
    ) -> Result<FetchResult, ExtensionError> {
        self.next_request += 1;
        let request_id = self.next_request;
        self.outbound
            .send(WorkerMessage::Fetch(FetchRequest {
                request_id,
                url,
                options,
            }))
            .map_err(|_| ExtensionError::WorkerGone(self.key.to_string()))?;

        loop {
            let result = self
                .results
                .recv()
                .map_err(|_| ExtensionError::WorkerGone(self.key.to_string()))?;
            if result.request_id == request_id {
                return Ok(result);
            }
        }
    }
}

// ─── Handle ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingCalls {
    closed: bool,
    calls: HashMap<RequestId, oneshot::Sender<WorkerReply>>,
}

struct HandleInner {
    id: Uuid,
    key: ExtensionKey,
    tx: mpsc::UnboundedSender<HostMessage>,
    pending: Arc<Mutex<PendingCalls>>,
    next_request: AtomicU64,
}

/// Cloneable remote proxy to one worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    fn new(
        key: ExtensionKey,
        tx: mpsc::UnboundedSender<HostMessage>,
        pending: Arc<Mutex<PendingCalls>>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                key,
                tx,
                pending,
                next_request: AtomicU64::new(1),
            }),
        }
    }

    /// Unique per spawned worker.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn key(&self) -> &ExtensionKey {
        &self.inner.key
    }

    pub fn same_instance(&self, other: &WorkerHandle) -> bool {
        self.inner.id == other.inner.id
    }

    pub async fn initialize(
        &self,
        key: &ExtensionKey,
        code: ExtensionCode,
        options: InitializeOptions,
    ) -> Result<InitializeResult, ExtensionError> {
        let call = WorkerCall::Initialize {
            key: key.clone(),
            code,
            options,
        };
        match self.call(call).await? {
            WorkerReply::Initialized(result) => Ok(result),
            WorkerReply::Failed(msg) => Err(ExtensionError::Worker(msg)),
            other => Err(ExtensionError::Worker(format!(
                "unexpected reply to initialize: {other:?}"
            ))),
        }
    }

    pub async fn validate(&self) -> Result<bool, ExtensionError> {
        match self.call(WorkerCall::Validate).await? {
            WorkerReply::Validated(valid) => Ok(valid),
            WorkerReply::Failed(msg) => Err(ExtensionError::Worker(msg)),
            other => Err(ExtensionError::Worker(format!(
                "unexpected reply to validate: {other:?}"
            ))),
        }
    }

    /// Ask the worker to stop. Does not wait.
    pub fn terminate(&self) {
        tracing::debug!(key = %self.inner.key, worker = %self.inner.id, "terminating worker");
        let _ = self.inner.tx.send(HostMessage::Terminate);
    }

    async fn call(&self, call: WorkerCall) -> Result<WorkerReply, ExtensionError> {
        let gone = || ExtensionError::WorkerGone(self.inner.key.to_string());
        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            if pending.closed {
                return Err(gone());
            }
            pending.calls.insert(request_id, tx);
        }

        if self
            .inner
            .tx
            .send(HostMessage::Call { request_id, call })
            .is_err()
        {
            self.inner.pending.lock().await.calls.remove(&request_id);
            return Err(gone());
        }
        rx.await.map_err(|_| gone())
    }
}

// ─── Supervisor ─────────────────────────────────────────────────────────

/// Spawns workers and wires trusted ones to the proxy bridge.
#[derive(Clone)]
pub struct WorkerSupervisor {
    factory: Arc<dyn RuntimeFactory>,
    bridge: ProxyBridge,
}

impl WorkerSupervisor {
    pub fn new(factory: Arc<dyn RuntimeFactory>, bridge: ProxyBridge) -> Self {
        Self { factory, bridge }
    }

    /// Start a worker thread for `key`. Must be called within a tokio runtime.
    pub fn spawn(
        &self,
        key: &ExtensionKey,
        descriptor: &ExtensionDescriptor,
        options: InitializeOptions,
    ) -> Result<WorkerHandle, ExtensionError> {
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();

        let (endpoint, bridge) = if options.bypass_cors && descriptor.trusted {
            let (results_tx, results_rx) = std::sync::mpsc::channel();
            (
                Some(BridgeEndpoint::new(key.clone(), worker_tx.clone(), results_rx)),
                Some((self.bridge.clone(), results_tx)),
            )
        } else {
            (None, None)
        };

        let factory = self.factory.clone();
        let thread_key = key.clone();
        std::thread::Builder::new()
            .name(format!("ext:{key}"))
            .spawn(move || run_worker(thread_key, factory, endpoint, host_rx, worker_tx))
            .map_err(|e| ExtensionError::Worker(format!("failed to spawn worker for {key}: {e}")))?;

        let pending = Arc::new(Mutex::new(PendingCalls::default()));
        tokio::spawn(route(key.clone(), worker_rx, pending.clone(), bridge));

        let handle = WorkerHandle::new(key.clone(), host_tx, pending);
        tracing::debug!(
            key = %key,
            worker = %handle.id(),
            bridged = options.bypass_cors && descriptor.trusted,
            "worker spawned"
        );
        Ok(handle)
    }
}

fn run_worker(
    key: ExtensionKey,
    factory: Arc<dyn RuntimeFactory>,
    endpoint: Option<BridgeEndpoint>,
    mut rx: mpsc::UnboundedReceiver<HostMessage>,
    tx: mpsc::UnboundedSender<WorkerMessage>,
) {
    let mut runtime = factory.create(&key, endpoint);

    while let Some(message) = rx.blocking_recv() {
        let (request_id, call) = match message {
            HostMessage::Terminate => break,
            HostMessage::Call { request_id, call } => (request_id, call),
        };
        let reply = match call {
            WorkerCall::Initialize { key, code, options } => runtime
                .initialize(&key, code, options)
                .map(WorkerReply::Initialized),
            WorkerCall::Validate => runtime.validate().map(WorkerReply::Validated),
        }
        .unwrap_or_else(|e| WorkerReply::Failed(e.to_string()));

        if tx.send(WorkerMessage::Reply { request_id, reply }).is_err() {
            break;
        }
    }
    tracing::debug!(key = %key, "worker stopped");
}

async fn route(
    key: ExtensionKey,
    mut rx: mpsc::UnboundedReceiver<WorkerMessage>,
    pending: Arc<Mutex<PendingCalls>>,
    bridge: Option<(ProxyBridge, std::sync::mpsc::Sender<FetchResult>)>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Reply { request_id, reply } => {
                if let Some(tx) = pending.lock().await.calls.remove(&request_id) {
                    let _ = tx.send(reply);
                }
            }
            WorkerMessage::Fetch(request) => match &bridge {
                Some((proxy, results)) => {
                    let result = proxy.handle(request).await;
                    let _ = results.send(result);
                }
                None => tracing::warn!(key = %key, "fetch from worker without bridge ignored"),
            },
        }
    }

    let mut pending = pending.lock().await;
    pending.closed = true;
    pending.calls.clear();
}
