//! Request coordination: one serialized generation cycle per conversation.
//!
//! The coordinator bridges a synchronous request/response cycle to an
//! asynchronously-running worker. It acquires the per-conversation lock
//! (blocking, with no deadline; a second message for a conversation waits
//! for the first instead of racing it), dispatches the worker as its own
//! task, waits on a completion signal with a bounded deadline, and reads
//! back the final record to build the reply.
//!
//! On timeout the worker is not cancelled: it runs to completion
//! unsupervised and writes its own state, which the timed-out caller
//! never sees synchronously. The coordinator marks the record `error`
//! itself; a late worker success may overwrite that marker afterwards.
//! This lost-update window is intentional, fire-and-forget behavior.

use crate::locks::LockRegistry;
use crate::record::{SessionRecord, SessionStatus, SessionUpdate, TokenUsage};
use crate::store::SessionStore;
use async_trait::async_trait;
use parley_common::{Error, RequestOutcome, RequestStats, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, OwnedMutexGuard};

/// Deadline for the worker completion signal.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Inbound generation request, as handed over by the transport layer.
///
/// Field presence (non-empty message, caller id) is validated upstream;
/// the coordinator re-checks cheaply and resolves a missing conversation
/// identifier to a generated `thread_<uuid>`.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Conversation identifier; generated when absent.
    pub thread_id: Option<String>,
    /// User message text.
    pub message: String,
    /// Caller (subscriber) identifier.
    pub caller_id: String,
    /// Arbitrary caller-supplied fields, stored as session metadata and
    /// otherwise ignored by the core.
    pub variables: HashMap<String, serde_json::Value>,
}

impl GenerateRequest {
    pub fn new(message: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            thread_id: None,
            message: message.into(),
            caller_id: caller_id.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}

/// Reply built from the final session record.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateReply {
    pub thread_id: String,
    /// Terminal status, or `Processing` when the worker signalled early
    /// without finishing (the caller may re-query by id).
    pub status: SessionStatus,
    pub response: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Wall-clock duration of the coordinated request.
    pub duration_ms: u64,
}

// ============================================================================
// Worker Contract
// ============================================================================

/// Completion signal handed to a worker.
///
/// Fires exactly once: explicitly via [`CompletionSignal::complete`], or
/// on drop for every other exit path (early return, provider error,
/// panic unwind). Workers cannot forget it.
pub struct CompletionSignal {
    tx: Option<oneshot::Sender<()>>,
}

impl CompletionSignal {
    fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Signal completion explicitly.
    pub fn complete(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(tx) = self.tx.take() {
            // The receiver may be gone (coordinator already timed out)
            let _ = tx.send(());
        }
    }
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        self.fire();
    }
}

/// Everything a worker needs for one generation cycle.
pub struct WorkerContext {
    pub thread_id: String,
    /// The user message that started this cycle.
    pub message: String,
    pub caller_id: String,
    /// Store handle; all state the worker produces goes through it.
    pub store: Arc<dyn SessionStore>,
    /// Per-conversation lock, already held. Lives for the worker's whole
    /// body; dropping it ends the critical section.
    pub guard: OwnedMutexGuard<()>,
    /// Fires when dropped; keep it alive until the final record is written.
    pub signal: CompletionSignal,
}

/// A generation worker: the seam to provider-specific handlers.
///
/// Obligations: write a terminal record (`Completed` or `Error`) through
/// `ctx.store` before returning, and keep `ctx.guard`/`ctx.signal` alive
/// until then; both release themselves on every exit path.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    async fn generate(&self, ctx: WorkerContext);
}

// ============================================================================
// Coordinator
// ============================================================================

/// Orchestrates one inbound request end to end.
pub struct RequestCoordinator {
    store: Arc<dyn SessionStore>,
    locks: Arc<LockRegistry>,
    reply_timeout: Duration,
    stats: RequestStats,
}

impl RequestCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, locks: Arc<LockRegistry>) -> Self {
        Self {
            store,
            locks,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            stats: RequestStats::new(),
        }
    }

    /// Override the worker-completion deadline (60 s by default).
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Request statistics for this coordinator.
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    /// Run one coordinated generation cycle.
    ///
    /// Cycles for one conversation are strictly serialized: the history
    /// read by cycle N+1 always reflects the fully-committed write of
    /// cycle N.
    pub async fn handle(&self, request: GenerateRequest, worker: Arc<dyn Worker>) -> Result<GenerateReply> {
        let started = Instant::now();

        if request.message.is_empty() {
            return Err(Error::InvalidInput("message must not be empty".into()));
        }
        if request.caller_id.is_empty() {
            return Err(Error::InvalidInput("caller_id is required".into()));
        }

        let thread_id = request
            .thread_id
            .clone()
            .unwrap_or_else(|| format!("thread_{}", uuid::Uuid::new_v4()));

        self.prepare_session(&thread_id, &request).await?;

        // Block on the per-conversation lock with no deadline; the guard
        // travels into the worker and is released when its body ends.
        let lock = self.locks.acquire_for(&thread_id).await;
        let guard = lock.lock_owned().await;

        let (signal, done) = CompletionSignal::channel();
        let ctx = WorkerContext {
            thread_id: thread_id.clone(),
            message: request.message.clone(),
            caller_id: request.caller_id.clone(),
            store: Arc::clone(&self.store),
            guard,
            signal,
        };

        tracing::debug!(thread_id = %thread_id, "Worker dispatched");
        tokio::spawn(async move {
            worker.generate(ctx).await;
        });

        if tokio::time::timeout(self.reply_timeout, done).await.is_err() {
            return self.on_timeout(&thread_id, started).await;
        }

        self.build_reply(&thread_id, started).await
    }

    /// Fetch-or-create the session record for this cycle.
    async fn prepare_session(&self, thread_id: &str, request: &GenerateRequest) -> Result<()> {
        if self.store.exists(thread_id).await {
            // Re-entering conversation; caller metadata may have changed.
            let mut merge = SessionUpdate::new();
            for (key, value) in &request.variables {
                merge = merge.with_metadata(key.clone(), value.clone());
            }
            if !self.store.update(thread_id, merge).await {
                return Err(Error::Backend("session refresh failed".into()));
            }
        } else {
            let mut record = SessionRecord::new();
            record.metadata.insert("caller_id".into(), serde_json::Value::String(request.caller_id.clone()));
            record.metadata.extend(request.variables.clone());
            if !self.store.set(thread_id, record).await {
                return Err(Error::Backend("session create failed".into()));
            }
            tracing::info!(thread_id = %thread_id, "New conversation created");
        }
        Ok(())
    }

    /// The deadline elapsed first. The worker keeps running unsupervised,
    /// so the coordinator records the error state itself.
    async fn on_timeout(&self, thread_id: &str, started: Instant) -> Result<GenerateReply> {
        let timeout_secs = self.reply_timeout.as_secs();
        tracing::error!(thread_id = %thread_id, timeout_secs, "Generation timed out");

        let update = SessionUpdate::new()
            .with_status(SessionStatus::Error)
            .with_response(format!("Timeout: generation exceeded {timeout_secs} seconds"));
        let _ = self.store.update(thread_id, update).await;

        self.stats
            .record(started.elapsed().as_millis() as u64, RequestOutcome::TimedOut)
            .await;
        Err(Error::Timeout(format!(
            "no completion within {timeout_secs} seconds for {thread_id}"
        )))
    }

    /// The signal fired before the deadline; build the reply from the
    /// now-final record.
    async fn build_reply(&self, thread_id: &str, started: Instant) -> Result<GenerateReply> {
        let duration_ms = started.elapsed().as_millis() as u64;

        let Some(record) = self.store.get(thread_id).await else {
            // Consistency fault, distinct from a timeout
            tracing::error!(thread_id = %thread_id, "Session vanished before reply");
            self.stats.record(duration_ms, RequestOutcome::Failed).await;
            return Err(Error::NotFound(thread_id.to_string()));
        };

        if record.status == SessionStatus::Error {
            let message = record
                .response
                .unwrap_or_else(|| "unknown generation error".to_string());
            tracing::error!(thread_id = %thread_id, error = %message, "Generation failed");
            self.stats.record(duration_ms, RequestOutcome::Failed).await;
            return Err(Error::categorize(&message));
        }

        self.stats.record(duration_ms, RequestOutcome::Completed).await;
        tracing::info!(thread_id = %thread_id, duration_ms, status = record.status.as_str(), "Request completed");
        Ok(GenerateReply {
            thread_id: thread_id.to_string(),
            status: record.status,
            response: record.response,
            usage: record.usage,
            duration_ms,
        })
    }
}
