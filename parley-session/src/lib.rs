//! Parley Session
//!
//! Session store and concurrency coordination for conversational
//! backends. One record per conversation id, one exclusive lock per
//! conversation, and a coordinator that serializes generation cycles
//! so concurrent messages for the same conversation never interleave.
//!
//! Storage is pluggable: an in-process volatile map, or a Redis-backed
//! store with native per-key TTL. Backend choice is a construction-time
//! decision via [`create_store`]; a Redis connection failure degrades
//! to the in-memory backend with a logged warning.

pub mod coordinator;
pub mod locks;
pub mod record;
pub mod store;
pub mod sweeper;

pub use coordinator::{
    CompletionSignal, GenerateReply, GenerateRequest, RequestCoordinator, Worker, WorkerContext,
    DEFAULT_REPLY_TIMEOUT,
};
pub use locks::LockRegistry;
pub use record::{ChatMessage, MessageRole, SessionRecord, SessionStatus, SessionUpdate, TokenUsage};
pub use store::{create_store, MemoryStore, RedisStore, SessionStore};
pub use sweeper::{ExpirySweeper, DEFAULT_MAX_IDLE, DEFAULT_SWEEP_INTERVAL};
