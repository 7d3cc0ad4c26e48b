//! # fiscus-sync: Read/Write Coordination for Fiscus
//!
//! Decides where every read is answered from and makes sure every fiscal
//! write reaches the server, even across offline periods and restarts.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncEngine (facade)                          │  │
//! │  │  start(): restore snapshot → requeue interrupted → spawn tasks   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ReadCoordinator │  │WriteCoordinator│  │  ReplayProcessor       │    │
//! │  │                │  │                │  │                        │    │
//! │  │ memory         │  │ optimistic     │  │ interval + reconnect   │    │
//! │  │  → durable     │  │ apply, deliver │  │ replay, conflict       │    │
//! │  │  → network     │  │ or queue       │  │ resolution             │    │
//! │  │ deduped fetch  │  │ rollback       │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          │                   │                       │                  │
//! │          ▼                   ▼                       ▼                  │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ fiscus-cache: CacheHandle · PersistenceBridge · DurableStore      │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  HOST COLLABORATORS:                                                   │
//! │  • Fetcher / MutationTransport  - network                              │
//! │  • DurableStore                 - key-value persistence                │
//! │  • ConnectivityMonitor          - online/offline signal                │
//! │  • SyncEventEmitter             - progress, conflicts, exhaustion      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine` facade and builder
//! - [`config`] - Engine configuration (TOML + env overrides)
//! - [`error`] - Sync error taxonomy
//! - [`query`] - Read coordinator
//! - [`mutation`] - Write coordinator and mutation handles
//! - [`queue`] - Offline mutation queue (memory and durable)
//! - [`replay`] - Queue replay and conflict resolution
//! - [`retry`] - Retry policies and backoff
//! - [`connectivity`] - Online/offline signal
//! - [`transport`] - Network collaborator traits
//! - [`events`] - Event emitter
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fiscus_sync::{fetcher, EngineConfig, QueryOptions, SyncEngine};
//!
//! let mut engine = SyncEngine::builder()
//!     .with_config(EngineConfig::load_or_default(None))
//!     .with_durable_store(store)
//!     .with_transport(transport)
//!     .build()?;
//! engine.start().await?;
//!
//! let receipts = engine
//!     .reads()
//!     .query("receipts:today", fetcher(|| api.list_receipts()), QueryOptions::new())
//!     .await?;
//! println!("{} receipts from {:?}", receipts.data, receipts.source);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod mutation;
pub mod query;
pub mod queue;
pub mod replay;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    CacheSettings, EngineConfig, MutationSettings, PersistenceSettings, QuerySettings,
    QueueSettings,
};
pub use connectivity::ConnectivityMonitor;
pub use engine::{EngineStatus, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{ConflictReport, NoOpEmitter, SyncEventEmitter};
pub use mutation::{
    Mutation, MutationOptions, MutationOutcome, MutationState, OptimisticFn, WriteCoordinator,
};
pub use query::{DataSource, QueryOptions, QueryResult, QueryState, QueryStatus, ReadCoordinator};
pub use queue::{DurableQueue, MemoryQueue, MutationQueue, SharedQueue};
pub use replay::{
    MergeFn, ReplayOutcome, ReplayProcessor, ReplayProcessorHandle, ReplaySummary, Replayer,
};
pub use retry::{RetryDelay, RetryPolicy};
pub use transport::{fetcher, Fetcher, MutationTransport, SharedTransport, UnreachableTransport};
