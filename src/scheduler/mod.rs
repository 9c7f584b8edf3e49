//! Distributed memoization over a shared Redis store.
//!
//! This module provides the coordination core every role is built on:
//!
//! - **ResultStore**: key-value results plus FIFO task queues (Redis or in-memory)
//! - **RequestCoordinator**: producer side; read-through fetch with enqueue and poll
//! - **WorkerLoop**: consumer side; dequeue, process, publish
//! - **RateLimiter**: minimum spacing between outbound API calls
//! - **TaskKey / ResultRecord**: the fingerprint and the value stored under it
//!
//! # Architecture
//!
//! ```text
//!    ┌──────────────┐   GET miss    ┌──────────────┐
//!    │   Producer   │──────────────▶│    Redis     │
//!    │ (feed/coord) │  LPUSH fp     │ values+lists │
//!    └──────┬───────┘◀──────────────└──────┬───────┘
//!           │     poll GET fp              │ BRPOP fp
//!           │                       ┌──────▼───────┐
//!           │                       │  WorkerLoop  │
//!           │                       │ (reader/     │
//!           │                       │  stocker)    │
//!           │                       └──────┬───────┘
//!           │                              │ SET fp record
//!           └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use fact_forge::config::CoordinatorConfig;
//! use fact_forge::scheduler::{RedisStore, RequestCoordinator, TaskKey};
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedisStore::connect("redis://localhost:6379").await?);
//! let coordinator = RequestCoordinator::new(store, CoordinatorConfig::default());
//!
//! let key = TaskKey::search("AAPL", date)?;
//! let metrics = coordinator.fetch_or_compute("search_queue", &key.fingerprint()).await?;
//! ```

pub mod coordinator;
pub mod job;
pub mod rate_limiter;
pub mod store;
pub mod worker;

pub use coordinator::{CoordinatorStats, FetchOutcome, RequestCoordinator};
pub use job::{Fingerprint, KeyError, RecordError, ResultRecord, TaskKey, TaskKind, DATE_FORMAT};
pub use rate_limiter::RateLimiter;
pub use store::{MemoryStore, RedisStore, ResultStore, StoreError};
pub use worker::{TaskProcessor, WorkerError, WorkerLoop, WorkerState, WorkerStats};
