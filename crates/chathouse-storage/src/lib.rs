//! chathouse Storage Layer
//!
//! This crate implements the two in-process storage tiers of the message
//! pipeline: the crash-safe append log and the volatile hot cache.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐
//! │   Session    │
//! └──────┬───────┘
//!        │ send
//!        ▼
//! ┌──────────────────┐   fsync   ┌──────────────┐
//! │  Message Service │──────────▶│  Append Log  │ ◄── durability boundary
//! └──────┬───────────┘           └──────┬───────┘
//!        │ broadcast + cache            │ drain (periodic)
//!        ▼                              ▼
//! ┌──────────────┐               ┌──────────────┐
//! │  Hot Cache   │               │  Long-Term   │
//! │ (last 100)   │               │    Store     │
//! └──────────────┘               └──────────────┘
//! ```
//!
//! A message is acknowledged only after the append log has forced it to
//! stable storage. The hot cache exists purely to spare the store on
//! new-session backfill; it is empty after a restart and is lazily rewarmed.
//!
//! ## Main Components
//!
//! ### MessageWal
//! One-JSON-object-per-line journal with append-and-sync semantics, full
//! snapshot reads and atomic compaction (write-temp, sync, rename, reopen).
//! A single mutex serializes append, snapshot and compact.
//!
//! ### RecentCache
//! Bounded newest-first sequence of the most recent messages with in-place
//! tombstoning. One mutex guards the whole sequence; contention is low
//! because pushes happen at message rate and reads at connection rate.

pub mod cache;
pub mod error;
pub mod wal;

pub use cache::RecentCache;
pub use error::{Error, Result};
pub use wal::{MessageWal, WalEntry};
