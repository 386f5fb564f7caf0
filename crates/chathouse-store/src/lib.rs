//! chathouse Long-Term Store
//!
//! This crate is the queryable archive of the chat pipeline and the shared
//! key-value side store consulted by the admission layer.
//!
//! While the append log provides crash durability for the last minute of
//! traffic, the store is where drained messages live forever and the only
//! place internal sequence numbers exist. It tracks:
//!
//! - **Messages**: batch-inserted by the drainer, queried for backfill and
//!   pagination, tombstoned on delete.
//! - **Users**: accounts, roles and the soft-delete marker that doubles as
//!   the ban mechanism.
//! - **Side state**: fixed-window admission counters and the persisted
//!   address ban list.
//!
//! The traits in [`store`] are the seam: the server depends on
//! `Arc<dyn MessageStore>` and friends, the SQLite backend in [`sqlite`]
//! implements all three over one pool.

pub mod error;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use sqlite::SqliteStore;
pub use store::{CounterSample, MessageStore, SideStore, UserStore};
