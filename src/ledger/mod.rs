/// Fjall-based persistence for feeds, entries, handler configs, settings and
/// per-entry enrichment diagnostics.
///
/// Everything is stored as JSON under string keys (see [`partitions`]). The
/// store implements [`crate::pipeline::EntryStore`], which is all the
/// enrichment pipeline needs from persistence.
///
/// ## Usage
///
/// ```rust,ignore
/// use gleaner::ledger::FjallStore;
///
/// let store = FjallStore::open("data/ledger")?;
/// store.put_feed(&feed)?;
/// let entry = store.get_entry(&entry_id)?;
/// ```

pub mod error;
pub mod partitions;
pub mod store;

pub use error::{LedgerError, Result};
pub use store::{EntryUpsert, EntryWrite, FjallStore, StoreStats, StoredHandlerConfig};
