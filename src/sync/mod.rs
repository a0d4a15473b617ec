//! Incremental feed synchronization.
//!
//! [`SyncEngine`] brings one source up to date against its feed using the
//! source's watermark (`last_update`); its batch methods run it over many
//! sources sequentially and collect a [`BatchReport`]. Subscription lists
//! are imported through [`SyncEngine::import_outlines`].

mod batch;
mod engine;
mod import;

pub use batch::BatchReport;
pub use import::{ImportFailure, ImportReport};
pub use engine::{next_watermark, select_new_entries, SourceChanges, SyncEngine, SyncError, SyncResult};
