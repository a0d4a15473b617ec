mod entries;
mod schema;
mod sources;
mod tags;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, Entry, EntryFilter, NewEntry, Source, Tag};
