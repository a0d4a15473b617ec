//! prophet: a personal RSS/Atom reader.
//!
//! Sources are registered with a feed URL, synced incrementally against a
//! per-source watermark, and stored in SQLite together with their entries
//! and tags. The binary in `main.rs` is a thin command-line front end over
//! the operations exposed here.

pub mod config;
pub mod favicon;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;
