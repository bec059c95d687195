//! SQLite-backed transaction store.
//!
//! Owns the `transactions` schema: idempotent inserts keyed by
//! `(chain, tx_hash, unique_id)`, timestamp-ordered reads, and the batched
//! swap-enrichment writes consumed by the analyzer.

pub mod sqlite_store;

pub use sqlite_store::SqliteStore;
