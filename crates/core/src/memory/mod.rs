//! # Memory Module
//!
//! Expiring per-project notes that sit beside the shared store.
//!
//! ```text
//! agents / orchestrator
//!          ↓
//!   SqliteMemoryService  (TTL entries, keyword search)
//!          ↓
//!      DossierDb (memories table)
//! ```

pub mod sqlite_memory;

pub use sqlite_memory::{MemoryEntry, SqliteMemoryService};
