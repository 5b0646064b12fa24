//! # EmberKV
//!
//! An embedded, log-structured key-value store with:
//! - Append-only segment files for durability
//! - An in-memory hash index rebuilt by replaying segments on open
//! - Crash recovery with torn-write truncation
//! - Single-writer/multi-reader concurrency model
//! - Background compaction that merges closed segments
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Index    │          │  Segments   │
//!   │  (RwLock)   │          │  (Append)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │ Compaction  │
//!                           │  (Worker)   │
//!                           └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod storage;
pub mod index;
pub mod recovery;
pub mod compaction;
pub mod command;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EmberError, Result};
pub use config::{Config, SyncStrategy};
pub use command::Command;
pub use compaction::CompactionStats;
pub use recovery::RecoveryResult;
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
