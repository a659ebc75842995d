//! # blegate-db: Store Layer for the BLE Gateway
//!
//! This crate provides the Catalog Store and the Transaction Store. Both
//! live in one SQLite file accessed through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Gateway Data Flow                                │
//! │                                                                         │
//! │  CatalogRefresher        Orchestrator          TransactionWriter        │
//! │  (upsert devices)        (lookup by hash)      (insert tx)              │
//! │       │                       │                      │                  │
//! │       ▼                       ▼                      ▼                  │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    blegate-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ CatalogRepo   │    │ 001_init.sql │  │   │
//! │  │   │ SqlitePool    │◄───│ TransactionRepo│   │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       ▲                                                                 │
//! │       │                                                                 │
//! │  TransactionUploader (list unsent, mark sent)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Store error types
//! - [`repository`] - Catalog and transaction repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use blegate_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("gateway.db")).await?;
//!
//! let device = db.catalog().get_device_by_hash("AB:CD:EF:01:02:03").await?;
//! let pending = db.transactions().list_unsent_transactions().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::catalog::CatalogRepository;
pub use repository::transaction::TransactionRepository;
