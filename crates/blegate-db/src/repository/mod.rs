//! # Repository Module
//!
//! Store implementations for the gateway.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories                                         │
//! │                                                                         │
//! │  db.catalog()                         db.transactions()                 │
//! │  ├── upsert_device(s)                 ├── insert_transaction(s)         │
//! │  ├── upsert_device_group(s)           ├── list_unsent_transactions      │
//! │  ├── get_device_by_hash               ├── mark_sent                     │
//! │  ├── get_device_group_by_id           └── count_unsent                  │
//! │  ├── list_devices                                                       │
//! │  └── list_device_groups                                                 │
//! │       │                                      │                          │
//! │       ▼                                      ▼                          │
//! │  device, device_group tables            tr table                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`CatalogRepository`](catalog::CatalogRepository) - Whitelist of devices and their groups
//! - [`TransactionRepository`](transaction::TransactionRepository) - Append-only telemetry log

pub mod catalog;
pub mod transaction;
