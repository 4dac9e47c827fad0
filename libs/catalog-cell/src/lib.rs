pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

pub use error::CatalogError;
pub use models::{CatalogItem, DiffReport, ServiceSuggestion, SyncOutcome};
pub use services::{diff::CatalogDiffService, store::CatalogStore, sync::CatalogSyncService};
