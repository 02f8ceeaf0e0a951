//! Core module - reconciliation engine and its collaborators

pub mod azure;
pub mod config;
pub mod inventory;
pub mod manifest;
pub mod reconciler;
pub mod store;
pub mod validator;

pub use azure::AzureDevOpsStore;
pub use config::{Config, ConfigError, RawSettings, Settings};
pub use inventory::{
    extract, AssociationError, AssociationMap, Extraction, Marker, TestInventory, TestMethod,
    TestRecord,
};
pub use manifest::{InventoryError, ManifestInventory};
pub use reconciler::{
    orphaned_ids, ReconcileError, ReconcileOptions, ReconcileReport, Reconciler, Termination,
};
pub use store::{AutomationBinding, StoreError, TestIdGenerator, WorkItem, WorkItemStore};
pub use validator::ValidationError;
