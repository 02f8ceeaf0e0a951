//! One reconciliation pass between a test inventory and the work item store
//!
//! Sequence: fetch the Test Cases currently automated from this binary,
//! extract associations from the inventory, validate them, then (unless
//! dry-run) write new associations and clear the ones that disappeared.
//!
//! Writes are not transactional. A remote failure stops the pass at that
//! point and every write already made stays applied.

use miette::Diagnostic;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::inventory::{extract, AssociationError, IgnoredMarker, TestInventory};
use crate::core::manifest::InventoryError;
use crate::core::store::{AutomationBinding, StoreError, WorkItemStore};
use crate::core::validator::{check_duplicates, check_ids_exist, check_missing, ValidationError};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    AbortedConfiguration,
    AbortedValidation,
    AbortedRemote,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Success => write!(f, "success"),
            Termination::AbortedConfiguration => write!(f, "aborted (configuration)"),
            Termination::AbortedValidation => write!(f, "aborted (validation)"),
            Termination::AbortedRemote => write!(f, "aborted (remote)"),
        }
    }
}

/// Any condition that ends a run early
#[derive(Debug, Error, Diagnostic)]
pub enum ReconcileError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

impl ReconcileError {
    pub fn termination(&self) -> Termination {
        match self {
            ReconcileError::Config(_) | ReconcileError::Inventory(_) => {
                Termination::AbortedConfiguration
            }
            ReconcileError::Validation(_) => Termination::AbortedValidation,
            ReconcileError::Store(_) => Termination::AbortedRemote,
        }
    }
}

/// Per-run inputs
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub test_binary: String,
    pub test_type: String,
    pub max_missing: usize,
    pub dry_run: bool,
}

/// What a successful run did (or, in dry-run, would do)
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Ids automated from this binary before the run
    pub known_before: Vec<String>,
    /// Validated `(test_name, test_case_id)` pairs
    pub planned: Vec<(String, String)>,
    /// Pairs written to the store
    pub associated: Vec<(String, String)>,
    /// Pairs already bound to the right test
    pub unchanged: Vec<(String, String)>,
    /// Ids whose automation fields were cleared
    pub cleared: Vec<String>,
    /// Missing associations tolerated under the threshold
    pub missing: Vec<AssociationError>,
    pub ignored_markers: Vec<IgnoredMarker>,
}

/// Ids in `before` that are absent from `after`, in `before` order
pub fn orphaned_ids(before: &[String], after: &[String]) -> Vec<String> {
    let remaining: HashSet<&str> = after.iter().map(String::as_str).collect();
    before
        .iter()
        .filter(|id| !remaining.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Drives one pass; holds no state between runs
pub struct Reconciler<'a> {
    store: &'a dyn WorkItemStore,
    inventory: &'a dyn TestInventory,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn WorkItemStore,
        inventory: &'a dyn TestInventory,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            inventory,
            options,
        }
    }

    pub fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let binary = &self.options.test_binary;
        let mut report = ReconcileReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };

        tracing::info!("Getting known test cases from Azure");
        report.known_before = self.store.fetch_known_automated_ids(binary)?;
        tracing::debug!(count = report.known_before.len(), "known associations");

        tracing::info!("Finding all test methods from {}", binary);
        let methods = self.inventory.test_methods()?;
        let extraction = extract(&methods);
        for record in &extraction.records {
            tracing::debug!(
                test = %record.test_name,
                id = record.test_case_id.as_deref().unwrap_or("-"),
                "discovered test"
            );
        }
        for ignored in &extraction.ignored_markers {
            tracing::warn!(
                test = %ignored.test_name,
                kept = %ignored.kept,
                ignored = %ignored.ignored,
                "test method carries more than one TestCaseId marker; keeping the first"
            );
        }

        tracing::info!("Validating TestCaseIds");
        let associations = &extraction.associations;
        check_missing(&extraction.errors, associations, self.options.max_missing)?;
        check_duplicates(associations)?;
        check_ids_exist(associations.ids(), |id| {
            self.store
                .is_genuine_test_case(id)
                .map_err(ReconcileError::from)
        })?;

        report.planned = associations
            .iter()
            .map(|(name, id)| (name.to_string(), id.to_string()))
            .collect();
        report.missing = extraction.errors.clone();
        report.ignored_markers = extraction.ignored_markers.clone();

        if self.options.dry_run {
            tracing::info!(
                associations = report.planned.len(),
                "Dry run: validation passed, skipping remote updates"
            );
            return Ok(report);
        }

        tracing::info!("Reaching out to Azure to create new test case associations");
        for (test_name, test_case_id) in associations.iter() {
            let pair = (test_name.to_string(), test_case_id.to_string());
            if !self.store.needs_update(test_name, test_case_id)? {
                tracing::debug!(test = %test_name, id = %test_case_id, "already associated");
                report.unchanged.push(pair);
                continue;
            }
            self.store.associate(&AutomationBinding {
                test_name: test_name.to_string(),
                test_case_id: test_case_id.to_string(),
                test_type: self.options.test_type.clone(),
                test_binary: binary.clone(),
            })?;
            tracing::info!(
                "Updated test case ID {} to be associated with {}",
                test_case_id,
                test_name
            );
            report.associated.push(pair);
        }

        // Associating only ever adds ids to the stored set, so the post-run
        // set is what the store still holds and the inventory still references
        let referenced: HashSet<&str> = associations.ids().collect();
        let known_after: Vec<String> = self
            .store
            .fetch_known_automated_ids(binary)?
            .into_iter()
            .filter(|id| referenced.contains(id.as_str()))
            .collect();
        for orphan in orphaned_ids(&report.known_before, &known_after) {
            self.store.dissociate(&orphan)?;
            tracing::info!("Cleared automation fields from Azure Test Case ID {}", orphan);
            report.cleared.push(orphan);
        }

        Ok(report)
    }
}
