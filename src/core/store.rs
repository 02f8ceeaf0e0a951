//! Work item store contract for Test Case automation fields
//!
//! The reconciler only ever talks to the remote tracker through
//! [`WorkItemStore`]. The Azure DevOps implementation lives in
//! [`crate::core::azure`]; tests substitute an in-memory store.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use thiserror::Error;

/// Automation field holding the fully qualified test name
pub const FIELD_AUTOMATED_TEST_NAME: &str = "Microsoft.VSTS.TCM.AutomatedTestName";
/// Automation field holding the test binary file name
pub const FIELD_AUTOMATED_TEST_STORAGE: &str = "Microsoft.VSTS.TCM.AutomatedTestStorage";
/// Automation field holding the opaque automation identifier
pub const FIELD_AUTOMATED_TEST_ID: &str = "Microsoft.VSTS.TCM.AutomatedTestId";
/// Automation field holding the free-form test type label
pub const FIELD_AUTOMATED_TEST_TYPE: &str = "Microsoft.VSTS.TCM.AutomatedTestType";
/// Automation status field
pub const FIELD_AUTOMATION_STATUS: &str = "Microsoft.VSTS.TCM.AutomationStatus";

/// Value written to the automation status field on association
pub const STATUS_AUTOMATED: &str = "Automated";

/// Response bodies longer than this are cut before they land in an error
const MAX_ERROR_BODY: usize = 512;

/// Errors raised by a work item store
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("HTTP {status} has occurred while {operation}{}", format_body(.body))]
    #[diagnostic(
        code(tcassoc::store::remote),
        help("Check the access token scopes and that the work item exists in the project")
    )]
    Remote {
        status: u16,
        operation: String,
        body: String,
    },

    #[error("Request to {url} failed: {message}")]
    #[diagnostic(code(tcassoc::store::transport))]
    Transport { url: String, message: String },

    #[error("Malformed payload for {url}: {message}")]
    #[diagnostic(code(tcassoc::store::payload))]
    Payload { url: String, message: String },
}

impl StoreError {
    /// Build a remote error, truncating oversized response bodies
    pub fn remote(status: u16, operation: impl Into<String>, body: &str) -> Self {
        let body = body.trim();
        let body = match body.char_indices().nth(MAX_ERROR_BODY) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        StoreError::Remote {
            status,
            operation: operation.into(),
            body,
        }
    }
}

fn format_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

/// A work item as returned by the tracker
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkItem {
    pub id: u64,

    #[serde(default)]
    pub fields: HashMap<String, JsonValue>,
}

impl WorkItem {
    /// Get a string field, if present
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(JsonValue::as_str)
    }

    /// The test name this work item is currently bound to
    pub fn automated_test_name(&self) -> Option<&str> {
        self.field_str(FIELD_AUTOMATED_TEST_NAME)
    }
}

/// Everything needed to bind one Test Case to one automated test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationBinding {
    pub test_name: String,
    pub test_case_id: String,
    pub test_type: String,
    pub test_binary: String,
}

/// A single JSON patch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOperation {
    pub op: String,
    pub path: String,
    pub value: String,
}

impl PatchOperation {
    /// An additive `add` operation on a work item field
    pub fn add_field(field: &str, value: &str) -> Self {
        Self {
            op: "add".to_string(),
            path: format!("/fields/{}", field),
            value: value.to_string(),
        }
    }

    /// The field reference this operation targets
    pub fn field(&self) -> &str {
        self.path.strip_prefix("/fields/").unwrap_or(&self.path)
    }
}

/// Patch document binding a Test Case to an automated test
pub fn association_patch(binding: &AutomationBinding, automated_test_id: &str) -> Vec<PatchOperation> {
    vec![
        PatchOperation::add_field(FIELD_AUTOMATED_TEST_NAME, &binding.test_name),
        PatchOperation::add_field(FIELD_AUTOMATED_TEST_STORAGE, &binding.test_binary),
        PatchOperation::add_field(FIELD_AUTOMATED_TEST_ID, automated_test_id),
        PatchOperation::add_field(FIELD_AUTOMATED_TEST_TYPE, &binding.test_type),
        PatchOperation::add_field(FIELD_AUTOMATION_STATUS, STATUS_AUTOMATED),
    ]
}

/// Patch document clearing every automation field
pub fn dissociation_patch() -> Vec<PatchOperation> {
    [
        FIELD_AUTOMATED_TEST_NAME,
        FIELD_AUTOMATED_TEST_STORAGE,
        FIELD_AUTOMATED_TEST_ID,
        FIELD_AUTOMATED_TEST_TYPE,
        FIELD_AUTOMATION_STATUS,
    ]
    .iter()
    .map(|field| PatchOperation::add_field(field, ""))
    .collect()
}

/// Source of automation identifiers written on every association
pub trait TestIdGenerator {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs, the format Azure Test Plans uses for automation ids
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl TestIdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Remote tracker holding Test Case work items
///
/// Every call blocks until the remote answers. Implementations must not
/// issue concurrent writes for the same id: `associate` mints a fresh
/// automation id each time, so writes are not idempotent at the identity
/// level.
pub trait WorkItemStore {
    /// Ids of Test Cases whose automation storage is `test_binary`, id descending
    fn fetch_known_automated_ids(&self, test_binary: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch one work item; `None` when the tracker has no such id
    fn fetch_work_item(&self, id: &str) -> Result<Option<WorkItem>, StoreError>;

    /// True iff `id` names an existing work item of type Test Case
    fn is_genuine_test_case(&self, id: &str) -> Result<bool, StoreError>;

    /// True unless the work item is already bound to exactly `test_name`
    fn needs_update(&self, test_name: &str, id: &str) -> Result<bool, StoreError> {
        let current = self.fetch_work_item(id)?;
        Ok(current
            .as_ref()
            .and_then(WorkItem::automated_test_name)
            .map_or(true, |name| name != test_name))
    }

    /// Write all five automation fields for `binding`
    fn associate(&self, binding: &AutomationBinding) -> Result<(), StoreError>;

    /// Clear all five automation fields on `id`
    fn dissociate(&self, id: &str) -> Result<(), StoreError>;
}
