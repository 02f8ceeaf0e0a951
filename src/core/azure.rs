//! Azure DevOps work item tracking client
//!
//! Blocking HTTP implementation of [`WorkItemStore`] against the
//! `_apis/wit` REST endpoints. Requests are issued one at a time.

use base64::Engine;
use reqwest::blocking::{Client, ClientBuilder, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::store::{
    association_patch, dissociation_patch, AutomationBinding, PatchOperation, StoreError,
    TestIdGenerator, UuidGenerator, WorkItem, WorkItemStore,
};

/// API version used for queries and reads
const READ_API_VERSION: &str = "5.0";
/// API version used for field patches
const PATCH_API_VERSION: &str = "1.0";
/// Collection segment used for field patches
const PATCH_COLLECTION: &str = "DefaultCollection";

const JSON_PATCH: &str = "application/json-patch+json";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// WIQL request body
#[derive(Debug, Serialize)]
struct WiqlQuery<'a> {
    query: &'a str,
}

/// WIQL response; only the matched ids are used
#[derive(Debug, Deserialize)]
struct WiqlResult {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WorkItemReference>,
}

#[derive(Debug, Deserialize)]
struct WorkItemReference {
    id: u64,
}

/// Quote a string literal for WIQL
pub fn wiql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Query for Test Cases currently automated from `test_binary`
pub fn known_automated_query(test_binary: &str) -> String {
    format!(
        "Select [Id] From WorkItems Where [Work Item Type] = 'Test Case' AND [Automated test storage] = {} order by [Id] desc",
        wiql_literal(test_binary)
    )
}

/// Query matching `id` only if it is a Test Case
pub fn test_case_by_id_query(id: u64) -> String {
    format!(
        "Select [Id] From WorkItems Where [Work Item Type] = 'Test Case' AND [Id] = {}",
        id
    )
}

/// Value for the `Authorization` header: basic auth, empty user, token as password
pub fn basic_auth_value(token: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{}", token));
    format!("Basic {}", encoded)
}

/// Azure DevOps backed work item store
pub struct AzureDevOpsStore {
    client: Client,
    host: String,
    project: String,
    id_generator: Box<dyn TestIdGenerator>,
}

impl AzureDevOpsStore {
    /// Create a client for `project` on `host` (e.g. `https://org.visualstudio.com`)
    pub fn new(host: &str, project: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
        Self::with_client_builder(Client::builder(), host, project, token, timeout)
    }

    fn with_client_builder(
        builder: ClientBuilder,
        host: &str,
        project: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let host = host.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&basic_auth_value(token)).map_err(|e| {
            StoreError::Transport {
                url: host.clone(),
                message: format!("invalid access token: {}", e),
            }
        })?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = builder
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport {
                url: host.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            host,
            project: project.to_string(),
            id_generator: Box::new(UuidGenerator),
        })
    }

    /// Replace the automation id source
    pub fn with_id_generator(mut self, generator: Box<dyn TestIdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    fn wiql_url(&self) -> String {
        format!(
            "{}/{}/_apis/wit/wiql?api-version={}",
            self.host, self.project, READ_API_VERSION
        )
    }

    fn work_item_url(&self, id: &str) -> String {
        format!(
            "{}/{}/_apis/wit/workitems/{}?api-version={}",
            self.host, self.project, id, READ_API_VERSION
        )
    }

    fn patch_url(&self, id: &str) -> String {
        format!(
            "{}/{}/_apis/wit/workitems/{}?api-version={}",
            self.host, PATCH_COLLECTION, id, PATCH_API_VERSION
        )
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, StoreError> {
        request.send().map_err(|e| StoreError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn run_wiql(&self, query: &str, operation: &str) -> Result<Vec<u64>, StoreError> {
        let url = self.wiql_url();
        tracing::debug!(%query, "sending WIQL query");
        let response = self.send(
            self.client.post(&url).json(&WiqlQuery { query }),
            &url,
        )?;
        let response = ensure_success(response, operation)?;
        let result: WiqlResult = decode(response, &url)?;
        Ok(result.work_items.into_iter().map(|w| w.id).collect())
    }

    fn patch(&self, id: &str, patch: &[PatchOperation], operation: &str) -> Result<(), StoreError> {
        let url = self.patch_url(id);
        let body = serde_json::to_string(patch).map_err(|e| StoreError::Payload {
            url: url.clone(),
            message: e.to_string(),
        })?;
        let request = self
            .client
            .patch(&url)
            .header(ACCEPT, JSON_PATCH)
            .header(CONTENT_TYPE, JSON_PATCH)
            .body(body);
        let response = self.send(request, &url)?;
        ensure_success(response, operation)?;
        Ok(())
    }
}

impl WorkItemStore for AzureDevOpsStore {
    fn fetch_known_automated_ids(&self, test_binary: &str) -> Result<Vec<String>, StoreError> {
        let ids = self.run_wiql(
            &known_automated_query(test_binary),
            "querying known test case associations",
        )?;
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    fn fetch_work_item(&self, id: &str) -> Result<Option<WorkItem>, StoreError> {
        let url = self.work_item_url(id);
        let response = self.send(self.client.get(&url), &url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(response, &format!("reading Test Case {}", id))?;
        decode(response, &url).map(Some)
    }

    fn is_genuine_test_case(&self, id: &str) -> Result<bool, StoreError> {
        // Non-numeric ids never reach the query text
        let Ok(numeric) = id.trim().parse::<u64>() else {
            return Ok(false);
        };
        let matches = self.run_wiql(
            &test_case_by_id_query(numeric),
            &format!("verifying TestCaseId: {}", id),
        )?;
        Ok(!matches.is_empty())
    }

    fn associate(&self, binding: &AutomationBinding) -> Result<(), StoreError> {
        let automated_test_id = self.id_generator.next_id();
        let patch = association_patch(binding, &automated_test_id);
        self.patch(
            &binding.test_case_id,
            &patch,
            &format!(
                "creating association for TestCaseId: {}",
                binding.test_case_id
            ),
        )
    }

    fn dissociate(&self, id: &str) -> Result<(), StoreError> {
        self.patch(
            id,
            &dissociation_patch(),
            &format!("clearing association for TestCaseId: {}", id),
        )
    }
}

fn ensure_success(response: Response, operation: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    tracing::warn!(status = status.as_u16(), %operation, "remote call failed");
    Err(StoreError::remote(status.as_u16(), operation, &body))
}

fn decode<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, StoreError> {
    let text = response.text().map_err(|e| StoreError::Transport {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| StoreError::Payload {
        url: url.to_string(),
        message: e.to_string(),
    })
}
