//! Test inventory extraction
//!
//! Turns the declared test methods of a test binary into the association
//! map (fully qualified test name -> Test Case id) plus the list of test
//! methods that carry no Test Case id.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::core::manifest::InventoryError;

/// Marker kinds that make a method a test method
pub const TEST_MARKERS: &[&str] = &["Fact", "Theory"];

/// Marker kind carrying the Test Case id
pub const TEST_CASE_ID_MARKER: &str = "TestCaseId";

/// A marker (attribute) attached to a test method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub kind: String,

    #[serde(
        default,
        deserialize_with = "string_or_integer",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
}

/// Accept `value: 501` as well as `value: "501"`
fn string_or_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Integer(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Integer(n) => n.to_string(),
    }))
}

impl Marker {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            value: None,
        }
    }

    pub fn test_case_id(id: &str) -> Self {
        Self {
            kind: TEST_CASE_ID_MARKER.to_string(),
            value: Some(id.to_string()),
        }
    }

    fn is_test_marker(&self) -> bool {
        TEST_MARKERS.contains(&self.kind.as_str())
    }

    fn case_id(&self) -> Option<&str> {
        if self.kind == TEST_CASE_ID_MARKER {
            Some(self.value.as_deref().unwrap_or(""))
        } else {
            None
        }
    }
}

/// A method declared by the test binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMethod {
    /// Fully qualified declaring type, e.g. `NsA.ClassA`
    #[serde(rename = "type")]
    pub type_name: String,

    /// Simple method name, e.g. `TestFoo`
    pub name: String,

    #[serde(default)]
    pub markers: Vec<Marker>,
}

impl TestMethod {
    pub fn new(type_name: &str, name: &str, markers: Vec<Marker>) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: name.to_string(),
            markers,
        }
    }

    /// `Namespace.Type.Method`
    pub fn full_name(&self) -> String {
        if self.type_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.type_name, self.name)
        }
    }

    /// Whether the test framework would discover this method
    pub fn is_test(&self) -> bool {
        self.markers.iter().any(Marker::is_test_marker)
    }
}

/// Source of the test methods declared by a test binary
pub trait TestInventory {
    fn test_methods(&self) -> Result<Vec<TestMethod>, InventoryError>;
}

impl TestInventory for Vec<TestMethod> {
    fn test_methods(&self) -> Result<Vec<TestMethod>, InventoryError> {
        Ok(self.clone())
    }
}

/// One discovered test and the Test Case id it declares, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub test_name: String,
    pub test_case_id: Option<String>,
}

/// A test method lacking a Test Case id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationError(String);

impl AssociationError {
    /// Error for a method, named by its simple name
    pub fn missing(method_name: &str) -> Self {
        Self(format!(
            "MissingAssociationError: The following method is missing the [TestCaseId] attribute: {}",
            method_name
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Test name -> Test Case id, in insertion order
///
/// Re-inserting a name replaces its id in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssociationMap {
    entries: IndexMap<String, String>,
}

impl AssociationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous id for `test_name`
    pub fn insert(&mut self, test_name: String, test_case_id: String) -> Option<String> {
        self.entries.insert(test_name, test_case_id)
    }

    #[cfg(test)]
    pub fn get(&self, test_name: &str) -> Option<&str> {
        self.entries.get(test_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(test_name, test_case_id)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Test Case ids in insertion order, repeats included
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AssociationMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Canonical text of a Test Case id
///
/// All-digit ids are reduced to their decimal value so `"0501"` and `"501"`
/// name the same work item. Anything else is kept verbatim for reporting.
pub fn canonical_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = trimmed.parse::<u64>() {
            return n.to_string();
        }
    }
    raw.to_string()
}

/// A `TestCaseId` marker dropped because an earlier one on the same method won
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredMarker {
    pub test_name: String,
    pub kept: String,
    pub ignored: String,
}

/// Result of one extraction pass
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<TestRecord>,
    pub associations: AssociationMap,
    pub errors: Vec<AssociationError>,
    pub ignored_markers: Vec<IgnoredMarker>,
}

/// Build the association map from declared methods
///
/// Methods without a `Fact`/`Theory` marker are not tests and are skipped.
/// When a method carries several `TestCaseId` markers the first one wins
/// and the rest are recorded in [`Extraction::ignored_markers`]. Ids are
/// stored in [`canonical_id`] form.
pub fn extract(methods: &[TestMethod]) -> Extraction {
    let mut extraction = Extraction::default();

    for method in methods.iter().filter(|m| m.is_test()) {
        let test_name = method.full_name();
        let mut ids = method.markers.iter().filter_map(Marker::case_id);

        let test_case_id = ids.next().map(canonical_id);
        if let Some(kept) = &test_case_id {
            for ignored in ids {
                extraction.ignored_markers.push(IgnoredMarker {
                    test_name: test_name.clone(),
                    kept: kept.clone(),
                    ignored: canonical_id(ignored),
                });
            }
        }

        match &test_case_id {
            Some(id) => {
                extraction
                    .associations
                    .insert(test_name.clone(), id.clone());
            }
            None => extraction
                .errors
                .push(AssociationError::missing(&method.name)),
        }

        extraction.records.push(TestRecord {
            test_name,
            test_case_id,
        });
    }

    extraction
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(type_name: &str, name: &str, ids: &[&str]) -> TestMethod {
        let mut markers = vec![Marker::new("Fact")];
        markers.extend(ids.iter().map(|id| Marker::test_case_id(id)));
        TestMethod::new(type_name, name, markers)
    }

    #[test]
    fn test_extract_associated_method() {
        let extraction = extract(&[fact("NsA.ClassA", "TestFoo", &["501"])]);
        assert_eq!(extraction.associations.get("NsA.ClassA.TestFoo"), Some("501"));
        assert!(extraction.errors.is_empty());
        assert_eq!(
            extraction.records,
            vec![TestRecord {
                test_name: "NsA.ClassA.TestFoo".to_string(),
                test_case_id: Some("501".to_string()),
            }]
        );
    }

    #[test]
    fn test_missing_marker_uses_simple_name() {
        let extraction = extract(&[fact("NsA.ClassA", "TestBar", &[])]);
        assert!(extraction.associations.is_empty());
        assert_eq!(extraction.errors.len(), 1);
        assert_eq!(
            extraction.errors[0].as_str(),
            "MissingAssociationError: The following method is missing the [TestCaseId] attribute: TestBar"
        );
    }

    #[test]
    fn test_non_test_methods_are_skipped() {
        let helper = TestMethod::new("NsA.ClassA", "Helper", vec![Marker::test_case_id("9")]);
        let plain = TestMethod::new("NsA.ClassA", "Setup", vec![]);
        let extraction = extract(&[helper, plain]);
        assert!(extraction.associations.is_empty());
        assert!(extraction.errors.is_empty());
        assert!(extraction.records.is_empty());
    }

    #[test]
    fn test_theory_is_a_test() {
        let theory = TestMethod::new(
            "NsA.ClassA",
            "TestRows",
            vec![Marker::new("Theory"), Marker::new("InlineData"), Marker::test_case_id("77")],
        );
        let extraction = extract(&[theory]);
        assert_eq!(extraction.associations.get("NsA.ClassA.TestRows"), Some("77"));
    }

    #[test]
    fn test_first_test_case_marker_wins() {
        let extraction = extract(&[fact("NsA.ClassA", "TestFoo", &["1", "2", "3"])]);
        assert_eq!(extraction.associations.get("NsA.ClassA.TestFoo"), Some("1"));
        assert_eq!(extraction.ignored_markers.len(), 2);
        assert_eq!(extraction.ignored_markers[0].kept, "1");
        assert_eq!(extraction.ignored_markers[0].ignored, "2");
        assert_eq!(extraction.ignored_markers[1].ignored, "3");
    }

    #[test]
    fn test_marker_without_value_yields_empty_id() {
        let method = TestMethod::new(
            "NsA.ClassA",
            "TestFoo",
            vec![Marker::new("Fact"), Marker::new(TEST_CASE_ID_MARKER)],
        );
        let extraction = extract(&[method]);
        assert_eq!(extraction.associations.get("NsA.ClassA.TestFoo"), Some(""));
        assert!(extraction.errors.is_empty());
    }

    #[test]
    fn test_revisited_name_replaces_in_place() {
        let extraction = extract(&[
            fact("NsA.ClassA", "TestFoo", &["1"]),
            fact("NsA.ClassA", "TestBar", &["2"]),
            fact("NsA.ClassA", "TestFoo", &["3"]),
        ]);
        let pairs: Vec<_> = extraction.associations.iter().collect();
        assert_eq!(
            pairs,
            vec![("NsA.ClassA.TestFoo", "3"), ("NsA.ClassA.TestBar", "2")]
        );
    }

    #[test]
    fn test_leading_zeros_are_canonicalized() {
        let extraction = extract(&[
            fact("NsA.ClassA", "TestFoo", &["0501"]),
            fact("NsA.ClassA", "TestBar", &["007", "7"]),
        ]);
        assert_eq!(extraction.associations.get("NsA.ClassA.TestFoo"), Some("501"));
        assert_eq!(extraction.associations.get("NsA.ClassA.TestBar"), Some("7"));
        assert_eq!(extraction.records[0].test_case_id.as_deref(), Some("501"));
        assert_eq!(extraction.ignored_markers[0].ignored, "7");
    }

    #[test]
    fn test_canonical_id() {
        assert_eq!(canonical_id("501"), "501");
        assert_eq!(canonical_id("000501"), "501");
        assert_eq!(canonical_id(" 42 "), "42");
        assert_eq!(canonical_id("0"), "0");
        assert_eq!(canonical_id("12a"), "12a");
        assert_eq!(canonical_id(""), "");
        // Too large for a work item id; left as written and rejected later
        assert_eq!(canonical_id("99999999999999999999"), "99999999999999999999");
    }

    #[test]
    fn test_association_map_preserves_insertion_order() {
        let map: AssociationMap = [("c", "3"), ("a", "1"), ("b", "2")].into_iter().collect();
        let ids: Vec<_> = map.ids().collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
        assert_eq!(map.len(), 3);
    }
}
