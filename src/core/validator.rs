//! Association checks run before any remote write
//!
//! Three independent checks, run by the reconciler in this order:
//! missing associations against the threshold, duplicate Test Case ids,
//! and ids that do not resolve to a Test Case work item.

use miette::Diagnostic;
use std::collections::HashSet;
use thiserror::Error;

use crate::core::config::ConfigError;
use crate::core::inventory::{AssociationError, AssociationMap};

/// A failed association check
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("{}", missing_summary(.missing, .valid, .threshold))]
    #[diagnostic(
        code(tcassoc::validate::missing_associations),
        help("Add a [TestCaseId] marker to each listed test, or raise the missing threshold")
    )]
    MissingAssociationsExceeded {
        missing: Vec<AssociationError>,
        valid: usize,
        threshold: usize,
    },

    #[error("{}", error_lines("Test Case Id duplication detected", .ids))]
    #[diagnostic(
        code(tcassoc::validate::duplicate_ids),
        help("Each Test Case may be automated by exactly one test method")
    )]
    DuplicateTestCaseIds { ids: Vec<String> },

    #[error("{}", error_lines("Test Case Id does not belong to an Azure Devops Test Case", .ids))]
    #[diagnostic(
        code(tcassoc::validate::invalid_ids),
        help("Check that each id names an existing work item of type Test Case")
    )]
    InvalidTestCaseIds { ids: Vec<String> },
}

fn missing_summary(missing: &[AssociationError], valid: &usize, threshold: &usize) -> String {
    let lines: Vec<&str> = missing.iter().map(AssociationError::as_str).collect();
    format!(
        "Failing build due to exceeding the threshold for unassociated test cases.\n\
         The following tests are missing the [TestCaseId] attribute:\n{}\n\
         Total valid test associations: {}\n\
         Total invalid test associations: {}\n\
         Maximum number of allowed invalid associations: {}",
        lines.join("\n"),
        valid,
        missing.len(),
        threshold
    )
}

fn error_lines(kind: &str, ids: &[String]) -> String {
    ids.iter()
        .map(|id| format!("ERROR: {}: {}", kind, id))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse the missing-association threshold; unset or blank means 0
pub fn parse_threshold(raw: Option<&str>) -> Result<usize, ConfigError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(0),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            setting: "MAX_MISSING_TEST_CASES",
            value: value.to_string(),
            expected: "a non-negative integer, e.g. 5",
        }),
    }
}

/// Fail when more tests lack an id than the threshold allows
pub fn check_missing(
    errors: &[AssociationError],
    map: &AssociationMap,
    threshold: usize,
) -> Result<(), ValidationError> {
    if errors.len() > threshold {
        return Err(ValidationError::MissingAssociationsExceeded {
            missing: errors.to_vec(),
            valid: map.len(),
            threshold,
        });
    }
    Ok(())
}

/// Ids used by more than one test, each listed once
///
/// Order is the scan position at which an id is first seen a second time.
pub fn duplicate_ids(map: &AssociationMap) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for id in map.ids() {
        if !seen.insert(id) && reported.insert(id) {
            duplicates.push(id.to_string());
        }
    }
    duplicates
}

/// Fail when any Test Case id is shared by two or more tests
pub fn check_duplicates(map: &AssociationMap) -> Result<(), ValidationError> {
    let ids = duplicate_ids(map);
    if ids.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::DuplicateTestCaseIds { ids })
    }
}

/// Whether `id` is shaped like a work item id at all
pub fn is_well_formed_id(id: &str) -> bool {
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && id.parse::<u64>().map_or(false, |n| n > 0)
}

/// Fail when any distinct id does not resolve to a Test Case
///
/// `exists` is consulted once per distinct, well-formed id in first-seen
/// order. Empty or non-numeric ids are invalid without a lookup. Errors
/// from `exists` abort the check.
pub fn check_ids_exist<'a, I, F, E>(ids: I, mut exists: F) -> Result<(), E>
where
    I: IntoIterator<Item = &'a str>,
    F: FnMut(&str) -> Result<bool, E>,
    E: From<ValidationError>,
{
    let mut checked = HashSet::new();
    let mut invalid = Vec::new();
    for id in ids {
        if !checked.insert(id) {
            continue;
        }
        if !is_well_formed_id(id) || !exists(id)? {
            invalid.push(id.to_string());
        }
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::InvalidTestCaseIds { ids: invalid }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(n: usize) -> Vec<AssociationError> {
        (0..n)
            .map(|i| AssociationError::missing(&format!("Test{}", i)))
            .collect()
    }

    #[test]
    fn test_check_missing_threshold() {
        let map = AssociationMap::new();
        assert!(check_missing(&errors(3), &map, 2).is_err());
        assert!(check_missing(&errors(2), &map, 2).is_ok());
        assert!(check_missing(&errors(0), &map, 0).is_ok());
        assert!(check_missing(&errors(1), &map, 0).is_err());
    }

    #[test]
    fn test_missing_message_lists_methods_and_counts() {
        let map: AssociationMap = [("A.B.TestOk", "1")].into_iter().collect();
        let err = check_missing(&errors(2), &map, 1).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("attribute: Test0"));
        assert!(msg.contains("attribute: Test1"));
        assert!(msg.contains("Total valid test associations: 1"));
        assert!(msg.contains("Total invalid test associations: 2"));
        assert!(msg.contains("Maximum number of allowed invalid associations: 1"));
    }

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold(None).unwrap(), 0);
        assert_eq!(parse_threshold(Some("")).unwrap(), 0);
        assert_eq!(parse_threshold(Some("  ")).unwrap(), 0);
        assert_eq!(parse_threshold(Some("7")).unwrap(), 7);
        assert!(parse_threshold(Some("many")).is_err());
        assert!(parse_threshold(Some("-1")).is_err());
    }

    #[test]
    fn test_duplicate_reported_once() {
        let map: AssociationMap = [("a", "1"), ("b", "2"), ("c", "1")].into_iter().collect();
        assert_eq!(duplicate_ids(&map), vec!["1".to_string()]);
        match check_duplicates(&map) {
            Err(ValidationError::DuplicateTestCaseIds { ids }) => assert_eq!(ids, vec!["1"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_order_and_triples() {
        let map: AssociationMap = [
            ("a", "5"),
            ("b", "9"),
            ("c", "9"),
            ("d", "5"),
            ("e", "5"),
            ("f", "9"),
        ]
        .into_iter()
        .collect();
        assert_eq!(duplicate_ids(&map), vec!["9".to_string(), "5".to_string()]);
    }

    #[test]
    fn test_no_duplicates() {
        let map: AssociationMap = [("a", "1"), ("b", "2")].into_iter().collect();
        assert!(check_duplicates(&map).is_ok());
    }

    #[test]
    fn test_duplicate_message_format() {
        let err = ValidationError::DuplicateTestCaseIds {
            ids: vec!["1".to_string(), "4".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "ERROR: Test Case Id duplication detected: 1\nERROR: Test Case Id duplication detected: 4"
        );
    }

    #[test]
    fn test_ids_exist_collects_all_failures() {
        let ids = ["10", "11", "12", "10"];
        let mut lookups = Vec::new();
        let result: Result<(), ValidationError> = check_ids_exist(ids, |id| {
            lookups.push(id.to_string());
            Ok(id != "11" && id != "12")
        });
        match result {
            Err(ValidationError::InvalidTestCaseIds { ids }) => assert_eq!(ids, vec!["11", "12"]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(lookups, vec!["10", "11", "12"]);
    }

    #[test]
    fn test_malformed_ids_skip_lookup() {
        let mut lookups = 0;
        let result: Result<(), ValidationError> = check_ids_exist(["", "abc", "0", "42"], |_| {
            lookups += 1;
            Ok(true)
        });
        match result {
            Err(ValidationError::InvalidTestCaseIds { ids }) => {
                assert_eq!(ids, vec!["", "abc", "0"])
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(lookups, 1);
    }

    #[test]
    fn test_all_checks_pass_on_clean_input() {
        let map: AssociationMap = [("a", "1"), ("b", "2"), ("c", "3")].into_iter().collect();
        assert!(check_missing(&errors(1), &map, 1).is_ok());
        assert!(check_duplicates(&map).is_ok());
        let result: Result<(), ValidationError> = check_ids_exist(map.ids(), |_| Ok(true));
        assert!(result.is_ok());
    }
}
