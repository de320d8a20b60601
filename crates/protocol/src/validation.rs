use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of validating an upload session before completion.
///
/// A result with `has_errors = true` must never be completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub has_errors: bool,
    /// Names the server expects but has not received.
    #[serde(default)]
    pub missing_files: BTreeSet<String>,
    /// Names whose content failed server-side checks.
    #[serde(default)]
    pub invalid_files: BTreeSet<String>,
}

impl ValidationResult {
    /// A result with no errors.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Builds a result from missing and invalid names; `has_errors` is
    /// derived from them.
    pub fn with_errors<M, I>(missing: M, invalid: I) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let missing_files: BTreeSet<String> = missing.into_iter().map(Into::into).collect();
        let invalid_files: BTreeSet<String> = invalid.into_iter().map(Into::into).collect();
        Self {
            has_errors: !missing_files.is_empty() || !invalid_files.is_empty(),
            missing_files,
            invalid_files,
        }
    }

    /// `true` when the session may be completed.
    ///
    /// A server may flag errors without naming files, so the flag wins.
    pub fn is_clean(&self) -> bool {
        !self.has_errors && self.missing_files.is_empty() && self.invalid_files.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return f.write_str("no validation errors");
        }
        let mut parts = Vec::new();
        if !self.missing_files.is_empty() {
            let names: Vec<&str> = self.missing_files.iter().map(String::as_str).collect();
            parts.push(format!("missing files: {}", names.join(", ")));
        }
        if !self.invalid_files.is_empty() {
            let names: Vec<&str> = self.invalid_files.iter().map(String::as_str).collect();
            parts.push(format!("invalid files: {}", names.join(", ")));
        }
        if parts.is_empty() {
            parts.push("server reported errors".into());
        }
        f.write_str(&parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_clean() {
        let r = ValidationResult::ok();
        assert!(r.is_clean());
        assert_eq!(r.to_string(), "no validation errors");
    }

    #[test]
    fn missing_files_mark_errors() {
        let r = ValidationResult::with_errors(["disk-1.vmdk", "disk-0.vmdk"], Vec::<String>::new());
        assert!(r.has_errors);
        assert!(!r.is_clean());
        assert_eq!(r.to_string(), "missing files: disk-0.vmdk, disk-1.vmdk");
    }

    #[test]
    fn flag_without_names_is_not_clean() {
        let r = ValidationResult {
            has_errors: true,
            ..Default::default()
        };
        assert!(!r.is_clean());
        assert_eq!(r.to_string(), "server reported errors");
    }

    #[test]
    fn parses_without_optional_sets() {
        let r: ValidationResult = serde_json::from_str(r#"{"hasErrors":false}"#).unwrap();
        assert!(r.is_clean());
    }
}
