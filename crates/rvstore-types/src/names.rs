//! Object name and namespace validation.
//!
//! Names double as file names in the file-backed store, so they follow the
//! DNS-subdomain convention:
//! - Must be 1..=253 characters
//! - Only lowercase ASCII alphanumerics, `-` and `.`
//! - Must start and end with an alphanumeric character
//! - Must not contain `..`
//!
//! Namespaces follow the same rules but are limited to 63 characters and may
//! not contain `.`.

use crate::error::TypeError;

const MAX_NAME_LEN: usize = 253;
const MAX_NAMESPACE_LEN: usize = 63;

fn invalid(name: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn check_common(name: &str, max_len: usize, allow_dot: bool) -> Result<(), TypeError> {
    if name.is_empty() {
        return Err(invalid(name, "must not be empty"));
    }
    if name.len() > max_len {
        return Err(invalid(name, format!("must be at most {max_len} characters")));
    }
    for ch in name.chars() {
        let ok = ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || (allow_dot && ch == '.');
        if !ok {
            return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
        }
    }
    let starts_ok = name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_ok = name.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_ok || !ends_ok {
        return Err(invalid(name, "must start and end with an alphanumeric character"));
    }
    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }
    Ok(())
}

/// Validate an object name.
///
/// ```
/// use rvstore_types::validate_name;
///
/// assert!(validate_name("my-dashboard").is_ok());
/// assert!(validate_name("a.b.c").is_ok());
/// assert!(validate_name("").is_err());
/// assert!(validate_name("../etc").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    check_common(name, MAX_NAME_LEN, true)
}

/// Validate a namespace name.
pub fn validate_namespace(namespace: &str) -> Result<(), TypeError> {
    check_common(namespace, MAX_NAMESPACE_LEN, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name("dash-1").is_ok());
        assert!(validate_name("v1.2.3").is_ok());
        assert!(validate_namespace("default").is_ok());
        assert!(validate_namespace("org-42").is_ok());
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name("a..b").is_err());
    }

    #[test]
    fn rejects_uppercase_and_underscore() {
        assert!(validate_name("Upper").is_err());
        assert!(validate_namespace("_cluster").is_err());
        assert!(validate_namespace("with.dot").is_err());
    }

    #[test]
    fn enforces_length_limits() {
        assert!(validate_name(&"a".repeat(253)).is_ok());
        assert!(validate_name(&"a".repeat(254)).is_err());
        assert!(validate_namespace(&"a".repeat(64)).is_err());
    }

    #[test]
    fn error_names_the_offender() {
        let err = validate_name("Bad").unwrap_err();
        assert!(err.to_string().contains("Bad"));
    }
}
