//! Bucket and object naming rules, and object-key derivation for uploads.

use crate::services::error::{StorageError, StorageResult};

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
pub const SUPPORTED_REGIONS: [&str; 16] = [
    "local",
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "eu-west-1",
    "ap-southeast-1",
    "ap-northeast-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-2",
    "ap-northeast-3",
    "me-south-1",
];

/// Validate bucket name format.
///
/// S3 rules:
/// - 3–63 characters
/// - lowercase letters, digits, dots, hyphens only
/// - cannot start/end with dot or hyphen
/// - cannot contain consecutive dots or dot-hyphen patterns
/// - cannot look like an IPv4 address
pub fn validate_bucket_name(name: &str) -> StorageResult<()> {
    if name.trim() != name {
        return Err(StorageError::invalid(
            name,
            "cannot begin or end with whitespace",
        ));
    }

    let len = name.len();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(StorageError::invalid(
            name,
            "must be between 3 and 63 characters",
        ));
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(StorageError::invalid(
            name,
            "allowed characters are lowercase letters, digits, dots, and hyphens",
        ));
    }

    if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
        return Err(StorageError::invalid(
            name,
            "must start and end with a lowercase letter or digit",
        ));
    }

    if name.contains("..") || name.contains("-.") || name.contains(".-") {
        return Err(StorageError::invalid(
            name,
            "cannot contain consecutive dots or dot-hyphen combinations",
        ));
    }

    if is_ipv4_like(name) {
        return Err(StorageError::invalid(
            name,
            "must not be formatted like an IP address",
        ));
    }

    Ok(())
}

/// Reject keys that are empty, too long, absolute, have `.` or `..` path
/// segments, or carry control characters and backslashes.
pub fn validate_object_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid(key, "object key is empty"));
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::invalid(
            key,
            "object key exceeds 1024 bytes",
        ));
    }
    if key.starts_with('/') {
        return Err(StorageError::invalid(key, "object key must be relative"));
    }
    // URL path normalization drops these segments, so a download link would
    // name a different object than the one signed.
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(StorageError::invalid(
            key,
            "object key must not have `.` or `..` segments",
        ));
    }
    if key.bytes().any(|b| b.is_ascii_control() || b == b'\\') {
        return Err(StorageError::invalid(
            key,
            "object key contains control characters or backslashes",
        ));
    }
    Ok(())
}

/// Region names accepted by the local backend. Case-insensitive.
pub fn validate_region(region: &str) -> StorageResult<()> {
    if SUPPORTED_REGIONS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(region))
    {
        Ok(())
    } else {
        Err(StorageError::invalid(region, "region is not supported"))
    }
}

/// Object key for a streamed upload: the last path component of the file
/// name the client declared. Browsers on some platforms send full paths.
pub fn derive_object_key(file_name: Option<&str>) -> StorageResult<String> {
    let raw = file_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| StorageError::invalid("", "upload carries no file name"))?;

    let key = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    if key == "." {
        return Err(StorageError::invalid(raw, "file name is not a file"));
    }
    validate_object_key(key)?;
    Ok(key.to_string())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_bucket_names() {
        for name in ["demo", "my-bucket", "logs.2024", "abc"] {
            assert!(validate_bucket_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_malformed_bucket_names() {
        for name in [
            "ab",
            "Uppercase",
            "-leading",
            "trailing.",
            "double..dot",
            "dot.-hyphen",
            "192.168.1.1",
            " spaced",
            "under_score",
        ] {
            assert!(
                matches!(
                    validate_bucket_name(name),
                    Err(StorageError::InvalidIdentifier { .. })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn rejects_unsafe_keys() {
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key("/abs").is_err());
        assert!(validate_object_key("a/../b").is_err());
        assert!(validate_object_key("a/./b.txt").is_err());
        assert!(validate_object_key("./b.txt").is_err());
        assert!(validate_object_key("a/..").is_err());
        assert!(validate_object_key("tab\there").is_err());
        assert!(validate_object_key(&"k".repeat(1025)).is_err());
        assert!(validate_object_key("photos/2025/img.jpg").is_ok());
    }

    #[test]
    fn dots_inside_a_segment_are_allowed() {
        for key in ["notes..v2.txt", "a/.hidden", "v1.../x", "..."] {
            assert!(validate_object_key(key).is_ok(), "{key}");
        }
    }

    #[test]
    fn derives_key_from_last_path_component() {
        assert_eq!(derive_object_key(Some("hello.txt")).unwrap(), "hello.txt");
        assert_eq!(
            derive_object_key(Some("C:\\Users\\me\\report.pdf")).unwrap(),
            "report.pdf"
        );
        assert_eq!(derive_object_key(Some("dir/sub/a b.png")).unwrap(), "a b.png");
    }

    #[test]
    fn derive_rejects_missing_or_empty_names() {
        assert!(derive_object_key(None).is_err());
        assert!(derive_object_key(Some("   ")).is_err());
        assert!(derive_object_key(Some("dir/")).is_err());
        assert!(derive_object_key(Some("..")).is_err());
    }

    #[test]
    fn regions_are_case_insensitive() {
        assert!(validate_region("US-EAST-1").is_ok());
        assert!(validate_region("mars-north-1").is_err());
    }
}
