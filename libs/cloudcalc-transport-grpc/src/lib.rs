#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod client;
pub mod propagation;

/// Metadata key carrying the caller's self-declared identity (`rust`, `golang`, ...).
pub const CALLER_IDENTITY_METADATA_KEY: &str = "x-caller-identity";

/// Identity recorded for callers that send none.
pub const UNKNOWN_CALLER: &str = "unknown";

use tonic::Status;
use tonic::metadata::{MetadataMap, MetadataValue};

/// Attach the caller identity to outgoing gRPC metadata.
///
/// # Errors
/// Returns `invalid_argument` if `identity` is not a valid ASCII metadata value.
pub fn attach_identity(meta: &mut MetadataMap, identity: &str) -> Result<(), Status> {
    let value = MetadataValue::try_from(identity)
        .map_err(|e| Status::invalid_argument(format!("caller identity: {e}")))?;

    meta.insert(CALLER_IDENTITY_METADATA_KEY, value);
    Ok(())
}

/// Read the caller identity from incoming gRPC metadata.
///
/// Missing, empty or non-ASCII values fall back to [`UNKNOWN_CALLER`].
#[must_use]
pub fn extract_identity(meta: &MetadataMap) -> String {
    meta.get(CALLER_IDENTITY_METADATA_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_CALLER)
        .to_owned()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrip() {
        let mut meta = MetadataMap::new();
        attach_identity(&mut meta, "rust").unwrap();
        assert_eq!(extract_identity(&meta), "rust");
    }

    #[test]
    fn test_missing_identity_is_unknown() {
        assert_eq!(extract_identity(&MetadataMap::new()), UNKNOWN_CALLER);

        let mut meta = MetadataMap::new();
        meta.insert(CALLER_IDENTITY_METADATA_KEY, MetadataValue::from_static("  "));
        assert_eq!(extract_identity(&meta), UNKNOWN_CALLER);
    }

    #[test]
    fn test_attach_rejects_invalid_value() {
        let mut meta = MetadataMap::new();
        let err = attach_identity(&mut meta, "bad\nidentity").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert!(meta.is_empty());
    }
}
