//! Spec loading and integrity checking.

use crate::error::{CompileError, Result};
use openapiv3::OpenAPI;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Policy applied when a loaded spec does not match its expected hash.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log a warning on mismatch.
    #[default]
    Warn,
    /// Fail loading on mismatch.
    Fail,
    /// Skip verification.
    Ignore,
}

/// Parse a spec from a string.
///
/// JSON is a valid subset of YAML, so one parser covers both formats.
///
/// # Errors
///
/// Returns an error if the content is not a valid `OpenAPI` document.
pub fn load_spec_str(content: &str, location: &str) -> Result<OpenAPI> {
    serde_yaml::from_str(content).map_err(|e| CompileError::SpecParse {
        location: location.to_string(),
        source: e,
    })
}

/// Read and parse a spec file, optionally verifying its hash first.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the hash mismatches under
/// [`HashPolicy::Fail`], or the content is not a valid `OpenAPI` document.
pub fn load_spec_file(path: &str, expected_hash: Option<&str>, policy: HashPolicy) -> Result<OpenAPI> {
    let content = std::fs::read_to_string(path).map_err(|e| CompileError::SpecReadFile {
        path: path.to_string(),
        source: e,
    })?;

    if let Some(expected) = expected_hash {
        verify_hash(&content, expected, policy, path)?;
    }

    load_spec_str(&content, path)
}

/// The `sha256:<hex>` digest of raw spec content.
#[must_use]
pub fn spec_hash(content: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

fn verify_hash(content: &str, expected: &str, policy: HashPolicy, location: &str) -> Result<()> {
    let actual = spec_hash(content);
    if actual == expected {
        return Ok(());
    }

    match policy {
        HashPolicy::Fail => Err(CompileError::SpecHashMismatch {
            expected: expected.to_string(),
            actual,
        }),
        HashPolicy::Warn => {
            tracing::warn!("Spec hash mismatch for '{location}'. Expected: {expected}, Got: {actual}");
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}
