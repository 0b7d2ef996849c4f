use crate::error::{DeployError, Result};
use std::path::PathBuf;
use tracing::{debug, info};

/// Resolve every binary on `PATH`, failing with all missing names at once
pub fn check_prerequisites(binaries: &[&str]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::with_capacity(binaries.len());
    let mut missing = Vec::new();

    for binary in binaries {
        match which::which(binary) {
            Ok(path) => {
                debug!(binary = %binary, path = %path.display(), "Found prerequisite");
                found.push(path);
            }
            Err(_) => missing.push((*binary).to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(DeployError::Prerequisite { missing });
    }

    info!(binaries = %binaries.join(", "), "✅ Prerequisites present");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_present_binary_resolves() {
        let found = check_prerequisites(&["sh"]).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_every_missing_binary_is_named() {
        let err = check_prerequisites(&["eci-no-such-tool", "eci-also-missing"]).unwrap_err();
        match err {
            DeployError::Prerequisite { missing } => {
                assert_eq!(missing, vec!["eci-no-such-tool", "eci-also-missing"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
