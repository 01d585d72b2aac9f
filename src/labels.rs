//! Labels stamped on every evaluation run so results can be traced back to
//! the code revision and prompt version that produced them.

use std::{fs, path::Path, process::Command};

use sha2::{Digest, Sha256};

use crate::prompts::prompt_files;

pub const UNKNOWN: &str = "unknown";
pub const NO_PROMPTS: &str = "no-prompts";

/// Short git revision of the repository containing `dir`.
pub fn git_revision(dir: impl AsRef<Path>) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(dir.as_ref())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if sha.is_empty() {
                UNKNOWN.to_string()
            } else {
                sha
            }
        }
        Ok(output) => {
            tracing::debug!(status = %output.status, "git rev-parse failed");
            UNKNOWN.to_string()
        }
        Err(error) => {
            tracing::debug!(%error, "git is not available");
            UNKNOWN.to_string()
        }
    }
}

/// First 8 hex characters of the SHA-256 of all prompt templates in `dir`,
/// concatenated in file-name order.
pub fn prompt_fingerprint(dir: impl AsRef<Path>) -> String {
    match fingerprint_files(dir.as_ref()) {
        Ok(Some(hash)) => hash,
        Ok(None) => NO_PROMPTS.to_string(),
        Err(error) => {
            tracing::warn!(%error, "failed to hash prompt templates");
            UNKNOWN.to_string()
        }
    }
}

fn fingerprint_files(dir: &Path) -> std::io::Result<Option<String>> {
    let mut hasher = Sha256::new();
    let mut any = false;

    for path in prompt_files(dir)? {
        let content = fs::read(&path)?;
        any |= !content.is_empty();
        hasher.update(&content);
    }

    if !any {
        return Ok(None);
    }

    let digest = format!("{:x}", hasher.finalize());
    Ok(Some(digest[..8].to_string()))
}

/// Labels for one run. Constructed by the caller so tests can pin them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLabels {
    pub git_sha: String,
    pub prompt_hash: String,
}

impl RunLabels {
    pub fn new(git_sha: impl Into<String>, prompt_hash: impl Into<String>) -> Self {
        Self {
            git_sha: git_sha.into(),
            prompt_hash: prompt_hash.into(),
        }
    }

    pub fn detect(repo_dir: impl AsRef<Path>, prompts_dir: impl AsRef<Path>) -> Self {
        Self::new(git_revision(repo_dir), prompt_fingerprint(prompts_dir))
    }
}

impl Default for RunLabels {
    fn default() -> Self {
        Self::new(UNKNOWN, NO_PROMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_prompt_content() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prompt_fingerprint(dir.path()), NO_PROMPTS);

        fs::write(dir.path().join("system_prompt.hbs"), "You are an agent.").unwrap();
        fs::write(dir.path().join("readme.md"), "not a prompt").unwrap();
        let first = prompt_fingerprint(dir.path());
        assert_eq!(first.len(), 8);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(prompt_fingerprint(dir.path()), first);

        fs::write(dir.path().join("user_request.hbs"), "Request: {{request}}").unwrap();
        assert_ne!(prompt_fingerprint(dir.path()), first);
    }

    #[test]
    fn fingerprint_matches_sha256_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.hbs"), "world").unwrap();
        fs::write(dir.path().join("a.hbs"), "hello ").unwrap();

        let expected = format!("{:x}", Sha256::digest(b"hello world"));
        assert_eq!(prompt_fingerprint(dir.path()), expected[..8]);
    }

    #[test]
    fn missing_directory_has_no_prompts() {
        assert_eq!(prompt_fingerprint("no/such/prompts"), NO_PROMPTS);
    }

    #[test]
    fn revision_outside_a_repository_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        // git cannot start in a directory that does not exist
        let sha = git_revision(dir.path().join("missing"));
        assert_eq!(sha, UNKNOWN);
    }
}
