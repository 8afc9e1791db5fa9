//! Cache gate: is the artifact on disk already current?
//!
//! The remote `modifiedTime` is an opaque fingerprint. It is first compared
//! as an instant (both sides parsed, offsets normalised) and, when either side
//! does not parse or the instants differ, compared literally. Anything that
//! goes wrong reading the local artifact means "not current".

use std::path::Path;

use serde_yaml::Mapping;
use tracing::{debug, info, warn};

use crate::frontmatter::{self, get_str};
use crate::metadata::{is_draft, parse_instant, KEY_SOURCE_MODIFIED_AT};

/// Result of a cache check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheDecision {
    pub skip: bool,
    /// Meaningful only when `skip` is set.
    pub is_public: bool,
}

impl CacheDecision {
    const REFRESH: Self = Self {
        skip: false,
        is_public: false,
    };
}

/// What was found at an artifact's path.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedArtifact {
    Missing,
    /// The file exists but could not be read or its frontmatter parsed.
    Unreadable(String),
    Present(Mapping),
}

/// Read only the metadata of the artifact at `path`.
pub fn read_cached(path: &Path) -> CachedArtifact {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CachedArtifact::Missing,
        Err(e) => return CachedArtifact::Unreadable(e.to_string()),
    };
    match frontmatter::parse(&text) {
        Ok(doc) => CachedArtifact::Present(doc.metadata),
        Err(e) => CachedArtifact::Unreadable(e.to_string()),
    }
}

/// True when the persisted fingerprint denotes the same version as `remote`.
pub fn fingerprints_match(local: &str, remote: &str) -> bool {
    if let (Some(a), Some(b)) = (parse_instant(local), parse_instant(remote)) {
        if a == b {
            return true;
        }
    }
    local == remote
}

/// Decide whether `cached` is current with respect to the remote fingerprint.
pub fn decide(cached: &CachedArtifact, remote_modified_at: Option<&str>) -> CacheDecision {
    let Some(remote) = remote_modified_at.filter(|r| !r.is_empty()) else {
        return CacheDecision::REFRESH;
    };
    let metadata = match cached {
        CachedArtifact::Present(metadata) => metadata,
        CachedArtifact::Missing | CachedArtifact::Unreadable(_) => return CacheDecision::REFRESH,
    };
    let Some(local) = get_str(metadata, KEY_SOURCE_MODIFIED_AT).filter(|l| !l.is_empty()) else {
        return CacheDecision::REFRESH;
    };
    if fingerprints_match(local, remote) {
        CacheDecision {
            skip: true,
            is_public: !is_draft(metadata),
        }
    } else {
        CacheDecision::REFRESH
    }
}

/// Read the artifact at `path` and decide, logging why.
pub fn check_cache(file_id: &str, path: &Path, remote_modified_at: Option<&str>) -> CacheDecision {
    if remote_modified_at.map_or(true, str::is_empty) {
        warn!(file_id, "[CACHE] Remote modifiedTime missing, forcing refresh");
        return CacheDecision::REFRESH;
    }
    let cached = read_cached(path);
    match &cached {
        CachedArtifact::Missing => debug!(file_id, "[CACHE] No local artifact"),
        CachedArtifact::Unreadable(reason) => {
            warn!(file_id, path = %path.display(), reason = %reason, "[CACHE] Local artifact unreadable, reprocessing")
        }
        CachedArtifact::Present(_) => {}
    }
    let decision = decide(&cached, remote_modified_at);
    if decision.skip {
        info!(file_id, is_public = decision.is_public, "[CACHE] Up to date, skipping");
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(source_modified_at: Option<&str>, draft: Option<bool>) -> CachedArtifact {
        let mut meta = Mapping::new();
        if let Some(value) = source_modified_at {
            meta.insert(KEY_SOURCE_MODIFIED_AT.into(), value.into());
        }
        if let Some(draft) = draft {
            meta.insert("draft".into(), draft.into());
        }
        CachedArtifact::Present(meta)
    }

    #[test]
    fn missing_remote_fingerprint_forces_refresh() {
        let cached = artifact(Some("2024-01-01T00:00:00Z"), None);
        assert!(!decide(&cached, None).skip);
        assert!(!decide(&cached, Some("")).skip);
    }

    #[test]
    fn missing_or_unreadable_artifact_is_refreshed() {
        assert!(!decide(&CachedArtifact::Missing, Some("x")).skip);
        assert!(!decide(&CachedArtifact::Unreadable("bad".into()), Some("x")).skip);
        assert!(!decide(&artifact(None, None), Some("x")).skip);
        assert!(!decide(&artifact(Some(""), None), Some("x")).skip);
    }

    #[test]
    fn semantically_equal_instants_skip() {
        let cached = artifact(Some("2024-01-01T09:00:00+09:00"), Some(false));
        let decision = decide(&cached, Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(
            decision,
            CacheDecision {
                skip: true,
                is_public: true
            }
        );
    }

    #[test]
    fn opaque_fingerprints_compare_literally() {
        let cached = artifact(Some("v42"), Some(true));
        let decision = decide(&cached, Some("v42"));
        assert!(decision.skip);
        assert!(!decision.is_public);
        assert!(!decide(&cached, Some("v43")).skip);
    }

    #[test]
    fn changed_timestamp_is_reprocessed() {
        let cached = artifact(Some("2024-01-01T00:00:00Z"), None);
        assert!(!decide(&cached, Some("2024-01-01T00:00:01Z")).skip);
    }
}
