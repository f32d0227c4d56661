//! Geo-data asset directory discovery.
//!
//! The engine expects `geoip.dat`/`geosite.dat` next to a known directory.
//! Resolution order: the `XNODE_ASSET_DIR` environment variable, then the
//! documented candidate list, first directory containing `geoip.dat` wins.
//! Resolved once per process.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::debug;

/// Environment variable overriding discovery.
pub const ASSET_DIR_ENV: &str = "XNODE_ASSET_DIR";

/// Probed in order when the environment variable is unset.
pub const CANDIDATE_DIRS: &[&str] = &[
    "/usr/local/share/xray",
    "/usr/share/xray",
    "/opt/xray",
    ".",
];

static ASSET_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();

fn discover(env_override: Option<&str>, candidates: &[&str]) -> Option<PathBuf> {
    if let Some(dir) = env_override.filter(|d| !d.is_empty()) {
        return Some(PathBuf::from(dir));
    }

    for dir in candidates {
        if Path::new(dir).join("geoip.dat").is_file() {
            debug!(dir = %dir, "geo asset directory found");
            return Some(PathBuf::from(dir));
        }
    }
    None
}

/// Asset directory for this process, resolved on first call.
pub fn asset_dir() -> Option<&'static Path> {
    ASSET_DIR
        .get_or_init(|| {
            let env = std::env::var(ASSET_DIR_ENV).ok();
            discover(env.as_deref(), CANDIDATE_DIRS)
        })
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_without_probing() {
        let dir = discover(Some("/custom/assets"), &["/nonexistent"]);
        assert_eq!(dir, Some(PathBuf::from("/custom/assets")));
    }

    #[test]
    fn empty_env_override_is_ignored() {
        assert_eq!(discover(Some(""), &["/nonexistent-path-for-tests"]), None);
    }

    #[test]
    fn missing_everywhere_yields_none() {
        assert_eq!(discover(None, &["/nonexistent-path-for-tests"]), None);
    }

    #[test]
    fn finds_first_candidate_with_geoip() {
        let tmp = std::env::temp_dir().join("xnode-assets-test");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join("geoip.dat"), b"stub").unwrap();

        let tmp_str = tmp.to_str().unwrap();
        let dir = discover(None, &["/nonexistent-path-for-tests", tmp_str]);
        assert_eq!(dir, Some(PathBuf::from(tmp_str)));

        std::fs::remove_dir_all(&tmp).ok();
    }
}
