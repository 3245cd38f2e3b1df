//! Build metadata embedded by `build.rs`, logged when the CLI starts.

/// Short git commit hash, suffixed `-dirty` for uncommitted trees.
pub const GIT_HASH: &str = env!("UNIXCALL_GIT_HASH");

/// Build time as seconds since the Unix epoch.
pub const BUILD_TIMESTAMP: &str = env!("UNIXCALL_BUILD_TIMESTAMP");

/// Cargo profile the crate was built with (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("UNIXCALL_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"<version> (<hash>, <profile>)"`, e.g. `"0.1.0 (abc1234, debug)"`.
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// Build time in seconds since the epoch, or `None` if the build script
/// could not read the clock.
pub fn build_epoch_secs() -> Option<u64> {
    BUILD_TIMESTAMP.parse().ok().filter(|&secs| secs > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_mentions_version_and_profile() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(BUILD_PROFILE));
        assert!(!GIT_HASH.is_empty());
    }

    #[test]
    fn test_build_epoch_is_recent() {
        // 2020-01-01T00:00:00Z
        let secs = build_epoch_secs().unwrap();
        assert!(secs > 1_577_836_800);
    }
}
