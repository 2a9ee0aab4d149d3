//! Build metadata embedded by `build.rs`: package version, git commit, and
//! build timestamp, surfaced once in the early boot banner. Plain `&'static
//! str`s throughout since this prints before the heap exists.

/// Package version from `Cargo.toml` (`CARGO_PKG_VERSION`).
pub fn pkg_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Git commit the kernel was built from, truncated to 7 characters.
pub fn git_hash_short() -> &'static str {
    let hash = env!("GIT_HASH");
    &hash[..7.min(hash.len())]
}

/// Unix timestamp (seconds) of the build, as a string.
pub fn build_timestamp() -> &'static str {
    env!("BUILD_TIMESTAMP")
}
