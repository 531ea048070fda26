//! Compile-time build metadata exposed to the CLI.

/// Semver package version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VCS commit hash captured at build time.
pub const GIT_COMMIT: &str = env!("CONDUCTOR_BUILD_GIT_HASH");

/// Build timestamp captured at compile time.
pub const BUILD_TIMESTAMP: &str = env!("CONDUCTOR_BUILD_TIMESTAMP");

/// The `conductor --version` block.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("CONDUCTOR_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("CONDUCTOR_BUILD_TIMESTAMP")
);

/// One-line banner shown when the interactive loop starts.
pub fn startup_metadata_line() -> String {
    format!("conductor v{VERSION} ({GIT_COMMIT})")
}
