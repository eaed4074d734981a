//! Default configuration values

/// Memory budget assumed for a build with no recorded resource usage (bytes)
pub const DEFAULT_MEMORY_BUDGET: u64 = 10 * 1024 * 1024 * 1024;

/// CPU intensity assumed for a package with no recorded resource usage
pub const DEFAULT_CPU_INTENSITY: f64 = 1.0;

/// Default maximum number of concurrent builds
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;

/// Priority class assigned when no reason yields one
pub const DEFAULT_PRIORITY: u32 = 3;

/// A priority tier must be larger than this for big-package promotion
pub const PROMOTION_TIER_THRESHOLD: usize = 3;

/// Name of the configuration file
pub const CONFIG_FILE: &str = "config.toml";

/// Name of the per-package metadata file inside a package directory
pub const INFO_FILE: &str = "lilac.toml";

/// Name of the build recipe inside a package directory
pub const RECIPE_FILE: &str = "PKGBUILD";

/// Name of the persistent store file in the state directory
pub const STORE_FILE: &str = "store";

/// Name of the process lock file in the state directory
pub const LOCK_FILE: &str = ".lock";

/// Name of the human-readable build log in the state directory
pub const BUILD_LOG_FILE: &str = "build.log";

/// Name of the structured build log in the state directory
pub const BUILD_LOG_JSON_FILE: &str = "build-log.json";

/// Subdirectory of the state directory holding per-batch log directories
pub const LOG_SUBDIR: &str = "log";
