//! Configuration file parsing and validation
//!
//! The config file is declarative TOML. String values support `${VAR}`
//! environment substitution, and validation reports every problem found
//! rather than stopping at the first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::config::defaults::DEFAULT_MAX_CONCURRENCY;
use crate::error::SettingsError;

/// The whole configuration file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Settings {
    /// Package repository paths
    pub repository: RepositoryConfig,

    /// Scheduler behavior
    #[serde(default)]
    pub lilac: LilacConfig,

    /// Hooks and miscellanea
    #[serde(default)]
    pub misc: MiscConfig,

    /// Process environment overrides applied at startup
    #[serde(default)]
    pub envvars: HashMap<String, String>,

    /// Version checker options
    #[serde(default)]
    pub nvchecker: NvcheckerConfig,
}

/// Paths of the managed repository
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    /// Checkout containing one directory per package
    pub repodir: PathBuf,

    /// Where built artifacts land
    pub destdir: PathBuf,
}

/// Scheduler behavior
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LilacConfig {
    /// Instance name used in logs and reports
    #[serde(default = "default_name")]
    pub name: String,

    /// Upper bound on concurrently running builds
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Push the repository after a batch
    #[serde(default)]
    pub git_push: bool,

    /// Acknowledge new versions even for packages that failed
    #[serde(default)]
    pub rebuild_failed_pkgs: bool,

    /// Database server URL; no database when unset
    #[serde(default)]
    pub dburl: Option<String>,

    /// Database schema name
    #[serde(default)]
    pub schema: Option<String>,

    /// Directory holding the store, lock and logs
    #[serde(default = "default_statedir")]
    pub statedir: PathBuf,
}

fn default_name() -> String {
    "lilac".to_string()
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_statedir() -> PathBuf {
    PathBuf::from(".lilac")
}

impl Default for LilacConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            max_concurrency: default_max_concurrency(),
            git_push: false,
            rebuild_failed_pkgs: false,
            dburl: None,
            schema: None,
            statedir: default_statedir(),
        }
    }
}

/// Hooks and miscellanea
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MiscConfig {
    /// pacman configuration forwarded to the build worker
    #[serde(default)]
    pub pacman_conf: Option<PathBuf>,

    /// Build worker command; the pkgbase is appended per build
    #[serde(default)]
    pub worker: Option<Vec<String>>,

    /// Commands run after setup, each an argv array
    #[serde(default)]
    pub prerun: Vec<Vec<String>>,

    /// Commands run during finalization, each an argv array
    #[serde(default)]
    pub postrun: Vec<Vec<String>>,
}

/// Version checker options
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct NvcheckerConfig {
    /// Proxy URL handed to the checker
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Settings {
    /// Load from a file with `${VAR}` substitution, then validate
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string and validate
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let substituted = substitute_env_vars(content);
        let settings: Self =
            toml::from_str(&substituted).map_err(|e| SettingsError::Parse { source: e })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check everything, reporting all problems at once
    fn validate(&self) -> Result<(), SettingsError> {
        let mut errors = Vec::new();

        if self.repository.repodir.as_os_str().is_empty() {
            errors.push("repository.repodir must be set".to_string());
        }
        if self.repository.destdir.as_os_str().is_empty() {
            errors.push("repository.destdir must be set".to_string());
        }
        if self.lilac.max_concurrency < 1 {
            errors.push("lilac.max_concurrency must be at least 1".to_string());
        }
        for (section, commands) in [("prerun", &self.misc.prerun), ("postrun", &self.misc.postrun)]
        {
            if commands.iter().any(|argv| argv.is_empty()) {
                errors.push(format!("misc.{section} entries must not be empty"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::Invalid { errors })
        }
    }

    /// Apply the `envvars` section to the process environment
    pub fn apply_envvars(&self) {
        for (key, value) in &self.envvars {
            std::env::set_var(key, value);
        }
    }
}

/// Substitute `${VAR}` patterns with environment values; unset variables
/// become empty strings
pub fn substitute_env_vars(input: &str) -> String {
    let re = match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    let mut last_end = 0;
    let mut output = String::new();
    for cap in re.captures_iter(input) {
        let full_match = cap.get(0).expect("capture 0 always exists");
        output.push_str(&input[last_end..full_match.start()]);
        output.push_str(&std::env::var(&cap[1]).unwrap_or_default());
        last_end = full_match.end();
    }
    output.push_str(&input[last_end..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[repository]
repodir = "/srv/repo"
destdir = "/srv/repo/pkgs"

[lilac]
name = "archlinuxcn"
max_concurrency = 4
git_push = true

[misc]
prerun = [["true"]]
postrun = [["echo", "done"]]

[envvars]
TZ = "UTC"

[nvchecker]
proxy = "socks5h://localhost:1080"
"#;

    #[test]
    fn test_parse_sample() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.lilac.name, "archlinuxcn");
        assert_eq!(settings.lilac.max_concurrency, 4);
        assert!(settings.lilac.git_push);
        assert!(!settings.lilac.rebuild_failed_pkgs);
        assert_eq!(settings.repository.repodir, PathBuf::from("/srv/repo"));
        assert_eq!(settings.envvars.get("TZ"), Some(&"UTC".to_string()));
        assert_eq!(
            settings.nvchecker.proxy.as_deref(),
            Some("socks5h://localhost:1080")
        );
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_toml(
            r#"
[repository]
repodir = "/r"
destdir = "/d"
"#,
        )
        .unwrap();
        assert_eq!(settings.lilac.name, "lilac");
        assert_eq!(settings.lilac.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(settings.lilac.dburl.is_none());
        assert_eq!(settings.lilac.statedir, PathBuf::from(".lilac"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let err = Settings::from_toml(
            r#"
[repository]
repodir = ""
destdir = ""

[lilac]
max_concurrency = 0
"#,
        )
        .unwrap_err();
        match err {
            SettingsError::Invalid { errors } => assert_eq!(errors.len(), 3),
            other => panic!("expected Invalid, got {other}"),
        }
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("LILAC_TEST_REPODIR", "/from/env");
        let settings = Settings::from_toml(
            r#"
[repository]
repodir = "${LILAC_TEST_REPODIR}"
destdir = "/d"
"#,
        )
        .unwrap();
        std::env::remove_var("LILAC_TEST_REPODIR");
        assert_eq!(settings.repository.repodir, PathBuf::from("/from/env"));
    }

    #[test]
    fn test_missing_file() {
        let err = Settings::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::NotFound { .. }));
    }
}
