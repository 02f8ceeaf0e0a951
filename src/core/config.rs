//! Configuration management with layered hierarchy
//!
//! Precedence, lowest first: built-in defaults, the global config file
//! (`<config dir>/tcassoc/config.yaml`), environment variables, then the
//! command line. [`Settings::resolve`] merges everything and enforces the
//! required settings before any inventory or remote work starts.

use miette::Diagnostic;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::core::azure::DEFAULT_TIMEOUT_SECS;
use crate::core::validator::parse_threshold;

/// Errors in the supplied configuration
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("Missing required configuration setting: {setting}.\nExample: {example}")]
    #[diagnostic(
        code(tcassoc::config::missing),
        help("Pass it on the command line or set the environment variable of the same name")
    )]
    Missing {
        setting: &'static str,
        example: &'static str,
    },

    #[error("Invalid value for {setting}: '{value}' (expected {expected})")]
    #[diagnostic(code(tcassoc::config::invalid))]
    Invalid {
        setting: &'static str,
        value: String,
        expected: &'static str,
    },
}

const TIMEOUT_EXPECTED: &str = "a whole number of seconds greater than 0, e.g. 30";

/// Optional defaults read from the global config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default Azure DevOps host
    pub host: Option<String>,

    /// Default project
    pub project: Option<String>,

    /// Default automated test type label
    pub test_type: Option<String>,

    /// Root searched for the test binary
    pub sources_dir: Option<PathBuf>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from all sources, merging in priority order
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global) = Self::load_file(&global_path) {
                config.merge(global);
            }
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read one config file; unreadable or malformed files are skipped
    pub fn load_file(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable config");
                return None;
            }
        };
        match serde_yml::from_str::<Config>(&contents) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping malformed config");
                None
            }
        }
    }

    /// Get the path to the global config file
    fn global_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "tcassoc")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Overlay environment variables read through `lookup`
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("Build_SourcesDirectory").filter(|v| !v.is_empty()) {
            self.sources_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup("TCASSOC_TIMEOUT_SECS").filter(|v| !v.trim().is_empty()) {
            let secs = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                setting: "TCASSOC_TIMEOUT_SECS",
                value: raw.clone(),
                expected: TIMEOUT_EXPECTED,
            })?;
            self.timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Merge another config into this one (other takes precedence)
    fn merge(&mut self, other: Config) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.project.is_some() {
            self.project = other.project;
        }
        if other.test_type.is_some() {
            self.test_type = other.test_type;
        }
        if other.sources_dir.is_some() {
            self.sources_dir = other.sources_dir;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
    }
}

/// Raw values as supplied on the command line or via clap's env fallback
#[derive(Debug, Default, Clone)]
pub struct RawSettings {
    pub host: Option<String>,
    pub project: Option<String>,
    pub test_type: Option<String>,
    pub test_binary: Option<String>,
    pub max_missing: Option<String>,
    pub dry_run: Option<String>,
    pub token: Option<String>,
    pub sources_dir: Option<PathBuf>,
    pub inventory: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

/// Fully resolved settings for one run
#[derive(Clone)]
pub struct Settings {
    pub host: String,
    pub project: String,
    pub token: String,
    pub test_type: String,
    pub test_binary: String,
    pub max_missing: usize,
    pub dry_run: bool,
    pub sources_dir: PathBuf,
    pub inventory: Option<PathBuf>,
    pub timeout: Duration,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("host", &self.host)
            .field("project", &self.project)
            .field("token", &"<redacted>")
            .field("test_type", &self.test_type)
            .field("test_binary", &self.test_binary)
            .field("max_missing", &self.max_missing)
            .field("dry_run", &self.dry_run)
            .field("sources_dir", &self.sources_dir)
            .field("inventory", &self.inventory)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Settings {
    /// Merge command-line values over `config` and check required settings
    ///
    /// Required settings are checked in a fixed order so the first missing
    /// one is reported: host, project, token, test type, test binary.
    pub fn resolve(raw: RawSettings, config: Config) -> Result<Self, ConfigError> {
        let host = required(raw.host.or(config.host), "AZURE_HOST", "https://goatwranglers.visualstudio.com")?;
        if !(host.starts_with("https://") || host.starts_with("http://")) {
            return Err(ConfigError::Invalid {
                setting: "AZURE_HOST",
                value: host,
                expected: "an http(s) URL, e.g. https://goatwranglers.visualstudio.com",
            });
        }
        let project = required(raw.project.or(config.project), "AZURE_PROJECT", "GWrangler")?;
        let token = required(
            raw.token,
            "AZURE_TOKEN",
            "hujikm4324uhyybhi112dsfasfdsaf3424jioij2dsfadfsdafds",
        )?;
        let test_type = required(raw.test_type.or(config.test_type), "TEST_TYPE", "UI")?;
        let test_binary = required(raw.test_binary, "TEST_DLL", "MyProject.dll")?;

        let max_missing = parse_threshold(raw.max_missing.as_deref())?;
        let dry_run = parse_dry_run(raw.dry_run.as_deref())?;

        let sources_dir = raw
            .sources_dir
            .or(config.sources_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        let timeout_secs = raw
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                setting: "TCASSOC_TIMEOUT_SECS",
                value: timeout_secs.to_string(),
                expected: TIMEOUT_EXPECTED,
            });
        }

        Ok(Self {
            host,
            project,
            token,
            test_type,
            test_binary,
            max_missing,
            dry_run,
            sources_dir,
            inventory: raw.inventory,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn required(
    value: Option<String>,
    setting: &'static str,
    example: &'static str,
) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { setting, example })
}

/// Parse the dry-run flag: `true` or `false`, any case
pub fn parse_dry_run(raw: Option<&str>) -> Result<bool, ConfigError> {
    let value = raw.map(str::trim).filter(|v| !v.is_empty()).ok_or(ConfigError::Missing {
        setting: "DRY_RUN",
        example: "false",
    })?;
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigError::Invalid {
            setting: "DRY_RUN",
            value: value.to_string(),
            expected: "true or false",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn complete() -> RawSettings {
        RawSettings {
            host: Some("https://org.visualstudio.com".to_string()),
            project: Some("GWrangler".to_string()),
            test_type: Some("UI".to_string()),
            test_binary: Some("MyProject.Tests.dll".to_string()),
            max_missing: Some("".to_string()),
            dry_run: Some("False".to_string()),
            token: Some("pat".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_complete() {
        let settings = Settings::resolve(complete(), Config::default()).unwrap();
        assert_eq!(settings.max_missing, 0);
        assert!(!settings.dry_run);
        assert_eq!(settings.sources_dir, PathBuf::from("."));
        assert_eq!(settings.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    }

    #[test]
    fn test_missing_settings_named_in_order() {
        let mut raw = complete();
        raw.host = None;
        raw.token = None;
        let err = Settings::resolve(raw, Config::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required configuration setting: AZURE_HOST.\nExample: https://goatwranglers.visualstudio.com"
        );

        let mut raw = complete();
        raw.token = Some("  ".to_string());
        let err = Settings::resolve(raw, Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { setting: "AZURE_TOKEN", .. }));

        let mut raw = complete();
        raw.test_binary = None;
        let err = Settings::resolve(raw, Config::default()).unwrap_err();
        assert!(err.to_string().contains("TEST_DLL"));
        assert!(err.to_string().contains("MyProject.dll"));
    }

    #[test]
    fn test_config_supplies_defaults() {
        let mut raw = complete();
        raw.project = None;
        raw.test_type = None;
        let config = Config {
            project: Some("FromConfig".to_string()),
            test_type: Some("API".to_string()),
            timeout_secs: Some(5),
            ..Default::default()
        };
        let settings = Settings::resolve(raw, config).unwrap();
        assert_eq!(settings.project, "FromConfig");
        assert_eq!(settings.test_type, "API");
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_host_must_be_url() {
        let mut raw = complete();
        raw.host = Some("org.visualstudio.com".to_string());
        assert!(matches!(
            Settings::resolve(raw, Config::default()),
            Err(ConfigError::Invalid { setting: "AZURE_HOST", .. })
        ));
    }

    #[test]
    fn test_parse_dry_run() {
        assert!(parse_dry_run(Some("true")).unwrap());
        assert!(parse_dry_run(Some("TRUE")).unwrap());
        assert!(!parse_dry_run(Some("false")).unwrap());
        assert!(parse_dry_run(Some("yes")).is_err());
        assert!(matches!(
            parse_dry_run(None),
            Err(ConfigError::Missing { setting: "DRY_RUN", .. })
        ));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                "Build_SourcesDirectory" => Some("/agent/_work/1/s".to_string()),
                "TCASSOC_TIMEOUT_SECS" => Some("12".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.sources_dir, Some(PathBuf::from("/agent/_work/1/s")));
        assert_eq!(config.timeout_secs, Some(12));
    }

    #[test]
    fn test_unparsable_env_timeout_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "TCASSOC_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { setting: "TCASSOC_TIMEOUT_SECS", .. }
        ));
        assert!(config.timeout_secs.is_none());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut raw = complete();
        raw.timeout_secs = Some(0);
        assert!(matches!(
            Settings::resolve(raw, Config::default()),
            Err(ConfigError::Invalid { setting: "TCASSOC_TIMEOUT_SECS", .. })
        ));

        let config = Config {
            timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(Settings::resolve(complete(), config).is_err());
    }

    #[test]
    fn test_load_file_and_merge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "host: https://a.visualstudio.com\ntimeout_secs: 9\n").unwrap();

        let mut config = Config {
            project: Some("Kept".to_string()),
            ..Default::default()
        };
        config.merge(Config::load_file(&path).unwrap());
        assert_eq!(config.host.as_deref(), Some("https://a.visualstudio.com"));
        assert_eq!(config.project.as_deref(), Some("Kept"));
        assert_eq!(config.timeout_secs, Some(9));
    }

    #[test]
    fn test_malformed_file_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "timeout_secs: [not, a, number]\n").unwrap();
        assert!(Config::load_file(&path).is_none());
        assert!(Config::load_file(&dir.path().join("absent.yaml")).is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let settings = Settings::resolve(complete(), Config::default()).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("pat\""));
        assert!(debug.contains("<redacted>"));
    }
}
