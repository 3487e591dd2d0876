//! Configuration assembly: layers CLI flags over an INI `[main]` section
//! over embedded defaults into a single immutable [`RunConfig`] (§3.1).

pub mod ini;

use crate::cli::Cli;
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::PathBuf;

/// Embedded default: number of parallel worker instances.
pub const DEFAULT_NINSTANCES: u32 = 1;
/// Embedded default: `BR2_JLEVEL`.
pub const DEFAULT_NJOBS: u32 = 1;
/// Embedded default: `nice` value.
pub const DEFAULT_NICE: i32 = 0;
/// Embedded default: supervisor PID-file path.
pub const DEFAULT_PID_FILE: &str = "/tmp/buildroot-autobuild.pid";
/// Embedded default: coordinator base URL, used for the version check and
/// as the base the upload endpoint is derived from when `--http-url` is
/// not set. Not itself a CLI flag (§6 lists no `--coordinator` flag).
pub const DEFAULT_COORDINATOR: &str = "http://autobuild.buildroot.org/";
/// Embedded default: toolchain-catalogue CSV location.
pub const DEFAULT_TC_CFG_URI: &str = "http://autobuild.buildroot.org/toolchains.csv";
/// Embedded default: build-framework source repository.
pub const DEFAULT_REPO_URL: &str = "git://git.buildroot.net/buildroot";

/// The fully-resolved, immutable configuration for one daemon run (§3.1).
///
/// Assembled once at startup by [`RunConfig::assemble`], layering
/// command-line flags over the `[main]` section of an INI config file
/// over embedded defaults, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of parallel worker instances.
    pub ninstances: u32,
    /// `BR2_JLEVEL` passed to every build.
    pub njobs: u32,
    /// `nice` value each build is launched with.
    pub nice: i32,
    /// Identification string written into `results/submitter`.
    pub submitter: String,
    /// Coordinator URL results are uploaded to. Empty disables uploads
    /// (results are stored locally instead).
    pub http_url: String,
    /// HTTP basic-auth login for the upload.
    pub http_login: String,
    /// HTTP basic-auth password for the upload.
    pub http_password: String,
    /// Extra arguments appended to every `make` invocation.
    pub make_opts: String,
    /// Path the supervisor's own PID is written to.
    pub pid_file: PathBuf,
    /// URI of the toolchain-catalogue CSV.
    pub tc_cfg_uri: String,
    /// Build-framework source repository URL.
    pub repo_url: String,
    /// Root directory `instance-<i>/` directories are resolved relative to.
    pub log_dir: PathBuf,
    /// Raise the console log level to debug.
    pub verbose: bool,
}

impl RunConfig {
    /// Layer `cli` over `ini_entries` over the embedded defaults.
    ///
    /// `ini_entries` is the flat key-value map produced by
    /// [`ini::parse_main_section`] (or [`ini::parse_main_section_from_str`]);
    /// keys are the long-flag names with their leading `--` stripped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if an INI value for a numeric
    /// flag cannot be parsed.
    pub fn assemble(cli: &Cli, ini_entries: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            ninstances: resolve_u32(cli.ninstances, ini_entries, "ninstances", DEFAULT_NINSTANCES)?,
            njobs: resolve_u32(cli.njobs, ini_entries, "njobs", DEFAULT_NJOBS)?,
            nice: resolve_i32(cli.nice, ini_entries, "nice", DEFAULT_NICE)?,
            submitter: resolve_string(cli.submitter.clone(), ini_entries, "submitter", ""),
            http_url: resolve_string(cli.http_url.clone(), ini_entries, "http-url", ""),
            http_login: resolve_string(cli.http_login.clone(), ini_entries, "http-login", ""),
            http_password: resolve_string(cli.http_password.clone(), ini_entries, "http-password", ""),
            make_opts: resolve_string(cli.make_opts.clone(), ini_entries, "make-opts", ""),
            pid_file: resolve_path(
                cli.pid_file.clone(),
                ini_entries,
                "pid-file",
                DEFAULT_PID_FILE,
            ),
            tc_cfg_uri: resolve_string(
                cli.tc_cfg_uri.clone(),
                ini_entries,
                "tc-cfg-uri",
                DEFAULT_TC_CFG_URI,
            ),
            repo_url: resolve_string(cli.repo_url.clone(), ini_entries, "repo-url", DEFAULT_REPO_URL),
            log_dir: cli.log_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            verbose: cli.verbose,
        })
    }
}

fn resolve_string(
    cli_value: Option<String>,
    ini_entries: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> String {
    cli_value
        .or_else(|| ini_entries.get(key).cloned())
        .unwrap_or_else(|| default.to_string())
}

fn resolve_path(
    cli_value: Option<PathBuf>,
    ini_entries: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> PathBuf {
    cli_value
        .or_else(|| ini_entries.get(key).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

fn resolve_u32(
    cli_value: Option<u32>,
    ini_entries: &HashMap<String, String>,
    key: &str,
    default: u32,
) -> Result<u32, ConfigError> {
    if let Some(v) = cli_value {
        return Ok(v);
    }
    match ini_entries.get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            flag: key.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

fn resolve_i32(
    cli_value: Option<i32>,
    ini_entries: &HashMap<String, String>,
    key: &str,
    default: i32,
) -> Result<i32, ConfigError> {
    if let Some(v) = cli_value {
        return Ok(v);
    }
    match ini_entries.get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            flag: key.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli_from(args: &[&str]) -> Cli {
        let mut full = vec!["autobuild"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn all_defaults_when_nothing_set() {
        let cli = cli_from(&[]);
        let config = RunConfig::assemble(&cli, &HashMap::new()).unwrap();
        assert_eq!(config.ninstances, DEFAULT_NINSTANCES);
        assert_eq!(config.njobs, DEFAULT_NJOBS);
        assert_eq!(config.nice, DEFAULT_NICE);
        assert_eq!(config.pid_file, PathBuf::from(DEFAULT_PID_FILE));
        assert_eq!(config.tc_cfg_uri, DEFAULT_TC_CFG_URI);
        assert_eq!(config.repo_url, DEFAULT_REPO_URL);
        assert_eq!(config.http_url, "");
        assert!(!config.verbose);
    }

    #[test]
    fn ini_overrides_embedded_default() {
        let cli = cli_from(&[]);
        let mut ini_entries = HashMap::new();
        ini_entries.insert("ninstances".to_string(), "4".to_string());
        ini_entries.insert("nice".to_string(), "10".to_string());
        let config = RunConfig::assemble(&cli, &ini_entries).unwrap();
        assert_eq!(config.ninstances, 4);
        assert_eq!(config.nice, 10);
    }

    #[test]
    fn cli_overrides_ini_which_overrides_default() {
        let cli = cli_from(&["--ninstances", "8"]);
        let mut ini_entries = HashMap::new();
        ini_entries.insert("ninstances".to_string(), "4".to_string());
        let config = RunConfig::assemble(&cli, &ini_entries).unwrap();
        assert_eq!(config.ninstances, 8);
    }

    #[test]
    fn invalid_ini_numeric_value_is_an_error() {
        let cli = cli_from(&[]);
        let mut ini_entries = HashMap::new();
        ini_entries.insert("njobs".to_string(), "not-a-number".to_string());
        let err = RunConfig::assemble(&cli, &ini_entries).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { flag, .. } if flag == "njobs"));
    }

    #[test]
    fn string_and_path_flags_layer_correctly() {
        let cli = cli_from(&["--submitter", "rig-cli"]);
        let mut ini_entries = HashMap::new();
        ini_entries.insert("submitter".to_string(), "rig-ini".to_string());
        ini_entries.insert("pid-file".to_string(), "/var/run/ab.pid".to_string());
        let config = RunConfig::assemble(&cli, &ini_entries).unwrap();
        assert_eq!(config.submitter, "rig-cli");
        assert_eq!(config.pid_file, PathBuf::from("/var/run/ab.pid"));
    }

    #[test]
    fn log_dir_defaults_to_current_directory() {
        let cli = cli_from(&[]);
        let config = RunConfig::assemble(&cli, &HashMap::new()).unwrap();
        assert_eq!(config.log_dir, PathBuf::from("."));
    }

    #[test]
    fn negative_nice_parses_from_ini() {
        let cli = cli_from(&[]);
        let mut ini_entries = HashMap::new();
        ini_entries.insert("nice".to_string(), "-5".to_string());
        let config = RunConfig::assemble(&cli, &ini_entries).unwrap();
        assert_eq!(config.nice, -5);
    }
}
