#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
//! Integration tests for CLI/INI/default layering into a [`RunConfig`].
//!
//! These exercise the full assembly path through the public [`clap::Parser`]
//! surface and the INI parser together, rather than unit-testing either in
//! isolation.

use std::collections::HashMap;

use autobuild_daemon::cli::Cli;
use autobuild_daemon::config::{RunConfig, ini};
use clap::Parser as _;

fn cli_from(args: &[&str]) -> Cli {
    let mut full = vec!["autobuild"];
    full.extend_from_slice(args);
    Cli::parse_from(full)
}

/// A fully-defaulted [`RunConfig`] matches every embedded default exactly,
/// as a regression guard against silently dropping a field from assembly.
#[test]
fn default_run_config_matches_embedded_defaults() {
    let cli = cli_from(&[]);
    let config = RunConfig::assemble(&cli, &HashMap::new()).expect("assemble");
    assert_eq!(config.ninstances, autobuild_daemon::config::DEFAULT_NINSTANCES);
    assert_eq!(config.njobs, autobuild_daemon::config::DEFAULT_NJOBS);
    assert_eq!(config.nice, autobuild_daemon::config::DEFAULT_NICE);
    assert_eq!(config.tc_cfg_uri, autobuild_daemon::config::DEFAULT_TC_CFG_URI);
    assert_eq!(config.repo_url, autobuild_daemon::config::DEFAULT_REPO_URL);
    assert_eq!(config.submitter, "");
    assert_eq!(config.http_url, "");
    assert!(!config.verbose);
}

/// A config file on disk is layered under CLI flags, which win ties.
#[test]
fn ini_file_and_cli_flags_layer_together() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("autobuild.conf");
    std::fs::write(
        &config_path,
        "[main]\nninstances = 6\nnjobs = 3\nsubmitter = rig-from-file\nhttp-url = http://coordinator.example/upload\n",
    )
    .expect("write config");

    let ini_entries = ini::parse_main_section(&config_path).expect("parse ini");
    let cli = cli_from(&["--ninstances", "9", "--config", config_path.to_str().expect("utf8 path")]);
    let config = RunConfig::assemble(&cli, &ini_entries).expect("assemble");

    assert_eq!(config.ninstances, 9, "CLI flag must win over the INI value");
    assert_eq!(config.njobs, 3, "INI value used when no CLI flag is given");
    assert_eq!(config.submitter, "rig-from-file");
    assert_eq!(config.http_url, "http://coordinator.example/upload");
}

/// A missing config file resolves to an empty INI map rather than an error,
/// so an unconfigured daemon still starts on embedded defaults alone.
#[test]
fn missing_config_file_falls_back_to_defaults() {
    let cli = cli_from(&["--config", "/nonexistent/autobuild.conf"]);
    let ini_entries = ini::parse_main_section(cli.config.as_deref().expect("config flag set")).expect("parse ini");
    let config = RunConfig::assemble(&cli, &ini_entries).expect("assemble");
    assert_eq!(config.ninstances, autobuild_daemon::config::DEFAULT_NINSTANCES);
    assert_eq!(config.repo_url, autobuild_daemon::config::DEFAULT_REPO_URL);
}

/// The hidden worker-mode flags round-trip exactly, since the supervisor
/// relies on them to reconstruct an identical `RunConfig` in the re-exec'd
/// worker process without re-reading the INI file.
#[test]
fn hidden_worker_flags_are_parsed_but_invisible_in_help() {
    let cli = cli_from(&[
        "--worker-instance",
        "2",
        "--worker-pids-file",
        "/tmp/shared-pids.shm",
        "--repo-url",
        "git://example.org/buildroot",
    ]);
    assert_eq!(cli.worker_instance, Some(2));
    assert_eq!(cli.repo_url, Some("git://example.org/buildroot".to_string()));

    let help = {
        use clap::CommandFactory as _;
        Cli::command().render_long_help().to_string()
    };
    assert!(
        !help.contains("worker-instance"),
        "internal re-exec flags must stay hidden from --help"
    );
}
