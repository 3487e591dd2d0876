//! Command-line surface (§6).
use clap::Parser;
use std::path::PathBuf;

/// Distributed build autobuild daemon.
///
/// Continuously produces randomised build-framework configurations,
/// executes them, and submits the results to a coordinator.
#[derive(Parser, Debug, Clone)]
#[command(name = "autobuild", about = "Distributed build autobuild daemon", version)]
pub struct Cli {
    /// Number of parallel worker instances.
    #[arg(long)]
    pub ninstances: Option<u32>,

    /// `BR2_JLEVEL` passed to every build.
    #[arg(long)]
    pub njobs: Option<u32>,

    /// `nice` value each build is launched with.
    #[arg(long)]
    pub nice: Option<i32>,

    /// Identification string written into `results/submitter`.
    #[arg(long)]
    pub submitter: Option<String>,

    /// Coordinator URL results are uploaded to.
    #[arg(long = "http-url")]
    pub http_url: Option<String>,

    /// HTTP basic-auth login for the upload.
    #[arg(long = "http-login")]
    pub http_login: Option<String>,

    /// HTTP basic-auth password for the upload.
    #[arg(long = "http-password")]
    pub http_password: Option<String>,

    /// Extra arguments appended to every `make` invocation.
    #[arg(long = "make-opts")]
    pub make_opts: Option<String>,

    /// Path the supervisor's own PID is written to.
    #[arg(long = "pid-file")]
    pub pid_file: Option<PathBuf>,

    /// Path to an INI config file providing a `[main]` section.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// URI of the toolchain-catalogue CSV.
    #[arg(long = "tc-cfg-uri")]
    pub tc_cfg_uri: Option<String>,

    /// Raise the console log level to debug (the file log always
    /// captures debug detail regardless of this flag).
    #[arg(short, long)]
    pub verbose: bool,

    /// Root directory `instance-<i>/` directories and the PID-file
    /// default are resolved relative to.
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,

    /// Build-framework source repository to clone/pull. Ambient override,
    /// not part of the documented CLI surface (only settable via the
    /// config file's `repo-url` key in ordinary use).
    #[arg(long = "repo-url", hide = true)]
    pub repo_url: Option<String>,

    /// Internal: marks this invocation as a re-exec'd worker process for
    /// the given instance id, rather than the supervisor (§4.8).
    #[arg(long = "worker-instance", hide = true)]
    pub worker_instance: Option<usize>,

    /// Internal: path to the shared-memory PID map the supervisor
    /// allocated, passed to a re-exec'd worker process (§4.8, §9).
    #[arg(long = "worker-pids-file", hide = true)]
    pub worker_pids_file: Option<PathBuf>,
}
