//! Distributed build-farm autobuilder daemon binary entry point.
//!
//! With no hidden worker flags set, runs as the supervisor (§4.8):
//! spawns and watches `--ninstances` re-exec'd copies of itself. A
//! re-exec'd copy carrying `--worker-instance` runs a single instance's
//! `prepare → configure → build → package → submit` loop (§4.7) instead.
use autobuild_daemon::cli::Cli;
use autobuild_daemon::config::ini;
use autobuild_daemon::config::{self, RunConfig};
use autobuild_daemon::exec::{SystemExecutor, SystemSpawner};
use autobuild_daemon::fixup::SystemInfoHostTools;
use autobuild_daemon::hostarch;
use autobuild_daemon::instance::{InstanceDirs, InstanceLoop};
use autobuild_daemon::logging::{init_instance_subscriber, init_supervisor_subscriber};
use autobuild_daemon::sampler::ThreadPrng;
use autobuild_daemon::shared_pids::SharedPids;
use autobuild_daemon::submitter::{HttpCredentials, Submitter};
use autobuild_daemon::system_info::SystemInfo;
use autobuild_daemon::supervisor;
use autobuild_daemon::toolchain::{HttpFetcher, ToolchainCatalog};
use clap::Parser as _;
use std::collections::HashMap;

fn main() {
    let cli = Cli::parse();

    let ini_entries = match &cli.config {
        Some(path) => match ini::parse_main_section(path) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("\x1b[31mError: reading config file: {e}\x1b[0m");
                std::process::exit(1);
            }
        },
        None => HashMap::new(),
    };

    let config = match RunConfig::assemble(&cli, &ini_entries) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\x1b[31mError: {e}\x1b[0m");
            std::process::exit(1);
        }
    };

    let result = match cli.worker_instance {
        Some(instance_id) => run_worker(&config, instance_id, cli.worker_pids_file.as_deref()),
        None => {
            init_supervisor_subscriber(config.verbose);
            supervisor::run(&config)
        }
    };

    if let Err(e) = result {
        eprintln!("\x1b[31mError: {e:#}\x1b[0m");
        std::process::exit(1);
    }
}

/// Run a single worker instance's unbounded cycle loop (§4.7).
///
/// `pids_file` is the shared-memory PID map the supervisor allocated;
/// `None` only happens if a worker is launched directly rather than
/// re-exec'd by the supervisor, which is treated as a fatal
/// misconfiguration.
fn run_worker(
    config: &RunConfig,
    instance_id: usize,
    pids_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let dirs = InstanceDirs::new(&config.log_dir, instance_id);
    std::fs::create_dir_all(&dirs.root)?;
    std::fs::create_dir_all(&dirs.dl)?;

    init_instance_subscriber(config.verbose, &dirs.log_file);

    let pids_file =
        pids_file.ok_or_else(|| anyhow::anyhow!("worker started without --worker-pids-file"))?;
    let ninstances = usize::try_from(config.ninstances)?;
    let shared_pids = SharedPids::open_file_backed(pids_file, ninstances)?;

    let executor = SystemExecutor;
    let spawner = SystemSpawner;
    let uploading = HttpCredentials {
        login: config.http_login.clone(),
        password: config.http_password.clone(),
    }
    .is_present();
    let sysinfo = SystemInfo::new(uploading);
    sysinfo.probe_all(&executor);
    let host_tools = SystemInfoHostTools {
        info: &sysinfo,
        executor: &executor,
    };

    let fetcher = HttpFetcher;
    let host = hostarch::detect();
    let catalog = ToolchainCatalog::load(&fetcher, &config.tc_cfg_uri, &host)?;

    let submitter = Submitter::new(
        config.http_url.clone(),
        HttpCredentials {
            login: config.http_login.clone(),
            password: config.http_password.clone(),
        },
        config.log_dir.clone(),
    );

    let extra_make_opts: Vec<String> = config
        .make_opts
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let instance_loop = InstanceLoop {
        instance_id,
        dirs,
        repo_url: config.repo_url.clone(),
        submitter: config.submitter.clone(),
        njobs: config.njobs,
        nice: config.nice,
        extra_make_opts,
        executor: &executor,
        spawner: &spawner,
        host_tools: &host_tools,
        shared_pids: &shared_pids,
        submitter_impl: submitter,
    };

    let mut prng = ThreadPrng;
    instance_loop
        .run(&fetcher, config::DEFAULT_COORDINATOR, &catalog, &mut prng, None)
        .map_err(Into::into)
}
