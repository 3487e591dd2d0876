//! Supervisor (§4.8): the process-level entry point. Verifies remote
//! protocol compatibility, probes system requirements, writes the PID
//! file, allocates the cross-process shared PID array, re-execs N worker
//! processes, and installs the signalled-shutdown protocol (§5).

use crate::config::RunConfig;
use crate::exec::SystemExecutor;
use crate::instance::{check_remote_version, is_version_compatible};
use crate::logging::TARGET_SUPERVISOR;
use crate::shared_pids::SharedPids;
use crate::submitter::HttpCredentials;
use crate::system_info::SystemInfo;
use crate::toolchain::HttpFetcher;
use anyhow::{Context as _, Result, bail};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name the supervisor gives the shared-memory file backing the live-PID
/// array, rooted under `--log-dir`.
const SHARED_PIDS_FILE: &str = "shared-pids.shm";

/// Run the supervisor to completion. Returns only once every worker
/// process has exited (or never, if a signal triggers the shutdown
/// sweep, which terminates the process directly).
///
/// # Errors
///
/// Returns an error for any startup-fatal condition (§7): version
/// mismatch, missing required program, or failure to write the PID
/// file, allocate the shared PID map, or spawn a worker.
pub fn run(config: &RunConfig) -> Result<()> {
    verify_remote_version()?;

    let uploading = HttpCredentials {
        login: config.http_login.clone(),
        password: config.http_password.clone(),
    }
    .is_present();
    let executor = SystemExecutor;
    let sysinfo = SystemInfo::new(uploading);
    sysinfo.probe_all(&executor);
    if let Err(missing) = sysinfo.check_requirements(&executor) {
        bail!("missing required programs: {}", missing.join(", "));
    }

    std::fs::write(&config.pid_file, format!("{}\n", std::process::id()))
        .with_context(|| format!("writing pid file {}", config.pid_file.display()))?;

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log directory {}", config.log_dir.display()))?;
    let pids_path = config.log_dir.join(SHARED_PIDS_FILE);
    let ninstances =
        usize::try_from(config.ninstances).context("--ninstances does not fit in usize")?;
    let shared_pids = Arc::new(
        SharedPids::create_file_backed(&pids_path, ninstances)
            .with_context(|| format!("allocating shared PID map at {}", pids_path.display()))?,
    );

    let exe = std::env::current_exe().context("resolving own executable path")?;
    let mut children: Vec<Child> = Vec::with_capacity(ninstances);
    for instance_id in 0..ninstances {
        let args = worker_args(config, instance_id, &pids_path);
        let child = Command::new(&exe)
            .args(&args)
            // Belt-and-braces: every `Executor`/`BuildSpawner` subprocess
            // already forces LC_ALL=C itself (§4.8 step 1, §6 Environment),
            // but the worker's own process environment is set here too.
            .env("LC_ALL", "C")
            .spawn()
            .with_context(|| format!("spawning worker instance {instance_id}"))?;
        info!(target: TARGET_SUPERVISOR, instance = instance_id, pid = child.id(), "spawned worker");
        children.push(child);
    }

    let worker_pids: Vec<u32> = children.iter().map(Child::id).collect();
    install_signal_handlers(worker_pids, Arc::clone(&shared_pids));

    for (instance_id, mut child) in children.into_iter().enumerate() {
        match child.wait() {
            Ok(status) => {
                warn!(target: TARGET_SUPERVISOR, instance = instance_id, %status, "worker exited");
            }
            Err(e) => {
                error!(target: TARGET_SUPERVISOR, instance = instance_id, error = %e, "failed to wait on worker");
            }
        }
    }

    Ok(())
}

fn verify_remote_version() -> Result<()> {
    let fetcher = HttpFetcher;
    match check_remote_version(&fetcher, crate::config::DEFAULT_COORDINATOR) {
        Ok(remote) if !is_version_compatible(remote) => {
            bail!("remote protocol version {remote} exceeds the embedded version; refusing to start");
        }
        Ok(_) => Ok(()),
        Err(e) => {
            bail!("version check against {} failed: {e}", crate::config::DEFAULT_COORDINATOR);
        }
    }
}

/// Build the argument list a re-exec'd worker process is launched with:
/// every resolved [`RunConfig`] field restated as an explicit flag (so the
/// worker need not re-read the INI file) plus the hidden worker-mode flags
/// (§4.8).
fn worker_args(config: &RunConfig, instance_id: usize, pids_path: &Path) -> Vec<String> {
    vec![
        "--ninstances".to_string(),
        config.ninstances.to_string(),
        "--njobs".to_string(),
        config.njobs.to_string(),
        "--nice".to_string(),
        config.nice.to_string(),
        "--submitter".to_string(),
        config.submitter.clone(),
        "--http-url".to_string(),
        config.http_url.clone(),
        "--http-login".to_string(),
        config.http_login.clone(),
        "--http-password".to_string(),
        config.http_password.clone(),
        "--make-opts".to_string(),
        config.make_opts.clone(),
        "--pid-file".to_string(),
        config.pid_file.display().to_string(),
        "--tc-cfg-uri".to_string(),
        config.tc_cfg_uri.clone(),
        "--repo-url".to_string(),
        config.repo_url.clone(),
        "--log-dir".to_string(),
        config.log_dir.display().to_string(),
        "--worker-instance".to_string(),
        instance_id.to_string(),
        "--worker-pids-file".to_string(),
        pids_path.display().to_string(),
    ]
    .into_iter()
    .chain(config.verbose.then_some("--verbose".to_string()))
    .collect()
}

/// Spawn a background thread that blocks on SIGINT/SIGTERM and runs the
/// shutdown sweep (§5) the moment either arrives.
///
/// Delivery goes through `signal-hook`'s self-pipe mechanism rather than a
/// true `sigaction` handler, so the sweep itself runs on an ordinary OS
/// thread with no async-signal-safety restriction. That also means a
/// second signal cannot re-enter the sweep mid-flight the way it could a
/// raw handler, so unlike the reference shutdown sequence this
/// implementation does not need to reinstall SIGINT/SIGTERM dispositions
/// before sweeping — doing so would require an `unsafe` `sigaction` call
/// this crate has no other use for.
fn install_signal_handlers(worker_pids: Vec<u32>, shared_pids: Arc<SharedPids>) {
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(e) => {
            error!(target: TARGET_SUPERVISOR, error = %e, "failed to install signal handlers");
            return;
        }
    };
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            shutdown(&worker_pids, &shared_pids);
        }
    });
}

/// The shutdown sweep (§5 steps 2-5): terminate every worker process,
/// directly signal every live build PID published in the shared array
/// (the build runs under `timeout`, which places it in its own process
/// group — a group-signal to the worker would miss it), sweep the
/// supervisor's own process group, then exit 1.
fn shutdown(worker_pids: &[u32], shared_pids: &SharedPids) -> ! {
    warn!(target: TARGET_SUPERVISOR, "shutdown signal received, terminating workers");

    for &pid in worker_pids {
        if let Ok(pid) = i32::try_from(pid) {
            send_signal(pid, Signal::SIGTERM);
        }
    }

    for pid in shared_pids.live_pids() {
        send_signal(pid, Signal::SIGTERM);
    }

    let pgrp = nix::unistd::getpgrp();
    let _ = signal::killpg(pgrp, Signal::SIGTERM);

    std::process::exit(1);
}

/// Send `sig` to `pid`, tolerating `ESRCH` (the process has already exited,
/// which is harmless — §5, §9).
fn send_signal(pid: i32, sig: Signal) {
    if let Err(e) = signal::kill(Pid::from_raw(pid), sig) {
        warn!(target: TARGET_SUPERVISOR, pid, error = %e, "signal delivery failed");
    }
}
