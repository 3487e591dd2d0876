//! `InstanceLoop` (§4.7): the per-worker directory layout and the
//! infinite `prepare → configure → build → package → submit` cycle.

use crate::build_runner::{BuildRequest, BuildRunner, BuildStatus};
use crate::error::AutobuilderError;
use crate::exec::{BuildSpawner, Executor};
use crate::fixup::HostTools;
use crate::logging::{TARGET_BUILD, TARGET_CONFIGURE, TARGET_PACKAGE, TARGET_PREPARE, TARGET_SUBMIT};
use crate::packager::{PackagingRequest, ResultPackager};
use crate::sampler::{ConfigSampler, Prng};
use crate::shared_pids::SharedPids;
use crate::submitter::{HttpCredentials, Submitter};
use crate::toolchain::{Fetcher, ToolchainCatalog};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The protocol version this binary implements (§6, §9.1).
pub const EMBEDDED_VERSION: u32 = 1;

/// Maximum number of `dl/` entries evicted at the start of a cycle (§4.7).
const DL_EVICTION_COUNT: usize = 5;

/// Query `<coordinator>/version` and parse the integer on its first line.
///
/// Used both by the supervisor at startup (§4.8 step 2) and by each
/// worker's cycle loop (§4.7), which re-checks on every iteration.
///
/// # Errors
///
/// Returns [`AutobuilderError::VersionCheck`] if the request fails or the
/// response body does not begin with a parsable integer.
pub fn check_remote_version(fetcher: &dyn Fetcher, coordinator: &str) -> Result<u32, AutobuilderError> {
    let url = format!("{}/version", coordinator.trim_end_matches('/'));
    let body = fetcher
        .fetch(&url)
        .map_err(|e| AutobuilderError::VersionCheck(e.to_string()))?;
    body.lines()
        .next()
        .and_then(|line| line.trim().parse::<u32>().ok())
        .ok_or_else(|| AutobuilderError::VersionCheck(format!("unparsable response from {url}: {body:?}")))
}

/// `true` iff `remote` is compatible with the embedded protocol version.
#[must_use]
pub fn is_version_compatible(remote: u32) -> bool {
    remote <= EMBEDDED_VERSION
}

/// The fixed directory layout owned exclusively by one worker instance
/// (§3 Instance, §6 Filesystem layout).
#[derive(Debug, Clone)]
pub struct InstanceDirs {
    /// `instance-<i>/`.
    pub root: PathBuf,
    /// `instance-<i>/dl/`, the persistent download cache.
    pub dl: PathBuf,
    /// `instance-<i>/buildroot/`, the source checkout.
    pub buildroot: PathBuf,
    /// `instance-<i>/output/`, the ephemeral build output tree.
    pub output: PathBuf,
    /// `instance-<i>/instance.log`.
    pub log_file: PathBuf,
}

impl InstanceDirs {
    /// Compute the layout for instance `instance_id` rooted at `base`
    /// (the `--log-dir` override, or the working directory).
    #[must_use]
    pub fn new(base: &Path, instance_id: usize) -> Self {
        let root = base.join(format!("instance-{instance_id}"));
        Self {
            dl: root.join("dl"),
            buildroot: root.join("buildroot"),
            output: root.join("output"),
            log_file: root.join("instance.log"),
            root,
        }
    }

    /// Create every directory in the layout that must exist before the
    /// first cycle (`root`, `dl`, `buildroot`'s parent). `output` is
    /// created fresh per cycle by [`prepare_build`].
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.dl)?;
        Ok(())
    }
}

/// Remove up to `count` uniformly-random entries from `dir` (§4.3, §8
/// property 2). No-op if `dir` has fewer than `count` entries beyond
/// removing all of them.
///
/// # Errors
///
/// Returns an error if the directory cannot be read or an entry cannot
/// be removed.
pub fn evict_random_entries(dir: &Path, count: usize, prng: &mut dyn Prng) -> std::io::Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    let to_remove = count.min(entries.len());
    for _ in 0..to_remove {
        let idx = prng.pick_index(entries.len());
        let victim = entries.swap_remove(idx);
        if victim.is_dir() {
            fs::remove_dir_all(&victim)?;
        } else {
            fs::remove_file(&victim)?;
        }
    }
    Ok(())
}

/// Ensure `buildroot/` exists (cloning `repo_url` on first use, pulling
/// otherwise) and destroy/recreate `output/` (§4.7 `prepare_build`).
///
/// # Errors
///
/// Returns an error if eviction, clone/pull, or output recreation fails.
pub fn prepare_build(
    executor: &dyn Executor,
    dirs: &InstanceDirs,
    repo_url: &str,
    prng: &mut dyn Prng,
) -> anyhow::Result<()> {
    dirs.ensure_exists()?;
    evict_random_entries(&dirs.dl, DL_EVICTION_COUNT, prng)?;

    if dirs.buildroot.join(".git").is_dir() {
        executor.run_in(&dirs.buildroot, "git", &["pull"])?;
    } else {
        let dest = dirs.buildroot.to_string_lossy().into_owned();
        executor.run("git", &["clone", repo_url, &dest])?;
    }

    if dirs.output.exists() {
        fs::remove_dir_all(&dirs.output)?;
    }
    fs::create_dir_all(&dirs.output)?;
    Ok(())
}

/// Parameters shared by every cycle of one instance's loop.
pub struct InstanceLoop<'a> {
    /// This instance's numeric id, used as the shared-PID-array index.
    pub instance_id: usize,
    /// The directory layout this instance owns.
    pub dirs: InstanceDirs,
    /// The build-framework source repository URL to clone/pull.
    pub repo_url: String,
    /// `--submitter` identification string.
    pub submitter: String,
    /// `--njobs`.
    pub njobs: u32,
    /// `--nice`.
    pub nice: i32,
    /// `--make-opts`, split into individual arguments.
    pub extra_make_opts: Vec<String>,
    /// The build-framework command executor.
    pub executor: &'a dyn Executor,
    /// The process spawner used for the long-running build itself.
    pub spawner: &'a dyn BuildSpawner,
    /// Host-tool availability, consulted by the fixup filter.
    pub host_tools: &'a dyn HostTools,
    /// The cross-process shared PID array.
    pub shared_pids: &'a SharedPids,
    /// The coordinator's submission endpoint.
    pub submitter_impl: Submitter,
}

/// Outcome of one full cycle attempt, for logging and testing.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle completed through submission (regardless of build
    /// status, which is itself not an error — §7).
    Completed,
    /// The cycle was abandoned partway through a transient failure
    /// (prepare or configure stage) and no build was attempted.
    Transient,
}

impl<'a> InstanceLoop<'a> {
    /// Run one `prepare → configure → build → package → submit` cycle
    /// (§4.7).
    ///
    /// # Errors
    ///
    /// This function itself does not fail: prepare/configure failures
    /// are cycle-transient per §7 and are reported via the `Ok(Transient)`
    /// variant rather than an `Err`. A `Result` is kept for forward
    /// compatibility with fatal packaging escalation (§7 "Packaging
    /// failure").
    pub fn run_cycle(
        &self,
        catalog: &ToolchainCatalog,
        prng: &mut dyn Prng,
    ) -> Result<CycleOutcome, AutobuilderError> {
        info!(target: TARGET_PREPARE, instance = self.instance_id, "preparing build tree");
        if let Err(e) = prepare_build(self.executor, &self.dirs, &self.repo_url, prng) {
            warn!(target: TARGET_PREPARE, instance = self.instance_id, error = %e, "prepare failed, abandoning cycle");
            return Ok(CycleOutcome::Transient);
        }

        debug!(target: TARGET_CONFIGURE, instance = self.instance_id, "sampling configuration");
        let sampler = ConfigSampler::new(
            self.executor,
            self.host_tools,
            &self.dirs.buildroot,
            &self.dirs.output,
        );
        if let Err(e) = sampler.sample(catalog, prng) {
            warn!(target: TARGET_CONFIGURE, instance = self.instance_id, error = %e, "sampling failed, abandoning cycle");
            return Ok(CycleOutcome::Transient);
        }

        let build_request = BuildRequest {
            instance_id: self.instance_id,
            src_dir: &self.dirs.buildroot,
            output_dir: &self.dirs.output,
            dl_dir: &self.dirs.dl,
            njobs: self.njobs,
            nice: self.nice,
            extra_make_opts: &self.extra_make_opts,
        };
        info!(target: TARGET_BUILD, instance = self.instance_id, njobs = self.njobs, "starting build");
        let runner = BuildRunner::new(self.spawner, self.shared_pids);
        let status = match runner.run(&build_request) {
            Ok(status) => status,
            Err(e) => {
                warn!(target: TARGET_BUILD, instance = self.instance_id, error = %e, "build failed to run, abandoning cycle");
                return Ok(CycleOutcome::Transient);
            }
        };
        info!(target: TARGET_BUILD, instance = self.instance_id, status = status.status_marker(), "build finished");

        self.send_results(status)?;
        Ok(CycleOutcome::Completed)
    }

    /// §4.5 + §4.6: package and submit the cycle's result. Never fails
    /// the loop (§4.7): a packaging or submission error is returned to
    /// the caller purely for logging, escalation decisions are the
    /// caller's responsibility (§7 "Packaging failure" is fatal for the
    /// worker process, but that escalation happens one layer up).
    fn send_results(&self, status: BuildStatus) -> Result<(), AutobuilderError> {
        let packager = ResultPackager::new(self.executor);
        let request = PackagingRequest {
            output_dir: &self.dirs.output,
            src_dir: &self.dirs.buildroot,
            status,
            submitter: &self.submitter,
        };
        let tarball = packager.package(&request).map_err(|e| {
            warn!(target: TARGET_PACKAGE, instance = self.instance_id, error = %e, "packaging failed");
            e
        })?;
        debug!(target: TARGET_PACKAGE, instance = self.instance_id, tarball = %tarball.display(), "packaged results");

        if let Err(e) = self.submitter_impl.submit(&tarball, self.instance_id) {
            warn!(target: TARGET_SUBMIT, instance = self.instance_id, error = %e, "submission failed");
            return Err(e.into());
        }
        info!(target: TARGET_SUBMIT, instance = self.instance_id, "results submitted");
        Ok(())
    }

    /// Run cycles until `limit` is reached (or forever, if `None`),
    /// checking the remote protocol version at the start of each one
    /// (§4.7 pseudocode). Returns an error (terminating the worker
    /// process) the moment the remote version exceeds
    /// [`EMBEDDED_VERSION`]; a version-check fetch failure is treated as
    /// cycle-transient and simply moves on to the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`AutobuilderError::VersionCheck`] if the remote protocol
    /// version is incompatible.
    pub fn run(
        &self,
        fetcher: &dyn Fetcher,
        coordinator: &str,
        catalog: &ToolchainCatalog,
        prng: &mut dyn Prng,
        limit: Option<u32>,
    ) -> Result<(), AutobuilderError> {
        let mut cycles = 0;
        loop {
            if let Some(max) = limit {
                if cycles >= max {
                    return Ok(());
                }
            }
            cycles += 1;

            match check_remote_version(fetcher, coordinator) {
                Ok(remote) if !is_version_compatible(remote) => {
                    return Err(AutobuilderError::VersionCheck(format!(
                        "remote version {remote} exceeds embedded version {EMBEDDED_VERSION}"
                    )));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(instance = self.instance_id, error = %e, "version check failed, continuing cycle");
                }
            }

            if let Ok(outcome) = self.run_cycle(catalog, prng) {
                debug!(instance = self.instance_id, outcome = ?outcome, "cycle finished");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::config_lines::ConfigLines;
    use crate::exec::{BuildProcess, ExecResult};
    use crate::toolchain::ToolchainConfig;
    use std::sync::Mutex;

    struct FixedPrng(u32);
    impl Prng for FixedPrng {
        fn gen_range_inclusive(&mut self, low: u32, high: u32) -> u32 {
            self.0.clamp(low, high)
        }
    }

    #[test]
    fn instance_dirs_layout() {
        let dirs = InstanceDirs::new(Path::new("/work"), 3);
        assert_eq!(dirs.root, Path::new("/work/instance-3"));
        assert_eq!(dirs.dl, Path::new("/work/instance-3/dl"));
        assert_eq!(dirs.buildroot, Path::new("/work/instance-3/buildroot"));
        assert_eq!(dirs.output, Path::new("/work/instance-3/output"));
        assert_eq!(dirs.log_file, Path::new("/work/instance-3/instance.log"));
    }

    #[test]
    fn evict_random_entries_caps_at_five() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..8 {
            std::fs::write(tmp.path().join(format!("f{i}")), "x").unwrap();
        }
        let mut prng = FixedPrng(0);
        evict_random_entries(tmp.path(), 5, &mut prng).unwrap();
        let remaining = std::fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(remaining, 3);
    }

    #[test]
    fn evict_random_entries_caps_at_directory_size() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("only"), "x").unwrap();
        let mut prng = FixedPrng(0);
        evict_random_entries(tmp.path(), 5, &mut prng).unwrap();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn check_remote_version_parses_first_line() {
        #[derive(Debug)]
        struct FakeFetcher;
        impl Fetcher for FakeFetcher {
            fn fetch(&self, _url: &str) -> anyhow::Result<String> {
                Ok("1\n".to_string())
            }
        }
        let version = check_remote_version(&FakeFetcher, "http://coordinator.example").unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn check_remote_version_rejects_unparsable_body() {
        #[derive(Debug)]
        struct FakeFetcher;
        impl Fetcher for FakeFetcher {
            fn fetch(&self, _url: &str) -> anyhow::Result<String> {
                Ok("not-a-number".to_string())
            }
        }
        assert!(check_remote_version(&FakeFetcher, "http://coordinator.example").is_err());
    }

    #[test]
    fn version_compatibility_boundary() {
        assert!(is_version_compatible(1));
        assert!(!is_version_compatible(2));
    }

    struct FakeHost;
    impl HostTools for FakeHost {
        fn has(&self, _name: &str) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct FakeExecutor;
    impl Executor for FakeExecutor {
        fn run(&self, _program: &str, _args: &[&str]) -> anyhow::Result<ExecResult> {
            Ok(ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        }
        fn run_in(&self, _dir: &Path, _program: &str, _args: &[&str]) -> anyhow::Result<ExecResult> {
            Ok(ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        }
        fn run_in_with_env(
            &self,
            dir: &Path,
            _program: &str,
            args: &[&str],
            _env: &[(&str, &str)],
        ) -> anyhow::Result<ExecResult> {
            let output_dir_arg = args.iter().find_map(|a| a.strip_prefix("O="));
            if let Some(output_dir_arg) = output_dir_arg {
                if args.contains(&"randpackageconfig") {
                    std::fs::write(
                        PathBuf::from(output_dir_arg).join(".config"),
                        "BR2_PACKAGE_BUSYBOX=y\n",
                    )
                    .unwrap();
                }
            }
            let _ = dir;
            Ok(ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        }
        fn run_unchecked(&self, _program: &str, _args: &[&str]) -> anyhow::Result<ExecResult> {
            Ok(ExecResult {
                stdout: "ldd (GNU libc) 2.23".to_string(),
                stderr: String::new(),
                success: true,
                code: Some(0),
            })
        }
        fn run_in_unchecked(
            &self,
            _dir: &Path,
            _program: &str,
            _args: &[&str],
        ) -> anyhow::Result<ExecResult> {
            Ok(ExecResult {
                stdout: String::new(),
                stderr: "fatal: not a git repository".to_string(),
                success: false,
                code: Some(128),
            })
        }
        fn which(&self, _program: &str) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct FakeProcess {
        code: Option<i32>,
    }
    impl BuildProcess for FakeProcess {
        fn pid(&self) -> i32 {
            4242
        }
        fn wait(&mut self) -> std::io::Result<Option<i32>> {
            Ok(self.code)
        }
    }

    #[derive(Debug)]
    struct FakeSpawner {
        codes: Mutex<std::collections::VecDeque<Option<i32>>>,
    }
    impl FakeSpawner {
        fn new(codes: &[Option<i32>]) -> Self {
            Self {
                codes: Mutex::new(codes.iter().copied().collect()),
            }
        }
    }
    impl BuildSpawner for FakeSpawner {
        fn spawn(
            &self,
            _dir: &Path,
            _program: &str,
            _args: &[&str],
            _env: &[(&str, &str)],
            _log_file: &Path,
        ) -> anyhow::Result<Box<dyn BuildProcess>> {
            let code = self.codes.lock().unwrap().pop_front().unwrap_or(Some(0));
            Ok(Box::new(FakeProcess { code }))
        }
    }

    fn glibc_toolchain() -> ToolchainConfig {
        ToolchainConfig {
            url: "http://example.org/x86_64-glibc.tar.xz".to_string(),
            hostarch: "any".to_string(),
            libc: "glibc".to_string(),
            contents: ConfigLines::parse("BR2_TOOLCHAIN_EXTERNAL=y\n"),
        }
    }

    #[test]
    fn run_cycle_end_to_end_completes_and_stores_locally() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = InstanceDirs::new(tmp.path(), 0);
        std::fs::create_dir_all(&dirs.buildroot.join(".git")).unwrap();

        let executor = FakeExecutor;
        let spawner = FakeSpawner::new(&[Some(0), Some(0)]);
        let pids = SharedPids::new_in_memory(1);
        let host = FakeHost;

        let loop_ = InstanceLoop {
            instance_id: 0,
            dirs: dirs.clone(),
            repo_url: "http://example.org/buildroot.git".to_string(),
            submitter: "test-rig".to_string(),
            njobs: 1,
            nice: 0,
            extra_make_opts: Vec::new(),
            executor: &executor,
            spawner: &spawner,
            host_tools: &host,
            shared_pids: &pids,
            submitter_impl: Submitter::new(
                "http://coordinator.invalid/upload",
                HttpCredentials::default(),
                tmp.path(),
            ),
        };

        let catalog = ToolchainCatalog {
            toolchains: vec![glibc_toolchain()],
        };
        let mut prng = FixedPrng(0);
        let outcome = loop_.run_cycle(&catalog, &mut prng).unwrap();
        assert_eq!(outcome, CycleOutcome::Completed);

        // The locally-kept tarball lands in the shared working directory
        // (tmp.path()), not under this instance's output/ tree (§4.6, §6).
        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(entries.iter().any(|n| n.starts_with("instance-0-") && n.ends_with(".tar.bz2")));
        let output_entries: Vec<_> = std::fs::read_dir(&dirs.output)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(!output_entries.iter().any(|n| n.starts_with("instance-0-")));
    }

    #[test]
    fn run_stops_after_limit_without_version_check_success() {
        #[derive(Debug)]
        struct FailingFetcher;
        impl Fetcher for FailingFetcher {
            fn fetch(&self, _url: &str) -> anyhow::Result<String> {
                Err(anyhow::anyhow!("network unreachable"))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let dirs = InstanceDirs::new(tmp.path(), 0);
        std::fs::create_dir_all(dirs.buildroot.join(".git")).unwrap();

        let executor = FakeExecutor;
        let spawner = FakeSpawner::new(&[Some(0), Some(0), Some(0), Some(0)]);
        let pids = SharedPids::new_in_memory(1);
        let host = FakeHost;

        let loop_ = InstanceLoop {
            instance_id: 0,
            dirs,
            repo_url: "http://example.org/buildroot.git".to_string(),
            submitter: "test-rig".to_string(),
            njobs: 1,
            nice: 0,
            extra_make_opts: Vec::new(),
            executor: &executor,
            spawner: &spawner,
            host_tools: &host,
            shared_pids: &pids,
            submitter_impl: Submitter::new(
                "http://coordinator.invalid/upload",
                HttpCredentials::default(),
                tmp.path(),
            ),
        };
        let catalog = ToolchainCatalog {
            toolchains: vec![glibc_toolchain()],
        };
        let mut prng = FixedPrng(0);
        let result = loop_.run(&FailingFetcher, "http://coordinator.invalid", &catalog, &mut prng, Some(2));
        assert!(result.is_ok());
    }

    #[test]
    fn run_aborts_on_incompatible_remote_version() {
        #[derive(Debug)]
        struct NewerFetcher;
        impl Fetcher for NewerFetcher {
            fn fetch(&self, _url: &str) -> anyhow::Result<String> {
                Ok("2\n".to_string())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let dirs = InstanceDirs::new(tmp.path(), 0);
        let executor = FakeExecutor;
        let spawner = FakeSpawner::new(&[]);
        let pids = SharedPids::new_in_memory(1);
        let host = FakeHost;
        let loop_ = InstanceLoop {
            instance_id: 0,
            dirs,
            repo_url: "http://example.org/buildroot.git".to_string(),
            submitter: "test-rig".to_string(),
            njobs: 1,
            nice: 0,
            extra_make_opts: Vec::new(),
            executor: &executor,
            spawner: &spawner,
            host_tools: &host,
            shared_pids: &pids,
            submitter_impl: Submitter::new(
                "http://coordinator.invalid/upload",
                HttpCredentials::default(),
                tmp.path(),
            ),
        };
        let catalog = ToolchainCatalog {
            toolchains: vec![glibc_toolchain()],
        };
        let mut prng = FixedPrng(0);
        let result = loop_.run(&NewerFetcher, "http://coordinator.invalid", &catalog, &mut prng, None);
        assert!(matches!(result, Err(AutobuilderError::VersionCheck(_))));
    }
}
