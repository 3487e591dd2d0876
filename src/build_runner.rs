//! `BuildRunner` (§4.4): executes the build under a wall-clock timeout and
//! niceness, capturing stdout/stderr to a per-build log, then runs a
//! secondary legal-info pass.

use crate::error::BuildError;
use crate::exec::BuildSpawner;
use crate::shared_pids::SharedPids;
use std::path::Path;
use std::time::Duration;

/// The external `timeout` wall-clock bound for a single build (§4.4).
pub const MAX_DURATION: Duration = Duration::from_secs(8 * 60 * 60);

/// Exit code the external `timeout` helper uses to signal that it killed
/// its child after the deadline elapsed.
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Tagged outcome of one build attempt (§3 `BuildResult`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// The build, and the subsequent legal-info pass, both succeeded.
    Ok,
    /// The build exited non-zero (other than 124), or legal-info failed.
    Fail,
    /// The external `timeout` wrapper killed the build after the deadline.
    Timeout,
}

impl BuildStatus {
    /// The literal content written to `results/status` (§4.5 step 7).
    #[must_use]
    pub fn status_marker(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Fail => "NOK",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Map a primary-build child exit code to a status, per §4.4/§8
    /// property 7. `legal_info_ok` is only consulted when the primary
    /// build itself succeeded.
    #[must_use]
    pub fn from_exit_code(code: Option<i32>, legal_info_ok: bool) -> Self {
        match code {
            Some(0) if legal_info_ok => Self::Ok,
            Some(0) => Self::Fail,
            Some(TIMEOUT_EXIT_CODE) => Self::Timeout,
            _ => Self::Fail,
        }
    }
}

/// Parameters for one build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// This worker's instance id, used as the index into the shared PID array.
    pub instance_id: usize,
    /// Absolute path to the buildroot source checkout.
    pub src_dir: &'a Path,
    /// Absolute path to the output tree (`O=`).
    pub output_dir: &'a Path,
    /// Absolute path to the persistent download cache (`BR2_DL_DIR`).
    pub dl_dir: &'a Path,
    /// `BR2_JLEVEL`.
    pub njobs: u32,
    /// `nice -n` niceness value.
    pub nice: i32,
    /// Additional raw `make` arguments (`--make-opts`).
    pub extra_make_opts: &'a [String],
}

/// Runs one build-and-legal-info cycle, publishing the live build PID into
/// the shared cross-process array so the supervisor's signal handler can
/// reach it.
pub struct BuildRunner<'a> {
    spawner: &'a dyn BuildSpawner,
    shared_pids: &'a SharedPids,
}

impl<'a> BuildRunner<'a> {
    /// Construct a runner backed by `spawner` and publishing PIDs into
    /// `shared_pids`.
    #[must_use]
    pub fn new(spawner: &'a dyn BuildSpawner, shared_pids: &'a SharedPids) -> Self {
        Self {
            spawner,
            shared_pids,
        }
    }

    /// Run the primary build under `timeout`/`nice`, then (iff it
    /// succeeded) the `legal-info` pass, both logging to
    /// `output_dir/logfile`.
    ///
    /// # Errors
    ///
    /// Returns a [`BuildError`] if the build process cannot be spawned,
    /// the log file cannot be created, or waiting on the process fails.
    /// FAIL/TIMEOUT outcomes are *not* errors — they are returned as
    /// [`BuildStatus`] values.
    pub fn run(&self, request: &BuildRequest<'_>) -> Result<BuildStatus, BuildError> {
        let log_path = request.output_dir.join("logfile");

        let njobs = request.njobs.to_string();
        let jlevel_arg = format!("BR2_JLEVEL={njobs}");
        let dl_arg = format!("BR2_DL_DIR={}", request.dl_dir.display());
        let output_arg = format!("O={}", request.output_dir.display());
        let duration_arg = MAX_DURATION.as_secs().to_string();
        let nice_arg = request.nice.to_string();

        let mut args = vec![
            duration_arg.as_str(),
            "nice",
            "-n",
            nice_arg.as_str(),
            "make",
            output_arg.as_str(),
            "-C",
        ];
        let src = request.src_dir.to_string_lossy().into_owned();
        args.push(src.as_str());
        args.push(dl_arg.as_str());
        args.push(jlevel_arg.as_str());
        let extra: Vec<&str> = request
            .extra_make_opts
            .iter()
            .map(String::as_str)
            .collect();
        args.extend(extra.iter());

        let code = self.spawn_and_wait(request, "timeout", &args, &log_path)?;
        let build_ok = code == Some(0);

        let legal_info_ok = if build_ok {
            let legal_code = self.spawn_and_wait(
                request,
                "make",
                &[
                    output_arg.as_str(),
                    "-C",
                    src.as_str(),
                    dl_arg.as_str(),
                    "legal-info",
                ],
                &log_path,
            )?;
            legal_code == Some(0)
        } else {
            true
        };

        Ok(BuildStatus::from_exit_code(code, legal_info_ok))
    }

    fn spawn_and_wait(
        &self,
        request: &BuildRequest<'_>,
        program: &str,
        args: &[&str],
        log_path: &Path,
    ) -> Result<Option<i32>, BuildError> {
        let mut process = self
            .spawner
            .spawn(request.src_dir, program, args, &[], log_path)
            .map_err(|e| BuildError::Spawn {
                command: format!("{program} {}", args.join(" ")),
                source: std::io::Error::other(e.to_string()),
            })?;

        self.shared_pids.publish(request.instance_id, process.pid());
        let result = process.wait().map_err(BuildError::Wait);
        self.shared_pids.clear(request.instance_id);
        result
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::exec::BuildProcess;
    use anyhow::Result;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeProcess {
        pid: i32,
        code: Option<i32>,
    }

    impl BuildProcess for FakeProcess {
        fn pid(&self) -> i32 {
            self.pid
        }
        fn wait(&mut self) -> std::io::Result<Option<i32>> {
            Ok(self.code)
        }
    }

    #[derive(Debug)]
    struct FakeSpawner {
        /// Exit codes to return, one per call, in order.
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
        ) -> Result<Box<dyn BuildProcess>> {
            let code = self
                .codes
                .lock()
                .unwrap()
                .pop_front()
                .expect("FakeSpawner called more times than scripted");
            Ok(Box::new(FakeProcess { pid: 4242, code }))
        }
    }

    fn request(tmp: &Path) -> BuildRequest<'_> {
        BuildRequest {
            instance_id: 0,
            src_dir: tmp,
            output_dir: tmp,
            dl_dir: tmp,
            njobs: 1,
            nice: 0,
            extra_make_opts: &[],
        }
    }

    #[test]
    fn exit_zero_maps_to_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let spawner = FakeSpawner::new(&[Some(0), Some(0)]);
        let pids = SharedPids::new_in_memory(1);
        let runner = BuildRunner::new(&spawner, &pids);
        let status = runner.run(&request(tmp.path())).unwrap();
        assert_eq!(status, BuildStatus::Ok);
    }

    #[test]
    fn exit_124_maps_to_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let spawner = FakeSpawner::new(&[Some(124)]);
        let pids = SharedPids::new_in_memory(1);
        let runner = BuildRunner::new(&spawner, &pids);
        let status = runner.run(&request(tmp.path())).unwrap();
        assert_eq!(status, BuildStatus::Timeout);
    }

    #[test]
    fn other_nonzero_maps_to_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let spawner = FakeSpawner::new(&[Some(2)]);
        let pids = SharedPids::new_in_memory(1);
        let runner = BuildRunner::new(&spawner, &pids);
        let status = runner.run(&request(tmp.path())).unwrap();
        assert_eq!(status, BuildStatus::Fail);
    }

    #[test]
    fn successful_build_with_failing_legal_info_demotes_to_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let spawner = FakeSpawner::new(&[Some(0), Some(1)]);
        let pids = SharedPids::new_in_memory(1);
        let runner = BuildRunner::new(&spawner, &pids);
        let status = runner.run(&request(tmp.path())).unwrap();
        assert_eq!(status, BuildStatus::Fail);
    }

    #[test]
    fn pid_is_cleared_after_build_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let spawner = FakeSpawner::new(&[Some(0), Some(0)]);
        let pids = SharedPids::new_in_memory(1);
        let runner = BuildRunner::new(&spawner, &pids);
        runner.run(&request(tmp.path())).unwrap();
        assert_eq!(pids.get(0), 0);
    }

    #[test]
    fn status_marker_literals() {
        assert_eq!(BuildStatus::Ok.status_marker(), "OK");
        assert_eq!(BuildStatus::Fail.status_marker(), "NOK");
        assert_eq!(BuildStatus::Timeout.status_marker(), "TIMEOUT");
    }
}
