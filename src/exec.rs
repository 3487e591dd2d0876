//! Subprocess execution helpers and the [`Executor`] test seam.
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Output, Stdio};

/// Result of a command execution.
#[derive(Debug)]
pub struct ExecResult {
    /// Standard output as UTF-8 string.
    pub stdout: String,
    /// Standard error as UTF-8 string.
    pub stderr: String,
    /// Whether the command exited successfully (status code 0).
    pub success: bool,
    /// Exit code if available, or None if terminated by signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Execute a command and return the result, bailing on non-zero exit.
fn execute_checked(mut cmd: Command, label: &str) -> Result<ExecResult> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to execute: {label}"))?;
    let result = ExecResult::from(output);
    if !result.success {
        let code = result.code.unwrap_or(-1);
        bail!("{label} failed (exit {code}): {}", result.stderr.trim());
    }
    Ok(result)
}

/// Run a command and return its output. Fails if the command exits non-zero.
///
/// # Errors
///
/// Returns an error if the command cannot be executed or exits with non-zero status.
pub fn run(program: &str, args: &[&str]) -> Result<ExecResult> {
    let mut cmd = Command::new(program);
    cmd.args(args).env("LC_ALL", "C");
    execute_checked(cmd, program)
}

/// Run a command in a specific directory.
///
/// # Errors
///
/// Returns an error if the command cannot be executed or exits with non-zero status.
pub fn run_in(dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(dir).env("LC_ALL", "C");
    execute_checked(cmd, &format!("{program} in {}", dir.display()))
}

/// Run a command in a specific directory with extra environment variables.
///
/// # Errors
///
/// Returns an error if the command cannot be executed or exits with non-zero status.
pub fn run_in_with_env(
    dir: &Path,
    program: &str,
    args: &[&str],
    env: &[(&str, &str)],
) -> Result<ExecResult> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(dir).env("LC_ALL", "C");
    for (k, v) in env {
        cmd.env(k, v);
    }
    execute_checked(cmd, &format!("{program} in {}", dir.display()))
}

/// Run a command, allowing failure (returns result without bailing).
///
/// # Errors
///
/// Returns an error only if the command cannot be executed (not for non-zero exit).
pub fn run_unchecked(program: &str, args: &[&str]) -> Result<ExecResult> {
    let output = Command::new(program)
        .args(args)
        .env("LC_ALL", "C")
        .output()
        .with_context(|| format!("failed to execute: {program}"))?;

    Ok(ExecResult::from(output))
}

/// Run a command in a directory, allowing failure.
///
/// # Errors
///
/// Returns an error only if the command cannot be executed (not for non-zero exit).
pub fn run_in_unchecked(dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .with_context(|| format!("failed to execute: {program} in {}", dir.display()))?;
    Ok(ExecResult::from(output))
}

/// Check if a program is available on PATH.
#[must_use]
pub fn which(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Resolve the full path of a program on PATH.
///
/// # Errors
///
/// Returns an error if the program cannot be found on PATH.
pub fn which_path(program: &str) -> Result<std::path::PathBuf> {
    which::which(program).with_context(|| format!("{program} not found on PATH"))
}

/// Trait for executing system commands, enabling test injection.
///
/// Implement this trait to provide mock executors for unit tests.
/// The [`SystemExecutor`] implementation delegates to the real free functions.
pub trait Executor: std::fmt::Debug + Sync {
    /// Execute a command, bailing on non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute, cannot be found,
    /// or exits with a non-zero status code.
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Execute a command in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute, the directory does not exist,
    /// or the command exits with a non-zero status code.
    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Execute a command in a specific directory with extra environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute, the directory does not exist,
    /// or the command exits with a non-zero status code.
    fn run_in_with_env(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<ExecResult>;

    /// Execute a command, allowing non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute or cannot be found,
    /// but does NOT fail on non-zero exit codes (which are captured in the result).
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Execute a command in a directory, allowing non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails to execute or cannot be found.
    fn run_in_unchecked(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Check if a program is available on PATH.
    fn which(&self, program: &str) -> bool;
}

/// The real system executor that delegates to process spawning.
#[derive(Debug)]
pub struct SystemExecutor;

impl Executor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        run(program, args)
    }

    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        run_in(dir, program, args)
    }

    fn run_in_with_env(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<ExecResult> {
        run_in_with_env(dir, program, args, env)
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        run_unchecked(program, args)
    }

    fn run_in_unchecked(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        run_in_unchecked(dir, program, args)
    }

    fn which(&self, program: &str) -> bool {
        which(program)
    }
}

/// A long-running, already-spawned build process.
///
/// Abstracts over [`std::process::Child`] so the build runner's
/// pid-publishing and exit-code interpretation logic can be exercised
/// against a fake in unit tests, without spawning a real subprocess.
pub trait BuildProcess: Send {
    /// The OS process id of the spawned process.
    fn pid(&self) -> i32;

    /// Block until the process exits, returning its exit code.
    ///
    /// `None` means the process was terminated by a signal rather than
    /// exiting normally.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying wait syscall fails.
    fn wait(&mut self) -> std::io::Result<Option<i32>>;
}

impl BuildProcess for Child {
    fn pid(&self) -> i32 {
        // A PID is always a positive 32-bit value on the platforms this crate targets.
        #[allow(clippy::cast_possible_wrap)]
        let pid = self.id() as i32;
        pid
    }

    fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status: ExitStatus = Child::wait(self)?;
        Ok(status.code())
    }
}

/// Spawns build processes with output redirected to a log file.
///
/// Implemented for real use by [`SystemSpawner`]; tests provide a fake
/// that returns a canned [`BuildProcess`] without touching the OS.
pub trait BuildSpawner: std::fmt::Debug + Sync {
    /// Spawn `program` with `args` in `dir`, with the given extra
    /// environment variables, redirecting both stdout and stderr to
    /// `log_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn spawn(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        log_file: &Path,
    ) -> Result<Box<dyn BuildProcess>>;
}

/// The real build spawner, backed by [`std::process::Command`].
#[derive(Debug)]
pub struct SystemSpawner;

impl BuildSpawner for SystemSpawner {
    fn spawn(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
        log_file: &Path,
    ) -> Result<Box<dyn BuildProcess>> {
        let out = File::options()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("opening build log {}", log_file.display()))?;
        let err = out
            .try_clone()
            .with_context(|| format!("cloning build log handle for {}", log_file.display()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .env("LC_ALL", "C")
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err));
        for (k, v) in env {
            cmd.env(k, v);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("spawning {program} in {}", dir.display()))?;
        Ok(Box::new(child))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    /// Helper: run a simple echo command cross-platform.
    fn echo_result(msg: &str) -> Result<ExecResult> {
        #[cfg(windows)]
        {
            run("cmd", &["/C", "echo", msg])
        }
        #[cfg(not(windows))]
        {
            run("echo", &[msg])
        }
    }

    #[test]
    fn run_echo() {
        let result = echo_result("hello").unwrap();
        assert!(result.success, "echo command should succeed");
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[test]
    fn run_failure() {
        #[cfg(windows)]
        let result = run("cmd", &["/C", "exit", "1"]);
        #[cfg(not(windows))]
        let result = run("false", &[]);
        assert!(result.is_err(), "non-zero exit should produce an error");
    }

    #[test]
    fn run_unchecked_failure() {
        #[cfg(windows)]
        let result = run_unchecked("cmd", &["/C", "exit", "1"]).unwrap();
        #[cfg(not(windows))]
        let result = run_unchecked("false", &[]).unwrap();
        assert!(!result.success, "non-zero exit should set success=false");
    }

    #[test]
    fn which_finds_known_program() {
        #[cfg(windows)]
        assert!(which("cmd"), "cmd should be found on Windows");
        #[cfg(not(windows))]
        assert!(which("echo"), "echo should be found on Unix");
    }

    #[test]
    fn which_missing_program() {
        assert!(
            !which("this-program-does-not-exist-12345"),
            "non-existent program should not be found"
        );
    }

    #[test]
    fn run_in_tempdir() {
        let dir = std::env::temp_dir();
        #[cfg(windows)]
        let result = run_in(&dir, "cmd", &["/C", "echo", "hello"]).unwrap();
        #[cfg(not(windows))]
        let result = run_in(&dir, "echo", &["hello"]).unwrap();
        assert!(result.success, "echo in temp dir should succeed");
    }

    #[cfg(not(windows))]
    #[test]
    fn system_spawner_redirects_output_to_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("build.log");
        let spawner = SystemSpawner;
        let mut proc = spawner
            .spawn(tmp.path(), "echo", &["hello-build"], &[], &log)
            .unwrap();
        assert!(proc.pid() > 0);
        let code = proc.wait().unwrap();
        assert_eq!(code, Some(0));
        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents.trim(), "hello-build");
    }
}
