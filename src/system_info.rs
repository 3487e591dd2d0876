//! Memoised capability probe for external programs the daemon shells out to.

use crate::exec::Executor;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Programs that are always required for the daemon to start.
const REQUIRED: &[&str] = &["make", "git", "gcc", "timeout"];

/// Programs that are probed eagerly but whose absence is only fatal when
/// a fixup-filter rule depends on them.
const OPTIONAL: &[&str] = &["bzr", "java", "javac", "jar"];

/// Memoised capability probe.
///
/// `has(name)` resolves a program on the search path at most once per
/// process lifetime; subsequent queries for the same name return the
/// cached result. Java and javac additionally reject any implementation
/// whose `-version` output mentions `gcj`, since buildroot's host-java
/// detection rejects the GNU Java Compiler implementation.
#[derive(Debug)]
pub struct SystemInfo {
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
    uploading: bool,
}

impl SystemInfo {
    /// Create a new, empty probe. `uploading` controls whether `curl` is
    /// added to the required-program set (HTTP submission is enabled).
    #[must_use]
    pub fn new(uploading: bool) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            uploading,
        }
    }

    /// Resolve `name` on PATH, memoising the result. Returns `None` if the
    /// program cannot be found.
    #[allow(clippy::significant_drop_tightening)]
    pub fn has(&self, executor: &dyn Executor, name: &str) -> Option<PathBuf> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(hit) = cache.get(name) {
            return hit.clone();
        }
        let resolved = self.resolve(executor, name);
        cache.insert(name.to_string(), resolved.clone());
        resolved
    }

    fn resolve(&self, executor: &dyn Executor, name: &str) -> Option<PathBuf> {
        let path = crate::exec::which_path(name).ok()?;
        if matches!(name, "java" | "javac") && Self::is_gcj(executor, name) {
            return None;
        }
        Some(path)
    }

    /// Probe the required and optional program sets eagerly, so workers
    /// never race to detect the same program concurrently later.
    pub fn probe_all(&self, executor: &dyn Executor) {
        for name in self.required_programs() {
            self.has(executor, name);
        }
        for name in OPTIONAL {
            self.has(executor, name);
        }
    }

    /// The required-program list, including `curl` iff uploading is enabled.
    #[must_use]
    pub fn required_programs(&self) -> Vec<&'static str> {
        let mut req: Vec<&'static str> = REQUIRED.to_vec();
        if self.uploading {
            req.push("curl");
        }
        req
    }

    /// Returns `Ok(())` iff every required program resolves; otherwise the
    /// names of the missing programs.
    ///
    /// # Errors
    ///
    /// Returns the list of missing required program names.
    pub fn check_requirements(&self, executor: &dyn Executor) -> Result<(), Vec<String>> {
        let missing: Vec<String> = self
            .required_programs()
            .into_iter()
            .filter(|name| self.has(executor, name).is_none())
            .map(str::to_string)
            .collect();
        if missing.is_empty() { Ok(()) } else { Err(missing) }
    }

    fn is_gcj(executor: &dyn Executor, name: &str) -> bool {
        executor
            .run_unchecked(name, &["-version"])
            .map(|result| {
                result.stdout.contains("gcj") || result.stderr.contains("gcj")
            })
            .unwrap_or(false)
    }
}
