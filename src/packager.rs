//! `ResultPackager` (§4.5): assembles the `results/` directory from a
//! completed build, diagnoses the failing package, extracts forensic log
//! excerpts, and archives everything into a compressed tarball.

use crate::build_runner::BuildStatus;
use crate::error::PackagingError;
use crate::exec::Executor;
use bzip2::Compression;
use bzip2::write::BzEncoder;
use regex::Regex;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Number of trailing lines of `output/logfile` scanned for the failure
/// reason (§4.5 step 4).
const FAILURE_SCAN_TAIL_LINES: usize = 4;

/// Fallback tail length for the end-log extraction when no failure
/// marker is found (§4.5 step 5, §8 property 6).
const END_LOG_FALLBACK_LINES: usize = 500;

static FAILURE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"make: \*\*\* .*/(?:build|toolchain)/([^/]*)/").unwrap()
});

/// A `(package, version)` pair extracted from the build log, or
/// [`FailureReason::Unknown`] if no matching line was found (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A package/version pair was identified.
    Known {
        /// Package name (the segment before the final `-`).
        package: String,
        /// Version string (the segment after the final `-`).
        version: String,
    },
    /// No matching `make: ***` line was found in the log tail.
    Unknown,
}

impl FailureReason {
    /// `>>> <package> <version>` marker this reason corresponds to in
    /// the build log, if known.
    #[must_use]
    pub fn marker(&self) -> Option<String> {
        match self {
            Self::Known { package, version } => Some(format!(">>> {package} {version}")),
            Self::Unknown => None,
        }
    }

    /// The `<package>-<version>` directory name this reason corresponds
    /// to under `output/build/`, if known.
    #[must_use]
    pub fn build_dir_name(&self) -> Option<String> {
        match self {
            Self::Known { package, version } => Some(format!("{package}-{version}")),
            Self::Unknown => None,
        }
    }
}

/// Scan the last [`FAILURE_SCAN_TAIL_LINES`] lines of `log` for the
/// failure-reason regex, returning the `(package, version)` split on the
/// final `-` (§4.5 step 4, §8 property 5).
#[must_use]
pub fn find_failure_reason(log: &str) -> FailureReason {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(FAILURE_SCAN_TAIL_LINES);
    for line in lines.get(start..).unwrap_or(&[]) {
        if let Some(captures) = FAILURE_REGEX.captures(line) {
            let Some(pkg_ver) = captures.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if let Some((package, version)) = pkg_ver.rsplit_once('-') {
                return FailureReason::Known {
                    package: package.to_string(),
                    version: version.to_string(),
                };
            }
        }
    }
    FailureReason::Unknown
}

/// Extract the forensic end-of-log excerpt (§4.5 step 5, §8 property 6).
///
/// If `reason` has a marker and it occurs in `log_path`, returns
/// everything from the marker's first occurrence to EOF. Otherwise falls
/// back to the last [`END_LOG_FALLBACK_LINES`] lines.
///
/// Uses memory-mapping so only one linear scan of the log is performed,
/// since logs can reach hundreds of MB (§9).
///
/// # Errors
///
/// Returns [`PackagingError::MapLog`] if the log cannot be opened or
/// mapped.
pub fn extract_end_log(log_path: &Path, reason: &FailureReason) -> Result<Vec<u8>, PackagingError> {
    let file = File::open(log_path).map_err(|e| PackagingError::MapLog {
        path: log_path.display().to_string(),
        source: e,
    })?;
    // SAFETY: `file` is opened read-only above and is not concurrently
    // truncated by this process; the mapping is read immediately and
    // dropped within this function.
    let mmap = unsafe { memmap2::Mmap::map(&file) }.map_err(|e| PackagingError::MapLog {
        path: log_path.display().to_string(),
        source: e,
    })?;

    if let Some(marker) = reason.marker() {
        if let Some(offset) = find_subslice(&mmap, marker.as_bytes()) {
            return Ok(mmap.get(offset..).unwrap_or(&[]).to_vec());
        }
    }

    Ok(tail_lines(&mmap, END_LOG_FALLBACK_LINES))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn tail_lines(data: &[u8], n: usize) -> Vec<u8> {
    let newline_positions: Vec<usize> = data
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
        .map(|(i, _)| i)
        .collect();
    if newline_positions.len() <= n {
        return data.to_vec();
    }
    let Some(&boundary) = newline_positions.get(newline_positions.len() - n - 1) else {
        return data.to_vec();
    };
    let start = boundary + 1;
    data.get(start..).unwrap_or(&[]).to_vec()
}

/// Copy every `config.log`, `CMakeCache.txt`, `CMakeError.log`, or
/// `CMakeOutput.log` found under `build_tree` into a mirror subtree
/// rooted at `dest`, creating destination directories on demand (§4.5
/// step 6).
///
/// # Errors
///
/// Returns an error if walking the tree or copying a file fails.
pub fn collect_config_logs(build_tree: &Path, dest: &Path) -> Result<usize, PackagingError> {
    const WANTED: &[&str] = &["config.log", "CMakeCache.txt", "CMakeError.log", "CMakeOutput.log"];

    if !build_tree.exists() {
        return Ok(0);
    }

    let mut copied = 0;
    for entry in walkdir::WalkDir::new(build_tree)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !WANTED.contains(&name) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(build_tree)
            .unwrap_or(entry.path());
        let dest_path = dest.join(relative);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest_path)?;
        copied += 1;
    }
    Ok(copied)
}

/// Everything the packager needs to know about where a build's artifacts
/// live and what the submitter identification string is.
#[derive(Debug, Clone)]
pub struct PackagingRequest<'a> {
    /// The build's output tree (`output/`).
    pub output_dir: &'a Path,
    /// The buildroot source checkout (for `git rev-parse HEAD`).
    pub src_dir: &'a Path,
    /// The terminal build outcome.
    pub status: BuildStatus,
    /// The `--submitter` identification string.
    pub submitter: &'a str,
}

/// Assembles `results/`, diagnoses the failure, and archives the
/// directory into `output/results.tar.bz2`.
pub struct ResultPackager<'a> {
    executor: &'a dyn Executor,
}

impl<'a> ResultPackager<'a> {
    /// Construct a packager using `executor` to run `git rev-parse HEAD`.
    #[must_use]
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Run the full packaging algorithm (§4.5 steps 1-9), returning the
    /// path to the produced tarball.
    ///
    /// # Errors
    ///
    /// Returns a [`PackagingError`] if any filesystem operation or the
    /// archive creation fails. A failure to produce the tarball is
    /// escalated by the caller to a fatal exit for the worker process
    /// (§7 "Packaging failure").
    pub fn package(&self, request: &PackagingRequest<'_>) -> Result<PathBuf, PackagingError> {
        let results_dir = request.output_dir.join("results");
        fs::create_dir_all(&results_dir)?;

        self.copy_if_present(&request.output_dir.join(".config"), &results_dir.join("config"))?;
        self.copy_if_present(
            &request.output_dir.join("defconfig"),
            &results_dir.join("defconfig"),
        )?;
        self.copy_if_present(
            &request.output_dir.join("build").join("build-time.log"),
            &results_dir.join("build-time.log"),
        )?;
        self.copy_if_present(
            &request
                .output_dir
                .join("legal-info")
                .join("manifest.csv"),
            &results_dir.join("licenses-manifest.csv"),
        )?;

        fs::write(results_dir.join("gitid"), self.gitid(request.src_dir))?;

        let log_path = request.output_dir.join("logfile");
        let log_text = fs::read_to_string(&log_path).unwrap_or_default();
        let reason = find_failure_reason(&log_text);

        let end_log = if log_path.exists() {
            extract_end_log(&log_path, &reason)?
        } else {
            Vec::new()
        };
        fs::write(results_dir.join("build-end.log"), end_log)?;

        if let Some(dir_name) = reason.build_dir_name() {
            let build_tree = request.output_dir.join("build").join(&dir_name);
            let dest = results_dir.join(&dir_name);
            collect_config_logs(&build_tree, &dest)?;
        }

        fs::write(results_dir.join("status"), request.status.status_marker())?;
        fs::write(results_dir.join("submitter"), request.submitter)?;

        let tarball_path = request.output_dir.join("results.tar.bz2");
        self.archive(&results_dir, &tarball_path)?;

        Ok(tarball_path)
    }

    fn copy_if_present(&self, src: &Path, dest: &Path) -> Result<(), PackagingError> {
        if src.exists() {
            fs::copy(src, dest)?;
        }
        Ok(())
    }

    /// §4.5 step 3 / §9 open question (c): the source ignores failures of
    /// `git log`/`rev-parse`; this preserves that behaviour by mapping a
    /// failed lookup to an empty string rather than aborting packaging.
    fn gitid(&self, src_dir: &Path) -> String {
        self.executor
            .run_in_unchecked(src_dir, "git", &["rev-parse", "HEAD"])
            .ok()
            .filter(|r| r.success)
            .map(|r| r.stdout.trim().to_string())
            .unwrap_or_default()
    }

    fn archive(&self, results_dir: &Path, dest: &Path) -> Result<(), PackagingError> {
        let file = File::create(dest)?;
        let encoder = BzEncoder::new(file, Compression::best());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all("results", results_dir)
            .map_err(|e| PackagingError::Archive(e.to_string()))?;
        let encoder = builder
            .into_inner()
            .map_err(|e| PackagingError::Archive(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| PackagingError::Archive(e.to_string()))?
            .flush()
            .map_err(|e| PackagingError::Archive(e.to_string()))?;
        Ok(())
    }
}
