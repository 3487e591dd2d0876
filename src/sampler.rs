//! `ConfigSampler` (§4.3): draws a random toolchain, appends stochastic
//! global options, runs the framework's random-package-selection
//! primitive, and validates the result against the fixup filter,
//! iterating until a valid configuration is produced or a bound is
//! exceeded.

use crate::config_lines::ConfigLines;
use crate::error::SamplerError;
use crate::exec::Executor;
use crate::fixup::{self, HostTools, Verdict};
use crate::toolchain::ToolchainCatalog;
use rand::Rng;
use std::path::Path;

/// Upper bound on randomisation-loop attempts before the cycle is
/// abandoned as infeasible (§4.3 step 5, §8 S6).
pub const RANDCONFIG_ITERATION_BOUND: u32 = 100;

/// The minimum glibc version (from `ldd --version`) a Linaro ARM/AARCH64
/// toolchain requires on an `x86_64` host.
const LINARO_MIN_HOST_GLIBC: (u32, u32) = (2, 14);

/// Outcome of a successful sampling pass: the final `.config` and
/// minimised `defconfig` have been written to `output_dir`, and the
/// number of randomisation-loop iterations it took is recorded for
/// diagnostics and for the S1/S6 test scenarios.
#[derive(Debug)]
pub struct SampleOutcome {
    /// Number of `randpackageconfig` iterations consumed before the
    /// fixup filter accepted a configuration.
    pub iterations: u32,
}

/// Injectable pseudo-random source for every stochastic decision the
/// sampler and `InstanceLoop` make. A fixed seed reproduces an entire
/// cycle deterministically for tests.
pub trait Prng {
    /// Uniform integer in `[low, high]` inclusive.
    fn gen_range_inclusive(&mut self, low: u32, high: u32) -> u32;

    /// `true` with probability `1/denominator`.
    fn one_in(&mut self, denominator: u32) -> bool {
        self.gen_range_inclusive(1, denominator) == 1
    }

    /// Uniform index in `[0, len)`.
    fn pick_index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        // len fits comfortably in u32 for every real toolchain catalogue.
        #[allow(clippy::cast_possible_truncation)]
        let len_u32 = len as u32;
        self.gen_range_inclusive(0, len_u32.saturating_sub(1)) as usize
    }
}

/// The real PRNG, backed by the thread-local `rand` generator.
#[derive(Debug, Default)]
pub struct ThreadPrng;

impl Prng for ThreadPrng {
    fn gen_range_inclusive(&mut self, low: u32, high: u32) -> u32 {
        rand::thread_rng().gen_range(low..=high)
    }
}

/// Runs the configuration-sampling algorithm for one build cycle.
pub struct ConfigSampler<'a> {
    executor: &'a dyn Executor,
    host: &'a dyn HostTools,
    src_dir: &'a Path,
    output_dir: &'a Path,
}

impl<'a> ConfigSampler<'a> {
    /// Construct a sampler for one instance's source checkout and output
    /// tree.
    #[must_use]
    pub fn new(
        executor: &'a dyn Executor,
        host: &'a dyn HostTools,
        src_dir: &'a Path,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            executor,
            host,
            src_dir,
            output_dir,
        }
    }

    /// Run the full sampling algorithm (§4.3 steps 1-6).
    ///
    /// # Errors
    ///
    /// Returns [`SamplerError::ToolchainUnusable`] if the drawn toolchain
    /// fails [`Self::is_toolchain_usable`], [`SamplerError::BoundExceeded`]
    /// if the randomisation loop exhausts [`RANDCONFIG_ITERATION_BOUND`]
    /// attempts, or a tool-failure variant if any `make` invocation fails.
    pub fn sample(
        &self,
        catalog: &ToolchainCatalog,
        prng: &mut dyn Prng,
    ) -> Result<SampleOutcome, SamplerError> {
        let idx = prng.pick_index(catalog.toolchains.len());
        let toolchain = catalog.toolchains.get(idx).ok_or(SamplerError::EmptyCatalog)?;

        let mut lines = toolchain.contents.clone();
        self.seed_global_options(&mut lines, toolchain.is_non_glibc(), prng);

        let config_path = self.output_dir.join(".config");
        lines.write(&config_path)?;
        self.run_oldconfig()?;

        if !self.is_toolchain_usable(toolchain) {
            return Err(SamplerError::ToolchainUnusable(toolchain.url.clone()));
        }

        let iterations = self.randomize_until_accepted(&toolchain.url, prng)?;

        self.run_oldconfig()?;
        self.run_savedefconfig()?;

        Ok(SampleOutcome { iterations })
    }

    /// Seed the `.config` with the toolchain's contents plus the
    /// stochastic global options of §4.3 step 2.
    fn seed_global_options(&self, lines: &mut ConfigLines, non_glibc: bool, prng: &mut dyn Prng) {
        lines.append("BR2_PACKAGE_BUSYBOX_SHOW_OTHERS=y");
        lines.append("# BR2_TARGET_ROOTFS_TAR is not set");
        lines.append("BR2_COMPILER_PARANOID_UNSAFE_PATH=y");

        if prng.one_in(21) {
            lines.append("BR2_ENABLE_DEBUG=y");
        }

        if prng.one_in(31) {
            lines.append("BR2_INIT_SYSTEMD=y");
        } else if prng.one_in(21) {
            lines.append("BR2_ROOTFS_DEVICE_CREATION_DYNAMIC_EUDEV=y");
        }

        if non_glibc && prng.one_in(21) {
            lines.append("BR2_STATIC_LIBS=y");
        }
    }

    /// Run `oldconfig` with every interactive prompt answered by the
    /// empty string (accept defaults).
    fn run_oldconfig(&self) -> Result<(), SamplerError> {
        self.make(&["oldconfig"], &[("BR2_DEFCONFIG_NONINTERACTIVE", "1")])
            .map_err(|e| SamplerError::OldConfig(e.to_string()))
    }

    /// Re-run `oldconfig` then `savedefconfig` to produce the minimised
    /// defconfig.
    fn run_savedefconfig(&self) -> Result<(), SamplerError> {
        self.make(&["savedefconfig"], &[])
            .map_err(|e| SamplerError::SaveDefConfig(e.to_string()))
    }

    /// §4.3 step 4: reject Linaro ARM/AARCH64/ARMEB toolchains on an
    /// `x86_64` host whose `ldd --version` reports a glibc older than 2.14.
    fn is_toolchain_usable(&self, toolchain: &crate::toolchain::ToolchainConfig) -> bool {
        if !(toolchain.is_linaro_arm_family() && std::env::consts::ARCH == "x86_64") {
            return true;
        }
        let Ok(result) = self.executor.run_unchecked("ldd", &["--version"]) else {
            return false;
        };
        let Some(first_line) = result.stdout.lines().next() else {
            return false;
        };
        match parse_ldd_glibc_version(first_line) {
            Some(version) => version >= LINARO_MIN_HOST_GLIBC,
            None => false,
        }
    }

    /// §4.3 step 5: the bounded randomisation loop.
    fn randomize_until_accepted(
        &self,
        toolchain_url: &str,
        prng: &mut dyn Prng,
    ) -> Result<u32, SamplerError> {
        for attempt in 1..=RANDCONFIG_ITERATION_BOUND {
            let probability = prng.gen_range_inclusive(1, 30);
            self.make(
                &["randpackageconfig"],
                &[("KCONFIG_PROBABILITY", &probability.to_string())],
            )
            .map_err(|e| SamplerError::RandPackageConfig(e.to_string()))?;

            let config_path = self.output_dir.join(".config");
            let mut lines = ConfigLines::read(&config_path)?;
            match fixup::apply(&mut lines, toolchain_url, self.host) {
                Verdict::Accept => {
                    lines.write(&config_path)?;
                    return Ok(attempt);
                }
                Verdict::Reject(_reason) => continue,
            }
        }
        Err(SamplerError::BoundExceeded(RANDCONFIG_ITERATION_BOUND))
    }

    fn make(&self, args: &[&str], env: &[(&str, &str)]) -> anyhow::Result<()> {
        let output = self.output_dir.to_string_lossy().into_owned();
        let mut full_args = vec!["O=".to_string() + &output, "-C".to_string()];
        full_args.push(self.src_dir.to_string_lossy().into_owned());
        full_args.extend(args.iter().map(|s| (*s).to_string()));
        let arg_refs: Vec<&str> = full_args.iter().map(String::as_str).collect();
        self.executor
            .run_in_with_env(self.src_dir, "make", &arg_refs, env)?;
        Ok(())
    }
}

/// Parse the first line of `ldd --version` (e.g. `ldd (GNU libc) 2.23`)
/// into a `(major, minor)` pair.
fn parse_ldd_glibc_version(first_line: &str) -> Option<(u32, u32)> {
    let version_str = first_line.split_whitespace().last()?;
    let mut parts = version_str.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    Some((major, minor))
}
