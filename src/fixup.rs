//! The fixup filter (§4.3.1): a pure function over [`ConfigLines`] that
//! both mutates (auto-accepts licence flags, substitutes required values)
//! and vetoes (rejects known-bad combinations) a sampled configuration.
//!
//! The filter encodes knowledge of the external build framework's current
//! bug set, not an invariant of this system, and is expected to evolve.
//! It is organised as an ordered slice of small, independently testable
//! rules combined by a single driver ([`apply`]), so a new rule can be
//! added by appending one clause without reordering existing ones.

use crate::config_lines::ConfigLines;

/// What a toolchain host-tool dependency check needs to know: whether a
/// given optional program was detected on this host.
pub trait HostTools {
    /// `true` iff `name` (e.g. `"java"`, `"bzr"`) resolves on this host.
    fn has(&self, name: &str) -> bool;
}

/// Outcome of applying the fixup filter to a sampled configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The configuration is admissible, possibly after in-place mutation.
    Accept,
    /// The configuration must be discarded; the randomisation loop should
    /// draw again. Carries a short human-readable reason for logging.
    Reject(String),
}

/// Curated `(package, toolchain-URL substring)` pairs corresponding to
/// known upstream bugs in specific toolchain/package combinations.
const KNOWN_BAD_PAIRS: &[(&str, &str)] = &[
    ("BR2_PACKAGE_LTTNG_TOOLS", "arm-ctng"),
    ("BR2_PACKAGE_LTTNG_TOOLS", "armeb-ctng"),
    ("BR2_PACKAGE_LTTNG_TOOLS", "armv7-ctng"),
    ("BR2_PACKAGE_SDL", "powerpc-ctng"),
    ("BR2_PACKAGE_LIBMPEG2", "powerpc-ctng"),
    ("BR2_PACKAGE_PYTHON3", "mips64el-ctng"),
    ("BR2_PACKAGE_STRONGSWAN", "mips64el-ctng"),
];

/// Package prefixes that are entirely broken on `mipsel-ctng-uclibc`.
const MIPSEL_CTNG_UCLIBC_BROKEN: &[&str] = &["BR2_PACKAGE_"];

/// Architecture substrings incompatible with `BR2_PACKAGE_LIBFFI=y`.
const LIBFFI_INCOMPATIBLE_ARCHES: &[&str] = &["sh2a", "armv7m", "ARMV7M"];

/// Apply every fixup-filter rule, in order, to `lines`.
///
/// `toolchain_url` identifies the chosen toolchain (for the curated
/// known-bad-pair and per-arch rejections); `host` reports availability
/// of optional host tools for the `BR2_NEEDS_HOST_*` and `bzr` checks.
#[must_use]
pub fn apply(lines: &mut ConfigLines, toolchain_url: &str, host: &dyn HostTools) -> Verdict {
    rule_qt_license(lines);

    if let Verdict::Reject(reason) = rule_ltp_xfsprogs_mrouted_vs_uclibc(lines, toolchain_url) {
        return Verdict::Reject(reason);
    }

    if let Verdict::Reject(reason) = rule_needs_host_java(lines, host) {
        return Verdict::Reject(reason);
    }

    if let Verdict::Reject(reason) = rule_python_nfc_needs_bzr(lines, host) {
        return Verdict::Reject(reason);
    }

    if let Verdict::Reject(reason) = rule_known_bad_pairs(lines, toolchain_url) {
        return Verdict::Reject(reason);
    }

    if let Verdict::Reject(reason) = rule_mipsel_ctng_uclibc(lines, toolchain_url) {
        return Verdict::Reject(reason);
    }

    if let Verdict::Reject(reason) = rule_alsa_static_libs_i486(lines, toolchain_url) {
        return Verdict::Reject(reason);
    }

    if let Verdict::Reject(reason) = rule_libffi_vs_arch(lines, toolchain_url) {
        return Verdict::Reject(reason);
    }

    rule_sunxi_fex_default(lines);

    Verdict::Accept
}

/// If Qt or Qt5Base is selected and its licence-approval line is in the
/// "not set" form, flip it to enabled.
fn rule_qt_license(lines: &mut ConfigLines) {
    if lines.is_enabled("BR2_PACKAGE_QT") {
        lines.enable("BR2_PACKAGE_QT_LICENSE_APPROVED");
    }
    if lines.is_enabled("BR2_PACKAGE_QT5BASE") {
        lines.enable("BR2_PACKAGE_QT5_LICENSE_APPROVED");
    }
}

/// If any of `LTP_TESTSUITE`, `XFSPROGS`, `MROUTED` is enabled together
/// with a uClibc toolchain, drop the offending package selection.
fn rule_ltp_xfsprogs_mrouted_vs_uclibc(lines: &mut ConfigLines, toolchain_url: &str) -> Verdict {
    if !toolchain_url.to_ascii_lowercase().contains("uclibc") {
        return Verdict::Accept;
    }
    for key in ["BR2_PACKAGE_LTP_TESTSUITE", "BR2_PACKAGE_XFSPROGS", "BR2_PACKAGE_MROUTED"] {
        if lines.is_enabled(key) {
            lines.drop_selection(key);
        }
    }
    Verdict::Accept
}

/// Reject if any `BR2_NEEDS_HOST_{JAVA,JAVAC,JAR}=y` is set but the
/// corresponding host tool is absent.
fn rule_needs_host_java(lines: &ConfigLines, host: &dyn HostTools) -> Verdict {
    for (flag, tool) in [
        ("BR2_NEEDS_HOST_JAVA", "java"),
        ("BR2_NEEDS_HOST_JAVAC", "javac"),
        ("BR2_NEEDS_HOST_JAR", "jar"),
    ] {
        if lines.is_enabled(flag) && !host.has(tool) {
            return Verdict::Reject(format!("{flag}=y but {tool} is not available"));
        }
    }
    Verdict::Accept
}

/// Reject if `PYTHON_NFC=y` and `bzr` is absent.
fn rule_python_nfc_needs_bzr(lines: &ConfigLines, host: &dyn HostTools) -> Verdict {
    if lines.is_enabled("BR2_PACKAGE_PYTHON_NFC") && !host.has("bzr") {
        Verdict::Reject("BR2_PACKAGE_PYTHON_NFC=y but bzr is not available".to_string())
    } else {
        Verdict::Accept
    }
}

/// Reject a curated list of (package, toolchain-URL) pairs corresponding
/// to known upstream bugs.
fn rule_known_bad_pairs(lines: &ConfigLines, toolchain_url: &str) -> Verdict {
    let url = toolchain_url.to_ascii_lowercase();
    for (flag, url_substr) in KNOWN_BAD_PAIRS {
        if lines.is_enabled(flag) && url.contains(url_substr) {
            return Verdict::Reject(format!("{flag}=y is known-broken on {url_substr}"));
        }
    }
    Verdict::Accept
}

/// Reject any package selection on `mipsel-ctng-uclibc`; the toolchain is
/// broken for essentially every package.
fn rule_mipsel_ctng_uclibc(lines: &ConfigLines, toolchain_url: &str) -> Verdict {
    let url = toolchain_url.to_ascii_lowercase();
    if !url.contains("mipsel-ctng-uclibc") {
        return Verdict::Accept;
    }
    let any_package_selected = lines.as_slice().iter().any(|l| {
        MIPSEL_CTNG_UCLIBC_BROKEN
            .iter()
            .any(|prefix| l.starts_with(prefix) && l.ends_with("=y"))
    });
    if any_package_selected {
        Verdict::Reject("mipsel-ctng-uclibc rejects all package selections".to_string())
    } else {
        Verdict::Accept
    }
}

/// Reject `ALSA_LIB=y` combined with `BR2_STATIC_LIBS=y` on `i486-ctng-uclibc`.
fn rule_alsa_static_libs_i486(lines: &ConfigLines, toolchain_url: &str) -> Verdict {
    let url = toolchain_url.to_ascii_lowercase();
    if url.contains("i486-ctng-uclibc")
        && lines.is_enabled("BR2_PACKAGE_ALSA_LIB")
        && lines.is_enabled("BR2_STATIC_LIBS")
    {
        return Verdict::Reject(
            "BR2_PACKAGE_ALSA_LIB=y with BR2_STATIC_LIBS=y is broken on i486-ctng-uclibc"
                .to_string(),
        );
    }
    Verdict::Accept
}

/// Reject if `LIBFFI=y` combined with `sh2a` or `ARMV7M` architectures.
fn rule_libffi_vs_arch(lines: &ConfigLines, toolchain_url: &str) -> Verdict {
    if !lines.is_enabled("BR2_PACKAGE_LIBFFI") {
        return Verdict::Accept;
    }
    for arch in LIBFFI_INCOMPATIBLE_ARCHES {
        if toolchain_url.contains(arch) {
            return Verdict::Reject(format!("BR2_PACKAGE_LIBFFI=y is broken on {arch}"));
        }
    }
    Verdict::Accept
}

/// If `SUNXI_BOARDS=y`, substitute a concrete default FEX-file path.
fn rule_sunxi_fex_default(lines: &mut ConfigLines) {
    const FEX_KEY_PREFIX: &str = "BR2_PACKAGE_SUNXI_BOARDS_FEX_FILE=";
    const DEFAULT_FEX: &str =
        "BR2_PACKAGE_SUNXI_BOARDS_FEX_FILE=\"a10/sun4i-generic-pc.fex\"";

    if !lines.is_enabled("BR2_PACKAGE_SUNXI_BOARDS") {
        return;
    }
    if let Some(idx) = lines.rposition_prefix(FEX_KEY_PREFIX) {
        let needs_default = lines
            .as_slice()
            .get(idx)
            .is_some_and(|line| line == &format!("{FEX_KEY_PREFIX}\"\""));
        if needs_default {
            lines.set_at(idx, DEFAULT_FEX);
        }
    } else {
        lines.append(DEFAULT_FEX);
    }
}

/// Test/production host-tool availability backed by [`crate::system_info::SystemInfo`].
pub struct SystemInfoHostTools<'a> {
    /// The underlying capability probe.
    pub info: &'a crate::system_info::SystemInfo,
    /// The executor used to run probe commands.
    pub executor: &'a dyn crate::exec::Executor,
}

impl HostTools for SystemInfoHostTools<'_> {
    fn has(&self, name: &str) -> bool {
        self.info.has(self.executor, name).is_some()
    }
}
