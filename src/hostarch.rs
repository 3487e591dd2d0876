//! Host-architecture detection and the toolchain-catalogue admission rule.

/// Detect the normalised host architecture identifier used to filter the
/// toolchain catalogue.
///
/// Normalises `i686`/`i386`/`x86` to `x86`; otherwise returns
/// [`std::env::consts::ARCH`] verbatim (e.g. `x86_64`, `aarch64`).
#[must_use]
pub fn detect() -> String {
    normalize(std::env::consts::ARCH)
}

/// Normalise a raw architecture string per the admission rule in §4.2:
/// `i686|i386|x86 -> x86`, everything else unchanged.
#[must_use]
pub fn normalize(raw: &str) -> String {
    match raw {
        "i686" | "i386" | "x86" => "x86".to_string(),
        other => other.to_string(),
    }
}

/// Admission rule for a toolchain catalogue row: keep the row iff
/// `hostarch == "any"`, or `hostarch == host`, or `host == x86_64 && hostarch == x86`.
#[must_use]
pub fn is_compatible(hostarch: &str, host: &str) -> bool {
    hostarch == "any" || hostarch == host || (host == "x86_64" && hostarch == "x86")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_32bit_variants_to_x86() {
        assert_eq!(normalize("i686"), "x86");
        assert_eq!(normalize("i386"), "x86");
        assert_eq!(normalize("x86"), "x86");
    }

    #[test]
    fn leaves_other_arches_unchanged() {
        assert_eq!(normalize("x86_64"), "x86_64");
        assert_eq!(normalize("aarch64"), "aarch64");
        assert_eq!(normalize("mips64el"), "mips64el");
    }

    #[test]
    fn any_is_always_compatible() {
        assert!(is_compatible("any", "x86_64"));
        assert!(is_compatible("any", "mips64el"));
    }

    #[test]
    fn exact_match_is_compatible() {
        assert!(is_compatible("aarch64", "aarch64"));
        assert!(!is_compatible("aarch64", "x86_64"));
    }

    #[test]
    fn x86_64_host_accepts_x86_toolchains() {
        assert!(is_compatible("x86", "x86_64"));
    }

    #[test]
    fn x86_host_does_not_accept_x86_64_toolchains() {
        assert!(!is_compatible("x86_64", "x86"));
    }

    #[test]
    fn unrelated_arches_are_incompatible() {
        assert!(!is_compatible("mips64el", "x86_64"));
    }

    #[test]
    fn detect_returns_normalized_value() {
        let d = detect();
        assert!(!d.is_empty());
        assert_ne!(d, "i686");
        assert_ne!(d, "i386");
    }
}
