//! Toolchain catalogue: a remote CSV of candidate toolchains, filtered for
//! host-architecture compatibility, with each row's defconfig fetched and
//! retained.

use crate::config_lines::ConfigLines;
use crate::error::CatalogError;
use crate::hostarch;

/// Immutable record describing one toolchain row from the catalogue.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// URL the defconfig fragment was fetched from.
    pub url: String,
    /// Declared host-architecture compatibility (`any`, `x86`, `x86_64`, ...).
    pub hostarch: String,
    /// Declared C library (`glibc`, `uclibc`, `musl`, ...).
    pub libc: String,
    /// The raw defconfig fragment, fetched fresh per load (not cached).
    pub contents: ConfigLines,
}

impl ToolchainConfig {
    /// `true` iff this toolchain's C library is something other than glibc.
    #[must_use]
    pub fn is_non_glibc(&self) -> bool {
        self.libc != "glibc"
    }

    /// `true` iff this toolchain belongs to the "Linaro ARM/AARCH64/ARMEB"
    /// family, identified by the characteristic substring in its URL.
    #[must_use]
    pub fn is_linaro_arm_family(&self) -> bool {
        let u = self.url.to_ascii_lowercase();
        u.contains("linaro")
            && (u.contains("arm") || u.contains("aarch64") || u.contains("armeb"))
    }
}

/// Fetches raw text over HTTP(S). Implemented for real use by
/// [`HttpFetcher`]; tests inject a fake that returns canned bodies.
pub trait Fetcher: std::fmt::Debug + Sync {
    /// Fetch the body of `url` as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is not valid UTF-8.
    fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

/// The real fetcher, backed by [`ureq`].
#[derive(Debug, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let body = ureq::get(url)
            .call()
            .map_err(|e| anyhow::anyhow!("GET {url} failed: {e}"))?
            .body_mut()
            .read_to_string()
            .map_err(|e| anyhow::anyhow!("reading response body from {url}: {e}"))?;
        Ok(body)
    }
}

/// A catalogue of toolchains compatible with the current host, each with
/// its defconfig fragment already fetched.
#[derive(Debug, Default)]
pub struct ToolchainCatalog {
    /// The filtered, loaded toolchain rows.
    pub toolchains: Vec<ToolchainConfig>,
}

impl ToolchainCatalog {
    /// Download the catalogue CSV at `uri`, filter it for host-architecture
    /// compatibility, and fetch each kept row's defconfig body.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::FetchCatalog`] if the CSV cannot be fetched,
    /// [`CatalogError::ParseCatalog`] if it cannot be parsed, or
    /// [`CatalogError::FetchDefconfig`] if any kept row's defconfig fetch
    /// fails (the whole load is aborted on the first such failure).
    pub fn load(fetcher: &dyn Fetcher, uri: &str, host: &str) -> Result<Self, CatalogError> {
        let csv_text = fetcher.fetch(uri).map_err(|e| CatalogError::FetchCatalog {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;
        Self::load_from_csv(fetcher, &csv_text, host)
    }

    /// As [`Self::load`], but takes the CSV text directly (used by tests
    /// and by `load` itself).
    ///
    /// # Errors
    ///
    /// See [`Self::load`].
    pub fn load_from_csv(
        fetcher: &dyn Fetcher,
        csv_text: &str,
        host: &str,
    ) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(csv_text.as_bytes());

        let mut toolchains = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CatalogError::ParseCatalog(e.to_string()))?;
            if record.len() < 3 {
                return Err(CatalogError::ParseCatalog(format!(
                    "expected 3 columns, got {}: {record:?}",
                    record.len()
                )));
            }
            let url = record.get(0).unwrap_or_default().trim().to_string();
            let row_hostarch = record.get(1).unwrap_or_default().trim().to_string();
            let libc = record.get(2).unwrap_or_default().trim().to_string();

            if !hostarch::is_compatible(&row_hostarch, host) {
                continue;
            }

            let body =
                fetcher
                    .fetch(&url)
                    .map_err(|e| CatalogError::FetchDefconfig {
                        url: url.clone(),
                        message: e.to_string(),
                    })?;

            toolchains.push(ToolchainConfig {
                url,
                hostarch: row_hostarch,
                libc,
                contents: ConfigLines::parse(&body),
            });
        }

        if toolchains.is_empty() {
            return Err(CatalogError::NoCompatibleToolchain(host.to_string()));
        }

        Ok(Self { toolchains })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeFetcher {
        bodies: Mutex<HashMap<String, String>>,
    }

    impl FakeFetcher {
        fn with(pairs: &[(&str, &str)]) -> Self {
            let mut bodies = HashMap::new();
            for (k, v) in pairs {
                bodies.insert((*k).to_string(), (*v).to_string());
            }
            Self {
                bodies: Mutex::new(bodies),
            }
        }
    }

    impl Fetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> anyhow::Result<String> {
            self.bodies
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no fake body for {url}"))
        }
    }

    #[test]
    fn filters_by_host_architecture() {
        let csv = "http://a,any,glibc\nhttp://b,aarch64,glibc\nhttp://c,x86,glibc\n";
        let fetcher = FakeFetcher::with(&[
            ("http://a", "A=y\n"),
            ("http://b", "B=y\n"),
            ("http://c", "C=y\n"),
        ]);
        let catalog = ToolchainCatalog::load_from_csv(&fetcher, csv, "x86_64").unwrap();
        let urls: Vec<&str> = catalog.toolchains.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a", "http://c"]);
    }

    #[test]
    fn fetches_defconfig_body_per_row() {
        let csv = "http://a,any,glibc\n";
        let fetcher = FakeFetcher::with(&[("http://a", "BR2_X=y\n")]);
        let catalog = ToolchainCatalog::load_from_csv(&fetcher, csv, "x86_64").unwrap();
        assert_eq!(catalog.toolchains[0].contents.as_slice(), &["BR2_X=y"]);
    }

    #[test]
    fn aborts_on_missing_defconfig() {
        let csv = "http://missing,any,glibc\n";
        let fetcher = FakeFetcher::with(&[]);
        let result = ToolchainCatalog::load_from_csv(&fetcher, csv, "x86_64");
        assert!(matches!(result, Err(CatalogError::FetchDefconfig { .. })));
    }

    #[test]
    fn empty_after_filtering_is_an_error() {
        let csv = "http://a,aarch64,glibc\n";
        let fetcher = FakeFetcher::with(&[("http://a", "A=y\n")]);
        let result = ToolchainCatalog::load_from_csv(&fetcher, csv, "x86_64");
        assert!(matches!(
            result,
            Err(CatalogError::NoCompatibleToolchain(_))
        ));
    }

    #[test]
    fn is_non_glibc() {
        let tc = ToolchainConfig {
            url: "u".into(),
            hostarch: "any".into(),
            libc: "uclibc".into(),
            contents: ConfigLines::new(),
        };
        assert!(tc.is_non_glibc());
    }

    #[test]
    fn is_linaro_arm_family_detection() {
        let tc = ToolchainConfig {
            url: "http://example.org/linaro-aarch64-2016.02.tar.xz".into(),
            hostarch: "x86_64".into(),
            libc: "glibc".into(),
            contents: ConfigLines::new(),
        };
        assert!(tc.is_linaro_arm_family());

        let tc2 = ToolchainConfig {
            url: "http://example.org/ctng-mipsel.tar.xz".into(),
            hostarch: "x86_64".into(),
            libc: "uclibc".into(),
            contents: ConfigLines::new(),
        };
        assert!(!tc2.is_linaro_arm_family());
    }
}
