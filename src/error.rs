//! Domain-specific error types for the autobuild daemon.
//!
//! This module provides a structured error hierarchy using [`thiserror`].
//! Internal modules return typed errors (e.g., [`ConfigError`], [`SamplerError`])
//! while the worker main loop and the supervisor convert them to
//! [`anyhow::Error`] via the standard `?` operator at the point where a
//! human-facing message is produced.
//!
//! # Error hierarchy
//!
//! ```text
//! AutobuilderError
//! ├── Config(ConfigError)       — CLI/INI layering
//! ├── Catalog(CatalogError)     — toolchain catalogue fetch/parse
//! ├── Sampler(SamplerError)     — randomisation loop, fixup filter
//! ├── Build(BuildError)         — subprocess/timeout failures
//! ├── Packaging(PackagingError) — archive/log-forensics failures
//! └── Submit(SubmitError)       — upload failures
//! ```

use thiserror::Error;

/// Top-level error type for the autobuild daemon.
///
/// Aggregates domain-specific sub-errors and is convertible to
/// [`anyhow::Error`] for use at the worker-loop and supervisor boundaries.
#[derive(Error, Debug)]
pub enum AutobuilderError {
    /// Configuration-related error (CLI parsing, INI layering).
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Toolchain catalogue fetch/parse error.
    #[error("toolchain catalogue error: {0}")]
    Catalog(#[from] CatalogError),

    /// Configuration-sampling error (randomisation loop, fixup filter).
    #[error("config sampling error: {0}")]
    Sampler(#[from] SamplerError),

    /// Build execution error (subprocess spawn/timeout failures).
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Result-packaging error (archive/log-forensics failures).
    #[error("packaging error: {0}")]
    Packaging(#[from] PackagingError),

    /// Result-submission error (upload failures).
    #[error("submit error: {0}")]
    Submit(#[from] SubmitError),

    /// Remote protocol-version check failed (fetch error, unparsable
    /// response, or the remote version exceeds the embedded one).
    #[error("version check failed: {0}")]
    VersionCheck(String),
}

/// Errors that arise from CLI/INI configuration layering.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The INI config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Path of the config file that could not be read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The INI config file contains a syntax error that prevents parsing.
    #[error("invalid INI syntax in {file} at line {line}: {message}")]
    InvalidSyntax {
        /// Path of the offending file.
        file: String,
        /// 1-based line number of the offending line.
        line: usize,
        /// Human-readable description of the problem.
        message: String,
    },

    /// A numeric flag value could not be parsed.
    #[error("invalid value for --{flag}: {value}")]
    InvalidValue {
        /// Name of the flag (without leading dashes).
        flag: String,
        /// The offending raw value.
        value: String,
    },
}

/// Errors that arise while fetching or parsing the toolchain catalogue.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalogue CSV itself could not be fetched.
    #[error("failed to fetch toolchain catalogue from {uri}: {message}")]
    FetchCatalog {
        /// Catalogue URI.
        uri: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The catalogue CSV could not be parsed.
    #[error("failed to parse toolchain catalogue: {0}")]
    ParseCatalog(String),

    /// A single toolchain's defconfig body could not be fetched.
    #[error("failed to fetch toolchain defconfig from {url}: {message}")]
    FetchDefconfig {
        /// Defconfig URL.
        url: String,
        /// Human-readable failure description.
        message: String,
    },

    /// The catalogue, after host-architecture filtering, is empty.
    #[error("no toolchain in the catalogue is compatible with host architecture {0}")]
    NoCompatibleToolchain(String),
}

/// Errors that arise from configuration sampling (the randomisation loop
/// and the fixup filter).
#[derive(Error, Debug)]
pub enum SamplerError {
    /// The `oldconfig` pass failed.
    #[error("oldconfig failed: {0}")]
    OldConfig(String),

    /// The chosen toolchain was rejected by `is_toolchain_usable`.
    #[error("toolchain is not usable on this host: {0}")]
    ToolchainUnusable(String),

    /// The `randpackageconfig` pass failed.
    #[error("randpackageconfig failed: {0}")]
    RandPackageConfig(String),

    /// The randomisation loop exceeded its iteration bound without the
    /// fixup filter accepting a configuration.
    #[error("cannot generate random configuration after {0} iterations")]
    BoundExceeded(u32),

    /// The `savedefconfig` pass failed.
    #[error("savedefconfig failed: {0}")]
    SaveDefConfig(String),

    /// An I/O error occurred while reading or writing `.config`.
    #[error("I/O error manipulating .config: {0}")]
    Io(#[from] std::io::Error),

    /// The toolchain catalogue had no rows to draw from.
    #[error("toolchain catalogue is empty")]
    EmptyCatalog,
}

/// Errors that arise while running the build itself.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The build subprocess could not be spawned at all.
    #[error("failed to spawn build command {command}: {source}")]
    Spawn {
        /// The command line that could not be spawned.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The per-build log file could not be created.
    #[error("failed to create build log at {path}: {source}")]
    LogCreate {
        /// Path of the log file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Waiting on the build subprocess failed.
    #[error("failed to wait on build process: {0}")]
    Wait(std::io::Error),
}

/// Errors that arise while packaging build results into a tarball.
#[derive(Error, Debug)]
pub enum PackagingError {
    /// An I/O error occurred assembling the `results/` directory.
    #[error("I/O error assembling results: {0}")]
    Io(#[from] std::io::Error),

    /// Memory-mapping the build log for end-log extraction failed.
    #[error("failed to memory-map build log {path}: {source}")]
    MapLog {
        /// Path of the log file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Creating the compressed tarball failed.
    #[error("failed to create results archive: {0}")]
    Archive(String),
}

/// Errors that arise while submitting a packaged result.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The HTTP upload request itself failed (connection, TLS, ...).
    #[error("upload request failed: {0}")]
    Request(String),

    /// The coordinator responded with a non-success status code.
    #[error("upload rejected by coordinator: HTTP {0}")]
    Rejected(u16),

    /// The tarball could not be renamed into its content-addressed local name.
    #[error("failed to store tarball locally at {path}: {source}")]
    LocalStore {
        /// Destination path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
