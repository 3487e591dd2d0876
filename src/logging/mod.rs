//! Logging infrastructure for structured console and per-instance file output.

mod subscriber;
mod utils;

pub use subscriber::{init_instance_subscriber, init_supervisor_subscriber};

/// Tracing target for the prepare stage (§4.7, §7.2).
pub const TARGET_PREPARE: &str = "autobuild::prepare";
/// Tracing target for the configure (sampling) stage.
pub const TARGET_CONFIGURE: &str = "autobuild::configure";
/// Tracing target for the build stage.
pub const TARGET_BUILD: &str = "autobuild::build";
/// Tracing target for the packaging stage.
pub const TARGET_PACKAGE: &str = "autobuild::package";
/// Tracing target for the submit stage.
pub const TARGET_SUBMIT: &str = "autobuild::submit";
/// Tracing target for supervisor-level events (startup, shutdown, spawn).
pub const TARGET_SUPERVISOR: &str = "autobuild::supervisor";
