#![deny(clippy::or_fun_call)]
#![deny(clippy::bool_to_int_with_if)]

pub mod build_runner;
pub mod cli;
pub mod config;
pub mod config_lines;
pub mod error;
pub mod exec;
pub mod fixup;
pub mod hostarch;
pub mod instance;
pub mod logging;
pub mod packager;
pub mod sampler;
pub mod shared_pids;
pub mod submitter;
pub mod supervisor;
pub mod system_info;
pub mod toolchain;
