//! Tracing subscriber setup: console formatter, per-instance file layer,
//! and initialisation (§7.2).
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use super::utils::{format_utc_datetime, format_utc_datetime_us, strip_ansi};

/// Extracts the `message` field from a [`tracing::Event`].
#[derive(Default)]
struct MessageExtractor {
    message: String,
}

impl tracing::field::Visit for MessageExtractor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

/// A [`tracing_subscriber::Layer`] that appends all events to an
/// instance's `instance.log`, with timestamps and ANSI codes stripped.
///
/// Always captures events at `DEBUG` level and above regardless of the
/// console verbosity setting (§6).
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Open (or create and append to) the log file at `path`, write a run
    /// header, and return a new `FileLayer` ready to receive events.
    ///
    /// Returns `None` if the file cannot be opened.
    pub(super) fn new(path: &Path) -> Option<Self> {
        let version = option_env!("AUTOBUILD_VERSION").unwrap_or(concat!("dev-", env!("CARGO_PKG_VERSION")));
        let header = format!(
            "==========================================\n\
             autobuild {version} {}\n\
             ==========================================\n",
            format_utc_datetime(),
        );
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()?;
        file.write_all(header.as_bytes()).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        let level = *metadata.level();
        let target = metadata.target();

        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        let msg = strip_ansi(&extractor.message);
        let ts = format_utc_datetime_us();

        let stage = target.strip_prefix("autobuild::").unwrap_or(target);
        let line = match level {
            tracing::Level::ERROR => format!("[{ts}] [{stage}] [error] {msg}"),
            tracing::Level::WARN => format!("[{ts}] [{stage}] [warn] {msg}"),
            tracing::Level::INFO => format!("[{ts}] [{stage}] {msg}"),
            tracing::Level::DEBUG => format!("[{ts}] [{stage}] [debug] {msg}"),
            tracing::Level::TRACE => format!("[{ts}] [{stage}] [trace] {msg}"),
        };

        if let Ok(mut f) = self.file.lock() {
            writeln!(f, "{line}").ok();
        }
    }
}

/// A [`tracing_subscriber::fmt::FormatEvent`] that emits console output in
/// the style of the rest of the daemon's own logging.
struct AutobuildFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for AutobuildFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let level = *metadata.level();
        let target = metadata.target();
        let stage = target.strip_prefix("autobuild::").unwrap_or(target);

        let mut extractor = MessageExtractor::default();
        event.record(&mut extractor);
        let msg = &extractor.message;

        match level {
            tracing::Level::ERROR => writeln!(writer, "\x1b[31mERROR\x1b[0m [{stage}] {msg}"),
            tracing::Level::WARN => writeln!(writer, "\x1b[33mWARN\x1b[0m  [{stage}] {msg}"),
            tracing::Level::INFO => writeln!(writer, "\x1b[1;34m==>\x1b[0m [{stage}] {msg}"),
            _ => writeln!(writer, "  \x1b[2m[{stage}] {msg}\x1b[0m"),
        }
    }
}

fn console_layer<S>(
    verbose: bool,
) -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{Layer as _, filter::LevelFilter, fmt};

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let make_writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .and(std::io::stdout.with_min_level(tracing::Level::INFO));

    fmt::layer()
        .event_format(AutobuildFormatter)
        .with_writer(make_writer)
        .with_filter(console_level)
}

/// Initialise the global [`tracing`] subscriber for a worker instance: a
/// console layer gated by `verbose`, composed with a file layer that
/// always captures debug detail and appends to `log_path` (§7.2).
///
/// Must be called once at worker startup, before any logging.
pub fn init_instance_subscriber(verbose: bool, log_path: &Path) {
    use tracing_subscriber::{Layer as _, filter::LevelFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

    let file_layer = FileLayer::new(log_path).map(|l| l.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry()
        .with(console_layer(verbose))
        .with(file_layer)
        .init();
}

/// Initialise the global [`tracing`] subscriber for the supervisor
/// process: console-only, since the supervisor owns no single instance
/// directory to log into (§6 filesystem layout).
///
/// Must be called once at supervisor startup, before any logging.
pub fn init_supervisor_subscriber(verbose: bool) {
    use tracing_subscriber::util::SubscriberInitExt as _;

    tracing_subscriber::registry()
        .with(console_layer(verbose))
        .init();
}
