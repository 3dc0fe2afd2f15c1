//! Logging setup shared by the library crates and the `lens-correct` binary.
//!
//! Two back ends:
//! - [`init_with_level`]: a stderr `log` sink printing
//!   `   0.412s WARN  lenscorrect_align: message`.
//! - [`init_tracing`] (feature `tracing`): a `tracing-subscriber` pipeline,
//!   filtered by `RUST_LOG` or the verbosity-derived default.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

/// Output layout for [`init_tracing`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Plain,
    /// One JSON object per event, span fields flattened.
    Json,
}

struct StderrSink {
    level: LevelFilter,
    started: Instant,
}

impl StderrSink {
    /// `lenscorrect_mesh::warp` is reported as `lenscorrect_mesh`.
    fn origin<'a>(record: &'a Record) -> &'a str {
        let target = record.target();
        target.split_once("::").map_or(target, |(head, _)| head)
    }
}

impl Log for StderrSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{:>8.3}s {:<5} {}: {}\n",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            Self::origin(record),
            record.args()
        );
        // single write per record
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static SINK: OnceLock<StderrSink> = OnceLock::new();

/// Install the stderr sink at `level`. Only the first call takes effect.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut fresh = false;
    let sink = SINK.get_or_init(|| {
        fresh = true;
        StderrSink {
            level,
            started: Instant::now(),
        }
    });
    if fresh {
        log::set_logger(sink)?;
        log::set_max_level(sink.level);
    }
    Ok(())
}

/// `-q` wins over `-v`; otherwise each `-v` lowers the threshold one step
/// from `Info`.
pub fn level_from_verbosity(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

pub fn init_with_verbosity(verbose: u8, quiet: bool) -> Result<(), log::SetLoggerError> {
    init_with_level(level_from_verbosity(verbose, quiet))
}

/// `RUST_LOG` if set and valid, else `default` for every target.
#[cfg(feature = "tracing")]
pub fn tracing_filter(default: LevelFilter) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default.as_str().to_ascii_lowercase()))
}

/// Install a global `tracing` subscriber writing to stderr. Span close
/// events carry their timings. Later calls are no-ops.
#[cfg(feature = "tracing")]
pub fn init_tracing(default: LevelFilter, format: LogFormat) {
    let builder = fmt()
        .with_env_filter(tracing_filter(default))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().flatten_event(true).finish().try_init(),
        LogFormat::Plain => builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_from_verbosity(0, false), LevelFilter::Info);
        assert_eq!(level_from_verbosity(1, false), LevelFilter::Debug);
        assert_eq!(level_from_verbosity(5, false), LevelFilter::Trace);
        assert_eq!(level_from_verbosity(3, true), LevelFilter::Warn);
    }

    #[test]
    fn origin_is_the_crate_name() {
        assert_eq!(
            StderrSink::origin(
                &Record::builder()
                    .args(format_args!("x"))
                    .target("lenscorrect_mesh::warp")
                    .build()
            ),
            "lenscorrect_mesh"
        );
        assert_eq!(
            StderrSink::origin(
                &Record::builder()
                    .args(format_args!("x"))
                    .target("lens_correct")
                    .build()
            ),
            "lens_correct"
        );
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_with_level(LevelFilter::Warn).unwrap();
        init_with_level(LevelFilter::Trace).unwrap();
        log::warn!("logger test line");
    }
}
