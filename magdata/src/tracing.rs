//! Logging setup.
//!
//! The binary calls [`init_journald_or_stdout`] once at startup. Library code
//! only emits events, through `use crate::tracing::prelude::*`.
//!
//! Frame-level traffic is logged at TRACE, so `RUST_LOG=magdata=trace` shows
//! every byte exchanged with the adapter.

use std::env;
use std::fmt;

use time::OffsetDateTime;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

const CRATE_PREFIX: &str = "magdata::";

/// Install the global subscriber.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald; otherwise
/// they are formatted to stdout.
pub fn init_journald_or_stdout() {
    if env::var_os("JOURNAL_STREAM").is_none() {
        init_stdout();
        return;
    }

    match tracing_journald::layer() {
        Ok(layer) => tracing_subscriber::registry()
            .with(env_filter())
            .with(layer)
            .init(),
        Err(e) => {
            init_stdout();
            error!(error = %e, "Journald unavailable, logging to stdout");
        }
    }
}

// RUST_LOG controls filtering; with nothing set, INFO and above.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

fn init_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().event_format(CompactFormatter))
        .init();
}

/// One line per event: time, level, short target, message, then `key=value`
/// fields in gray.
struct CompactFormatter;

#[derive(Default)]
struct Fields {
    message: Option<String>,
    pairs: Vec<(&'static str, String)>,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.pairs.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.pairs.push((field.name(), format!("{value:?}")));
        }
    }
}

fn level_style(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::ERROR => ("\x1b[31m", "ERROR"),
        Level::WARN => ("\x1b[33m", "WARN "),
        Level::INFO => ("\x1b[32m", "INFO "),
        Level::DEBUG => ("\x1b[34m", "DEBUG"),
        Level::TRACE => ("\x1b[35m", "TRACE"),
    }
}

fn short_target(target: &str) -> &str {
    target.strip_prefix(CRATE_PREFIX).unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for CompactFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = Fields::default();
        event.record(&mut fields);

        LocalTimer.format_time(&mut writer)?;
        let (color, label) = level_style(*event.metadata().level());
        write!(
            writer,
            " {color}{label}\x1b[0m {}: {}",
            short_target(event.metadata().target()),
            fields.message.as_deref().unwrap_or_default()
        )?;

        if !fields.pairs.is_empty() {
            write!(writer, " \x1b[90m")?;
            for (i, (key, value)) in fields.pairs.iter().enumerate() {
                if i > 0 {
                    write!(writer, " ")?;
                }
                write!(writer, "{key}={value}")?;
            }
            write!(writer, "\x1b[0m")?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time with millisecond precision.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second].[subsecond digits:3]"
            ))
            .map_err(|_| fmt::Error)?;
        w.write_str(&formatted)
    }
}
