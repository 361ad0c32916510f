// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line formatting for the engine.
//!
//! Lines look like:
//! ```text
//! [2025-03-01T09:30:00.125Z ]DD_ANALYTICS | LEVEL | [span{fields}: ]message fields
//! ```
//! Engine messages carry their own `ANALYTICS |` component prefix, so a queued
//! event reads `DD_ANALYTICS | DEBUG | ANALYTICS | Queued 'open' event at position 0`.
//! The engine usually runs inside a host application whose output nobody else
//! stamps, so the timestamp is on unless [`Config::log_timestamps`] says otherwise.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const PREFIX: &str = "DD_ANALYTICS";

#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter {
    timestamps: bool,
}

impl Formatter {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Formatter {
            timestamps: config.log_timestamps,
        }
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        if self.timestamps {
            write!(
                writer,
                "{} ",
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
            )?;
        }
        write!(writer, "{PREFIX} | {} | ", event.metadata().level())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                match ext.get::<FormattedFields<N>>() {
                    Some(fields) if !fields.is_empty() => write!(writer, "{{{fields}}}: ")?,
                    _ => write!(writer, ": ")?,
                }
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Builds the filter for `log_level`, silencing the HTTP stack's own chatter.
/// `RUST_LOG` wins when set. An unparseable level falls back to `info`.
#[must_use]
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}")))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Returns false when one was already set.
pub fn init(log_level: &str, config: &Config) -> bool {
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter(log_level))
        .event_format(Formatter::new(config))
        .finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{info, info_span, warn};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(formatter: Formatter, f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .event_format(formatter)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_format_plain_event() {
        let output = capture(Formatter::default(), || {
            info!("ANALYTICS | Queued 'open' event at position 0");
        });
        assert_eq!(
            output,
            "DD_ANALYTICS | INFO | ANALYTICS | Queued 'open' event at position 0\n"
        );
    }

    #[test]
    fn test_format_with_span_and_fields() {
        let output = capture(Formatter::default(), || {
            let span = info_span!("submit", batches = 2);
            let _guard = span.enter();
            warn!(batch_id = "b1", "retrying");
        });
        assert_eq!(
            output,
            "DD_ANALYTICS | WARN | submit{batches=2}: retrying batch_id=\"b1\"\n"
        );
    }

    #[test]
    fn test_format_with_timestamp() {
        let formatter = Formatter::new(&Config::default());
        let output = capture(formatter, || warn!("ANALYTICS | Skipping submission"));
        let (stamp, line) = output.split_once(' ').unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        assert!(stamp.ends_with('Z'));
        assert_eq!(line, "DD_ANALYTICS | WARN | ANALYTICS | Skipping submission\n");
    }

    #[test]
    fn test_timestamps_follow_config() {
        let config = Config {
            log_timestamps: false,
            ..Config::default()
        };
        let output = capture(Formatter::new(&config), || info!("ready"));
        assert_eq!(output, "DD_ANALYTICS | INFO | ready\n");
    }

    #[test]
    fn test_env_filter_silences_http_stack() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter("debug").to_string();
        assert!(filter.contains("hyper=off"));
        assert!(filter.contains("debug"));
    }
}
