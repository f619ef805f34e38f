//! Diagnostic output on standard error.
//!
//! Errors are printed with an `ERROR: ` prefix and warnings with
//! `Warning: `; everything else is printed bare, one event per line.

use std::fmt;
use std::io;

use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Event format carrying only a severity marker and the message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerFormat;

impl<S, N> FormatEvent<S, N> for MarkerFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        if level == Level::ERROR {
            write!(writer, "ERROR: ")?;
        } else if level == Level::WARN {
            write!(writer, "Warning: ")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Maximum level shown for a `-v` count.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Install the global subscriber.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::default().add_directive(level_for(verbosity).into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .event_format(MarkerFormat)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_markers_and_levels() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(level_for(1))
            .event_format(MarkerFormat)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("Cannot read input");
            tracing::warn!("impossible combination of selections");
            tracing::info!("Reading: data.mseed");
            tracing::debug!("not shown");
        });

        let text = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            text,
            "ERROR: Cannot read input\n\
             Warning: impossible combination of selections\n\
             Reading: data.mseed\n"
        );
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::WARN);
        assert_eq!(level_for(2), LevelFilter::DEBUG);
        assert_eq!(level_for(9), LevelFilter::TRACE);
    }
}
