use std::fmt;

use colored::*;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::filter::IndicatifFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::format::{self, Writer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, fmt as tracing_fmt};
use zonewall_common::config::LogConfig;

use crate::terminal::print::PRINT_TARGET;
use crate::terminal::spinner;

/// Human readable formatter: one status symbol per level, then the fields.
/// Records aimed at [`PRINT_TARGET`] are written verbatim.
pub struct ZonewallFormatter;

#[derive(Default)]
struct RawMessage(Option<String>);

impl Visit for RawMessage {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "raw_msg" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "raw_msg" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S, N> FormatEvent<S, N> for ZonewallFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> format::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        if meta.target() == PRINT_TARGET {
            let mut raw = RawMessage::default();
            event.record(&mut raw);
            return writeln!(writer, "{}", raw.0.unwrap_or_default());
        }

        let (symbol, color_func): (&str, fn(ColoredString) -> ColoredString) = match *meta.level() {
            Level::TRACE => ("[ ]", |s| s.dimmed()),
            Level::DEBUG => ("[?]", |s| s.blue()),
            Level::INFO => ("[+]", |s| s.green().bold()),
            Level::WARN => ("[*]", |s| s.yellow().bold()),
            Level::ERROR => ("[-]", |s| s.red().bold()),
        };

        write!(writer, "{} ", color_func(symbol.into()))?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());
    EnvFilter::new(format!("{directives},{PRINT_TARGET}=info"))
}

/// Installs the global subscriber. `RUST_LOG` wins over `--log-level`.
pub fn init_logging(config: &LogConfig) {
    let filter = env_filter(config);

    if config.json {
        colored::control::set_override(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_fmt::layer().json().with_writer(std::io::stdout))
            .init();
        return;
    }

    let indicatif_layer = IndicatifLayer::new().with_progress_style(spinner::style());
    let writer = indicatif_layer.get_stderr_writer();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().event_format(ZonewallFormatter).with_writer(writer))
        .with(indicatif_layer.with_filter(IndicatifFilter::new(false)))
        .init();
}
