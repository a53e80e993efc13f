use colored::*;
use tracing::{Instrument, info_span};
use zonewall_remote::probe::{self, ProbeStatus};

use crate::terminal::{colors, print, spinner};

pub fn status_cell(status: ProbeStatus) -> ColoredString {
    let color = match status {
        ProbeStatus::Open => colors::GOOD,
        ProbeStatus::Closed => colors::BAD,
        ProbeStatus::Filtered => colors::WARN,
    };
    status.as_str().color(color)
}

pub async fn probe(host: &str, ports: &[u16]) -> anyhow::Result<()> {
    let span = info_span!("probe", indicatif.pb_show = tracing::field::Empty);
    spinner::start(&span, &format!("probing {} ports on {host}", ports.len()));
    let results = probe::probe_ports(host, ports).instrument(span.clone()).await;
    drop(span);

    let rows: Vec<Vec<ColoredString>> = results
        .into_iter()
        .map(|(port, status)| vec![port.to_string().normal(), status_cell(status)])
        .collect();
    print::table(&["PORT", "STATUS"], &rows);
    Ok(())
}
