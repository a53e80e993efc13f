use colored::*;
use tracing::{Instrument, info_span};
use zonewall_remote::fingerprint;

use crate::terminal::{colors, print, spinner};

/// Fingerprints every host concurrently. Failures become the row's content
/// so one unreachable host never hides the others.
pub async fn fingerprint(hosts: &[String]) -> anyhow::Result<()> {
    let span = info_span!("fingerprint", indicatif.pb_show = tracing::field::Empty);
    spinner::start(&span, &format!("scanning host keys of {} hosts", hosts.len()));
    let results = fingerprint::probe_host_fingerprints(hosts)
        .instrument(span.clone())
        .await;
    drop(span);

    let rows: Vec<Vec<ColoredString>> = results
        .into_iter()
        .map(|(host, result)| {
            let cell = match result {
                Ok(fp) => fp.normal(),
                Err(err) => format!("error: {err}").color(colors::BAD),
            };
            vec![host.normal(), cell]
        })
        .collect();
    print::table(&["HOST", "FINGERPRINT"], &rows);
    Ok(())
}
