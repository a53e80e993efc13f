use anyhow::{Context, bail};
use colored::*;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use tracing::{Instrument, info_span};
use zonewall_common::config::RetryConfig;
use zonewall_common::zone::{DnsProvider, RouterConfig, ZoneConfig};
use zonewall_core::zone::{SshConnector, TcpProber, WanStatus, ZonePipeline, ZoneReport};

use crate::commands::ZoneUpArgs;
use crate::commands::probe::status_cell;
use crate::terminal::{colors, print, spinner};
use crate::zprint;

/// Prefix of environment variables overriding zone file values, e.g.
/// `ZONEWALL_ZONE_ROUTER__ASN=65001`.
pub const ENV_PREFIX: &str = "ZONEWALL_ZONE_";

fn flag_overrides(args: &ZoneUpArgs) -> ZoneConfig {
    ZoneConfig {
        name: args.name.clone(),
        domain: args.domain.clone(),
        router: RouterConfig {
            hostname: args.hostname.clone(),
            id: args.router_id.clone(),
            asn: args.asn,
            gateway_subnet: args.gateway_subnet.clone(),
        },
    }
}

/// Zone file, then environment, then flags. Later layers win per field.
fn layered(base: Figment, args: &ZoneUpArgs) -> Figment {
    base.merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(flag_overrides(args)))
}

pub fn load_config(args: &ZoneUpArgs) -> anyhow::Result<ZoneConfig> {
    let mut base = Figment::new();
    if let Some(path) = &args.config {
        if !path.is_file() {
            bail!("zone file {} does not exist", path.display());
        }
        base = base.merge(Toml::file(path));
    }
    layered(base, args)
        .extract()
        .context("failed to read zone configuration")
}

/// Reads the DNS provider from the environment, seeded from `.env` if present.
pub fn load_dns_provider() -> anyhow::Result<DnsProvider> {
    match dotenvy::dotenv() {
        Err(err) if !err.not_found() => return Err(err).context("failed to read .env"),
        _ => {}
    }
    DnsProvider::from_lookup(|key| std::env::var(key).ok()).context("DNS provider is not configured")
}

fn print_report(report: &ZoneReport) {
    print::header("zone ready");
    let changed = |c: bool| if c { "updated".color(colors::WARN) } else { "unchanged".color(colors::GOOD) };
    let wan = match &report.wan {
        WanStatus::Named => "named".color(colors::GOOD),
        WanStatus::PendingReboot { interface } => format!("{interface} renamed on next boot").color(colors::WARN),
    };

    print::set_key_width(["zone", "domain", "router id", "asn", "hostname", "loopback", "dhcp", "wan", "fingerprint"]);
    print::aligned_line("zone", report.zone.name.as_str());
    print::aligned_line("domain", report.zone.domain.as_str());
    print::aligned_line("router id", report.zone.router.id.to_string());
    print::aligned_line("asn", report.zone.router.asn.to_string());
    print::aligned_line("hostname", changed(report.hostname_changed));
    print::aligned_line("loopback", changed(report.loopback_changed));
    print::aligned_line("dhcp", changed(report.dhcp_changed));
    print::aligned_line("wan", wan);
    print::aligned_line("fingerprint", report.fingerprint.as_str());

    zprint!();
    let rows: Vec<Vec<ColoredString>> = report
        .ports
        .iter()
        .map(|(port, status)| vec![port.to_string().normal(), status_cell(*status)])
        .collect();
    print::table(&["PORT", "STATUS"], &rows);
}

pub async fn up(args: ZoneUpArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let dns = load_dns_provider()?;

    let connector = SshConnector {
        user: args.user.clone(),
        identity_file: args.identity.clone(),
    };
    let span = info_span!("zone", host = %args.host, indicatif.pb_show = tracing::field::Empty);
    let pipeline = ZonePipeline::new(TcpProber, connector, span.clone());
    let retry = RetryConfig::with_max_attempts(args.retries.max(1));

    spinner::start(&span, &format!("bootstrapping {}", args.host));
    let report = pipeline
        .up_with_retries(&args.host, &config, &dns, &retry)
        .instrument(span.clone())
        .await;
    drop(span);

    let report = report.with_context(|| format!("zone bootstrap of {} failed", args.host))?;
    print_report(&report);
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
