pub mod controller;
pub mod fingerprint;
pub mod probe;
pub mod zone;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "zonewall")]
#[command(about = "Bootstraps zone routers and reconciles firewall intent across a fleet.")]
#[command(version)]
pub struct CommandLine {
    /// Log filter, e.g. `debug` or `zonewall_core=trace`. RUST_LOG wins.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
    /// Emit JSON log lines instead of human readable output
    #[arg(long, global = true)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify TCP ports of a host as open, closed or filtered
    #[command(alias = "p")]
    Probe {
        host: String,
        #[arg(required = true)]
        ports: Vec<u16>,
    },
    /// SSH related helpers
    #[command(alias = "s")]
    Ssh {
        #[command(subcommand)]
        command: SshCommands,
    },
    /// Bootstrap a zone router
    #[command(alias = "z")]
    Zone {
        #[command(subcommand)]
        command: ZoneCommands,
    },
    /// Reconcile hosts and firewalls declared in a manifest
    #[command(alias = "c")]
    Controller(ControllerArgs),
}

#[derive(Subcommand)]
pub enum SshCommands {
    /// Print the SHA256 host key fingerprint of one or more hosts
    #[command(alias = "fp")]
    Fingerprint {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum ZoneCommands {
    /// Run preflight checks and converge the router host
    #[command(alias = "u")]
    Up(ZoneUpArgs),
}

#[derive(Args)]
pub struct ZoneUpArgs {
    /// Address of the router host
    pub host: String,
    #[arg(short = 'n', long)]
    pub name: Option<String>,
    #[arg(short = 'd', long)]
    pub domain: Option<String>,
    /// Hostname the router should carry
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,
    /// Router id, an IPv4 address
    #[arg(short = 'r', long)]
    pub router_id: Option<String>,
    /// Autonomous system number
    #[arg(short = 'a', long)]
    pub asn: Option<u32>,
    /// Subnet whose first address is placed on loopback
    #[arg(short = 'g', long)]
    pub gateway_subnet: Option<String>,
    /// TOML zone file; flags override its values
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Remote user, defaults to the local ssh configuration
    #[arg(short = 'u', long)]
    pub user: Option<String>,
    /// Private key used for the connection
    #[arg(short = 'i', long)]
    pub identity: Option<PathBuf>,
    /// Attempts before giving up on transient failures
    #[arg(long, default_value_t = 3)]
    pub retries: u32,
}

#[derive(Args)]
pub struct ControllerArgs {
    /// YAML file declaring hosts, firewalls and secrets
    #[arg(short = 'm', long)]
    pub manifest: PathBuf,
    /// Workers per resource kind
    #[arg(short = 'w', long, default_value_t = 4)]
    pub workers: usize,
    /// Seconds between manifest re-reads; 0 disables resync
    #[arg(long, default_value_t = 0)]
    pub resync: u64,
    /// Exit once every resource has been reconciled
    #[arg(long)]
    pub once: bool,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_consistent() {
        CommandLine::command().debug_assert();
    }

    #[test]
    fn zone_up_accepts_short_flags() {
        let cli = CommandLine::try_parse_from([
            "zonewall", "z", "u", "192.0.2.1", "-n", "aar1", "-d", "example.net", "-H", "alfa", "-r",
            "172.31.255.0", "-a", "65000", "--retries", "1",
        ])
        .unwrap();
        let Commands::Zone {
            command: ZoneCommands::Up(args),
        } = cli.command
        else {
            panic!("expected zone up");
        };
        assert_eq!(args.host, "192.0.2.1");
        assert_eq!(args.asn, Some(65000));
        assert_eq!(args.hostname.as_deref(), Some("alfa"));
        assert_eq!(args.retries, 1);
        assert!(args.config.is_none());
    }

    #[test]
    fn probe_requires_a_port() {
        assert!(CommandLine::try_parse_from(["zonewall", "probe", "192.0.2.1"]).is_err());
        assert!(CommandLine::try_parse_from(["zonewall", "p", "192.0.2.1", "22", "7443"]).is_ok());
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli =
            CommandLine::try_parse_from(["zonewall", "ssh", "fp", "a.example", "--log-json", "--log-level", "debug"])
                .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.log_level, "debug");
    }
}
