mod commands;
mod terminal;

use std::process::ExitCode;

use commands::{CommandLine, Commands, SshCommands, ZoneCommands, controller, fingerprint, probe, zone};
use terminal::{logging, print};
use zonewall_common::config::LogConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let commands = CommandLine::parse_args();

    let log = LogConfig {
        level: commands.log_level.clone(),
        json: commands.log_json,
    };
    logging::init_logging(&log);
    if !log.json {
        print::banner();
    }

    let result = match commands.command {
        Commands::Probe { host, ports } => {
            print::header("probing ports");
            probe::probe(&host, &ports).await
        }
        Commands::Ssh {
            command: SshCommands::Fingerprint { hosts },
        } => {
            print::header("host key fingerprints");
            fingerprint::fingerprint(&hosts).await
        }
        Commands::Zone {
            command: ZoneCommands::Up(args),
        } => {
            print::header("bootstrapping zone");
            zone::up(args).await
        }
        Commands::Controller(args) => {
            print::header("starting controller");
            controller::run(args).await
        }
    };

    let code = match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    };
    print::end_of_program();
    code
}
