use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Poll the BMS continuously and publish the readings to MQTT
    Daemon,
    /// Show the BMS software version
    Version,
    /// Show the BMS and pack serial numbers
    Serial,
    /// Show cell voltages, temperatures, current, voltage and capacities per pack
    Analog {
        /// Pack address, 255 queries all packs
        #[arg(long, short, default_value_t = 255)]
        address: u8,
    },
    /// Show remaining, full and design capacity of the whole battery
    Capacity,
    /// Show warnings, protections and system state per pack
    Warnings,
    /// Show all available BMS information by running every read command
    All,
}

const fn about_text() -> &'static str {
    "pace bms command line tool and MQTT bridge"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Configuration file (JSON or YAML), defaults to /data/options.json or config.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommands>,

    /// Timeout for serial and socket I/O (e.g., "500ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long)]
    pub timeout: Option<Duration>,

    /// Delay between sending a request and reading the reply (e.g., "100ms", "250ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "250ms")]
    pub delay: Duration,

    /// Number of reads per request while no valid frame arrives
    #[arg(long, default_value = "3")]
    pub retries: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_daemon() {
        let args = CliArgs::try_parse_from(["pacebms"]).unwrap();
        assert_eq!(args.command, None);
        assert_eq!(args.delay, Duration::from_millis(250));
        assert_eq!(args.retries, 3);
        assert_eq!(args.timeout, None);
    }

    #[test]
    fn analog_address() {
        let args = CliArgs::try_parse_from([
            "pacebms",
            "--config",
            "bms.yaml",
            "--timeout",
            "2s",
            "analog",
            "--address",
            "2",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("bms.yaml")));
        assert_eq!(args.timeout, Some(Duration::from_secs(2)));
        assert_eq!(args.command, Some(CliCommands::Analog { address: 2 }));
    }

    #[test]
    fn analog_defaults_to_all_packs() {
        let args = CliArgs::try_parse_from(["pacebms", "analog"]).unwrap();
        assert_eq!(args.command, Some(CliCommands::Analog { address: 255 }));
    }
}
