use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pacebms_lib::client::PaceBms;
use pacebms_lib::protocol::PackAddress;
use pacebms_lib::state::ParseHints;
use pacebms_lib::transport::{SerialTransport, SocketTransport, Transport};
use std::{ops::Deref, panic, time::Duration};

mod commandline;
mod config;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};
use config::{ConnectionType, Options};

fn logging_init(loglevel: LevelFilter) -> Result<LoggerHandle> {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .with_context(|| "Cannot init logging")?
        .start()
        .with_context(|| "Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

fn create_transport(options: &Options, timeout: Option<Duration>) -> Box<dyn Transport> {
    match options.connection_type {
        ConnectionType::Serial => {
            info!("Connecting to BMS on serial port {}", options.bms_serial);
            let mut transport = SerialTransport::new(&options.bms_serial);
            if let Some(timeout) = timeout {
                transport.set_timeout(timeout);
            }
            Box::new(transport)
        }
        ConnectionType::Socket => {
            info!("Connecting to BMS at {}:{}", options.bms_ip, options.bms_port);
            let mut transport = SocketTransport::new(&options.bms_ip, options.bms_port);
            if let Some(timeout) = timeout {
                transport.set_timeout(timeout);
            }
            Box::new(transport)
        }
    }
}

macro_rules! print_version {
    ($bms:expr) => {
        println!(
            "Version: {:?}",
            $bms.get_version().with_context(|| "Cannot get version")?
        )
    };
}
macro_rules! print_serial_numbers {
    ($bms:expr) => {
        println!(
            "Serial numbers: {:?}",
            $bms.get_serial_numbers()
                .with_context(|| "Cannot get serial numbers")?
        )
    };
}
macro_rules! print_analog_data {
    ($bms:expr, $address:expr, $hints:expr) => {
        println!(
            "Analog data: {:#?}",
            $bms.get_analog_data($address, $hints)
                .with_context(|| "Cannot get analog data")?
        )
    };
}
macro_rules! print_capacity {
    ($bms:expr) => {
        println!(
            "Capacity: {:?}",
            $bms.get_capacity().with_context(|| "Cannot get capacity")?
        )
    };
}
macro_rules! print_warnings {
    ($bms:expr, $hints:expr) => {
        println!(
            "Warnings: {:#?}",
            $bms.get_warnings(PackAddress::All, $hints)
                .with_context(|| "Cannot get warnings")?
        )
    };
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let log_handle = logging_init(args.verbose.log_level_filter())?;

    let options = Options::load(args.config.as_deref())?;
    if options.debug_output && args.verbose.log_level_filter() < LevelFilter::Debug {
        log_handle
            .parse_new_spec("debug")
            .with_context(|| "Cannot raise log level")?;
    }
    debug!("Options: {options:?}");

    let mut bms = PaceBms::new(create_transport(&options, args.timeout));
    bms.set_response_delay(args.delay);
    bms.set_read_attempts(args.retries);

    match args.command.unwrap_or(CliCommands::Daemon) {
        CliCommands::Daemon => daemon::run(bms, &options),
        command => query(bms, &command, options.hints()),
    }
}

fn query(
    mut bms: PaceBms<Box<dyn Transport>>,
    command: &CliCommands,
    hints: ParseHints,
) -> Result<()> {
    bms.connect().with_context(|| "Cannot connect to BMS")?;
    match command {
        CliCommands::Version => print_version!(bms),
        CliCommands::Serial => print_serial_numbers!(bms),
        CliCommands::Analog { address } => {
            print_analog_data!(bms, PackAddress::from(*address), hints)
        }
        CliCommands::Capacity => print_capacity!(bms),
        CliCommands::Warnings => print_warnings!(bms, hints),
        CliCommands::All => {
            print_version!(bms);
            print_serial_numbers!(bms);
            print_analog_data!(bms, PackAddress::All, hints);
            print_capacity!(bms);
            print_warnings!(bms, hints);
        }
        CliCommands::Daemon => {}
    }
    bms.close();

    Ok(())
}
