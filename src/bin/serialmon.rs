use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use serialmon::config::DEFAULT_BAUD_RATE;
use serialmon::MonitorConfig;

#[derive(Parser)]
#[command(version, about = "Print everything a serial device sends, reconnecting as needed")]
struct Args {
    #[arg(
        short,
        long,
        help = "Serial port (as path to /dev/tty* or COM port), defaults to the first port found"
    )]
    port: Option<String>,

    #[arg(short, long, help = "Baud rate", default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Deliberately not from_env(): the monitor reads no environment.
    env_logger::Builder::new()
        .filter_level(LevelFilter::Warn)
        .init();

    let config = MonitorConfig {
        port: args.port,
        baud_rate: args.baud,
        ..MonitorConfig::default()
    };
    match serialmon::start(config) {
        Ok(exit) => {
            log::debug!("exiting: {exit:?}");
            exit.exit_code()
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
