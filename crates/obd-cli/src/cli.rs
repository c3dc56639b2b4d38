//! Command line arguments

use clap::{ArgAction, Parser, Subcommand};
use obd_protocol::Brand;
use obd_session::AdaptationKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "ELM327 OBD-II diagnostic client", long_about = None)]
pub struct Args {
    /// Adapter serial device, e.g. /dev/rfcomm0. Defaults to the last one used.
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Talk to the built-in mock adapter instead of hardware
    #[arg(long, global = true)]
    pub mock: bool,

    /// Vehicle brand for OEM odometer reads (honda, yamaha, suzuki, ktm)
    #[arg(short, long, global = true)]
    pub brand: Option<Brand>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Print the adapter transaction log before exiting
    #[arg(long, global = true)]
    pub show_log: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List serial ports that may hold an adapter
    Ports,
    /// Poll live data until Ctrl-C
    Monitor {
        /// Stop after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Read VIN, trouble codes, odometer and distances
    Diagnose,
    /// Clear stored trouble codes
    ClearCodes,
    /// Run an adaptation routine (fuel, ecu)
    Adapt { kind: AdaptationKind },
    /// Send a raw command and print the reply
    Send { command: String },
    /// Read the stored freeze frame
    FreezeFrame,
    /// Resting, cranking and charging voltage test
    Battery,
    /// Time 0-60 and 0-100 km/h from a standing start
    Perf {
        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 120)]
        seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from(["elm-diag", "diagnose", "--mock", "-b", "honda", "-vv"]).unwrap();
        assert!(args.mock);
        assert_eq!(args.brand, Some(Brand::Honda));
        assert_eq!(args.verbose, 2);
        assert!(matches!(args.command, Commands::Diagnose));
    }

    #[test]
    fn test_parse_adapt_kind() {
        let args = Args::try_parse_from(["elm-diag", "adapt", "ecu"]).unwrap();
        assert!(matches!(args.command, Commands::Adapt { kind: AdaptationKind::Ecu }));
        assert!(Args::try_parse_from(["elm-diag", "adapt", "turbo"]).is_err());
    }

    #[test]
    fn test_parse_perf_window() {
        let args = Args::try_parse_from(["elm-diag", "perf"]).unwrap();
        assert!(matches!(args.command, Commands::Perf { seconds: 120 }));
        let args = Args::try_parse_from(["elm-diag", "perf", "-s", "30"]).unwrap();
        assert!(matches!(args.command, Commands::Perf { seconds: 30 }));
    }
}
