use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod formatters;

use config::{FileConfig, LayerKind, Overrides, Settings, ShareArg};
use formatters::FormatMode;

#[derive(Parser)]
#[command(name = "cardstack")]
#[command(about = "Talk to smart cards through a stack of protocol layers")]
#[command(version)]
struct Args {
    /// Use a simulated reader instead of PC/SC
    #[arg(long, global = true)]
    simulate: bool,

    /// Reader to connect to (defaults to the first one found)
    #[arg(short, long, global = true, env = "CARDSTACK_READER")]
    reader: Option<String>,

    /// Share mode used when connecting
    #[arg(long, global = true, value_enum)]
    share: Option<ShareArg>,

    /// Layer to mount above the terminal, repeat to stack more (last on top)
    #[arg(short, long = "layer", global = true, value_enum)]
    layers: Vec<LayerKind>,

    /// Config file (defaults to ./cardstack.toml when present)
    #[arg(short, long, global = true, env = "CARDSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Output format mode
    #[arg(short, long, global = true, value_enum)]
    format: Option<FormatMode>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available readers
    Readers,
    /// Send APDUs (hex) through the layer stack
    Send {
        /// Command APDUs, e.g. 00A4040007A0000000031010
        #[arg(required = true)]
        apdus: Vec<String>,
    },
    /// Show the layer stack that would be built
    Layers,
    /// Print reader and card events
    Watch {
        /// Stop after this many events
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let file = match FileConfig::load(args.config.as_deref()) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(2);
        }
    };
    let settings = Settings::resolve(
        file,
        Overrides {
            reader: args.reader,
            share: args.share,
            layers: args.layers,
            log_level: args.log_level,
            format: args.format,
            simulate: args.simulate,
        },
    );

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_target(false)
        .init();

    debug!(?settings, "Resolved settings");

    let result = match args.command {
        Command::Readers => commands::readers::cmd_readers(&settings),
        Command::Send { apdus } => {
            let parsed: Result<Vec<_>, _> =
                apdus.iter().map(|a| commands::send::parse_apdu(a)).collect();
            match parsed {
                Ok(parsed) => commands::send::cmd_send(&settings, &parsed),
                Err(err) => {
                    eprintln!("{}", err);
                    return ExitCode::from(2);
                }
            }
        }
        Command::Layers => commands::layers::cmd_layers(&settings),
        Command::Watch { count } => commands::watch::cmd_watch(&settings, count),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            if matches!(err, cardstack::Error::Connection { .. }) {
                eprintln!("Please ensure a reader is attached and a card is present");
            }
            ExitCode::FAILURE
        }
    }
}
