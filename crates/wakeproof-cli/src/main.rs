use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "wakeproof-cli", version, about = "Wakeproof CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commitment management
    Commitment {
        #[command(subcommand)]
        action: commands::commitment::CommitmentAction,
    },
    /// Evaluate the interaction gate from a reported position
    #[command(allow_negative_numbers = true)]
    Gate(commands::verify::PositionArgs),
    /// Try to conclude a commitment from a reported position
    #[command(allow_negative_numbers = true)]
    Conclude(commands::verify::PositionArgs),
    /// Full one-shot verification: gate decision plus conclusion
    #[command(allow_negative_numbers = true)]
    Verify(commands::verify::PositionArgs),
    /// Replay a recorded fix stream through the lock-screen gate
    Replay(commands::replay::ReplayArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Great-circle distance in meters between two points
    #[command(allow_negative_numbers = true)]
    Distance {
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
    },
    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("WAKEPROOF_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Commitment { action } => commands::commitment::run(action),
        Commands::Gate(args) => commands::verify::gate(args),
        Commands::Conclude(args) => commands::verify::conclude(args),
        Commands::Verify(args) => commands::verify::verify(args),
        Commands::Replay(args) => commands::replay::run(args),
        Commands::Config { action } => commands::config::run(action),
        Commands::Distance {
            lat1,
            lon1,
            lat2,
            lon2,
        } => commands::distance(lat1, lon1, lat2, lon2),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "wakeproof-cli", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
