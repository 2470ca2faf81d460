use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use timerex_cli::commands;
use timerex_cli::logging;
use timerex_cli::CliContext;
use timerex_cli::Repl;
use timerex_core::{BackendKind, ConfigExt, TimerConfig};

/// Process arguments
#[derive(Parser)]
#[command(version, about = "Interactive periodic timer demo")]
struct Args {
    /// TOML configuration file (defaults to the user's timerex config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured backend
    #[arg(short, long)]
    backend: Option<BackendKind>,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();
    logging::init();

    let mut config = match &args.config {
        Some(path) => TimerConfig::load_from(path).map_err(|e| commands::error_chain(&e))?,
        None => TimerConfig::load(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    let ctx = CliContext::new(config).map_err(|e| commands::error_chain(&e))?;
    println!(
        "timerex: {} backend, {} slots",
        ctx.service.backend_kind(),
        ctx.service.capacity()
    );

    let mut repl = Repl::new();
    loop {
        let line = repl.readline().await?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match respond(line, &ctx) {
            Ok(quit) => {
                if quit {
                    break;
                }
            }
            Err(err) => {
                write!(std::io::stdout(), "{err}").map_err(|e| e.to_string())?;
                std::io::stdout().flush().map_err(|e| e.to_string())?;
            }
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(version, about = "timerex")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a periodic timer
    Create {
        #[arg(short, long)]
        ms: u32,
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Delete a timer by id
    Delete {
        #[arg(short, long)]
        id: usize,
    },
    List,
    Stats,
    /// Start several timers sharing one counter
    Demo {
        #[arg(short, long, default_value_t = 3)]
        count: usize,
        #[arg(short, long, default_value_t = 1000)]
        ms: u32,
    },
    Config,
    Exit,
}

fn respond(line: &str, ctx: &CliContext) -> Result<bool, String> {
    let mut args = shlex::split(line).ok_or("error: Invalid quoting")?;
    args.insert(0, "timerex".to_string());
    let cli = Cli::try_parse_from(args).map_err(|e| e.to_string())?;

    match &cli.command {
        Some(Commands::Create { ms, label }) => {
            commands::create_timer(ctx, *ms, label.as_deref())?;
        }
        Some(Commands::Delete { id }) => commands::delete_timer(ctx, *id)?,
        Some(Commands::List) => commands::list_timers(ctx),
        Some(Commands::Stats) => commands::show_stats(ctx),
        Some(Commands::Demo { count, ms }) => {
            commands::demo(ctx, *count, *ms);
        }
        Some(Commands::Config) => commands::show_config(ctx)?,
        Some(Commands::Exit) => {
            if let Err(err) = commands::exit(ctx) {
                print!("{err}");
            }
            return Ok(true);
        }
        None => {}
    }
    Ok(false)
}
