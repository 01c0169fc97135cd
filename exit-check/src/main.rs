//! exit-check: exit-policy index service
//!
//! This is the main entry point. It loads the policy dataset once at startup,
//! then either answers a single query or keeps serving and reloads the
//! dataset whenever it receives `SIGUSR2`.
//!
//! # Usage
//!
//! ```bash
//! # Serve with default configuration, reload on SIGUSR2
//! ./exit-check
//!
//! # Which exits can reach 203.0.113.9:443?
//! ./exit-check -c /etc/exit-check/config.json query 203.0.113.9 443
//!
//! # Run with environment overrides
//! EXIT_CHECK_BASE_DIR=/srv/check/ EXIT_CHECK_LOG_LEVEL=debug ./exit-check
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use exit_check::config::{create_default_config, load_config_with_env, Config};
use exit_check::{parse_query, ExitIndex};

/// What to do after loading the dataset
enum Command {
    /// Keep serving, reload on SIGUSR2
    Serve,
    /// Print every exit able to reach the destination
    Query { address: String, port: String },
    /// Print whether the address is a known exit
    IsExit { address: String },
    /// Load once and report counts
    Check,
}

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: Option<PathBuf>,
    /// Generate default configuration
    generate_config: bool,
    /// Command to run
    command: Command,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut generate_config = false;
        let mut command = Command::Serve;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = Some(PathBuf::from(path));
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    command = Command::Check;
                }
                "serve" => {
                    command = Command::Serve;
                }
                "query" => match (args.next(), args.next()) {
                    (Some(address), Some(port)) => command = Command::Query { address, port },
                    _ => usage_error("query requires ADDR and PORT"),
                },
                "is-exit" => match args.next() {
                    Some(address) => command = Command::IsExit { address },
                    None => usage_error("is-exit requires ADDR"),
                },
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("exit-check v{}", exit_check::VERSION);
                    std::process::exit(0);
                }
                _ => usage_error(&format!("Unknown argument: {arg}")),
            }
        }

        Self {
            config_path,
            generate_config,
            command,
        }
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!("{message}");
    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"exit-check v{}

Exit-policy index answering which exit relays can reach a destination.

USAGE:
    exit-check [OPTIONS] [COMMAND]

COMMANDS:
    serve                   Load the dataset and keep serving (default)
    query <ADDR> <PORT>     Print every exit address able to reach ADDR:PORT
    is-exit <ADDR>          Print whether ADDR is a known exit

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: built-in defaults]
    -g, --generate-config   Write a default configuration to --config and exit
    --check                 Load the dataset once, report counts and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    EXIT_CHECK_BASE_DIR     Override the dataset base directory
    EXIT_CHECK_POLICIES     Override the dataset path
    EXIT_CHECK_LOG_LEVEL    Override log level (trace, debug, info, warn, error)
    EXIT_CHECK_PROBE        Override the known-exit probe (ADDR:PORT)

SIGNALS:
    SIGUSR2                 Reload the dataset; a failed reload keeps the current one
    SIGINT, SIGTERM         Shut down
"#,
        exit_check::VERSION
    );
}

/// Initialize logging
///
/// Logs go to stderr so query output on stdout stays clean.
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().unwrap_or_else(|_| level.into()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_writer(std::io::stderr);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        let path = args
            .config_path
            .ok_or_else(|| anyhow!("--generate-config requires --config <PATH>"))?;
        create_default_config(&path)?;
        println!("Generated default configuration at {path:?}");
        return Ok(());
    }

    let config = load_config_with_env(args.config_path.as_deref())
        .map_err(|e| anyhow!("Failed to load configuration from {:?}: {}", args.config_path, e))?;

    init_logging(&config);

    info!("exit-check v{} starting", exit_check::VERSION);

    let index = Arc::new(ExitIndex::from_config(&config)?);
    let stats = index
        .reload()
        .with_context(|| format!("Failed to load policies from {}", config.policies_path().display()))?;

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    match args.command {
        Command::Serve => serve(index).await,
        Command::Query { address, port } => {
            let port: i64 = port
                .parse()
                .map_err(|_| anyhow!("Invalid port: {port}"))?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            index.dump(&mut out, &address, port)?;
            out.flush()?;
            Ok(())
        }
        Command::IsExit { address } => {
            let (address, _) = parse_query(&address, 0)?;
            println!("{}", index.is_known_exit(address));
            Ok(())
        }
        Command::Check => {
            println!(
                "Loaded generation {}: {} policies, {} rules, {} known exits",
                stats.generation, stats.policies, stats.rules, stats.known_exits
            );
            Ok(())
        }
    }
}

/// Serve until SIGINT or SIGTERM, reloading on SIGUSR2
#[cfg(unix)]
async fn serve(index: Arc<ExitIndex>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut reload = signal(SignalKind::user_defined2()).context("Failed to register SIGUSR2 handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    info!(generation = index.generation(), "Serving, send SIGUSR2 to reload");

    loop {
        tokio::select! {
            _ = reload.recv() => {
                info!("Received SIGUSR2, reloading policies...");
                let index = Arc::clone(&index);
                match tokio::task::spawn_blocking(move || index.reload()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Reload failed: {}", e),
                    Err(e) => error!("Reload task failed: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
        }
    }

    let stats = index.stats();
    info!(
        "Final generation {}: {} policies, {} cached ports, loaded at {}",
        stats.generation, stats.policies, stats.cached_ports, stats.loaded_at
    );
    Ok(())
}

#[cfg(not(unix))]
async fn serve(index: Arc<ExitIndex>) -> Result<()> {
    // No SIGUSR2 here; serve the startup generation until interrupted
    info!(generation = index.generation(), "Serving without reload support");
    signal::ctrl_c().await?;
    info!("Received SIGINT, shutting down...");
    Ok(())
}
