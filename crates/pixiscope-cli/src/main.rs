mod commands;
mod config;
mod connection;
mod watch;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use pixiscope_browser::{BrowserError, ConsoleLevel, DiscoveryError};
use pixiscope_probe::Method;
use tracing_subscriber::EnvFilter;

use crate::commands::console::ConsoleOptions;
use crate::commands::scene::Selector;
use crate::commands::stats::WatchOptions;
use crate::config::{CliOverrides, ConfigLoader, PixiscopeConfig};
use crate::connection::Connection;
use crate::watch::StopHandle;

/// pixiscope -- inspect and profile PixiJS applications from the terminal.
#[derive(Parser, Debug)]
#[command(name = "pixiscope", version, about)]
struct Cli {
    /// DevTools host
    #[arg(long, global = true)]
    host: Option<String>,

    /// DevTools port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Page to attach to: target id, index, or URL/title substring
    #[arg(long, global = true)]
    target: Option<String>,

    /// Use the built-in simulated application instead of a browser
    #[arg(long, global = true)]
    simulate: bool,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report what was located in the page
    Info,

    /// Print the display tree
    Scene {
        /// Indented outline instead of JSON
        #[arg(long)]
        tree: bool,
    },

    /// Print node counts by type and visibility
    Stats {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,

        /// Milliseconds between polls
        #[arg(long)]
        interval: Option<u64>,

        /// Stop after this many polls
        #[arg(long, requires = "watch")]
        count: Option<u64>,
    },

    /// Describe the renderer and canvas
    Rendering,

    /// List GPU textures with estimated memory
    Textures,

    /// Print the renderer's instruction tree
    Instructions,

    /// Render one instrumented frame and report per-stage timings
    Capture,

    /// Render continuously and report frame-time statistics
    Benchmark {
        /// Duration in milliseconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Show one node of the display tree
    #[command(group(ArgGroup::new("selector").required(true).args(["index", "filter"])))]
    Inspect {
        /// Pre-order index in the flattened tree
        #[arg(long)]
        index: Option<usize>,

        /// First node whose name or type contains this text
        #[arg(long)]
        filter: Option<String>,
    },

    /// List nodes whose name or type contains a substring
    Query {
        pattern: String,
    },

    /// Stream the page's console output
    Console {
        /// Lowest level to show (debug, log, info, warn, error)
        #[arg(long, value_parser = commands::console::parse_level)]
        level: Option<ConsoleLevel>,

        /// One JSON object per line
        #[arg(long)]
        json: bool,

        /// Clear the console and exit
        #[arg(long)]
        clear: bool,
    },

    /// List page targets of the browser
    Targets,

    /// Start Chrome with remote debugging on the configured port
    Launch {
        #[arg(long)]
        headless: bool,

        /// Page to open
        url: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Whether the failure means nothing is listening on the DevTools port.
fn is_connection_refused(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(e) = cause.downcast_ref::<DiscoveryError>() {
            return e.is_connection_refused();
        }
        if let Some(BrowserError::ConnectionFailed { reason, .. }) = cause.downcast_ref::<BrowserError>() {
            return reason.to_lowercase().contains("refused");
        }
        false
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_connection_refused(&err) => {
            eprintln!("error: {err}");
            eprintln!("  Hint: start Chrome with --remote-debugging-port (or run 'pixiscope launch'),");
            eprintln!("  or pass --simulate to use the built-in demo scene.");
            ExitCode::from(1)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = CliOverrides {
        host: cli.host.clone(),
        port: cli.port,
        target: cli.target.clone(),
    };
    let config = ConfigLoader::new()
        .load(&overrides)
        .context("failed to load configuration")?;
    tracing::debug!(host = %config.host, port = config.port, "configuration loaded");

    let command = match cli.command {
        Commands::Targets => return commands::browser::targets(&config).await,
        Commands::Launch { headless, url } => {
            return commands::browser::launch(&config, headless, url).await
        }
        page_command => page_command,
    };

    let conn = if cli.simulate {
        Connection::simulated()
    } else {
        Connection::open(&config).await?
    };

    run_page_command(command, &conn, &config).await
}

async fn run_page_command(command: Commands, conn: &Connection, config: &PixiscopeConfig) -> Result<()> {
    use commands::report;

    match command {
        Commands::Info => report::run(conn, config, Method::GetInfo, &[]).await,
        Commands::Scene { tree } => commands::scene::scene(conn, config, tree).await,
        Commands::Stats {
            watch,
            interval,
            count,
        } => {
            let options = WatchOptions {
                watch,
                interval_ms: interval,
                count,
            };
            let stop = if watch { StopHandle::on_ctrl_c() } else { StopHandle::new() };
            commands::stats::run(conn, config, &options, &stop).await?;
            Ok(())
        }
        Commands::Rendering => report::run(conn, config, Method::GetRendering, &[]).await,
        Commands::Textures => report::run(conn, config, Method::GetTextures, &[]).await,
        Commands::Instructions => report::run(conn, config, Method::GetInstructions, &[]).await,
        Commands::Capture => report::run(conn, config, Method::Capture, &[]).await,
        Commands::Benchmark { duration } => report::benchmark(conn, config, duration).await,
        Commands::Inspect { index, filter } => {
            let selector = match (index, filter) {
                (Some(i), _) => Selector::Index(i),
                (None, Some(f)) => Selector::Filter(f),
                (None, None) => anyhow::bail!("inspect needs --index or --filter"),
            };
            commands::scene::inspect(conn, config, selector).await
        }
        Commands::Query { pattern } => commands::scene::query(conn, config, &pattern).await,
        Commands::Console { level, json, clear } => {
            let options = ConsoleOptions { level, json, clear };
            let stop = StopHandle::on_ctrl_c();
            commands::console::run(conn, config, &options, &stop).await
        }
        Commands::Targets | Commands::Launch { .. } => unreachable!("handled before attaching"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parse_info_with_globals() {
        let cli = Cli::try_parse_from([
            "pixiscope", "--host", "10.0.0.2", "--port", "9333", "--target", "game", "info",
        ]);
        assert!(cli.is_ok(), "should parse info: {cli:?}");
        let cli = cli.unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(cli.port, Some(9333));
        assert_eq!(cli.target.as_deref(), Some("game"));
        assert!(matches!(cli.command, Commands::Info));
    }

    #[test]
    fn cli_parse_global_after_subcommand() {
        let cli = Cli::try_parse_from(["pixiscope", "scene", "--tree", "--simulate"]).unwrap();
        assert!(cli.simulate);
        match cli.command {
            Commands::Scene { tree } => assert!(tree),
            _ => panic!("expected Scene command"),
        }
    }

    #[test]
    fn cli_parse_stats_watch() {
        let cli =
            Cli::try_parse_from(["pixiscope", "stats", "--watch", "--interval", "250", "--count", "4"])
                .unwrap();
        match cli.command {
            Commands::Stats {
                watch,
                interval,
                count,
            } => {
                assert!(watch);
                assert_eq!(interval, Some(250));
                assert_eq!(count, Some(4));
            }
            _ => panic!("expected Stats command"),
        }
    }

    #[test]
    fn cli_count_requires_watch() {
        assert!(Cli::try_parse_from(["pixiscope", "stats", "--count", "2"]).is_err());
    }

    #[test]
    fn cli_parse_benchmark_duration() {
        let cli = Cli::try_parse_from(["pixiscope", "benchmark", "--duration", "2000"]).unwrap();
        match cli.command {
            Commands::Benchmark { duration } => assert_eq!(duration, Some(2000)),
            _ => panic!("expected Benchmark command"),
        }
    }

    #[test]
    fn cli_inspect_requires_selector() {
        assert!(Cli::try_parse_from(["pixiscope", "inspect"]).is_err());
        assert!(Cli::try_parse_from(["pixiscope", "inspect", "--index", "1", "--filter", "x"]).is_err());
        let cli = Cli::try_parse_from(["pixiscope", "inspect", "--filter", "hero"]).unwrap();
        match cli.command {
            Commands::Inspect { index, filter } => {
                assert_eq!(index, None);
                assert_eq!(filter.as_deref(), Some("hero"));
            }
            _ => panic!("expected Inspect command"),
        }
    }

    #[test]
    fn cli_parse_query() {
        let cli = Cli::try_parse_from(["pixiscope", "query", "sprite"]).unwrap();
        match cli.command {
            Commands::Query { pattern } => assert_eq!(pattern, "sprite"),
            _ => panic!("expected Query command"),
        }
    }

    #[test]
    fn cli_parse_console() {
        let cli = Cli::try_parse_from(["pixiscope", "console", "--level", "warn", "--json"]).unwrap();
        match cli.command {
            Commands::Console { level, json, clear } => {
                assert_eq!(level, Some(ConsoleLevel::Warn));
                assert!(json);
                assert!(!clear);
            }
            _ => panic!("expected Console command"),
        }
        assert!(Cli::try_parse_from(["pixiscope", "console", "--level", "loud"]).is_err());
    }

    #[test]
    fn cli_parse_launch() {
        let cli =
            Cli::try_parse_from(["pixiscope", "launch", "--headless", "http://localhost:5173"]).unwrap();
        match cli.command {
            Commands::Launch { headless, url } => {
                assert!(headless);
                assert_eq!(url.as_deref(), Some("http://localhost:5173"));
            }
            _ => panic!("expected Launch command"),
        }
    }

    #[test]
    fn cli_parse_targets() {
        let cli = Cli::try_parse_from(["pixiscope", "targets", "--port", "9333"]).unwrap();
        assert!(matches!(cli.command, Commands::Targets));
        assert_eq!(cli.port, Some(9333));
    }

    #[test]
    fn connection_refused_is_detected_through_context() {
        let err = anyhow::Error::new(DiscoveryError::ConnectionRefused {
            endpoint: "http://localhost:9222".into(),
        })
        .context("listing targets");
        assert!(is_connection_refused(&err));
        assert!(!is_connection_refused(&anyhow::anyhow!("something else")));
    }
}
