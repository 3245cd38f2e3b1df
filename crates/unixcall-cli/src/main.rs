#![deny(unsafe_code)]

//! unixcall CLI — one JSON call over a Unix socket, or the server side of it.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use unixcall_config::{AppConfig, ClientConfig, ServerConfig};
use unixcall_core::build_info;
use unixcall_core::exchange::{self, ExchangeClient, Message, ServerOptions, ShutdownSignal};

/// unixcall — single-shot JSON request/reply over a Unix domain socket.
#[derive(Parser)]
#[command(name = "unixcall", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "unixcall.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply. Ctrl-C or SIGTERM cancels it.
    Call {
        /// Socket path (overrides client.socket_path).
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Framing mode (overrides client.framing).
        #[arg(long)]
        framing: Option<String>,

        /// Message text.
        #[arg(short, long, default_value = "Hello, server!")]
        text: String,

        /// Message id.
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        id: i64,

        /// Print the reply as a JSON line instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Run the reference server until Ctrl-C or SIGTERM.
    Serve {
        /// Socket path (overrides server.socket_path).
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Framing mode (overrides server.framing).
        #[arg(long)]
        framing: Option<String>,

        /// Reply prefix (overrides server.reply_prefix).
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose, &config))),
        )
        .with_writer(std::io::stderr)
        .init();

    debug!(
        version = %build_info::version_string(),
        built_at = ?build_info::build_epoch_secs(),
        config = %cli.config.display(),
        "unixcall starting"
    );

    match cli.command {
        Commands::Call {
            socket,
            framing,
            text,
            id,
            json,
        } => {
            let client_config = client_config(&config, socket, framing)?;
            cmd_call(&client_config, Message::new(text, id), json).await?
        }
        Commands::Serve {
            socket,
            framing,
            prefix,
        } => {
            let server_config = server_config(&config, socket, framing, prefix)?;
            cmd_serve(&server_config).await?
        }
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// Default log filter when `RUST_LOG` is unset: `-v` flags win over the config.
fn log_filter(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

async fn cmd_call(client_config: &ClientConfig, request: Message, json: bool) -> Result<()> {
    let token = CancellationToken::new();
    let terminated = termination_signal()?;
    let cancel_on_signal = {
        let token = token.clone();
        tokio::spawn(async move {
            let name = terminated.await;
            warn!(signal = name, "Cancelling call");
            token.cancel();
        })
    };

    let result = call_once(client_config, &request, token).await;
    cancel_on_signal.abort();
    let reply = result?;

    if json {
        println!("{}", serde_json::to_string(&reply)?);
    } else {
        println!("Received response: {reply}");
    }
    Ok(())
}

async fn call_once(
    client_config: &ClientConfig,
    request: &Message,
    token: CancellationToken,
) -> Result<Message> {
    let client = ExchangeClient::from_config(client_config)?.with_cancellation(token);
    if !client.socket_available() {
        warn!(
            path = %client.socket_path().display(),
            "No socket found at path; is the server running?"
        );
    }

    info!(
        path = %client.socket_path().display(),
        framing = %client.options().framing,
        id = request.id,
        "Sending request"
    );
    client
        .call(request)
        .await
        .with_context(|| format!("call to {} failed", client.socket_path().display()))
}

async fn cmd_serve(server_config: &ServerConfig) -> Result<()> {
    let options = ServerOptions::from_config(server_config)?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let terminated = termination_signal()?;

    tokio::spawn(async move {
        let name = terminated.await;
        warn!(signal = name, "Initiating graceful shutdown");
        let _ = shutdown_tx.send(ShutdownSignal);
    });

    exchange::serve(Path::new(&server_config.socket_path), options, shutdown_rx)
        .await
        .context("server failed")
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else if config_path.exists() {
        println!("Configuration at '{}' is valid.", config_path.display());
    } else {
        println!(
            "No configuration at '{}'; defaults are in effect.",
            config_path.display()
        );
    }
    Ok(())
}

/// Install the SIGTERM handler now; the returned future resolves with the
/// name of the first SIGINT or SIGTERM received.
fn termination_signal() -> Result<impl Future<Output = &'static str>> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    Ok(async move {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => "SIGINT",
            Some(()) = sigterm.recv() => "SIGTERM",
            else => std::future::pending().await,
        }
    })
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("invalid configuration at '{}'", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}

/// Socket paths live in the config as strings, so they must be UTF-8.
fn socket_override(socket: &Path) -> Result<String> {
    socket
        .to_str()
        .map(str::to_string)
        .with_context(|| format!("socket path {} is not valid UTF-8", socket.display()))
}

/// The `[client]` section with command-line overrides applied.
fn client_config(
    config: &AppConfig,
    socket: Option<PathBuf>,
    framing: Option<String>,
) -> Result<ClientConfig> {
    let mut client = config.client.clone();
    if let Some(socket) = socket {
        client.socket_path = socket_override(&socket)?;
    }
    if let Some(framing) = framing {
        client.framing = framing;
    }
    Ok(client)
}

/// The `[server]` section with command-line overrides applied.
fn server_config(
    config: &AppConfig,
    socket: Option<PathBuf>,
    framing: Option<String>,
    prefix: Option<String>,
) -> Result<ServerConfig> {
    let mut server = config.server.clone();
    if let Some(socket) = socket {
        server.socket_path = socket_override(&socket)?;
    }
    if let Some(framing) = framing {
        server.framing = framing;
    }
    if let Some(prefix) = prefix {
        server.reply_prefix = prefix;
    }
    Ok(server)
}
