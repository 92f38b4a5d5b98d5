//! wsproxy
//!
//! A WebSocket-to-TCP tunneling proxy for interactive container sessions.
//!
//! The proxy binds a local TCP listener and bridges every accepted
//! connection to a remote WebSocket gateway, so services reachable only via
//! WebSocket (terminal, VNC, Jupyter, SSH) can be used as plain TCP
//! endpoints:
//! - `wsproxy start` runs the client-side tunnel
//! - `wsproxy gateway` runs the server-side listener for a session

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod proxy;

use config::{AuthConfig, Config, ProxyConfig};
use proxy::{Gateway, HeaderProvider, ListenAddr, TunnelClient, TunnelEvent};

#[derive(Parser, Debug)]
#[command(name = "wsproxy")]
#[command(author, version, about = "Bridge local TCP connections to a remote WebSocket gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a local tunnel to a remote WebSocket gateway
    Start(StartArgs),

    /// Run the server-side listener for a session
    Gateway(GatewayArgs),
}

#[derive(Parser, Debug)]
struct StartArgs {
    /// Local listen address: a bare port or host:port
    #[arg(short, long, default_value = "8080")]
    listen: String,

    /// Remote WebSocket gateway URL (ws:// or wss://)
    #[arg(short, long, env = "WSPROXY_REMOTE")]
    remote: Option<String>,

    /// Destination host:port the gateway should bridge to
    #[arg(short, long, env = "WSPROXY_DEST")]
    dest: Option<String>,

    /// Bearer token attached to each handshake
    #[arg(short = 'k', long, env = "WSPROXY_TOKEN")]
    token: Option<String>,

    /// Persist the resolved remote, destination, and token to the config file
    #[arg(long)]
    save: bool,
}

#[derive(Parser, Debug)]
struct GatewayArgs {
    /// Session identifier the listener belongs to
    session_id: String,

    /// Application name (terminal, vnc, jupyter, ...)
    #[arg(long, default_value = "tcp")]
    app: String,

    /// IP address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to bind
    #[arg(long)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load().unwrap_or_default();

    match cli.command {
        Commands::Start(args) => run_start(args, &config).await,
        Commands::Gateway(args) => run_gateway(args).await,
    }
}

async fn run_start(args: StartArgs, config: &Config) -> Result<()> {
    // Resolve from CLI > env (via clap) > config file.
    let remote = args
        .remote
        .or_else(|| config.proxy.remote.clone())
        .context("remote WebSocket URL required (--remote, WSPROXY_REMOTE, or config file)")?;
    let dest = args
        .dest
        .or_else(|| config.proxy.dest.clone())
        .context("destination address required (--dest, WSPROXY_DEST, or config file)")?;
    let token = args.token.or_else(|| config.auth.token.clone());

    if args.save {
        let resolved = Config {
            auth: AuthConfig {
                token: token.clone(),
            },
            proxy: ProxyConfig {
                remote: Some(remote.clone()),
                dest: Some(dest.clone()),
            },
        };
        resolved.save()?;
        info!("saved configuration to {}", Config::config_path()?.display());
    }

    let header_provider: Option<HeaderProvider> = token.map(|token| {
        Arc::new(move || {
            HashMap::from([("authorization".to_string(), format!("Bearer {token}"))])
        }) as HeaderProvider
    });

    let listen: ListenAddr = args.listen.parse()?;

    let client = TunnelClient::new(remote, dest, header_provider);
    let mut handle = client.start(listen).await?;

    println!(
        "Forwarding {} -> {}",
        handle.local_addr(),
        client.remote_url().await
    );
    println!("Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(TunnelEvent::Established { peer }) => {
                    info!("session established for {}", peer);
                }
                Some(TunnelEvent::ConnectFailed { peer, error }) => {
                    warn!("connect failed for {}: {}", peer, error);
                }
                Some(TunnelEvent::ConnectHttpFailed { peer, error }) => {
                    warn!(
                        "upgrade rejected for {}: {} (check token and gateway path)",
                        peer, error
                    );
                }
                Some(TunnelEvent::SessionClosed { peer, summary }) => {
                    info!(
                        "session closed for {}: {} bytes out, {} bytes in",
                        peer, summary.a_to_b, summary.b_to_a
                    );
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.stop();
                break;
            }
        }
    }

    Ok(())
}

async fn run_gateway(args: GatewayArgs) -> Result<()> {
    let gateway = Gateway::start(&args.session_id, &args.app, &args.bind, args.port).await?;

    println!(
        "Gateway for session {} ({}) listening on {}",
        gateway.session_id(),
        gateway.app_name(),
        gateway.local_addr()
    );
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    gateway.stop();

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
