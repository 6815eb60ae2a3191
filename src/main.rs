//! CLI for zilmqtt
//!
//! Subcommands:
//! - `serve`: run the registry, the registration listener and the load balancer
//! - `announce`: register a broker with a running instance (useful for smoke tests)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use zilmqtt::config::{Settings, load_config};
use zilmqtt::ledger::SledLedger;
use zilmqtt::packet::MqttCodec;
use zilmqtt::packet::codec::{encode_connect, encode_subscribe};
use zilmqtt::registry::BrokerRegistry;
use zilmqtt::transport::registration::ANNOUNCE_PREFIX;
use zilmqtt::transport::{BalancerContext, start_balancer_server, start_registration_server};
use zilmqtt::utils::logging;
use zilmqtt::utils::retry::RetryPolicy;

#[derive(Parser)]
#[command(name = "zilmqtt")]
enum Command {
    /// Run the load balancer
    Serve,
    /// Announce a broker to a running load balancer
    Announce {
        /// Broker id; registered as `<id>.zilmqtt`
        #[arg(long)]
        id: String,
        /// Address clients should use to reach the broker
        #[arg(long)]
        ip: String,
        #[arg(long)]
        port: u16,
        /// Registration listener to announce to
        #[arg(long, default_value = "127.0.0.1:1884")]
        registry: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init("info");
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config.log.level);

    let res = match cmd {
        Command::Serve => run_server(config).await,
        Command::Announce {
            id,
            ip,
            port,
            registry,
        } => run_announce(&registry, &id, &ip, port).await,
    };
    if let Err(e) = res {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server(config: Settings) -> zilmqtt::utils::Result<()> {
    let shutdown = CancellationToken::new();
    let retry = RetryPolicy::from_settings(&config.ledger);
    let ledger = Arc::new(SledLedger::open(&config.ledger.path)?);
    info!("Ledger opened at '{}'", config.ledger.path);

    let registry = Arc::new(BrokerRegistry::new(ledger, retry));
    if let Err(e) = registry.init().await {
        warn!("Initial registry load failed, starting empty: {e}");
    }
    tokio::spawn(BrokerRegistry::start_refresh_loop(
        registry.clone(),
        Duration::from_secs(config.registry.refresh_interval_secs),
        shutdown.clone(),
    ));

    let host = &config.server.host;
    let registration = TcpListener::bind((host.as_str(), config.server.registration_port)).await?;
    tokio::spawn(start_registration_server(
        registration,
        registry.clone(),
        shutdown.clone(),
    ));

    if config.balancer.enabled {
        let listener = TcpListener::bind((host.as_str(), config.server.port)).await?;
        let ctx = BalancerContext {
            registry: registry.clone(),
            connect_timeout: Duration::from_millis(config.registry.connect_timeout_ms),
            codec: MqttCodec::new(config.server.max_frame_bytes),
        };
        tokio::spawn(start_balancer_server(listener, ctx, shutdown.clone()));
    } else {
        info!("Load balancing disabled");
    }

    shutdown_signal().await;
    info!("Shutdown signal received");
    shutdown.cancel();
    Ok(())
}

async fn run_announce(registry: &str, id: &str, ip: &str, port: u16) -> zilmqtt::utils::Result<()> {
    let stream = TcpStream::connect(registry).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, MqttCodec::default());

    write_half
        .write_all(&encode_connect(&format!("announce-{id}"), 30))
        .await?;
    if frames.next().await.transpose()?.is_none() {
        warn!("Registration listener closed before CONNACK");
        return Ok(());
    }

    let topic = format!("{ANNOUNCE_PREFIX}/{id}/{ip}/{port}");
    write_half.write_all(&encode_subscribe(1, &[(topic.as_str(), 0)])).await?;
    while frames.next().await.transpose()?.is_some() {}

    info!("Announced '{id}' at {ip}:{port} to {registry}");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut term, mut hup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(hup)) => (term, hup),
            _ => {
                warn!("Could not install SIGTERM/SIGHUP handlers, waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
            _ = hup.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
