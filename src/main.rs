//! dollarline - `$`-delimited line chat server
//!
//! Binds a TCP listener and hands every accepted socket to its own
//! connection actor. All connections share one chat room.

use anyhow::Context;
use dollarline::chat::{ChatRoom, RoomHandle};
use dollarline::connection::{spawn_connection, ConnectionConfig, ConnectionStats};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// How long shutdown waits for connections to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Capacity of each socket read
    read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: dollarline::DEFAULT_HOST.to_string(),
            port: dollarline::DEFAULT_PORT,
            read_buffer_size: dollarline::connection::READ_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = value_of(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = value_of(&args, i, "--port").parse().unwrap_or_else(|_| {
                        eprintln!("Error: invalid port number");
                        std::process::exit(1);
                    });
                    i += 2;
                }
                "--read-buffer" | "-b" => {
                    config.read_buffer_size = value_of(&args, i, "--read-buffer")
                        .parse()
                        .ok()
                        .filter(|size| *size > 0)
                        .unwrap_or_else(|| {
                            eprintln!("Error: --read-buffer must be a positive number of bytes");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("dollarline version {}", dollarline::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_buffer_size: self.read_buffer_size,
        }
    }
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value.as_str(),
        None => {
            eprintln!("Error: {} requires a value", flag);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
dollarline - line chat server ('$' terminates every line)

USAGE:
    dollarline [OPTIONS]

OPTIONS:
    -h, --host <HOST>           Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>           Port to listen on (default: 8080)
    -b, --read-buffer <BYTES>   Capacity of each socket read (default: 2048)
    -v, --version               Print version information
        --help                  Print this help message

CONNECTING:
    $ nc 127.0.0.1 8080
    hello everyone$
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let (room, room_task) = ChatRoom::spawn();
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(
        version = dollarline::VERSION,
        read_buffer = config.read_buffer_size,
        "Listening on {}",
        config.bind_address()
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    let mut connections = JoinSet::new();

    tokio::select! {
        _ = accept_loop(
            listener,
            room.clone(),
            config.connection_config(),
            Arc::clone(&stats),
            &mut connections,
        ) => {}
        _ = shutdown => {}
    }

    // The room terminates every member on shutdown
    if room.shutdown().is_ok() {
        room_task.await.context("chat room task failed")?;
    }

    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            remaining = connections.len(),
            "Connections still open after grace period, aborting"
        );
        connections.shutdown().await;
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        lines_received = stats.lines_received.load(Ordering::Relaxed),
        lines_sent = stats.lines_sent.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    room: RoomHandle,
    config: ConnectionConfig,
    stats: Arc<ConnectionStats>,
    connections: &mut JoinSet<()>,
) {
    loop {
        // Reap finished connections so the set does not grow unbounded
        while connections.try_join_next().is_some() {}

        match listener.accept().await {
            Ok((stream, addr)) => {
                connections.spawn(handle_connection(
                    stream,
                    addr,
                    room.clone(),
                    config.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Runs one client as a member of the room until its actor stops.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    room: RoomHandle,
    config: ConnectionConfig,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let (handle, task) = spawn_connection(stream, room.clone(), &config, stats);
    let id = handle.id();
    info!(client = %addr, connection = %id, "Client connected");

    if room.join(handle).is_err() {
        warn!(connection = %id, "Chat room closed, refusing client");
        return;
    }

    match task.await {
        Ok(Ok(())) => debug!(client = %addr, connection = %id, "Client disconnected"),
        Ok(Err(e)) => warn!(client = %addr, connection = %id, error = %e, "Connection ended with error"),
        Err(e) => error!(client = %addr, connection = %id, error = %e, "Connection task failed"),
    }

    let _ = room.leave(id);
}
