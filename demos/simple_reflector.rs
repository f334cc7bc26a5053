//! Simple reflector example
//!
//! Run with: cargo run --example simple_reflector [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_reflector                   # binds to 0.0.0.0:42000
//!   cargo run --example simple_reflector localhost         # binds to 127.0.0.1:42000
//!   cargo run --example simple_reflector 0.0.0.0:42100     # binds to 0.0.0.0:42100
//!
//! Clients register with a `YSFL` login naming a callsign and talk-group,
//! keep the session alive with `YSFP` polls, and transmit `YSFD` frames.
//! Every frame is fanned out to the other members of the talk-group.
//!
//! Signals:
//!   SIGINT / ctrl-c   graceful shutdown (bounded drain and join)
//!   SIGHUP            reload the access-control list files

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ysfr_rs::directory::MemoryDirectory;
use ysfr_rs::{Reflector, ReflectorConfig};

/// Parse bind address from command line argument.
///
/// Accepts formats:
/// - "localhost" -> 127.0.0.1:42000
/// - "127.0.0.1" -> 127.0.0.1:42000
/// - "0.0.0.0:42100" -> 0.0.0.0:42100
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 42000;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: simple_reflector [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:42000)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let bind_addr = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => "0.0.0.0:42000".parse().unwrap(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ysfr_rs=debug".parse()?)
                .add_directive("simple_reflector=debug".parse()?),
        )
        .init();

    let config = ReflectorConfig::with_addr(bind_addr)
        .callsign("YSFR")
        .identity("Simple Reflector", "demo");

    println!("Starting reflector on {}", bind_addr);

    let reflector = Arc::new(Reflector::bind(config, Arc::new(MemoryDirectory::new())).await?);
    for addr in reflector.local_addrs()? {
        println!("Listening on {}", addr);
    }

    // SIGHUP reloads the access-control lists without a restart
    #[cfg(unix)]
    {
        let reflector = Arc::clone(&reflector);
        let shutdown = reflector.shutdown_handle();
        tokio::spawn(async move {
            let mut hup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            {
                Ok(stream) => stream,
                Err(e) => {
                    eprintln!("SIGHUP handler unavailable: {}", e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    received = hup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        reflector.reload_acl().await;
                    }
                    _ = shutdown.wait() => break,
                }
            }
        });
    }

    // Periodic stats line
    {
        let reflector = Arc::clone(&reflector);
        let shutdown = reflector.shutdown_handle();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {
                        println!(
                            "clients={} streams={} {}",
                            reflector.registry().len().await,
                            reflector.streams().active_count().await,
                            reflector.stats(),
                        );
                    }
                    _ = shutdown.wait() => break,
                }
            }
        });
    }

    reflector
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    println!("Final stats: {}", reflector.stats());
    Ok(())
}
