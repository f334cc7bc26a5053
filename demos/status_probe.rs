//! Status probe example
//!
//! Sends a `YSFS` status query to a reflector and prints the reply fields.
//!
//! Run with: cargo run --example status_probe <REFLECTOR_ADDR>
//!
//! Example:
//!   cargo run --example status_probe 127.0.0.1:42000

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => {
            eprintln!("Usage: status_probe <REFLECTOR_ADDR>");
            std::process::exit(1);
        }
    };

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(target).await?;
    socket.send(b"YSFS").await?;

    let mut buf = [0u8; 64];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf)).await??;
    let reply = &buf[..len];

    if len != 42 || &reply[..4] != b"YSFS" {
        eprintln!("Unexpected reply ({} bytes)", len);
        std::process::exit(1);
    }

    let hash = String::from_utf8_lossy(&reply[4..9]);
    let name = String::from_utf8_lossy(&reply[9..25]);
    let description = String::from_utf8_lossy(&reply[25..39]);
    let clients = String::from_utf8_lossy(&reply[39..42]);

    println!("Reflector:   {}", name.trim_end());
    println!("Description: {}", description.trim_end());
    println!("Hash:        {}", hash);
    println!("Clients:     {}", clients);
    Ok(())
}
