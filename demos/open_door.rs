//! Open Door Example
//!
//! This example locates a controller by serial number and pulses the lock of
//! one of its doors.
//!
//! Usage: `open_door <serial> [door] [controller-ip]`

use std::net::Ipv4Addr;
use std::time::Duration;

use accessctl::{util::parse_ipv4, ClientConfig, ControllerClient};
use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <serial> [door] [controller-ip]", args[0]);
        std::process::exit(1);
    }

    let serial: u32 = args[1].parse()?;
    let door: u8 = args.get(2).map(|d| d.parse()).transpose()?.unwrap_or(1);
    let address: Option<Ipv4Addr> = args.get(3).map(|ip| parse_ipv4(ip)).transpose()?;

    println!("Door Controller Example");
    println!("=======================\n");

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Bound to {}", socket.local_addr()?);

    let client = std::sync::Arc::new(ControllerClient::connectionless(
        socket,
        Some(serial),
        address,
        ClientConfig::from_env(),
    )?);
    client.spawn_receiver(|response| {
        println!("  <- {} from {}: {:?}", response.function_name(), response.serial, response.body);
    });

    println!("Looking for controller {serial}...");
    let found = client.discover().await?;
    match tokio::time::timeout(Duration::from_secs(5), found.resolved()).await {
        Ok(Some(ip)) => println!("Controller {serial} at {ip}"),
        _ => println!("No reply yet, door command goes to broadcast"),
    }

    println!("Opening door {door}...");
    client.open_door(door).await?;

    // stay up for the echoes and the acknowledgement
    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = client.channel().stats();
    println!(
        "\nSent {} frames ({} echoes), received {}",
        stats.messages_sent, stats.retries, stats.messages_received
    );
    Ok(())
}
