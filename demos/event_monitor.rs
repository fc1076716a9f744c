//! Event Monitor Example
//!
//! This example registers an event server with a controller and prints the
//! status events it reports until interrupted.
//!
//! Usage: `event_monitor <serial> <server-ip:port>`

use std::net::SocketAddrV4;
use std::sync::Arc;

use accessctl::service::{EventKind, ResponseBody};
use accessctl::{ClientConfig, ControllerClient};
use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <serial> <server-ip:port>", args[0]);
        std::process::exit(1);
    }

    let serial: u32 = args[1].parse()?;
    let server: SocketAddrV4 = args[2].parse()?;

    println!("Controller Event Monitor");
    println!("========================\n");

    // events are reported to the server port, so listen there
    let socket = UdpSocket::bind(("0.0.0.0", server.port())).await?;
    let config = ClientConfig {
        callback_server: Some(server),
        report_interval: 5,
        ..ClientConfig::from_env()
    };
    let client = Arc::new(ControllerClient::connectionless(socket, Some(serial), None, config)?);

    let receiver = client.spawn_receiver(|response| match response.body {
        ResponseBody::Status(event) if event.kind != EventKind::None => {
            println!(
                "#{} {:?} door {} {:?} card {} {} at {}",
                event.index,
                event.kind,
                event.door,
                event.direction,
                event.card,
                if event.allowed { "allowed" } else { "denied" },
                event
                    .time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
            );
        }
        ResponseBody::Search(reply) => {
            println!("Controller {} at {} (mac {})", response.serial, reply.ip, reply.mac);
        }
        _ => {}
    });

    client.discover().await?;
    println!("Waiting for events, press Ctrl+C to stop\n");

    tokio::signal::ctrl_c().await?;
    if let Some(receiver) = receiver {
        receiver.abort();
    }

    println!("\nStopped");
    Ok(())
}
