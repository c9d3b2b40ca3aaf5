//! cip-client: ad-hoc ENIP/CIP exchanges against a running server, for
//! manual protocol interactions and scripted checks outside the full
//! orchestration controller.

use clap::{Parser, Subcommand};
use cip::cip::{service, Request};
use cip::client::Connection;
use cip::epath::LogicalPath;
use cip::profile::Profile;

#[derive(Parser)]
#[command(name = "cip-client", about = "Ad-hoc EtherNet/IP and CIP client")]
struct Cli {
    /// Target host:port.
    #[arg(long, default_value = "127.0.0.1:44818")]
    target: String,

    /// Protocol profile mode (strict_odva, legacy_compat, or a vendor name).
    #[arg(long, default_value = "strict_odva")]
    profile: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get_Attribute_Single on a class/instance/attribute path.
    GetAttribute {
        class: u16,
        instance: u16,
        attribute: u16,
    },
    /// Set_Attribute_Single with raw hex payload bytes (e.g. "01020304").
    SetAttribute {
        class: u16,
        instance: u16,
        attribute: u16,
        hex_payload: String,
    },
    /// Read_Tag on a symbolic tag name.
    ReadTag { name: String },
    /// Forward_Open then immediately Forward_Close against the Connection
    /// Manager, for exercising connection-lifetime handling.
    Ping,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();
    let profile = Profile::by_mode(&cli.profile);
    let mut conn = Connection::connect(&cli.target, profile).await?;

    match cli.command {
        Command::GetAttribute { class, instance, attribute } => {
            let req = Request::new(
                service::GET_ATTRIBUTE_SINGLE,
                LogicalPath::class_instance_attribute(class, instance, attribute),
                Vec::new(),
            );
            let resp = conn.invoke_service(&req).await?;
            println!("status=0x{:02X} payload={:02X?}", resp.status, resp.payload);
        }
        Command::SetAttribute {
            class,
            instance,
            attribute,
            hex_payload,
        } => {
            let payload = decode_hex(&hex_payload)?;
            let req = Request::new(
                service::SET_ATTRIBUTE_SINGLE,
                LogicalPath::class_instance_attribute(class, instance, attribute),
                payload,
            );
            let resp = conn.invoke_service(&req).await?;
            println!("status=0x{:02X}", resp.status);
        }
        Command::ReadTag { name } => {
            let req = Request::new(service::READ_TAG, LogicalPath::symbolic(&name), Vec::new());
            let resp = conn.invoke_service(&req).await?;
            println!("status=0x{:02X} payload={:02X?}", resp.status, resp.payload);
        }
        Command::Ping => {
            let path = LogicalPath::class_instance(0x06, 1);
            let payload = forward_open_payload();
            let (o_to_t, t_to_o) = conn.forward_open(path.clone(), payload).await?;
            println!("forward_open ok: o_to_t=0x{o_to_t:08X} t_to_o=0x{t_to_o:08X}");
            conn.forward_close(path, forward_close_payload(o_to_t)).await?;
            println!("forward_close ok");
        }
    }

    conn.disconnect().await?;
    Ok(())
}

fn decode_hex(s: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if s.len() % 2 != 0 {
        return Err("hex payload must have an even number of digits".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.into()))
        .collect()
}

/// Minimal ForwardOpen payload: priority/timeout ticks, a zeroed O->T/T->O id
/// pair for the server to mint fresh ones, a 20ms RPI on both directions, and
/// the `0x20 0x06 0x24 0x01` connection-manager path.
fn forward_open_payload() -> Vec<u8> {
    let mut p = vec![0x0A, 0x0E]; // priority_tick, timeout_ticks
    p.extend_from_slice(&0u32.to_le_bytes()); // O->T conn id (server assigns)
    p.extend_from_slice(&0u32.to_le_bytes()); // T->O conn id (server assigns)
    p.extend_from_slice(&1u16.to_le_bytes()); // connection serial
    p.extend_from_slice(&0u16.to_le_bytes()); // originator vendor
    p.extend_from_slice(&1u32.to_le_bytes()); // originator serial
    p.push(1); // timeout multiplier
    p.extend_from_slice(&[0, 0, 0]); // reserved
    p.extend_from_slice(&20_000u32.to_le_bytes()); // O->T RPI, microseconds
    p.extend_from_slice(&0u32.to_le_bytes()); // O->T net params
    p.extend_from_slice(&20_000u32.to_le_bytes()); // T->O RPI
    p.extend_from_slice(&0u32.to_le_bytes()); // T->O net params
    p.push(1); // transport class trigger
    p.push(2); // path size, words
    p.extend_from_slice(&[0x20, 0x06, 0x24, 0x01]); // connection manager path
    p
}

/// ForwardClose payload carrying the `0x34` marker the default
/// `MarkerScan` mode looks for.
fn forward_close_payload(connection_id: u32) -> Vec<u8> {
    let mut p = vec![0u8; 2];
    p.push(0x34);
    p.extend_from_slice(&connection_id.to_le_bytes());
    p
}
