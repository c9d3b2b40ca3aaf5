//! cip-server: stands up the EtherNet/IP + CIP engine as a standalone TCP/UDP
//! server, driven by a JSON configuration file.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cip::config::{Config, Personality};
use cip::dispatch::DispatchEngine;
use cip::fault::FaultEngine;
use cip::handler::HandlerRegistry;
use cip::personality::{AssemblyHandler, GenericHandler, IdentityHandler, IdentityObject, LogixHandler, ModbusHandler, PcccHandler};
use cip::profile;
use cip::registry::ServiceRegistry;
use cip::session::{ConnectionTable, SessionTable};
use cip::transport;
use tokio::net::{TcpListener, UdpSocket};

#[derive(Parser)]
#[command(name = "cip-server", about = "EtherNet/IP and CIP protocol test harness server")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "cip-server.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    profile::set_current(config.profile.resolve());

    let identity = IdentityObject {
        vendor_id: config.server.identity_vendor_id,
        device_type: config.server.identity_device_type,
        product_code: config.server.identity_product_code,
        revision_major: config.server.identity_revision_major,
        revision_minor: config.server.identity_revision_minor,
        status: 0,
        serial: config.server.identity_serial,
        product_name: config.server.identity_product_name.clone(),
    };

    let mut handlers = HandlerRegistry::new();
    handlers.register_exact(0x01, cip::cip::service::GET_ATTRIBUTE_SINGLE, Box::new(IdentityHandler { object: identity.clone() }));
    handlers.register_exact(0x01, cip::cip::service::GET_ATTRIBUTE_ALL, Box::new(IdentityHandler { object: identity }));

    match config.server.personality {
        Personality::Adapter => {
            let assemblies = config.adapter_assemblies.clone().into_iter().map(Into::into).collect();
            let handler = Arc::new(AssemblyHandler::new(assemblies, config.server.rng_seed));
            for class in gather_assembly_classes(&config) {
                handlers.register_class(class, Box::new(SharedHandler(handler.clone())));
            }
        }
        Personality::LogixLike => {
            let tags = config.logix_tags.clone().into_iter().map(Into::into).collect();
            handlers.register_class(0x6B, Box::new(LogixHandler::new(tags)));
        }
        Personality::Pccc => {
            let tables = config.pccc_data_tables.clone().into_iter().map(Into::into).collect();
            handlers.register_class(0x67, Box::new(PcccHandler::new(tables)));
        }
    }

    handlers.register_exact(
        0x44,
        cip::cip::service::GET_ATTRIBUTE_SINGLE,
        Box::new(ModbusHandler::new(
            config.modbus_config.coils,
            config.modbus_config.discrete_inputs,
            config.modbus_config.holding_registers,
            config.modbus_config.input_registers,
        )),
    );
    handlers.register_wildcard(Box::new(GenericHandler::new()));

    let sessions = SessionTable::new(
        config.enip_session.max_sessions,
        config.enip_session.max_sessions_per_ip,
        config.enip_session.idle_timeout_ms,
    );
    let connections = ConnectionTable::new(config.server.connection_timeout_ms);
    let registry = ServiceRegistry::with_defaults();
    let engine = Arc::new(DispatchEngine::new(sessions, connections, registry, handlers));
    let fault = Arc::new(FaultEngine::new(config.faults.clone().into()));

    let idle_timeout_ms = config.enip_session.idle_timeout_ms.max(4_000);
    spawn_idle_sweep(engine.clone(), idle_timeout_ms);

    let tcp_addr = format!("{}:{}", config.server.listen_ip, config.server.tcp_port);
    let listener = TcpListener::bind(&tcp_addr).await?;
    tracing::info!(%tcp_addr, "cip-server listening");

    if config.server.enable_udp_io {
        let udp_addr = format!("{}:{}", config.server.listen_ip, config.server.udp_io_port);
        let socket = UdpSocket::bind(&udp_addr).await?;
        tracing::info!(%udp_addr, "cip-server udp io listening");
        let udp_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::run_udp_unicast(socket, udp_engine).await {
                tracing::warn!(error = %e, "udp listener stopped");
            }
        });
    }

    transport::run_tcp_server(listener, engine, fault).await?;
    Ok(())
}

fn gather_assembly_classes(config: &Config) -> Vec<u16> {
    let mut classes: Vec<u16> = config.adapter_assemblies.iter().map(|a| a.class).collect();
    classes.sort_unstable();
    classes.dedup();
    classes
}

/// Adapts a shared `Arc<AssemblyHandler>` to the `Handler` trait so the same
/// instance can be registered under multiple classes.
struct SharedHandler(Arc<AssemblyHandler>);

impl cip::handler::Handler for SharedHandler {
    fn handle(&self, req: &cip::cip::Request) -> cip::Result<(cip::cip::Response, bool)> {
        self.0.handle(req)
    }
}

/// Bounds unbounded growth from sessions registered and then abandoned
/// without a second request; the session/connection tables themselves only
/// check idleness lazily on `get`/`is_active`.
fn spawn_idle_sweep(engine: Arc<DispatchEngine>, idle_timeout_ms: u64) {
    let period = Duration::from_millis((idle_timeout_ms / 4).max(1_000));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let sessions_evicted = engine.sessions().sweep_idle().await;
            let connections_evicted = engine.connections().sweep_idle().await;
            if sessions_evicted > 0 || connections_evicted > 0 {
                tracing::debug!(sessions_evicted, connections_evicted, "idle sweep");
            }
        }
    });
}
