//! `knx-monitor`: connect to a KNXnet/IP gateway and log group traffic.
//!
//! ```text
//! RUST_LOG=info knx-monitor --gateway 192.168.1.10:3671 --read 1/2/3
//! RUST_LOG=debug knx-monitor --config knx.env --write 1/2/3=01 --duration 30
//! ```

use std::error::Error;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use knx_link::plugin::{ExtensionPlugin, ObserverPlugin, PluginRegistry};
use knx_link::protocol::{Body, CemiFrame};
use knx_link::{Config, GroupAddress, KnxClient, KnxError};

/// Monitor a KNX installation through a KNXnet/IP tunnel.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Gateway control endpoint; searched on 224.0.23.12 when omitted.
    #[arg(short, long)]
    gateway: Option<SocketAddrV4>,

    /// KEY=VALUE configuration file (KNX_GATEWAY_IP, KNX_NAT, ...).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address advertised to the gateway.
    #[arg(long)]
    local_ip: Option<Ipv4Addr>,

    /// Ask the gateway to answer to the datagram source.
    #[arg(long)]
    nat: bool,

    /// Also listen for routing indications on the multicast group.
    #[arg(long)]
    routing: bool,

    /// Write a value once connected, e.g. `1/2/3=0C1A`.
    #[arg(short, long, value_parser = parse_write)]
    write: Vec<(GroupAddress, Vec<u8>)>,

    /// Send a read request once connected.
    #[arg(short, long)]
    read: Vec<GroupAddress>,

    /// Stop after this many seconds instead of running until the tunnel closes.
    #[arg(short, long)]
    duration: Option<u64>,
}

/// Logs group values as they arrive
struct TrafficLogger;

impl TrafficLogger {
    fn log_cemi(cemi: &CemiFrame) {
        let (Some(address), Some(apci)) = (cemi.destination_group(), cemi.apci) else {
            return;
        };
        log::info!(
            "{} -> {address}: {apci:?} {:02X?}",
            cemi.source,
            cemi.value()
        );
    }
}

impl ObserverPlugin for TrafficLogger {
    fn on_incoming_body(&self, body: &Body) {
        match body {
            Body::TunnelingRequest(request) => Self::log_cemi(&request.cemi),
            Body::RoutingIndication(indication) => Self::log_cemi(&indication.cemi),
            _ => {}
        }
    }

    fn on_error(&self, error: &KnxError) {
        log::warn!("{error}");
    }
}

impl ExtensionPlugin for TrafficLogger {
    fn on_start(&self) {
        log::info!("monitoring");
    }

    fn on_shutdown(&self) {
        log::info!("monitor stopped");
    }
}

fn parse_write(arg: &str) -> Result<(GroupAddress, Vec<u8>), String> {
    let (address, hex) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected <group address>=<hex bytes>, got '{arg}'"))?;
    let address = address
        .parse::<GroupAddress>()
        .map_err(|e| format!("{address}: {e}"))?;

    let hex = hex.trim_start_matches("0x");
    if hex.is_empty() || hex.len() % 2 != 0 {
        return Err(format!("'{hex}' is not an even number of hex digits"));
    }
    let data = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| format!("'{hex}': {e}"))?;
    Ok((address, data))
}

fn config(cli: &Cli) -> Result<Config, Box<dyn Error>> {
    let mut builder = Config::builder();
    if let Some(path) = &cli.config {
        builder = builder.apply_text(&std::fs::read_to_string(path)?)?;
    }
    if let Some(gateway) = cli.gateway {
        builder = builder.gateway(gateway);
    }
    if let Some(local_ip) = cli.local_ip {
        builder = builder.local_ip(local_ip);
    }
    if cli.nat {
        builder = builder.nat(true);
    }
    if cli.routing {
        builder = builder.routing(true);
    }
    Ok(builder.build()?)
}

fn main() -> Result<(), Box<dyn Error>> {
    // RUST_LOG controls verbosity
    env_logger::init();

    let cli = Cli::parse();
    let config = config(&cli)?;

    let plugins = PluginRegistry::builder()
        .observer(TrafficLogger)
        .extension(TrafficLogger)
        .build();
    let client = KnxClient::new(config, plugins)?;
    client.connect()?;

    for (address, data) in &cli.write {
        match client.write_request(*address, data) {
            Ok(()) => log::info!("wrote {data:02X?} to {address}"),
            Err(e) => log::error!("write to {address} failed: {e}"),
        }
    }
    for address in &cli.read {
        if let Err(e) = client.read_request(*address) {
            log::error!("read of {address} failed: {e}");
        }
    }

    let closed = client.wait_closed(cli.duration.map(Duration::from_secs));
    if !closed {
        client.close();
    }

    for (address, status) in client.status_snapshot() {
        println!("{address}\t{:02X?}\tfrom {}", status.value, status.source);
    }
    if let Some(failure) = client.failure() {
        log::error!("tunnel lost: {failure}");
    }
    Ok(())
}
