mod config;

use std::env;
use std::path::Path;
use std::thread;
use std::time::Duration;

use jsontalkie_core::{Broadcast, JsonMessage, LinkType, MessageKind, Repeater, Socket, SocketError, Talker, Transport};
use jsontalkie_loopback::loopback_pair;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::FabricConfig;

/// Wraps a [`Transport`] to log every datagram crossing it, so the demo's
/// console output shows the fabric's actual wire traffic rather than only
/// the decision-point events the core itself emits.
struct LoggingTransport<T> {
    label: &'static str,
    inner: T,
}

impl<T: Transport> Transport for LoggingTransport<T> {
    fn recv(&mut self) -> Option<Vec<u8>> {
        let bytes = self.inner.recv()?;
        info!(socket = self.label, datagram = %String::from_utf8_lossy(&bytes), "recv");
        Some(bytes)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        info!(socket = self.label, datagram = %String::from_utf8_lossy(bytes), "send");
        self.inner.send(bytes)
    }
}

fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config = match env::args().nth(1) {
        Some(path) => config::load_config_from_path(Path::new(&path)).unwrap_or_else(|err| {
            eprintln!("failed to load {path}: {err}");
            std::process::exit(1);
        }),
        None => FabricConfig::default(),
    };

    info!(node_a = %config.node_a.talker_name, node_b = %config.node_b.talker_name, "starting fabric demo");

    // Two independent Repeaters stand in for two physical nodes; the
    // loopback transport pair stands in for the wire between them. Each
    // node sees the other as an up-linked, bridged socket — "remote", but
    // also reachable by LOCAL-scope traffic because it's bridged.
    let (transport_a, transport_b) = loopback_pair();

    let mut socket_a = Socket::new(
        LoggingTransport {
            label: "node-a",
            inner: transport_a,
        },
        LinkType::UpLinked,
    )
    .with_description("loopback-to-b");
    socket_a.bridged = true;
    socket_a.max_delay_ms = config.max_delay_ms;

    let mut socket_b = Socket::new(
        LoggingTransport {
            label: "node-b",
            inner: transport_b,
        },
        LinkType::UpLinked,
    )
    .with_description("loopback-to-a");
    socket_b.bridged = true;
    socket_b.max_delay_ms = config.max_delay_ms;

    let talker_a = Talker::new(&config.node_a.talker_name, "fabric demo node A", None, config.node_a.channel);
    let talker_b = Talker::new(&config.node_b.talker_name, "fabric demo node B", None, config.node_b.channel);

    let mut repeater_a = Repeater::new(vec![socket_a], vec![], vec![], vec![talker_a]);
    let mut repeater_b = Repeater::new(vec![socket_b], vec![], vec![], vec![talker_b]);

    let mut ping = JsonMessage::new();
    ping.set_message_kind(MessageKind::Ping);
    ping.set_broadcast(Broadcast::Local);
    repeater_a.downlink_message(ping, 0);

    for tick in 0..20u32 {
        let now_ms = tick * 10;
        repeater_a.tick(now_ms);
        repeater_b.tick(now_ms);
        thread::sleep(Duration::from_millis(10));
    }

    info!("fabric demo finished");
}
