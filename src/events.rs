use tracing::{info, warn};

/// Lifecycle events a management layer (out of scope) would want to observe
/// without the core depending on it (spec §9: "replace the ambient logger
/// with an injected sink interface").
#[derive(Debug, Clone)]
pub enum FabricEvent {
    ChainConnected { hops: usize },
    ChainDisconnected,
    HopFailed { index: usize, host: String },
    PortalSessionEstablished { peer: String },
    PortalSessionClosed { peer: String },
    StreamOpened { mapping_id: String },
    StreamClosed { mapping_id: String, bytes_in: u64, bytes_out: u64 },
    StreamRejected { mapping_id: String, reason: String },
    PortalListening { addr: String },
    PortalAcceptFailed { error: String },
    PortalShutdown,
    ForwarderListening { addr: String },
    ForwarderAcceptFailed { error: String },
    ForwarderDialFailed { remote_host: String, remote_port: u16, error: String },
    ForwarderSpliceError { error: String },
    ForwarderStopped { addr: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: FabricEvent);
}

/// Default sink: logs every event via `tracing`. Good enough until a
/// management API wants to wire events elsewhere.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: FabricEvent) {
        match event {
            FabricEvent::ChainConnected { hops } => info!(hops, "chain connected"),
            FabricEvent::ChainDisconnected => info!("chain disconnected"),
            FabricEvent::HopFailed { index, host } => {
                warn!(index, host, "hop failed")
            }
            FabricEvent::PortalSessionEstablished { peer } => {
                info!(peer, "portal session established")
            }
            FabricEvent::PortalSessionClosed { peer } => {
                info!(peer, "portal session closed")
            }
            FabricEvent::StreamOpened { mapping_id } => {
                info!(mapping_id, "portal stream opened")
            }
            FabricEvent::StreamClosed {
                mapping_id,
                bytes_in,
                bytes_out,
            } => info!(mapping_id, bytes_in, bytes_out, "portal stream closed"),
            FabricEvent::StreamRejected { mapping_id, reason } => {
                warn!(mapping_id, reason, "portal stream rejected")
            }
            FabricEvent::PortalListening { addr } => info!(addr, "portal server: listening"),
            FabricEvent::PortalAcceptFailed { error } => {
                warn!(error, "portal server: accept failed")
            }
            FabricEvent::PortalShutdown => info!("portal server: shut down, all connections drained"),
            FabricEvent::ForwarderListening { addr } => info!(addr, "port forwarder: listening"),
            FabricEvent::ForwarderAcceptFailed { error } => {
                warn!(error, "port forwarder: accept failed")
            }
            FabricEvent::ForwarderDialFailed {
                remote_host,
                remote_port,
                error,
            } => warn!(remote_host, remote_port, error, "port forwarder: chain dial failed"),
            FabricEvent::ForwarderSpliceError { error } => {
                warn!(error, "port forwarder: splice ended with error")
            }
            FabricEvent::ForwarderStopped { addr } => {
                info!(addr, "port forwarder: shut down, all splices drained")
            }
        }
    }
}
