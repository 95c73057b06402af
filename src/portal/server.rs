use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;

use crate::config::{PortMappingConfig, PortalServerConfig};
use crate::error::PortalError;
use crate::events::{EventSink, FabricEvent, TracingEventSink};
use crate::forwarder;
use crate::mux::{MuxConfig, MuxStream};
use crate::pool::BufferPool;
use crate::portal::auth::Authenticator;
use crate::portal::header::StreamHeader;
use crate::tls;

const BACKEND_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-mapping live counters (spec §3). Lifetime matches the mapping's
/// registration.
#[derive(Debug, Default)]
pub struct MappingState {
    pub stream_count: AtomicI64,
    pub bytes_in: Arc<AtomicU64>,
    pub bytes_out: Arc<AtomicU64>,
}

impl MappingState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stream_count: AtomicI64::new(0),
            bytes_in: Arc::new(AtomicU64::new(0)),
            bytes_out: Arc::new(AtomicU64::new(0)),
        })
    }
}

struct MappingEntry {
    config: PortMappingConfig,
    state: Arc<MappingState>,
}

/// Accepts TLS+Mux connections from Portal Clients and routes accepted
/// streams to local backends by mapping id (spec §4.5).
pub struct PortalServer {
    listen_addr: String,
    tls_config: Arc<rustls::ServerConfig>,
    mux_config: MuxConfig,
    authenticator: Arc<Authenticator>,
    mappings: Arc<RwLock<HashMap<String, MappingEntry>>>,
    pool: Arc<BufferPool>,
    events: Arc<dyn EventSink>,
}

impl PortalServer {
    pub fn new(config: &PortalServerConfig, pool: Arc<BufferPool>) -> Result<Self, PortalError> {
        Self::with_events(config, pool, Arc::new(TracingEventSink))
    }

    /// Same as [`Self::new`] but with an explicit event sink (spec §9, §6.1).
    pub fn with_events(
        config: &PortalServerConfig,
        pool: Arc<BufferPool>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, PortalError> {
        let tls_config = tls::build_server_config(&config.tls_cert_path, &config.tls_key_path)?;
        Ok(Self {
            listen_addr: config.listen_addr.clone(),
            tls_config,
            mux_config: MuxConfig::default(),
            authenticator: Arc::new(Authenticator::new(&config.tokens)),
            mappings: Arc::new(RwLock::new(HashMap::new())),
            pool,
            events,
        })
    }

    pub async fn register_mapping(&self, mapping: PortMappingConfig) -> Arc<MappingState> {
        let state = MappingState::new();
        let id = mapping.id.clone();
        self.mappings.write().await.insert(
            id,
            MappingEntry {
                config: mapping,
                state: state.clone(),
            },
        );
        state
    }

    pub async fn unregister_mapping(&self, id: &str) {
        self.mappings.write().await.remove(id);
    }

    pub async fn mapping_state(&self, id: &str) -> Option<Arc<MappingState>> {
        self.mappings.read().await.get(id).map(|e| e.state.clone())
    }

    /// Runs until `shutdown` reports `true`: closes the listener, closes all
    /// live mux sessions (which tears down their streams), and waits for
    /// every in-flight task to finish (spec §4.5).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PortalError> {
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        self.events.emit(FabricEvent::PortalListening {
            addr: self.listen_addr.clone(),
        });

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            self.events.emit(FabricEvent::PortalAcceptFailed { error: err.to_string() });
                            continue;
                        }
                    };
                    let tls_config = self.tls_config.clone();
                    let mux_config = self.mux_config.clone();
                    let authenticator = self.authenticator.clone();
                    let mappings = self.mappings.clone();
                    let pool = self.pool.clone();
                    let events = self.events.clone();
                    connections.spawn(async move {
                        if let Err(err) = handle_connection(
                            socket, peer, tls_config, mux_config, authenticator, mappings, pool, events.clone(),
                        )
                        .await
                        {
                            events.emit(FabricEvent::PortalSessionClosed { peer: peer.to_string() });
                            let _ = err;
                        }
                    });
                }
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        self.events.emit(FabricEvent::PortalShutdown);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
    mux_config: MuxConfig,
    authenticator: Arc<Authenticator>,
    mappings: Arc<RwLock<HashMap<String, MappingEntry>>>,
    pool: Arc<BufferPool>,
    events: Arc<dyn EventSink>,
) -> Result<(), PortalError> {
    let _ = socket.set_nodelay(true);
    let session = Arc::new(tls::tls_server_mux(socket, tls_config, mux_config).await?);
    events.emit(FabricEvent::PortalSessionEstablished { peer: peer.to_string() });

    let mut streams = JoinSet::new();
    loop {
        match session.accept_stream().await {
            Ok(stream) => {
                let authenticator = authenticator.clone();
                let mappings = mappings.clone();
                let pool = pool.clone();
                let events = events.clone();
                streams.spawn(async move {
                    if let Err(err) = handle_stream(stream, authenticator, mappings, pool, events.clone()).await {
                        events.emit(FabricEvent::StreamRejected {
                            mapping_id: String::new(),
                            reason: err.to_string(),
                        });
                    }
                });
            }
            Err(_) => break,
        }
    }
    while streams.join_next().await.is_some() {}
    events.emit(FabricEvent::PortalSessionClosed { peer: peer.to_string() });
    Ok(())
}

async fn handle_stream(
    mut stream: MuxStream,
    authenticator: Arc<Authenticator>,
    mappings: Arc<RwLock<HashMap<String, MappingEntry>>>,
    pool: Arc<BufferPool>,
    events: Arc<dyn EventSink>,
) -> Result<(), PortalError> {
    let header = StreamHeader::read(&mut stream).await?;

    let token_cfg = match authenticator.validate_token(&header.token) {
        Some(cfg) => cfg.clone(),
        None => {
            events.emit(FabricEvent::StreamRejected {
                mapping_id: header.mapping_id.clone(),
                reason: "invalid token".to_string(),
            });
            let _ = stream.shutdown().await;
            return Err(PortalError::InvalidToken);
        }
    };

    let (remote_host, remote_port, state) = {
        let guard = mappings.read().await;
        let entry = match guard.get(&header.mapping_id) {
            Some(entry) => entry,
            None => {
                events.emit(FabricEvent::StreamRejected {
                    mapping_id: header.mapping_id.clone(),
                    reason: "unknown mapping".to_string(),
                });
                drop(guard);
                let _ = stream.shutdown().await;
                return Err(PortalError::UnknownMapping(header.mapping_id.clone()));
            }
        };
        (
            entry.config.remote_host.clone(),
            entry.config.remote_port,
            entry.state.clone(),
        )
    };

    if !authenticator.is_remote_allowed(&token_cfg, &remote_host) {
        events.emit(FabricEvent::StreamRejected {
            mapping_id: header.mapping_id.clone(),
            reason: format!("remote {remote_host} not allowed"),
        });
        let _ = stream.shutdown().await;
        return Err(PortalError::RemoteNotAllowed(remote_host));
    }

    let backend = tokio::time::timeout(
        BACKEND_DIAL_TIMEOUT,
        TcpStream::connect((remote_host.as_str(), remote_port)),
    )
    .await
    .map_err(|_| PortalError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "backend dial timed out")))?
    .map_err(PortalError::Io)?;
    let _ = backend.set_nodelay(true);

    events.emit(FabricEvent::StreamOpened {
        mapping_id: header.mapping_id.clone(),
    });
    state.stream_count.fetch_add(1, Ordering::Relaxed);
    let result = forwarder::splice_with_counters(
        stream,
        backend,
        pool,
        Some(state.bytes_in.clone()),
        Some(state.bytes_out.clone()),
    )
    .await;
    state.stream_count.fetch_sub(1, Ordering::Relaxed);
    events.emit(FabricEvent::StreamClosed {
        mapping_id: header.mapping_id.clone(),
        bytes_in: state.bytes_in.load(Ordering::Relaxed),
        bytes_out: state.bytes_out.load(Ordering::Relaxed),
    });

    result.map_err(PortalError::Io)
}
