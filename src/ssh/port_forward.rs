use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::events::{EventSink, FabricEvent, TracingEventSink};
use crate::forwarder;
use crate::pool::BufferPool;
use crate::ssh::chain::Chain;

/// A local-to-remote forwarding rule, bound to a (non-owned) `Chain` (spec §3, §4.3).
#[derive(Debug, Clone)]
pub struct ForwardRule {
    pub local_listen_addr: String,
    pub remote_host: String,
    pub remote_port: u16,
}

/// Accepts TCP on `rule.local_listen_addr`; for every accepted socket, dials
/// the remote through `chain` and runs the Forwarder Primitive. A failed
/// dial only drops that one connection — the listener keeps accepting.
pub struct PortForwarder {
    chain: Arc<Chain>,
    rule: ForwardRule,
    pool: Arc<BufferPool>,
    events: Arc<dyn EventSink>,
}

impl PortForwarder {
    pub fn new(chain: Arc<Chain>, rule: ForwardRule, pool: Arc<BufferPool>) -> Self {
        Self::with_events(chain, rule, pool, Arc::new(TracingEventSink))
    }

    /// Same as [`Self::new`] but with an explicit event sink (spec §9, §6.1).
    pub fn with_events(
        chain: Arc<Chain>,
        rule: ForwardRule,
        pool: Arc<BufferPool>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            chain,
            rule,
            pool,
            events,
        }
    }

    /// Runs until `shutdown` reports `true`. On return, the listener is
    /// closed and every in-flight splice has completed.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.rule.local_listen_addr).await?;
        self.events.emit(FabricEvent::ForwarderListening {
            addr: self.rule.local_listen_addr.clone(),
        });

        let mut inflight = JoinSet::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => {
                    let (socket, _peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            self.events.emit(FabricEvent::ForwarderAcceptFailed { error: err.to_string() });
                            continue;
                        }
                    };
                    let chain = self.chain.clone();
                    let pool = self.pool.clone();
                    let events = self.events.clone();
                    let remote_host = self.rule.remote_host.clone();
                    let remote_port = self.rule.remote_port;
                    inflight.spawn(async move {
                        match chain.dial(&remote_host, remote_port).await {
                            Ok(remote_stream) => {
                                if let Err(err) = forwarder::splice(socket, remote_stream, pool).await {
                                    events.emit(FabricEvent::ForwarderSpliceError { error: err.to_string() });
                                }
                            }
                            Err(err) => {
                                events.emit(FabricEvent::ForwarderDialFailed {
                                    remote_host,
                                    remote_port,
                                    error: err.to_string(),
                                });
                            }
                        }
                    });
                }
            }
        }

        drop(listener);
        while inflight.join_next().await.is_some() {}
        self.events.emit(FabricEvent::ForwarderStopped {
            addr: self.rule.local_listen_addr.clone(),
        });
        Ok(())
    }
}
