use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh::{ChannelMsg, ChannelStream};
use tracing::error;

use crate::config::HopConfig;
use crate::error::SshError;
use crate::events::{EventSink, FabricEvent, TracingEventSink};
use crate::ssh::hop::HopClient;
use crate::ssh::known_hosts::HostKeyVerifier;

/// An ordered sequence of hops dialed one through the next, exposing a
/// single tunneled vantage point at the tail (spec §4.2).
pub struct Chain {
    hops: Vec<HopConfig>,
    clients: Vec<HopClient>,
    verifier: Arc<dyn HostKeyVerifier>,
    events: Arc<dyn EventSink>,
    connected: AtomicBool,
}

impl Chain {
    pub fn new(hops: Vec<HopConfig>, verifier: Arc<dyn HostKeyVerifier>) -> Result<Self, SshError> {
        Self::with_events(hops, verifier, Arc::new(TracingEventSink))
    }

    /// Same as [`Self::new`] but with an explicit event sink rather than the
    /// default `tracing`-backed one (spec §9, §6.1: ambient logger is an
    /// injected seam).
    pub fn with_events(
        hops: Vec<HopConfig>,
        verifier: Arc<dyn HostKeyVerifier>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, SshError> {
        if hops.is_empty() {
            return Err(SshError::EmptyChain);
        }
        Ok(Self {
            hops,
            clients: Vec::new(),
            verifier,
            events,
            connected: AtomicBool::new(false),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Dial hop 0 directly, then tunnel each subsequent hop through the
    /// previous one. Any single-hop failure tears down everything already
    /// connected, in reverse order, and surfaces the failing hop's index.
    pub async fn connect(&mut self) -> Result<(), SshError> {
        if self.is_connected() {
            return Ok(());
        }

        let mut clients: Vec<HopClient> = Vec::with_capacity(self.hops.len());
        for (index, hop) in self.hops.iter().enumerate() {
            let mut client = HopClient::new(hop.name.clone(), hop.host.clone(), hop.port);
            let result = if let Some(peer) = clients.last() {
                client.connect_through(peer, hop, self.verifier.clone()).await
            } else {
                client.connect(hop, self.verifier.clone()).await
            };

            if let Err(err) = result {
                self.events.emit(FabricEvent::HopFailed {
                    index,
                    host: hop.host.clone(),
                });
                for mut connected in clients.into_iter().rev() {
                    if let Err(teardown_err) = connected.disconnect().await {
                        error!(error = %teardown_err, "chain: error tearing down partial chain");
                    }
                }
                return Err(SshError::HopFailed {
                    index,
                    host: hop.host.clone(),
                    source: Box::new(err),
                });
            }
            clients.push(client);
        }

        self.events.emit(FabricEvent::ChainConnected { hops: clients.len() });
        self.clients = clients;
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Close hops tail-first, aggregating errors but always transitioning
    /// to disconnected.
    pub async fn disconnect(&mut self) -> Result<(), SshError> {
        let mut last_err = None;
        for client in self.clients.iter_mut().rev() {
            if let Err(err) = client.disconnect().await {
                last_err = Some(err);
            }
        }
        self.clients.clear();
        self.connected.store(false, Ordering::Release);
        self.events.emit(FabricEvent::ChainDisconnected);
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Open a `direct-tcpip` channel from the tail hop's network vantage
    /// point — the defining correctness property of a chain (spec §4.2, P3).
    pub async fn dial(&self, host: &str, port: u16) -> Result<ChannelStream<russh::client::Msg>, SshError> {
        let tail = self.clients.last().ok_or(SshError::NotConnected)?;
        tail.dial(host, port).await
    }

    /// Run `cmd` on the tail hop, capturing stdout/stderr. Returns an error
    /// for session failures as well as a non-zero exit status.
    pub async fn execute(&self, cmd: &str) -> Result<(String, String), SshError> {
        let tail = self.clients.last().ok_or(SshError::NotConnected)?;
        let mut channel = tail.new_session().await?;
        channel
            .exec(true, cmd)
            .await
            .map_err(SshError::ChannelOpen)?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        match exit_status {
            Some(0) | None => Ok((stdout, stderr)),
            Some(code) => Err(SshError::CommandFailed { exit_status: code }),
        }
    }
}
