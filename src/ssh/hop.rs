use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::Handle;
use russh::keys::{load_secret_key, PrivateKeyWithHashAlg};
use russh::{ChannelStream, Disconnect};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::{AuthMethodConfig, HopConfig};
use crate::error::SshError;
use crate::ssh::algos::preferred;
use crate::ssh::handler::ClientHandler;
use crate::ssh::known_hosts::HostKeyVerifier;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated SSH session to a single host (spec §4.1), reachable
/// either by direct TCP dial or by tunneling through an already-connected
/// peer `HopClient`.
pub struct HopClient {
    name: String,
    host: String,
    port: u16,
    handle: Option<Handle<ClientHandler>>,
    connected: AtomicBool,
}

impl HopClient {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            handle: None,
            connected: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Dial `hop.host:hop.port` directly over TCP and authenticate. Idempotent.
    pub async fn connect(
        &mut self,
        hop: &HopConfig,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<(), SshError> {
        if self.is_connected() {
            return Ok(());
        }
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect((hop.host.as_str(), hop.port)))
            .await
            .map_err(|_| SshError::Dial(std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out")))?
            .map_err(SshError::Dial)?;
        let _ = stream.set_nodelay(true);
        let handle = self.handshake_and_auth(stream, hop, verifier).await?;
        self.handle = Some(handle);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Ask `peer` (which must already be connected) to open a `direct-tcpip`
    /// channel to this hop's `host:port`, then run SSH over that channel.
    pub async fn connect_through(
        &mut self,
        peer: &HopClient,
        hop: &HopConfig,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<(), SshError> {
        if self.is_connected() {
            return Ok(());
        }
        if !peer.is_connected() {
            return Err(SshError::PeerNotConnected);
        }
        let peer_handle = peer.handle.as_ref().ok_or(SshError::PeerNotConnected)?;
        let channel = peer_handle
            .channel_open_direct_tcpip(hop.host.clone(), hop.port as u32, "127.0.0.1", 0)
            .await
            .map_err(SshError::ChannelOpen)?;
        let stream = channel.into_stream();
        let handle = self.handshake_and_auth(stream, hop, verifier).await?;
        self.handle = Some(handle);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn handshake_and_auth<S>(
        &self,
        stream: S,
        hop: &HopConfig,
        verifier: Arc<dyn HostKeyVerifier>,
    ) -> Result<Handle<ClientHandler>, SshError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let config = Arc::new(russh::client::Config {
            preferred: preferred(hop.insecure_accept_any_host_key),
            ..Default::default()
        });
        let handler = ClientHandler::new(hop.host.clone(), hop.port, verifier);
        let mut handle = russh::client::connect_stream(config, stream, handler)
            .await
            .map_err(SshError::Handshake)?;
        authenticate(&mut handle, hop).await?;
        Ok(handle)
    }

    /// Open a new `direct-tcpip` channel from this hop to `host:port`.
    pub async fn dial(&self, host: &str, port: u16) -> Result<ChannelStream<russh::client::Msg>, SshError> {
        let handle = self.handle.as_ref().ok_or(SshError::NotConnected)?;
        let channel = handle
            .channel_open_direct_tcpip(host.to_string(), port as u32, "127.0.0.1", 0)
            .await
            .map_err(SshError::ChannelOpen)?;
        Ok(channel.into_stream())
    }

    /// Open a shell/exec session channel.
    pub async fn new_session(&self) -> Result<russh::Channel<russh::client::Msg>, SshError> {
        let handle = self.handle.as_ref().ok_or(SshError::NotConnected)?;
        handle.channel_open_session().await.map_err(SshError::ChannelOpen)
    }

    pub async fn disconnect(&mut self) -> Result<(), SshError> {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
        }
        self.connected.store(false, Ordering::Release);
        Ok(())
    }
}

async fn authenticate(handle: &mut Handle<ClientHandler>, hop: &HopConfig) -> Result<(), SshError> {
    if let AuthMethodConfig::Key {
        private_key_path,
        passphrase,
    } = &hop.auth
    {
        let key = load_secret_key(
            private_key_path,
            passphrase.as_ref().map(|p| p.expose_secret().as_str()),
        )?;
        let result = handle
            .authenticate_publickey(
                hop.user.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), None),
            )
            .await
            .map_err(SshError::Handshake)?;
        if result.success() {
            return Ok(());
        }
    }

    let password = match &hop.auth {
        AuthMethodConfig::Password { password } => Some(password),
        AuthMethodConfig::Key { .. } => None,
    };

    if let Some(password) = password {
        let result = handle
            .authenticate_password(hop.user.clone(), password.expose_secret())
            .await
            .map_err(SshError::Handshake)?;
        if result.success() {
            return Ok(());
        }
    }

    if let Some(password) = password {
        if try_keyboard_interactive(handle, &hop.user, password.expose_secret())
            .await
            .unwrap_or(false)
        {
            return Ok(());
        }
    }

    Err(SshError::Auth)
}

/// Answers every prompt with the hop's password, covering OTP-style second
/// confirmations some bastions ask for after the primary auth step (spec §9).
async fn try_keyboard_interactive(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    password: &str,
) -> Result<bool, SshError> {
    use russh::client::KeyboardInteractiveAuthResponse as Kbi;

    let mut response = handle
        .authenticate_keyboard_interactive_start(user.to_string(), None)
        .await
        .map_err(SshError::Handshake)?;

    loop {
        match response {
            Kbi::Success => return Ok(true),
            Kbi::Failure { .. } => return Ok(false),
            Kbi::InfoRequest { ref prompts, .. } => {
                let answers = vec![password.to_string(); prompts.len()];
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(SshError::Handshake)?;
            }
        }
    }
}
