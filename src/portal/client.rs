use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::PortalError;
use crate::forwarder;
use crate::mux::{MuxConfig, MuxSession};
use crate::pool::BufferPool;
use crate::portal::header::StreamHeader;
use crate::secret::Secret;
use crate::ssh::Chain;
use crate::tls;

/// Dials a `PortalServer`, either directly or through a tunneling `Chain`,
/// then serves local listeners for each configured mapping (spec §4.6).
pub struct PortalClient {
    session: Arc<MuxSession>,
    token: Secret<String>,
    pool: Arc<BufferPool>,
}

impl PortalClient {
    pub async fn connect_direct(
        addr: &str,
        tls_config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
        mux_config: MuxConfig,
        token: Secret<String>,
        pool: Arc<BufferPool>,
    ) -> Result<Self, PortalError> {
        let socket = TcpStream::connect(addr).await?;
        let _ = socket.set_nodelay(true);
        Self::from_stream(socket, tls_config, server_name, mux_config, token, pool).await
    }

    /// Same as [`Self::connect_direct`] but the raw dial is replaced by
    /// `chain.Dial("tcp", host:port)`, i.e. the Portal Server is reached
    /// from the tail hop's network vantage point (spec §4.6).
    pub async fn connect_through_chain(
        chain: &Chain,
        host: &str,
        port: u16,
        tls_config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
        mux_config: MuxConfig,
        token: Secret<String>,
        pool: Arc<BufferPool>,
    ) -> Result<Self, PortalError> {
        let channel_stream = chain.dial(host, port).await?;
        Self::from_stream(channel_stream, tls_config, server_name, mux_config, token, pool).await
    }

    async fn from_stream<IO>(
        io: IO,
        tls_config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
        mux_config: MuxConfig,
        token: Secret<String>,
        pool: Arc<BufferPool>,
    ) -> Result<Self, PortalError>
    where
        IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let session = tls::tls_client_mux(io, tls_config, server_name, mux_config).await?;
        Ok(Self {
            session: Arc::new(session),
            token,
            pool,
        })
    }

    pub fn session(&self) -> &Arc<MuxSession> {
        &self.session
    }

    /// Listens on `local_addr`; on each accept, opens a new mux stream,
    /// writes the `{token, mapping_id}` header, then splices.
    pub async fn serve_mapping(
        &self,
        local_addr: &str,
        mapping_id: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PortalError> {
        let listener = TcpListener::bind(local_addr).await?;
        info!(addr = %local_addr, mapping_id, "portal client: listening");

        let mut inflight = JoinSet::new();
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
                            warn!(error = %err, "portal client: accept failed");
                            continue;
                        }
                    };
                    let session = self.session.clone();
                    let token = self.token.expose_secret().clone();
                    let mapping_id = mapping_id.to_string();
                    let pool = self.pool.clone();
                    inflight.spawn(async move {
                        if let Err(err) =
                            relay_one(session, token, mapping_id, socket, pool).await
                        {
                            debug!(%peer, error = %err, "portal client: relay ended");
                        }
                    });
                }
            }
        }

        drop(listener);
        while inflight.join_next().await.is_some() {}
        Ok(())
    }
}

async fn relay_one(
    session: Arc<MuxSession>,
    token: String,
    mapping_id: String,
    local_socket: TcpStream,
    pool: Arc<BufferPool>,
) -> Result<(), PortalError> {
    let mut stream = session.open_stream().await?;
    StreamHeader::new(token, mapping_id).write(&mut stream).await?;
    forwarder::splice(local_socket, stream, pool)
        .await
        .map_err(PortalError::Io)
}
