use std::error::Error as StdError;

/// Errors from the SSH chain / hop client layer.
#[derive(thiserror::Error, Debug)]
pub enum SshError {
    #[error("dial failed: {0}")]
    Dial(std::io::Error),
    #[error("ssh handshake failed: {0}")]
    Handshake(#[from] russh::Error),
    #[error("ssh authentication was rejected")]
    Auth,
    #[error("could not parse private key material: {0}")]
    KeyParse(#[from] russh::keys::Error),
    #[error("peer hop is not connected")]
    PeerNotConnected,
    #[error("client/chain is not connected")]
    NotConnected,
    #[error("ssh channel open was refused: {0}")]
    ChannelOpen(russh::Error),
    #[error("host key did not match the pinned entry for {host}:{port}")]
    HostKeyMismatch { host: String, port: u16 },
    #[error("hop {index} ({host}): {source}")]
    HopFailed {
        index: usize,
        host: String,
        #[source]
        source: Box<SshError>,
    },
    #[error("a chain must have at least one hop")]
    EmptyChain,
    #[error("unknown hop name in via list: {0}")]
    UnknownHop(String),
    #[error("command exited with status {exit_status}")]
    CommandFailed { exit_status: u32 },
    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl SshError {
    pub fn other<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Errors from the stream-multiplexing layer.
#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    #[error("tls handshake failed: {0}")]
    TlsHandshake(#[from] rustls::Error),
    #[error("mux session is closed")]
    SessionClosed,
    #[error("peer did not send a keep-alive within the timeout")]
    SessionTimeout,
    #[error("frame too large ({len} bytes, max {max})")]
    FrameTooLarge { len: usize, max: usize },
    #[error("unsupported mux protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stream window exhausted")]
    WindowExhausted,
}

/// Errors from the reverse-portal (server + client) layer.
#[derive(thiserror::Error, Debug)]
pub enum PortalError {
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("token was not recognized")]
    InvalidToken,
    #[error("remote {0} is not allowed by this token's ACL")]
    RemoteNotAllowed(String),
    #[error("mapping {0} is not registered")]
    UnknownMapping(String),
    #[error("local listener was closed")]
    ListenerClosed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide error for callers who don't care which subsystem failed.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error(transparent)]
    Portal(#[from] PortalError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}
