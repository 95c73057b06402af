use std::sync::Arc;

use russh::client::Handler;
use russh::keys::PublicKey;

use crate::error::SshError;
use crate::ssh::known_hosts::HostKeyVerifier;

/// Bridges russh's per-connection callback trait to a pluggable
/// `HostKeyVerifier` (spec §4.1: "accept any key" default, strict callback
/// for production deployments).
pub struct ClientHandler {
    host: String,
    port: u16,
    verifier: Arc<dyn HostKeyVerifier>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, verifier: Arc<dyn HostKeyVerifier>) -> Self {
        Self {
            host,
            port,
            verifier,
        }
    }
}

impl Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self.verifier.verify(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(SshError::HostKeyMismatch { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
