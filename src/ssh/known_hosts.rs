use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use russh::keys::{HashAlg, PublicKey};

use crate::error::SshError;

/// Seam for host key trust decisions (spec §4.1, §9). `Chain`/`HopClient`
/// call this once per hop connection, before authenticating.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError>;
}

/// Accepts any host key. Development default (spec §9) — fine against a hop
/// you control the network path to, never otherwise.
pub struct AcceptAllHostKeys;

impl HostKeyVerifier for AcceptAllHostKeys {
    fn verify(&self, _host: &str, _port: u16, _key: &PublicKey) -> Result<(), SshError> {
        Ok(())
    }
}

/// Trust-on-first-use pinning: the first key seen for a `host:port` is
/// recorded, later connections must present the same key. A caller that
/// wants strict known_hosts-file semantics can pre-populate entries with
/// `with_pinned` before connecting anything.
pub struct StaticHostKeyVerifier {
    known: RwLock<HashMap<(String, u16), String>>,
}

impl StaticHostKeyVerifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            known: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_pinned(entries: impl IntoIterator<Item = ((String, u16), String)>) -> Arc<Self> {
        Arc::new(Self {
            known: RwLock::new(entries.into_iter().collect()),
        })
    }
}

impl HostKeyVerifier for StaticHostKeyVerifier {
    fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        let map_key = (host.to_string(), port);
        let mut known = self.known.write();
        match known.get(&map_key) {
            Some(pinned) if pinned == &fingerprint => Ok(()),
            Some(_) => Err(SshError::HostKeyMismatch {
                host: host.to_string(),
                port,
            }),
            None => {
                known.insert(map_key, fingerprint);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::keys::PrivateKey;

    fn test_key(seed: u8) -> PublicKey {
        let mut rng = rand::rngs::StdRng::from_seed([seed; 32]);
        PrivateKey::random(&mut rng, russh::keys::Algorithm::Ed25519)
            .unwrap()
            .public_key()
            .clone()
    }

    use rand::SeedableRng;

    #[test]
    fn pins_first_key_then_rejects_a_changed_one() {
        let verifier = StaticHostKeyVerifier::new();
        let first = test_key(1);
        verifier.verify("bastion.example.com", 22, &first).unwrap();
        verifier.verify("bastion.example.com", 22, &first).unwrap();

        let second = test_key(2);
        let err = verifier
            .verify("bastion.example.com", 22, &second)
            .unwrap_err();
        assert!(matches!(err, SshError::HostKeyMismatch { .. }));
    }

    #[test]
    fn accept_all_never_errors() {
        let key = test_key(3);
        AcceptAllHostKeys.verify("anything", 22, &key).unwrap();
    }
}
