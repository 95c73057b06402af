use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::error::MuxError;
use crate::mux::{MuxConfig, MuxSession, Role};

pub fn load_certs(path: &Path) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

pub fn load_private_key(path: &Path) -> std::io::Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key in file")
    })
}

/// Build a `ServerConfig` from a cert/key pair on disk (spec §6, Portal Server TLS).
pub fn build_server_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<rustls::ServerConfig>, MuxError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(MuxError::TlsHandshake)?;
    Ok(Arc::new(config))
}

/// A client config that trusts only certificates chaining to `ca_cert_path`.
pub fn build_client_config_with_ca(ca_cert_path: &Path) -> Result<Arc<rustls::ClientConfig>, MuxError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in load_certs(ca_cert_path)? {
        roots.add(cert).map_err(MuxError::TlsHandshake)?;
    }
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// A client config that accepts any server certificate. Development default
/// only (spec §9) — real deployments should use `build_client_config_with_ca`.
pub fn build_client_config_insecure() -> Arc<rustls::ClientConfig> {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    Arc::new(config)
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Drive a TLS server handshake over `io` and hand the result to a new
/// `MuxSession` (spec §4.5).
pub async fn tls_server_mux<IO>(
    io: IO,
    tls_config: Arc<rustls::ServerConfig>,
    mux_config: MuxConfig,
) -> Result<MuxSession, MuxError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let stream = TlsAcceptor::from(tls_config).accept(io).await?;
    Ok(MuxSession::new(stream, Role::Server, mux_config))
}

/// Drive a TLS client handshake over `io` and hand the result to a new
/// `MuxSession` (spec §4.6).
pub async fn tls_client_mux<IO>(
    io: IO,
    tls_config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
    mux_config: MuxConfig,
) -> Result<MuxSession, MuxError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let stream = TlsConnector::from(tls_config)
        .connect(server_name, io)
        .await?;
    Ok(MuxSession::new(stream, Role::Client, mux_config))
}

#[cfg(test)]
pub fn generate_self_signed_for_test(subject_alt_name: &str) -> (String, String) {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec![subject_alt_name.to_string()]).unwrap();
    (cert.pem(), signing_key.serialize_pem())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[tokio::test]
    async fn handshakes_over_an_in_memory_duplex_pair() {
        install_crypto_provider();
        let (cert_pem, key_pem) = generate_self_signed_for_test("localhost");

        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, &cert_pem).unwrap();
        std::fs::write(&key_path, &key_pem).unwrap();

        let server_config = build_server_config(&cert_path, &key_path).unwrap();
        let client_config = build_client_config_insecure();

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server_name = ServerName::try_from("localhost").unwrap();

        let (client_result, server_result) = tokio::join!(
            tls_client_mux(client_io, client_config, server_name, MuxConfig::default()),
            tls_server_mux(server_io, server_config, MuxConfig::default()),
        );
        let client = client_result.unwrap();
        let server = server_result.unwrap();

        let mut client_stream = client.open_stream().await.unwrap();
        let mut server_stream = server.accept_stream().await.unwrap();
        client_stream.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut server_stream, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"hi");
    }
}
