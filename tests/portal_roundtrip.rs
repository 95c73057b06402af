//! Exercises the Portal Server end to end over real TCP + TLS: a valid
//! token's stream round-trips through a backend and is accounted for
//! per-mapping (byte counters), and an invalid token is rejected without
//! disturbing a sibling stream on the same session.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use sshmesh::config::{PortMappingConfig, PortalServerConfig, TokenConfigEntry};
use sshmesh::mux::MuxConfig;
use sshmesh::pool::{BufferPool, FORWARDER_BUF_SIZE};
use sshmesh::portal::{PortalServer, StreamHeader};
use sshmesh::secret::Secret;
use sshmesh::tls;

fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn write_self_signed_cert(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, signing_key.serialize_pem()).unwrap();
    (cert_path, key_path)
}

/// Binds to an ephemeral port, returns its address, then frees the port
/// again — the server under test re-binds it a moment later.
async fn free_local_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// A backend that echoes back whatever it receives, one connection only.
async fn spawn_echo_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr
}

struct TestServer {
    server: Arc<PortalServer>,
    addr: String,
    shutdown_tx: watch::Sender<bool>,
}

impl TestServer {
    async fn start(cert_dir: &std::path::Path) -> Self {
        let (cert_path, key_path) = write_self_signed_cert(cert_dir);
        let addr = free_local_addr().await;

        let config = PortalServerConfig {
            enabled: true,
            listen_addr: addr.clone(),
            tls_cert_path: cert_path,
            tls_key_path: key_path,
            tokens: vec![TokenConfigEntry {
                token: Secret::new("tok-valid".to_string()),
                allowed_remotes: vec![],
                max_mappings: 16,
            }],
        };

        let pool = BufferPool::new(FORWARDER_BUF_SIZE);
        let server = Arc::new(PortalServer::new(&config, pool).unwrap());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run_server = server.clone();
        tokio::spawn(async move {
            let _ = run_server.run(shutdown_rx).await;
        });

        // Give the listener a moment to actually bind before clients dial it.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        Self {
            server,
            addr,
            shutdown_tx,
        }
    }

    async fn register(&self, id: &str, remote_addr: &str) {
        let (host, port) = remote_addr.rsplit_once(':').unwrap();
        self.server
            .register_mapping(PortMappingConfig {
                id: id.to_string(),
                name: id.to_string(),
                local_addr: "127.0.0.1:0".to_string(),
                remote_host: host.to_string(),
                remote_port: port.parse().unwrap(),
                via: vec![],
                protocol: None,
                enabled: true,
            })
            .await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn dial_client_session(addr: &str) -> sshmesh::mux::MuxSession {
    let socket = TcpStream::connect(addr).await.unwrap();
    let tls_config = tls::build_client_config_insecure();
    let server_name = ServerName::try_from("localhost").unwrap();
    tls::tls_client_mux(socket, tls_config, server_name, MuxConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn portal_round_trip_with_valid_token_accounts_bytes() {
    install_crypto_provider();
    let dir = tempfile::tempdir().unwrap();
    let harness = TestServer::start(dir.path()).await;
    let backend_addr = spawn_echo_backend().await;
    harness.register("mapping-a", &backend_addr).await;

    let session = dial_client_session(&harness.addr).await;
    let mut stream = session.open_stream().await.unwrap();
    StreamHeader::new("tok-valid", "mapping-a")
        .write(&mut stream)
        .await
        .unwrap();

    let payload = b"scenario-3-round-trip-payload";
    stream.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, payload);

    stream.shutdown().await.unwrap();
    drop(stream);

    // Let the backend-side pump observe the shutdown and settle the counters.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let state = harness.server.mapping_state("mapping-a").await.unwrap();
    assert_eq!(
        state.bytes_in.load(std::sync::atomic::Ordering::Relaxed),
        payload.len() as u64
    );
    assert_eq!(
        state.bytes_out.load(std::sync::atomic::Ordering::Relaxed),
        payload.len() as u64
    );
}

#[tokio::test]
async fn bad_token_is_rejected_but_sibling_stream_is_unaffected() {
    install_crypto_provider();
    let dir = tempfile::tempdir().unwrap();
    let harness = TestServer::start(dir.path()).await;
    let backend_addr = spawn_echo_backend().await;
    harness.register("mapping-b", &backend_addr).await;

    let session = dial_client_session(&harness.addr).await;

    // Sibling #1: bad token. The server closes this stream without
    // disturbing the session or any other stream on it.
    let mut bad_stream = session.open_stream().await.unwrap();
    StreamHeader::new("tok-garbage", "mapping-b")
        .write(&mut bad_stream)
        .await
        .unwrap();
    let mut scratch = [0u8; 1];
    let read_result = bad_stream.read(&mut scratch).await;
    assert!(read_result.is_ok(), "rejected stream should EOF cleanly, not hang");
    assert_eq!(read_result.unwrap(), 0);

    // Sibling #2: valid token, same session. Must still work.
    let mut good_stream = session.open_stream().await.unwrap();
    StreamHeader::new("tok-valid", "mapping-b")
        .write(&mut good_stream)
        .await
        .unwrap();
    let payload = b"sibling-still-works";
    good_stream.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    good_stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, payload);

    assert!(!session.is_closed());
}
