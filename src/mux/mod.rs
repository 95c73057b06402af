//! Stream multiplexer: a single TLS connection carrying many independent
//! byte streams, framed with an smux-v1-compatible wire format (spec §4.4).

mod config;
mod frame;
mod session;
mod stream;

pub use config::MuxConfig;
pub use session::{MuxSession, Role};
pub use stream::MuxStream;

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn client_opens_server_accepts_and_data_flows_both_ways() {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let client = MuxSession::new(client_io, Role::Client, MuxConfig::default());
        let server = MuxSession::new(server_io, Role::Server, MuxConfig::default());

        let mut client_stream = client.open_stream().await.unwrap();
        let mut server_stream = server.accept_stream().await.unwrap();

        client_stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server_stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server_stream.write_all(b"pong").await.unwrap();
        let mut buf = [0u8; 4];
        client_stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");

        assert_eq!(client.num_streams(), 1);
        assert_eq!(server.num_streams(), 1);
    }

    #[tokio::test]
    async fn writes_larger_than_the_stream_window_still_arrive_whole() {
        let mut cfg = MuxConfig::default();
        cfg.max_stream_buffer = 4 * 1024;
        cfg.max_receive_buffer = 1024 * 1024;

        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);
        let client = MuxSession::new(client_io, Role::Client, cfg.clone());
        let server = MuxSession::new(server_io, Role::Server, cfg);

        let mut client_stream = client.open_stream().await.unwrap();
        let mut server_stream = server.accept_stream().await.unwrap();

        let payload = vec![0x5au8; 64 * 1024];
        let payload_clone = payload.clone();
        let writer = tokio::spawn(async move {
            client_stream.write_all(&payload_clone).await.unwrap();
        });

        let mut received = vec![0u8; payload.len()];
        server_stream.read_exact(&mut received).await.unwrap();
        writer.await.unwrap();

        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn shutdown_on_one_side_is_observed_as_eof_on_the_other() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = MuxSession::new(client_io, Role::Client, MuxConfig::default());
        let server = MuxSession::new(server_io, Role::Server, MuxConfig::default());

        let mut client_stream = client.open_stream().await.unwrap();
        let mut server_stream = server.accept_stream().await.unwrap();

        client_stream.shutdown().await.unwrap();

        let mut buf = Vec::new();
        let n = server_stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn keep_alive_timeout_closes_the_session_and_fails_pending_reads() {
        let mut cfg = MuxConfig::default();
        cfg.keep_alive_interval = std::time::Duration::from_millis(20);
        cfg.keep_alive_timeout = std::time::Duration::from_millis(50);

        // Nothing ever reads the other end, so no frame this side sends is
        // ever acknowledged and `last_activity` never advances: the peer
        // looks silent, the same as a dead/unreachable link.
        let (server_io, _unused) = tokio::io::duplex(64 * 1024);
        let server = MuxSession::new(server_io, Role::Server, cfg);

        let mut stream = server.open_stream().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert!(server.is_closed());

        let mut buf = [0u8; 4];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
