use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::pool::BufferPool;

/// Bidirectional buffered copy shared by the Port Forwarder and the Portal
/// Server (spec §4.7). Spawns two copy pumps against pooled 32 KiB buffers;
/// returns as soon as either pump ends, closing both endpoints so the other
/// pump unwinds too. The first observed error wins, the second is discarded.
pub async fn splice<A, B>(a: A, b: B, pool: Arc<BufferPool>) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    splice_with_counters(a, b, pool, None, None).await
}

/// Same as [`splice`], optionally tallying bytes moved in each direction
/// (used by the Portal Server for per-mapping accounting, spec §4.5/P8).
pub async fn splice_with_counters<A, B>(
    a: A,
    b: B,
    pool: Arc<BufferPool>,
    a_to_b_bytes: Option<Arc<AtomicU64>>,
    b_to_a_bytes: Option<Arc<AtomicU64>>,
) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_rd, mut a_wr) = split(a);
    let (mut b_rd, mut b_wr) = split(b);
    let mut buf_ab = pool.take();
    let mut buf_ba = pool.take();

    let result = tokio::select! {
        res = pump(&mut a_rd, &mut b_wr, &mut buf_ab, a_to_b_bytes.as_ref()) => res,
        res = pump(&mut b_rd, &mut a_wr, &mut buf_ba, b_to_a_bytes.as_ref()) => res,
    };

    let _ = a_wr.shutdown().await;
    let _ = b_wr.shutdown().await;

    result
}

async fn pump<R, W>(
    r: &mut R,
    w: &mut W,
    buf: &mut [u8],
    counter: Option<&Arc<AtomicU64>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let n = r.read(buf).await?;
        if n == 0 {
            let _ = w.shutdown().await;
            return Ok(());
        }
        w.write_all(&buf[..n]).await?;
        if let Some(counter) = counter {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferPool, FORWARDER_BUF_SIZE};
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn splices_until_either_side_hits_eof() {
        let pool = BufferPool::new(FORWARDER_BUF_SIZE);
        let (mut client_a, server_a) = tokio::io::duplex(4096);
        let (mut client_b, server_b) = tokio::io::duplex(4096);

        let splice_task = tokio::spawn(splice(server_a, server_b, pool));

        client_a.write_all(b"hello-from-a").await.unwrap();
        let mut buf = [0u8; 12];
        tokio::io::AsyncReadExt::read_exact(&mut client_b, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"hello-from-a");

        client_b.write_all(b"hello-from-b").await.unwrap();
        let mut buf = [0u8; 12];
        tokio::io::AsyncReadExt::read_exact(&mut client_a, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"hello-from-b");

        drop(client_a);
        drop(client_b);
        splice_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn tallies_bytes_moved_in_each_direction() {
        let pool = BufferPool::new(FORWARDER_BUF_SIZE);
        let (mut client_a, server_a) = tokio::io::duplex(4096);
        let (client_b, server_b) = tokio::io::duplex(4096);

        let a_to_b = Arc::new(AtomicU64::new(0));
        let b_to_a = Arc::new(AtomicU64::new(0));
        let splice_task = tokio::spawn(splice_with_counters(
            server_a,
            server_b,
            pool,
            Some(a_to_b.clone()),
            Some(b_to_a.clone()),
        ));

        client_a.write_all(b"12345").await.unwrap();
        drop(client_a);
        drop(client_b);
        splice_task.await.unwrap().unwrap();

        assert_eq!(a_to_b.load(Ordering::Relaxed), 5);
        assert_eq!(b_to_a.load(Ordering::Relaxed), 0);
    }
}
