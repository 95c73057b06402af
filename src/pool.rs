use bytes::BytesMut;
use parking_lot::Mutex;

/// Fixed-size slab free-list, shared by the Port Forwarder and the Portal
/// Server's Forwarder Primitive (spec §5, §9). Allocates fresh under
/// contention rather than blocking; returned buffers are cleared and kept
/// around for reuse, not shrunk.
pub struct BufferPool {
    slab_size: usize,
    free: Mutex<Vec<BytesMut>>,
}

/// A pooled buffer. Returns itself to the pool on drop.
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: std::sync::Arc<BufferPool>,
}

impl BufferPool {
    pub fn new(slab_size: usize) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            slab_size,
            free: Mutex::new(Vec::new()),
        })
    }

    pub fn take(self: &std::sync::Arc<Self>) -> PooledBuf {
        let buf = self
            .free
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::zeroed(self.slab_size));
        PooledBuf {
            buf: Some(buf),
            pool: self.clone(),
        }
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = BytesMut;
    fn deref(&self) -> &Self::Target {
        self.buf.as_ref().expect("buffer taken twice")
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut().expect("buffer taken twice")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.resize(self.pool.slab_size, 0);
            self.pool.free.lock().push(buf);
        }
    }
}

/// Default slab size for the Port Forwarder / Portal Server copy pumps (§4.7).
pub const FORWARDER_BUF_SIZE: usize = 32 * 1024;
