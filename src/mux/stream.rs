use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, OwnedSemaphorePermit};

use crate::mux::frame::Frame;
use crate::mux::session::SessionInner;

type IncomingItem = (Bytes, OwnedSemaphorePermit);

/// One logical byte stream inside a `MuxSession` (spec §3, §4.4). Implements
/// `AsyncRead`/`AsyncWrite` so it drops straight into the Forwarder
/// Primitive like any other transport.
pub struct MuxStream {
    id: u32,
    inner: Arc<SessionInner>,
    send_window: Arc<AtomicUsize>,
    write_waker: Arc<Mutex<Option<Waker>>>,
    closed: Arc<AtomicBool>,
    incoming_rx: mpsc::UnboundedReceiver<IncomingItem>,
    leftover: Option<IncomingItem>,
    fin_sent: bool,
}

impl MuxStream {
    pub(crate) fn new(
        id: u32,
        inner: Arc<SessionInner>,
        send_window: Arc<AtomicUsize>,
        write_waker: Arc<Mutex<Option<Waker>>>,
        closed: Arc<AtomicBool>,
        incoming_rx: mpsc::UnboundedReceiver<IncomingItem>,
    ) -> Self {
        Self {
            id,
            inner,
            send_window,
            write_waker,
            closed,
            incoming_rx,
            leftover: None,
            fin_sent: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.inner.closed.load(Ordering::Acquire) && this.leftover.is_none() {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mux session closed",
            )));
        }
        loop {
            if let Some((data, permit)) = this.leftover.take() {
                let n = buf.remaining().min(data.len());
                buf.put_slice(&data[..n]);
                if n < data.len() {
                    this.leftover = Some((data.slice(n..), permit));
                } else {
                    drop(permit);
                }
                if n > 0 {
                    let _ = this
                        .inner
                        .write_tx
                        .send(Frame::window_update(this.id, n as u32));
                }
                return Poll::Ready(Ok(()));
            }
            match this.incoming_rx.poll_recv(cx) {
                Poll::Ready(Some(item)) => {
                    this.leftover = Some(item);
                    continue;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mux stream closed",
            )));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let avail = this.send_window.load(Ordering::Acquire);
        if avail == 0 {
            *this.write_waker.lock() = Some(cx.waker().clone());
            if this.send_window.load(Ordering::Acquire) == 0 {
                return Poll::Pending;
            }
        }

        let avail = this.send_window.load(Ordering::Acquire);
        let n = buf.len().min(avail).min(this.inner.config.max_frame_size);
        if n == 0 {
            *this.write_waker.lock() = Some(cx.waker().clone());
            return Poll::Pending;
        }
        this.send_window.fetch_sub(n, Ordering::AcqRel);
        this.inner
            .write_tx
            .send(Frame::push(this.id, Bytes::copy_from_slice(&buf[..n])))
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "mux session closed")
            })?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if !this.fin_sent {
            this.fin_sent = true;
            this.closed.store(true, Ordering::Release);
            let _ = this.inner.write_tx.send(Frame::fin(this.id));
            if this.inner.streams.lock().remove(&this.id).is_some() {
                this.inner
                    .num_streams
                    .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
            }
        }
        Poll::Ready(Ok(()))
    }
}
