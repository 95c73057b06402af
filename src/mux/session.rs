use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Waker;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::MuxError;
use crate::mux::config::MuxConfig;
use crate::mux::frame::{self, Frame};
use crate::mux::stream::MuxStream;

/// Which end of the pair opened the session. Only affects stream id parity
/// (spec §4.4): clients allocate odd ids, servers even ones, so both sides
/// can open streams without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

pub(crate) struct StreamState {
    pub(crate) incoming_tx: mpsc::UnboundedSender<(Bytes, tokio::sync::OwnedSemaphorePermit)>,
    pub(crate) send_window: Arc<AtomicUsize>,
    pub(crate) write_waker: Arc<Mutex<Option<Waker>>>,
    pub(crate) closed: Arc<AtomicBool>,
}

pub(crate) struct SessionInner {
    pub(crate) streams: Mutex<HashMap<u32, StreamState>>,
    pub(crate) closed: AtomicBool,
    pub(crate) num_streams: AtomicUsize,
    pub(crate) config: MuxConfig,
    pub(crate) write_tx: mpsc::UnboundedSender<Frame>,
    pub(crate) recv_semaphore: Arc<Semaphore>,
    pub(crate) last_activity: Mutex<Instant>,
}

/// One multiplexed session atop an already-established byte stream (spec
/// §4.4). The transport is expected to already be TLS (see `crate::tls`);
/// `MuxSession` itself is transport-agnostic.
pub struct MuxSession {
    role: Role,
    next_stream_id: AtomicU32,
    inner: Arc<SessionInner>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MuxStream>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    keepalive_task: JoinHandle<()>,
}

impl MuxSession {
    pub fn new<IO>(io: IO, role: Role, config: MuxConfig) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut read_half, mut write_half) = split(io);
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Frame>();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel::<MuxStream>();

        let inner = Arc::new(SessionInner {
            streams: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            num_streams: AtomicUsize::new(0),
            recv_semaphore: Arc::new(Semaphore::new(config.max_receive_buffer)),
            config,
            write_tx,
            last_activity: Mutex::new(Instant::now()),
        });

        let writer_task = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(frame) = write_rx.recv().await {
                    if let Err(err) = frame.write(&mut write_half).await {
                        warn!(error = %err, "mux writer: transport write failed");
                        break;
                    }
                }
                inner.closed.store(true, Ordering::Release);
            })
        };

        let reader_task = {
            let inner = inner.clone();
            let accept_tx = accept_tx.clone();
            tokio::spawn(async move {
                loop {
                    match Frame::read(&mut read_half, inner.config.max_frame_size).await {
                        Ok(frame) => {
                            *inner.last_activity.lock() = Instant::now();
                            if let Err(err) =
                                dispatch_frame(&inner, &accept_tx, role, frame).await
                            {
                                warn!(error = %err, "mux reader: dropping malformed frame");
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "mux reader: transport closed");
                            break;
                        }
                    }
                }
                close_inner(&inner);
            })
        };

        let keepalive_task = {
            let inner = inner.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(inner.config.keep_alive_interval);
                loop {
                    ticker.tick().await;
                    if inner.closed.load(Ordering::Acquire) {
                        break;
                    }
                    let idle = inner.last_activity.lock().elapsed();
                    if idle > inner.config.keep_alive_timeout {
                        warn!(?idle, "mux session: peer keep-alive timed out");
                        close_inner(&inner);
                        break;
                    }
                    if inner.write_tx.send(Frame::nop()).is_err() {
                        break;
                    }
                }
            })
        };

        Self {
            role,
            next_stream_id: AtomicU32::new(match role {
                Role::Client => 1,
                Role::Server => 2,
            }),
            inner,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
            reader_task,
            writer_task,
            keepalive_task,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn num_streams(&self) -> usize {
        self.inner.num_streams.load(Ordering::Acquire)
    }

    /// Allocate a new stream id (this side's parity), send SYN and return
    /// the handle immediately without waiting for any peer acknowledgement
    /// (spec §4.4).
    pub async fn open_stream(&self) -> Result<MuxStream, MuxError> {
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let id = self.next_stream_id.fetch_add(2, Ordering::AcqRel);
        let stream = register_stream(&self.inner, id);
        self.inner
            .write_tx
            .send(Frame::syn(id))
            .map_err(|_| MuxError::SessionClosed)?;
        trace!(stream_id = id, "mux: opened stream");
        Ok(stream)
    }

    /// Block until the peer opens a stream towards us.
    pub async fn accept_stream(&self) -> Result<MuxStream, MuxError> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(MuxError::SessionClosed)
    }

    pub async fn close(&self) -> Result<(), MuxError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.reader_task.abort();
        self.writer_task.abort();
        self.keepalive_task.abort();
        let mut streams = self.inner.streams.lock();
        for (_, state) in streams.drain() {
            state.closed.store(true, Ordering::Release);
            if let Some(waker) = state.write_waker.lock().take() {
                waker.wake();
            }
        }
        self.inner.num_streams.store(0, Ordering::Release);
        Ok(())
    }
}

impl Drop for MuxSession {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
        self.keepalive_task.abort();
    }
}

fn close_inner(inner: &Arc<SessionInner>) {
    if inner.closed.swap(true, Ordering::AcqRel) {
        return;
    }
    let mut streams = inner.streams.lock();
    for (_, state) in streams.drain() {
        state.closed.store(true, Ordering::Release);
        if let Some(waker) = state.write_waker.lock().take() {
            waker.wake();
        }
    }
    inner.num_streams.store(0, Ordering::Release);
}

fn register_stream(inner: &Arc<SessionInner>, id: u32) -> MuxStream {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let send_window = Arc::new(AtomicUsize::new(inner.config.max_stream_buffer));
    let write_waker = Arc::new(Mutex::new(None));
    let closed = Arc::new(AtomicBool::new(false));
    inner.streams.lock().insert(
        id,
        StreamState {
            incoming_tx,
            send_window: send_window.clone(),
            write_waker: write_waker.clone(),
            closed: closed.clone(),
        },
    );
    inner.num_streams.fetch_add(1, Ordering::AcqRel);
    MuxStream::new(id, inner.clone(), send_window, write_waker, closed, incoming_rx)
}

async fn dispatch_frame(
    inner: &Arc<SessionInner>,
    accept_tx: &mpsc::UnboundedSender<MuxStream>,
    role: Role,
    frame: Frame,
) -> Result<(), MuxError> {
    match frame.cmd {
        frame::CMD_SYN => {
            let stream = register_stream(inner, frame.stream_id);
            let _ = accept_tx.send(stream);
        }
        frame::CMD_PSH => {
            let len = frame.payload.len();
            let maybe_tx = inner
                .streams
                .lock()
                .get(&frame.stream_id)
                .map(|s| s.incoming_tx.clone());
            if let Some(tx) = maybe_tx {
                let permit = inner
                    .recv_semaphore
                    .clone()
                    .acquire_many_owned(len as u32)
                    .await
                    .map_err(|_| MuxError::SessionClosed)?;
                let _ = tx.send((frame.payload, permit));
            }
        }
        frame::CMD_FIN => {
            if let Some(state) = inner.streams.lock().remove(&frame.stream_id) {
                state.closed.store(true, Ordering::Release);
                if let Some(waker) = state.write_waker.lock().take() {
                    waker.wake();
                }
                inner.num_streams.fetch_sub(1, Ordering::AcqRel);
            }
        }
        frame::CMD_UPD => {
            let consumed = frame::decode_window_update(&frame.payload);
            if let Some(state) = inner.streams.lock().get(&frame.stream_id) {
                state
                    .send_window
                    .fetch_add(consumed as usize, Ordering::AcqRel);
                if let Some(waker) = state.write_waker.lock().take() {
                    waker.wake();
                }
            }
        }
        frame::CMD_NOP => {}
        other => {
            let _ = role;
            debug!(cmd = other, "mux: ignoring unknown frame command");
        }
    }
    Ok(())
}
