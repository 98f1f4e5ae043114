use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;

use crate::channel::wire::{Frame, WorkOutcome, WorkRequest, WorkUnit};
use crate::channel::{ChannelState, RemoteChannel};
use crate::clock::now_ms;
use crate::error::{FleetError, Result};

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

type Pending = Mutex<HashMap<Uuid, oneshot::Sender<Result<WorkOutcome>>>>;

struct Shared {
    state: AtomicU8,
    pending: Pending,
}

impl Shared {
    fn fail_pending(&self) {
        // Dropping the senders wakes every in-flight call with an error.
        self.pending.lock().expect("pending lock poisoned").clear();
    }

    fn channel_state(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => ChannelState::Open,
            STATE_CLOSING => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// RPC channel speaking length-delimited JSON frames over a duplex stream.
///
/// A background task reads reply frames and routes them to the pending call
/// by correlation id. When the stream ends or errors, the channel moves to
/// `Closed` and every pending call fails with a transport error.
pub struct FramedChannel<T> {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<SplitSink<Framed<T, LengthDelimitedCodec>, Bytes>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl<T> std::fmt::Debug for FramedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedChannel")
            .field("state", &self.shared.channel_state())
            .finish()
    }
}

impl<T> FramedChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(io: T) -> Self {
        Self::from_framed(Framed::new(io, LengthDelimitedCodec::new()))
    }

    /// Build a channel from an already-framed stream, e.g. one the inbound
    /// acceptor has consumed the hello frame from.
    pub fn from_framed(framed: Framed<T, LengthDelimitedCodec>) -> Self {
        let (sink, stream) = framed.split();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(STATE_OPEN),
            pending: Mutex::new(HashMap::new()),
        });
        let reader = tokio::spawn(read_loop(stream, shared.clone()));
        Self {
            shared,
            writer: tokio::sync::Mutex::new(sink),
            reader: Mutex::new(Some(reader)),
        }
    }

    fn mark_closed(&self) {
        self.shared.state.store(STATE_CLOSED, Ordering::Release);
        self.shared.fail_pending();
    }
}

async fn read_loop<T>(
    mut stream: SplitStream<Framed<T, LengthDelimitedCodec>>,
    shared: Arc<Shared>,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    while let Some(frame) = stream.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Channel read failed, closing");
                break;
            }
        };
        match serde_json::from_slice::<Frame>(&bytes) {
            Ok(Frame::Reply(reply)) => {
                let sender = shared
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&reply.id);
                if let Some(tx) = sender {
                    let result = reply.outcome.map_err(FleetError::Remote);
                    let _ = tx.send(result);
                } else {
                    tracing::warn!(call_id = %reply.id, "Reply for unknown call, dropping");
                }
            }
            Ok(other) => {
                tracing::warn!(frame = ?other, "Unexpected frame from agent, dropping");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable frame from agent, closing");
                break;
            }
        }
    }
    shared.state.store(STATE_CLOSED, Ordering::Release);
    shared.fail_pending();
}

#[async_trait]
impl<T> RemoteChannel for FramedChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn call(&self, work: WorkUnit) -> Result<WorkOutcome> {
        if self.state().is_closing_or_closed() {
            return Err(FleetError::ChannelClosed);
        }

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        {
            let mut sink = self.writer.lock().await;
            // Stamp the clock marker at write time, after any queueing
            // behind other calls, so the delay is attributed to this side.
            let work = match work {
                WorkUnit::ClockMark { .. } => WorkUnit::ClockMark {
                    sent_at_ms: now_ms(),
                },
                other => other,
            };
            let frame = Frame::Request(WorkRequest { id, work });
            let buf = serde_json::to_vec(&frame)?;
            if let Err(e) = sink.send(Bytes::from(buf)).await {
                self.shared
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&id);
                self.mark_closed();
                return Err(FleetError::Transport(e.to_string()));
            }
        }

        match rx.await {
            Ok(result) => result,
            // The reader ended and dropped our sender: closed mid-call.
            Err(_) => Err(FleetError::ChannelClosed),
        }
    }

    fn state(&self) -> ChannelState {
        self.shared.channel_state()
    }

    async fn close(&self) {
        if self.state() == ChannelState::Closed {
            return;
        }
        self.shared.state.store(STATE_CLOSING, Ordering::Release);
        {
            let mut sink = self.writer.lock().await;
            let _ = sink.close().await;
        }
        let handle = self
            .reader
            .lock()
            .expect("reader lock poisoned")
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.mark_closed();
    }
}

impl<T> Drop for FramedChannel<T> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.reader.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
