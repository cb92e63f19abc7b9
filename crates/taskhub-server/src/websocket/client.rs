//! Per-connection client actor.
//!
//! Each accepted socket becomes a [`Client`] running two tasks:
//!
//! - **read pump**: reads inbound frames under a read deadline, answers
//!   transport and envelope pings, and on exit asks the hub to unregister
//! - **write pump**: sole writer to the socket; forwards mailbox frames,
//!   pings on an interval, and closes the socket once
//!
//! The hub only ever touches a client through its [`ClientHandle`], which
//! holds the mailbox's sending half.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use taskhub_core::ClientId;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::{Connection, ConnectionError, Frame};
use super::hub::HubHandle;
use super::mailbox::{EnqueueError, Mailbox, MailboxReceiver};
use super::message::{Envelope, MessageType};
use crate::config::ClientConfig;

/// Where a client is in its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Pumps running, mailbox open.
    Active,
    /// Mailbox closed or a pump has exited; teardown in progress.
    Closing,
    /// Both pumps have exited and the connection is released.
    Closed,
}

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Teardown state shared by both pumps.
///
/// Only the write pump holds the sink, so it alone closes the connection;
/// the read pump ends the write pump through the shared cancel token.
#[derive(Debug)]
struct Lifecycle {
    state: AtomicU8,
    live_pumps: AtomicU8,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
            live_pumps: AtomicU8::new(2),
        }
    }

    fn state(&self) -> ClientState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => ClientState::Active,
            CLOSING => ClientState::Closing,
            _ => ClientState::Closed,
        }
    }

    fn begin_closing(&self) {
        let _ = self
            .state
            .compare_exchange(ACTIVE, CLOSING, Ordering::AcqRel, Ordering::Acquire);
    }

    fn pump_exited(&self) {
        if self.live_pumps.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.store(CLOSED, Ordering::Release);
        }
    }
}

/// Cheap, cloneable reference to a client: its ID, identity, and mailbox.
#[derive(Clone)]
pub struct ClientHandle {
    id: ClientId,
    identity: Arc<str>,
    mailbox: Arc<Mailbox>,
    lifecycle: Arc<Lifecycle>,
}

impl ClientHandle {
    /// A handle with a fresh ID and an empty mailbox.
    ///
    /// [`Client::new`] builds one of these for every connection; standalone
    /// handles are useful for consumers that read the mailbox directly.
    pub fn new(identity: impl Into<String>, mailbox_capacity: usize) -> (Self, MailboxReceiver) {
        let (mailbox, rx) = Mailbox::new(mailbox_capacity);
        let handle = Self {
            id: ClientId::new(),
            identity: Arc::from(identity.into()),
            mailbox: Arc::new(mailbox),
            lifecycle: Arc::new(Lifecycle::new()),
        };
        (handle, rx)
    }

    /// Unique ID.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Authenticated user this connection belongs to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.lifecycle.state()
    }

    /// Queue a frame for the write pump without waiting.
    pub fn enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        self.mailbox.try_enqueue(frame)
    }

    /// Whether the mailbox has been closed.
    pub fn is_mailbox_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Close the mailbox; the write pump drains it and then closes the socket.
    pub(crate) fn close_mailbox(&self) -> bool {
        let closed = self.mailbox.close();
        if closed {
            self.lifecycle.begin_closing();
        }
        closed
    }

    fn reply(&self, frame: Frame) {
        if let Err(e) = self.enqueue(frame) {
            debug!(client_id = %self.id, error = %e, "reply dropped");
        }
    }
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A connection bound to a hub, not yet running.
pub struct Client<C> {
    handle: ClientHandle,
    receiver: MailboxReceiver,
    connection: C,
    hub: HubHandle,
    config: ClientConfig,
}

impl<C: Connection> Client<C> {
    /// Bind `connection` to `hub`, using the hub's client defaults.
    pub fn new(hub: HubHandle, connection: C, identity: impl Into<String>) -> Self {
        let config = *hub.config();
        Self::with_config(hub, connection, identity, config.mailbox_capacity, config.client)
    }

    /// Bind `connection` to `hub` with explicit sizing and timing.
    pub fn with_config(
        hub: HubHandle,
        connection: C,
        identity: impl Into<String>,
        mailbox_capacity: usize,
        config: ClientConfig,
    ) -> Self {
        let (handle, receiver) = ClientHandle::new(identity, mailbox_capacity);
        let normalized = config.normalized();
        if normalized != config {
            warn!(client_id = %handle.id, ?config, "zero client timings raised to the minimum interval");
        }
        Self {
            handle,
            receiver,
            connection,
            hub,
            config: normalized,
        }
    }

    /// Handle to register with the hub.
    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Client ID.
    pub fn id(&self) -> &ClientId {
        self.handle.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        self.handle.state()
    }

    /// Spawn the read and write pumps.
    ///
    /// Register the handle with the hub first; the pumps unregister it on exit.
    pub fn start(self) -> ClientTasks {
        let Self {
            handle,
            receiver,
            connection,
            hub,
            config,
        } = self;
        let (sink, stream) = connection.split();
        let cancel = CancellationToken::new();

        debug!(client_id = %handle.id, identity = %handle.identity, "starting client pumps");

        let read = tokio::spawn(read_pump(
            stream,
            handle.clone(),
            hub,
            cancel.clone(),
            config.pong_wait,
        ));
        let write = tokio::spawn(write_pump(sink, receiver, handle, cancel, config));
        ClientTasks { read, write }
    }
}

/// Join handles for a running client's pumps.
#[derive(Debug)]
pub struct ClientTasks {
    read: JoinHandle<()>,
    write: JoinHandle<()>,
}

impl ClientTasks {
    /// Wait for both pumps to exit.
    pub async fn join(self) {
        let (read, write) = tokio::join!(self.read, self.write);
        if let Err(e) = read.and(write) {
            warn!(error = %e, "client pump panicked");
        }
    }
}

async fn read_pump<S>(
    mut stream: S,
    client: ClientHandle,
    hub: HubHandle,
    cancel: CancellationToken,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<Frame, ConnectionError>> + Unpin,
{
    let exit = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break None,
            next = timeout(pong_wait, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => break Some(ConnectionError::ReadTimeout(pong_wait)),
            Ok(None) | Ok(Some(Ok(Frame::Close))) => break Some(ConnectionError::Closed),
            Ok(Some(Err(e))) => break Some(e),
            Ok(Some(Ok(frame))) => frame,
        };
        match frame {
            Frame::Ping(data) => client.reply(Frame::Pong(data)),
            Frame::Pong(_) => trace!(client_id = %client.id, "pong received"),
            Frame::Text(text) => handle_text(&client, &text),
            Frame::Binary(data) => {
                debug!(client_id = %client.id, len = data.len(), "ignoring binary frame");
            }
            Frame::Close => {}
        }
    };

    match exit {
        Some(ConnectionError::Closed) => info!(client_id = %client.id, "client disconnected"),
        Some(e) => warn!(client_id = %client.id, error = %e, "client read failed"),
        None => debug!(client_id = %client.id, "read pump cancelled"),
    }

    client.lifecycle.begin_closing();
    if let Err(e) = hub.unregister_client(client.clone()).await {
        debug!(client_id = %client.id, error = %e, "unregister skipped");
    }
    cancel.cancel();
    client.lifecycle.pump_exited();
}

fn handle_text(client: &ClientHandle, text: &str) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(client_id = %client.id, error = %e, "ignoring undecodable frame");
            return;
        }
    };
    if envelope.message_type != MessageType::Ping {
        debug!(client_id = %client.id, message_type = %envelope.message_type, "ignoring inbound message");
        return;
    }
    match Envelope::new(MessageType::Pong, envelope.payload).to_frame() {
        Ok(frame) => client.reply(Frame::Text(frame)),
        Err(e) => warn!(client_id = %client.id, error = %e, "failed to encode pong"),
    }
}

async fn write_pump<K>(
    mut sink: K,
    mut mailbox: MailboxReceiver,
    client: ClientHandle,
    cancel: CancellationToken,
    config: ClientConfig,
) where
    K: Sink<Frame, Error = ConnectionError> + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);

    let result = loop {
        let frame = tokio::select! {
            frame = mailbox.recv() => match frame {
                Some(frame) => frame,
                None => break Ok(()),
            },
            _ = ping.tick() => Frame::Ping(Bytes::new()),
            () = cancel.cancelled() => break Ok(()),
        };
        if let Err(e) = write_frame(&mut sink, frame, config.write_wait).await {
            break Err(e);
        }
    };

    if let Err(e) = result {
        warn!(client_id = %client.id, error = %e, "client write failed");
    }

    client.lifecycle.begin_closing();
    cancel.cancel();
    match timeout(config.write_wait, sink.close()).await {
        Ok(Ok(())) => trace!(client_id = %client.id, "connection closed"),
        Ok(Err(e)) => debug!(client_id = %client.id, error = %e, "close failed"),
        Err(_) => debug!(client_id = %client.id, "close timed out"),
    }
    client.lifecycle.pump_exited();
}

async fn write_frame<K>(sink: &mut K, frame: Frame, write_wait: Duration) -> Result<(), ConnectionError>
where
    K: Sink<Frame, Error = ConnectionError> + Unpin,
{
    timeout(write_wait, sink.send(frame))
        .await
        .map_err(|_| ConnectionError::WriteTimeout(write_wait))?
}
