//! Broadcast hub: a single control loop that owns the client registry.
//!
//! Register, unregister and broadcast requests are [`HubCommand`]s on one
//! bounded channel, so the registry is only ever touched from the loop and
//! needs no lock. Fan-out never waits on a client: a mailbox that is full is
//! closed and its client evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;
use taskhub_core::ClientId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::ClientHandle;
use super::connection::Frame;
use super::mailbox::EnqueueError;
use super::message::{EncodingError, MessageType, OutboundFrame, encode};
use crate::config::HubConfig;
use crate::metrics::{
    WS_BROADCAST_EVICTIONS_TOTAL, WS_BROADCASTS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Hub request failed.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The payload could not be serialized; nothing was sent.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The hub loop has stopped.
    #[error("hub is not running")]
    Closed,
}

/// Request processed by the hub loop, in arrival order.
#[derive(Debug)]
pub enum HubCommand {
    /// Add a client to the registry.
    Register(ClientHandle),
    /// Remove a client and close its mailbox. No-op if absent.
    Unregister(ClientHandle),
    /// Deliver a frame to every registered client.
    Broadcast(OutboundFrame),
}

#[derive(Debug, Default)]
struct HubStats {
    clients: AtomicUsize,
    evicted: AtomicU64,
}

/// The hub loop and its registry. Drive it with [`Hub::run`].
#[derive(Debug)]
pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    clients: HashMap<ClientId, ClientHandle>,
    stats: Arc<HubStats>,
}

/// Cloneable sender side of a [`Hub`].
#[derive(Clone, Debug)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    stats: Arc<HubStats>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and its handle. Nothing runs until [`Hub::run`] is polled.
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let stats = Arc::new(HubStats::default());
        let hub = Self {
            commands: rx,
            clients: HashMap::new(),
            stats: stats.clone(),
        };
        let handle = HubHandle {
            commands: tx,
            stats,
            config,
        };
        (hub, handle)
    }

    /// Process commands until `cancel` fires or every handle is dropped,
    /// then close every remaining client's mailbox.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("hub started");
        loop {
            let command = tokio::select! {
                () = cancel.cancelled() => break,
                command = self.commands.recv() => command,
            };
            match command {
                Some(command) => self.handle(command),
                None => break,
            }
        }
        self.close_all();
        info!("hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(client) => self.register(client),
            HubCommand::Unregister(client) => self.unregister(client.id()),
            HubCommand::Broadcast(frame) => self.broadcast(&frame),
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let id = client.id().clone();
        let identity = client.identity().to_string();
        if self.clients.insert(id.clone(), client).is_some() {
            debug!(client_id = %id, "client already registered");
            return;
        }
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.publish_count();
        info!(client_id = %id, identity, clients = self.clients.len(), "client registered");
    }

    fn unregister(&mut self, id: &ClientId) {
        let Some(client) = self.clients.remove(id) else {
            debug!(client_id = %id, "unregister for unknown client");
            return;
        };
        let _ = client.close_mailbox();
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        self.publish_count();
        info!(client_id = %id, clients = self.clients.len(), "client unregistered");
    }

    fn broadcast(&mut self, frame: &OutboundFrame) {
        let mut evicted = Vec::new();
        for (id, client) in &self.clients {
            match client.enqueue(Frame::Text(frame.clone())) {
                Ok(()) => {}
                Err(reason) => evicted.push((id.clone(), reason)),
            }
        }

        let recipients = self.clients.len() - evicted.len();
        for (id, reason) in evicted {
            let Some(client) = self.clients.remove(&id) else {
                continue;
            };
            let _ = client.close_mailbox();
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            match reason {
                EnqueueError::Full => {
                    let _ = self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                    counter!(WS_BROADCAST_EVICTIONS_TOTAL).increment(1);
                    warn!(client_id = %id, identity = client.identity(), "mailbox full, evicting slow client");
                }
                EnqueueError::Closed => {
                    debug!(client_id = %id, "dropping client with closed mailbox");
                }
            }
        }

        self.publish_count();
        counter!(WS_BROADCASTS_TOTAL).increment(1);
        debug!(recipients, bytes = frame.len(), "broadcast delivered");
    }

    fn close_all(&mut self) {
        let count = self.clients.len();
        for (_, client) in self.clients.drain() {
            let _ = client.close_mailbox();
        }
        self.publish_count();
        if count > 0 {
            info!(clients = count, "closed remaining clients");
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_count(&self) {
        let count = self.clients.len();
        self.stats.clients.store(count, Ordering::Release);
        gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
    }
}

impl HubHandle {
    /// Ask the hub to add `client`.
    pub async fn register_client(&self, client: ClientHandle) -> Result<(), HubError> {
        self.send(HubCommand::Register(client)).await
    }

    /// Ask the hub to remove `client` and close its mailbox. Removing a client
    /// that is not registered is a no-op.
    pub async fn unregister_client(&self, client: ClientHandle) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(client)).await
    }

    /// Encode `payload` once and deliver it to every registered client.
    ///
    /// Returns once the hub has accepted the request. An encoding failure
    /// sends nothing.
    pub async fn broadcast_task_update<T: Serialize + ?Sized>(
        &self,
        message_type: MessageType,
        payload: &T,
    ) -> Result<(), HubError> {
        let frame = encode(message_type, payload)?;
        self.broadcast_frame(frame).await
    }

    /// Deliver pre-encoded frame text to every registered client.
    pub async fn broadcast_frame(&self, frame: OutboundFrame) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast(frame)).await
    }

    /// Registered clients as of the last command the hub processed.
    pub fn client_count(&self) -> usize {
        self.stats.clients.load(Ordering::Acquire)
    }

    /// Clients evicted because their mailbox was full.
    pub fn evicted_count(&self) -> u64 {
        self.stats.evicted.load(Ordering::Relaxed)
    }

    /// Sizing and client defaults this hub was built with.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::wait_for_clients;
    use super::*;
    use crate::websocket::mailbox::MailboxReceiver;
    use crate::websocket::message::TaskPayload;
    use serde_json::json;

    fn config(mailbox_capacity: usize) -> HubConfig {
        HubConfig {
            command_capacity: 64,
            mailbox_capacity,
            ..HubConfig::default()
        }
    }

    fn spawn(config: HubConfig) -> (HubHandle, CancellationToken, tokio::task::JoinHandle<()>) {
        let (hub, handle) = Hub::new(config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));
        (handle, cancel, task)
    }

    fn client(hub: &HubHandle) -> (ClientHandle, MailboxReceiver) {
        ClientHandle::new("user", hub.config().mailbox_capacity)
    }

    /// Everything left in a mailbox, up to and including its close.
    async fn drain(rx: &mut MailboxReceiver) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            match frame {
                Frame::Text(text) => frames.push(text.to_string()),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        frames
    }

    fn task_frame(message_type: &str, id: &str) -> String {
        format!(r#"{{"type":"{message_type}","payload":{{"id":"{id}"}}}}"#)
    }

    #[tokio::test]
    async fn count_follows_register_and_unregister() {
        let (hub, _cancel, _task) = spawn(config(8));
        let (a, _rx_a) = client(&hub);
        let (b, _rx_b) = client(&hub);

        hub.register_client(a.clone()).await.unwrap();
        hub.register_client(b.clone()).await.unwrap();
        wait_for_clients(&hub, 2).await;

        hub.unregister_client(a.clone()).await.unwrap();
        wait_for_clients(&hub, 1).await;
        assert!(a.is_mailbox_closed());
        assert!(!b.is_mailbox_closed());
    }

    #[tokio::test]
    async fn unregister_unknown_is_noop() {
        let (hub, _cancel, _task) = spawn(config(8));
        let (a, _rx_a) = client(&hub);
        let (stranger, _rx_s) = client(&hub);

        hub.register_client(a.clone()).await.unwrap();
        hub.unregister_client(stranger.clone()).await.unwrap();
        hub.unregister_client(a.clone()).await.unwrap();
        hub.unregister_client(a.clone()).await.unwrap();
        wait_for_clients(&hub, 0).await;
        assert!(!stranger.is_mailbox_closed());
    }

    #[tokio::test]
    async fn frames_before_unregister_delivered_in_order_then_closed() {
        let (hub, _cancel, _task) = spawn(config(16));
        let (a, mut rx) = client(&hub);

        hub.register_client(a.clone()).await.unwrap();
        for id in ["1", "2", "3"] {
            hub.broadcast_task_update(MessageType::TaskUpdated, &json!({"id": id}))
                .await
                .unwrap();
        }
        hub.unregister_client(a).await.unwrap();
        hub.broadcast_task_update(MessageType::TaskUpdated, &json!({"id": "4"}))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx).await,
            vec![
                task_frame("task_updated", "1"),
                task_frame("task_updated", "2"),
                task_frame("task_updated", "3"),
            ]
        );
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let (hub, cancel, task) = spawn(config(8));
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (c, rx) = client(&hub);
            hub.register_client(c).await.unwrap();
            receivers.push(rx);
        }
        hub.broadcast_task_update(MessageType::TaskCreated, &TaskPayload::id("42"))
            .await
            .unwrap();

        for rx in &mut receivers {
            assert_eq!(
                rx.recv().await,
                Some(Frame::Text(task_frame("task_created", "42").into()))
            );
        }

        // Shutting down closes every mailbox
        cancel.cancel();
        task.await.unwrap();
        for mut rx in receivers {
            assert!(drain(&mut rx).await.is_empty());
        }
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn full_mailbox_evicts_only_the_slow_client() {
        let (hub, _cancel, _task) = spawn(config(2));
        let (slow, mut slow_rx) = client(&hub);
        let (fast, mut fast_rx) = client(&hub);
        hub.register_client(slow.clone()).await.unwrap();
        hub.register_client(fast.clone()).await.unwrap();

        let mut fast_seen = Vec::new();
        for i in 0..3 {
            let id = i.to_string();
            hub.broadcast_task_update(MessageType::TaskUpdated, &json!({"id": id}))
                .await
                .unwrap();
            // The fast client keeps up; the slow one never reads
            match fast_rx.recv().await {
                Some(Frame::Text(text)) => fast_seen.push(text.to_string()),
                other => panic!("unexpected {other:?}"),
            }
        }

        wait_for_clients(&hub, 1).await;
        assert_eq!(hub.evicted_count(), 1);
        assert!(slow.is_mailbox_closed());
        assert!(!fast.is_mailbox_closed());
        assert_eq!(
            drain(&mut slow_rx).await,
            vec![task_frame("task_updated", "0"), task_frame("task_updated", "1")]
        );
        assert_eq!(fast_seen.len(), 3);
    }

    #[tokio::test]
    async fn duplicate_register_keeps_one_entry() {
        let (hub, _cancel, _task) = spawn(config(8));
        let (a, _rx) = client(&hub);
        hub.register_client(a.clone()).await.unwrap();
        hub.register_client(a.clone()).await.unwrap();
        hub.broadcast_task_update(MessageType::Pong, &json!(null))
            .await
            .unwrap();
        wait_for_clients(&hub, 1).await;
        assert!(!a.is_mailbox_closed());
    }

    #[tokio::test]
    async fn concurrent_registrations_all_counted() {
        let (hub, _cancel, _task) = spawn(config(4));
        let mut joins = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..32 {
            let (c, rx) = client(&hub);
            receivers.push(rx);
            let hub = hub.clone();
            joins.push(tokio::spawn(async move { hub.register_client(c).await }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }
        wait_for_clients(&hub, 32).await;

        hub.broadcast_task_update(MessageType::TaskCreated, &json!({"id": "k"}))
            .await
            .unwrap();
        for rx in &mut receivers {
            assert_eq!(
                rx.recv().await,
                Some(Frame::Text(task_frame("task_created", "k").into()))
            );
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn two_clients_scenario() {
        let (hub, _cancel, _task) = spawn(config(8));
        let (a, mut rx_a) = client(&hub);
        let (b, mut rx_b) = client(&hub);
        hub.register_client(a.clone()).await.unwrap();
        hub.register_client(b.clone()).await.unwrap();

        hub.broadcast_task_update(MessageType::TaskCreated, &json!({"id": "42"}))
            .await
            .unwrap();
        hub.unregister_client(a).await.unwrap();
        hub.broadcast_task_update(MessageType::TaskDeleted, &json!({"id": "42"}))
            .await
            .unwrap();
        wait_for_clients(&hub, 1).await;

        assert_eq!(drain(&mut rx_a).await, vec![task_frame("task_created", "42")]);
        assert_eq!(
            rx_b.recv().await,
            Some(Frame::Text(task_frame("task_created", "42").into()))
        );
        assert_eq!(
            rx_b.recv().await,
            Some(Frame::Text(task_frame("task_deleted", "42").into()))
        );
    }

    #[tokio::test]
    async fn encoding_failure_sends_nothing() {
        let (hub, _cancel, _task) = spawn(config(8));
        let (a, mut rx) = client(&hub);
        hub.register_client(a.clone()).await.unwrap();

        let mut bad = HashMap::new();
        let _ = bad.insert((1, 2), 3);
        let err = hub
            .broadcast_task_update(MessageType::TaskUpdated, &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Encoding(_)));

        hub.unregister_client(a).await.unwrap();
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn closed_mailbox_pruned_on_broadcast() {
        let (hub, _cancel, _task) = spawn(config(8));
        let (a, rx) = client(&hub);
        hub.register_client(a).await.unwrap();
        wait_for_clients(&hub, 1).await;

        drop(rx);
        hub.broadcast_task_update(MessageType::TaskUpdated, &json!({}))
            .await
            .unwrap();
        wait_for_clients(&hub, 0).await;
        assert_eq!(hub.evicted_count(), 0);
    }

    #[tokio::test]
    async fn stopped_hub_rejects_commands() {
        let (hub, cancel, task) = spawn(config(8));
        cancel.cancel();
        task.await.unwrap();

        let (a, _rx) = client(&hub);
        assert!(matches!(hub.register_client(a).await, Err(HubError::Closed)));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        const POOL: usize = 6;

        #[derive(Clone, Copy, Debug)]
        enum Op {
            Register(usize),
            Unregister(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0..POOL).prop_map(Op::Register),
                (0..POOL).prop_map(Op::Unregister),
            ]
        }

        /// Apply `ops` to a live hub; return `(client_count, model size)`.
        ///
        /// A client that has been unregistered never registers again, as a
        /// closed connection never comes back.
        async fn run_ops(ops: &[Op]) -> (usize, usize) {
            let (hub, cancel, _task) = spawn(config(4));
            let (sentinel, mut sentinel_rx) = client(&hub);
            hub.register_client(sentinel).await.unwrap();

            let pool: Vec<_> = (0..POOL).map(|_| client(&hub)).collect();
            let mut live = HashSet::new();
            let mut gone = HashSet::new();
            for op in ops {
                match *op {
                    Op::Register(i) if !gone.contains(&i) => {
                        hub.register_client(pool[i].0.clone()).await.unwrap();
                        let _ = live.insert(i);
                    }
                    Op::Register(_) => {}
                    Op::Unregister(i) => {
                        hub.unregister_client(pool[i].0.clone()).await.unwrap();
                        if live.remove(&i) {
                            let _ = gone.insert(i);
                        }
                    }
                }
            }

            // Commands run in order: once the sentinel sees this broadcast,
            // every op above has been applied.
            hub.broadcast_frame("{}".into()).await.unwrap();
            assert!(sentinel_rx.recv().await.is_some());

            let observed = hub.client_count() - 1;
            cancel.cancel();
            (observed, live.len())
        }

        proptest! {
            #[test]
            fn client_count_matches_registry_model(ops in proptest::collection::vec(op(), 0..48)) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                let (observed, expected) = runtime.block_on(run_ops(&ops));
                prop_assert_eq!(observed, expected);
            }
        }
    }
}
