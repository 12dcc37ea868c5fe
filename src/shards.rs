//! Runs a group of shard connections that share one identify queue.

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::GatewayError;
use crate::gateway::{self, Collaborators, ConnectionState, ShardConfig, ShardHandle};

pub struct ShardManager {
    collaborators: Collaborators,
    shards: DashMap<u32, ShardHandle>,
    tasks: DashMap<u32, JoinHandle<Result<(), GatewayError>>>,
}

impl ShardManager {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            shards: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    /// Spawn a connection for `config.shard_id`. A shard that is already
    /// running is closed and replaced.
    pub fn start(&self, config: ShardConfig) -> ShardHandle {
        let shard_id = config.shard_id;
        let (handle, task) = gateway::spawn(config, self.collaborators.clone());
        if let Some(previous) = self.shards.insert(shard_id, handle.clone()) {
            tracing::warn!("shard {} restarted", shard_id);
            previous.close();
        }
        self.tasks.insert(shard_id, task);
        handle
    }

    pub fn shard(&self, shard_id: u32) -> Option<ShardHandle> {
        self.shards.get(&shard_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Current state of every shard, ordered by id.
    pub fn states(&self) -> Vec<(u32, ConnectionState)> {
        let mut states: Vec<_> = self
            .shards
            .iter()
            .map(|entry| (*entry.key(), entry.value().state()))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    /// Resolves once every shard has closed on its own, e.g. after the
    /// gateway rejected the token.
    pub async fn closed(&self) {
        let handles: Vec<ShardHandle> = self.shards.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            handle.wait_for(ConnectionState::Closed).await;
        }
    }

    /// Close every shard and collect how each one ended.
    pub async fn shutdown(&self) -> Vec<(u32, Result<(), GatewayError>)> {
        for entry in self.shards.iter() {
            entry.value().close();
        }
        let ids: Vec<u32> = self.tasks.iter().map(|e| *e.key()).collect();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let Some((_, task)) = self.tasks.remove(&id) else {
                continue;
            };
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(GatewayError::TransportFailure(format!(
                    "shard task failed: {e}"
                ))),
            };
            results.push((id, result));
        }
        self.shards.clear();
        results.sort_by_key(|(id, _)| *id);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::DispatchEvent;
    use crate::gateway::IdentifyQueue;
    use crate::transport::{Connector, Transport, TransportEvent, TransportPeer};
    use futures_util::future::BoxFuture;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct PeerConnector(mpsc::UnboundedSender<TransportPeer>);

    impl Connector for PeerConnector {
        fn connect(&self, _url: String) -> BoxFuture<'static, Result<Transport, GatewayError>> {
            let (transport, peer) = Transport::pair();
            let _ = self.0.send(peer);
            Box::pin(async move { Ok(transport) })
        }
    }

    fn manager() -> (ShardManager, mpsc::UnboundedReceiver<TransportPeer>) {
        let (peer_tx, peers) = mpsc::unbounded_channel();
        let (event_tx, _) = mpsc::unbounded_channel::<DispatchEvent>();
        let collaborators = Collaborators::new(Arc::new(PeerConnector(peer_tx)), Arc::new(event_tx))
            .with_identify_queue(Arc::new(IdentifyQueue::new(Duration::from_secs(5), 1)));
        (ShardManager::new(collaborators), peers)
    }

    fn shard_config(id: u32) -> ShardConfig {
        let mut config = ShardConfig::new("wss://gateway.test", "t");
        config.shard_id = id;
        config.shard_count = 2;
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown_all() {
        let (manager, mut peers) = manager();
        manager.start(shard_config(0));
        manager.start(shard_config(1));
        assert_eq!(manager.len(), 2);

        // Keep both peers alive so neither shard sees a close.
        let _a = peers.recv().await.unwrap();
        let _b = peers.recv().await.unwrap();
        assert_eq!(
            manager.states(),
            vec![
                (0, ConnectionState::Connecting),
                (1, ConnectionState::Connecting)
            ]
        );

        let results = manager.shutdown().await;
        assert_eq!(results, vec![(0, Ok(())), (1, Ok(()))]);
        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_resolves_after_rejection() {
        let (manager, mut peers) = manager();
        manager.start(shard_config(0));
        let peer = peers.recv().await.unwrap();
        peer.inbound
            .send(TransportEvent::Closed {
                code: Some(4004),
                reason: "Authentication failed.".into(),
            })
            .unwrap();

        manager.closed().await;
        let results = manager.shutdown().await;
        assert!(matches!(
            results[0].1,
            Err(GatewayError::AuthenticationRejected { code: 4004, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_queue_spaces_identifies() {
        let (manager, mut peers) = manager();
        manager.start(shard_config(0));
        manager.start(shard_config(1));

        let mut a = peers.recv().await.unwrap();
        let mut b = peers.recv().await.unwrap();
        let hello = TransportEvent::Frame(r#"{"op":10,"d":{"heartbeat_interval":45000}}"#.into());
        a.inbound.send(hello.clone()).unwrap();
        b.inbound.send(hello).unwrap();

        let start = tokio::time::Instant::now();
        let first = tokio::select! {
            Some(_) = a.outbound.recv() => 'a',
            Some(_) = b.outbound.recv() => 'b',
        };
        let second = match first {
            'a' => b.outbound.recv().await,
            _ => a.outbound.recv().await,
        };
        assert!(second.is_some());
        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(5));

        manager.shutdown().await;
    }
}
