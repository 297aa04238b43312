//! Peer failure detector (spec §4.9): periodic `/health` probes drive a
//! per-peer `Healthy -> Suspect -> Down` state machine with hysteresis, so
//! a single flaky probe doesn't flap a node's status. State transitions
//! are reported on a channel rather than via callbacks, which keeps this
//! crate free of generic `Fn` trait-object plumbing the Failover Proxy and
//! Rebalancer would otherwise have to register into.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vaults3_common::NodeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeHealth {
    Healthy,
    Suspect,
    Down,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorEvent {
    Down(NodeId),
    Recovered(NodeId),
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub suspect_after: u32,
    pub down_after: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            suspect_after: 3,
            down_after: 6,
        }
    }
}

struct PeerState {
    addr: String,
    health: NodeHealth,
    consecutive_failures: u32,
}

/// Tracks health of every known peer, probing `/health` on each in a
/// background loop started by `spawn`. `self_id` is always reported
/// healthy by `healthy_nodes` regardless of whether it's registered as a
/// peer.
pub struct FailureDetector {
    self_id: NodeId,
    client: reqwest::Client,
    config: DetectorConfig,
    peers: RwLock<HashMap<NodeId, PeerState>>,
    events: mpsc::UnboundedSender<DetectorEvent>,
}

impl FailureDetector {
    #[must_use]
    pub fn new(self_id: NodeId, config: DetectorConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<DetectorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let detector = Arc::new(Self {
            self_id,
            client: reqwest::Client::builder()
                .timeout(config.probe_timeout)
                .build()
                .unwrap_or_default(),
            config,
            peers: RwLock::new(HashMap::new()),
            events: tx,
        });
        (detector, rx)
    }

    pub fn register_peer(&self, id: NodeId, addr: String) {
        self.peers.write().entry(id).or_insert_with(|| PeerState {
            addr,
            health: NodeHealth::Healthy,
            consecutive_failures: 0,
        });
    }

    pub fn remove_peer(&self, id: NodeId) {
        self.peers.write().remove(&id);
    }

    #[must_use]
    pub fn health(&self, id: NodeId) -> Option<NodeHealth> {
        if id == self.self_id {
            return Some(NodeHealth::Healthy);
        }
        self.peers.read().get(&id).map(|p| p.health)
    }

    /// Every node this detector currently considers healthy, always
    /// including `self_id`.
    #[must_use]
    pub fn healthy_nodes(&self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .peers
            .read()
            .iter()
            .filter(|(_, p)| p.health == NodeHealth::Healthy)
            .map(|(id, _)| *id)
            .collect();
        out.push(self.self_id);
        out
    }

    /// Probe every registered peer once, updating state machines and
    /// emitting `DetectorEvent`s for any transition crossing the Down
    /// boundary in either direction.
    pub async fn probe_once(&self) {
        let targets: Vec<(NodeId, String)> = self
            .peers
            .read()
            .iter()
            .map(|(id, p)| (*id, p.addr.clone()))
            .collect();

        for (id, addr) in targets {
            let healthy = self.probe(&addr).await;
            self.record(id, healthy);
        }
    }

    async fn probe(&self, addr: &str) -> bool {
        match self.client.get(format!("http://{addr}/health")).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(_) => false,
        }
    }

    fn record(&self, id: NodeId, healthy: bool) {
        let mut peers = self.peers.write();
        let Some(peer) = peers.get_mut(&id) else { return };
        let was_down = peer.health == NodeHealth::Down;

        if healthy {
            peer.consecutive_failures = 0;
            peer.health = NodeHealth::Healthy;
        } else {
            peer.consecutive_failures += 1;
            if peer.consecutive_failures >= self.config.down_after {
                peer.health = NodeHealth::Down;
            } else if peer.consecutive_failures >= self.config.suspect_after
                && peer.health == NodeHealth::Healthy
            {
                peer.health = NodeHealth::Suspect;
            }
        }

        let is_down = peer.health == NodeHealth::Down;
        drop(peers);

        if is_down && !was_down {
            let _ = self.events.send(DetectorEvent::Down(id));
        } else if was_down && !is_down && healthy {
            let _ = self.events.send(DetectorEvent::Recovered(id));
        }
    }

    /// Run `probe_once` on `config.probe_interval` until the runtime
    /// shuts the task down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        loop {
            ticker.tick().await;
            self.probe_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> (Arc<FailureDetector>, mpsc::UnboundedReceiver<DetectorEvent>) {
        FailureDetector::new(
            NodeId::new(),
            DetectorConfig { suspect_after: 2, down_after: 3, ..DetectorConfig::default() },
        )
    }

    #[test]
    fn self_is_always_healthy() {
        let (detector, _rx) = detector();
        assert_eq!(detector.health(detector.self_id), Some(NodeHealth::Healthy));
        assert!(detector.healthy_nodes().contains(&detector.self_id));
    }

    #[test]
    fn failures_escalate_healthy_to_suspect_to_down() {
        let (detector, mut rx) = detector();
        let peer = NodeId::new();
        detector.register_peer(peer, "peer:9000".into());

        detector.record(peer, false);
        assert_eq!(detector.health(peer), Some(NodeHealth::Healthy));
        detector.record(peer, false);
        assert_eq!(detector.health(peer), Some(NodeHealth::Suspect));
        detector.record(peer, false);
        assert_eq!(detector.health(peer), Some(NodeHealth::Down));

        assert_eq!(rx.try_recv().unwrap(), DetectorEvent::Down(peer));
    }

    #[test]
    fn a_single_success_resets_the_counter_and_clamps_to_healthy() {
        let (detector, _rx) = detector();
        let peer = NodeId::new();
        detector.register_peer(peer, "peer:9000".into());

        detector.record(peer, false);
        detector.record(peer, false);
        assert_eq!(detector.health(peer), Some(NodeHealth::Suspect));

        detector.record(peer, true);
        assert_eq!(detector.health(peer), Some(NodeHealth::Healthy));
    }

    #[test]
    fn recovery_from_down_emits_recovered_event() {
        let (detector, mut rx) = detector();
        let peer = NodeId::new();
        detector.register_peer(peer, "peer:9000".into());

        detector.record(peer, false);
        detector.record(peer, false);
        detector.record(peer, false);
        assert!(matches!(rx.try_recv().unwrap(), DetectorEvent::Down(_)));

        detector.record(peer, true);
        assert_eq!(rx.try_recv().unwrap(), DetectorEvent::Recovered(peer));
        assert!(!detector.healthy_nodes().is_empty());
    }
}
