//! Cluster placement for VaultS3: a consistent hash ring for (bucket, key)
//! replica selection (§4.8), a peer failure detector with hysteresis
//! (§4.9), and the topology that ties node membership to the ring.

pub mod detector;
pub mod ring;
pub mod topology;

pub use detector::{DetectorConfig, DetectorEvent, FailureDetector, NodeHealth};
pub use ring::HashRing;
pub use topology::{ClusterTopology, NodeInfo, PlacementConfig};
