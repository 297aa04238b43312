//! HTTP request routing for a VaultS3 cluster node: the Cluster Proxy
//! (§4.10) forwards to the hash ring's primary, and the Failover Proxy
//! (§4.10) walks the full replica set around a `Down` node instead of
//! trusting the primary blindly.

pub mod basic;
pub mod failover;

pub use basic::{ClusterProxy, LocalHandler, ProxyRequest, ProxyResponse, PROXY_HEADER};
pub use failover::FailoverProxy;
