//! VaultS3 node entrypoint: loads configuration, assembles the storage
//! chain, opens the metadata store, starts this node's Raft participation,
//! wires up placement/failure-detection/proxying/rebalancing/healing/
//! replication, and serves the cluster-internal HTTP surface (spec §6).
//!
//! This binary is a reference harness (DESIGN.md): it exercises the core
//! end to end but does not implement the full S3 XML wire protocol.

mod auth;
mod cluster;
mod objects;
mod state;
mod storage_chain;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use openraft::BasicNode;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use vaults3_auth::SigV4Verifier;
use vaults3_common::{NodeId, VaultConfig};
use vaults3_healer::{Healer, HealerConfig};
use vaults3_meta::MetaStore;
use vaults3_placement::{ClusterTopology, DetectorConfig, FailureDetector, NodeInfo, PlacementConfig};
use vaults3_proxy::FailoverProxy;
use vaults3_raft::VaultRaftNode;
use vaults3_rebalancer::{RebalanceConfig, Rebalancer};
use vaults3_replication::{ChangelogConfig, ChangelogPuller, PushQueue, QueueConfig};

use crate::cluster::MembershipTracker;
use crate::objects::{build_resolver, ObjectHandler, ReplicationHooks};
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "vaults3-server", about = "VaultS3 cluster node")]
struct Args {
    /// Path to a TOML config file (overlaid with VAULTS3_* env vars).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn raft_node_id(name: &str) -> u64 {
    xxhash_rust::xxh64::xxh64(name.as_bytes(), 0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = VaultConfig::load(args.config.as_deref())?;

    let self_id = NodeId::new();
    std::fs::create_dir_all(&config.node.data_dir)?;
    std::fs::create_dir_all(&config.cluster.raft_data_dir)?;

    let store = Arc::new(MetaStore::open(config.node.data_dir.join("vaults3.db"))?);
    let storage_chain::Chain { engine, erasure } = storage_chain::build(&config.storage, &config.node.data_dir);

    let raft_id = raft_node_id(&config.node.name);
    let raft = Arc::new(VaultRaftNode::start(raft_id, &config.cluster.raft_data_dir, store.clone()).await?);
    raft.initialize(BTreeSet::from([raft_id]), BasicNode { addr: config.network.advertise_addr.clone() })
        .await
        .ok();

    let placement = PlacementConfig {
        replica_count: config.cluster.replica_count,
        read_quorum: config.cluster.read_quorum,
        write_quorum: config.cluster.write_quorum,
        virtual_nodes: config.cluster.virtual_nodes as u32,
    };
    let topology = Arc::new(ClusterTopology::new(self_id, placement));
    topology.upsert_node(NodeInfo { id: self_id, addr: config.network.advertise_addr.clone() });

    let detector_config = DetectorConfig {
        probe_interval: config.cluster.probe_interval,
        suspect_after: config.cluster.suspect_after,
        down_after: config.cluster.down_after,
        ..DetectorConfig::default()
    };
    let (detector, mut detector_events) = FailureDetector::new(self_id, detector_config);
    tokio::spawn({
        let detector = detector.clone();
        async move { detector.run().await }
    });
    tokio::spawn(async move { while detector_events.recv().await.is_some() {} });

    let site_id = config.replication.site_id.as_ref().map(|s| vaults3_common::SiteId::new(s.clone()));

    let push_queue = (config.replication.mode == vaults3_common::ReplicationMode::ActivePassive).then(|| {
        PushQueue::new(
            store.clone(),
            engine.clone(),
            config.replication.peers.clone(),
            QueueConfig {
                tick_interval: config.replication.tick_interval,
                batch_size: config.replication.batch_size,
                max_retries: config.replication.max_retries,
            },
        )
    });
    if let Some(queue) = &push_queue {
        tokio::spawn(queue.clone().run());
    }

    let changelog_puller = (config.replication.mode == vaults3_common::ReplicationMode::ActiveActive).then(|| {
        let resolver = build_resolver(config.replication.conflict_resolver, site_id.as_ref());
        ChangelogPuller::new(
            store.clone(),
            engine.clone(),
            config.replication.peers.clone(),
            ChangelogConfig {
                site_id: site_id.clone().unwrap_or_else(|| vaults3_common::SiteId::new("default")),
                tick_interval: config.replication.tick_interval,
                pull_limit: config.replication.batch_size,
            },
            resolver,
        )
    });
    if let Some(puller) = &changelog_puller {
        tokio::spawn(puller.clone().run());
    }

    let rebalancer = Rebalancer::new(
        store.clone(),
        engine.clone(),
        topology.clone(),
        RebalanceConfig {
            batch_size: config.cluster.rebalance_batch_size,
            bandwidth_mb_s: config.cluster.rebalance_bandwidth_mb_s,
        },
    );

    if let Some(erasure_engine) = erasure {
        let healer = Healer::new(store.clone(), erasure_engine, HealerConfig { interval: config.cluster.heal_interval });
        tokio::spawn(healer.run());
    }

    let object_handler = ObjectHandler {
        store: store.clone(),
        engine: engine.clone(),
        raft: raft.clone(),
        replication: ReplicationHooks {
            mode: config.replication.mode,
            site_id,
            push_queue,
            changelog_puller,
        },
    };
    let proxy = Arc::new(FailoverProxy::new(topology.clone(), detector.clone(), object_handler));

    let user_store = auth::build_user_store(&config.replication.peers);
    let verifier = SigV4Verifier::new(user_store, "us-east-1");

    let state = Arc::new(AppState {
        config,
        self_id,
        store,
        topology,
        detector,
        raft,
        proxy,
        rebalancer,
        verifier,
        membership: MembershipTracker::new(raft_id),
    });

    let data_plane = Router::new()
        .route("/_replication/sync", post(cluster::replication_sync))
        .route(
            "/{bucket}",
            get(objects::bucket_root).put(objects::bucket_root).delete(objects::bucket_root),
        )
        .route(
            "/{bucket}/{*key}",
            get(objects::catch_all)
                .put(objects::catch_all)
                .delete(objects::catch_all)
                .head(objects::catch_all),
        )
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_sigv4));

    let app = Router::new()
        .route("/health", get(cluster::health))
        .route("/cluster/status", get(cluster::cluster_status))
        .route("/cluster/join", post(cluster::cluster_join))
        .route("/cluster/leave", post(cluster::cluster_leave))
        .route("/cluster/rebalance", post(cluster::rebalance_trigger))
        .merge(data_plane)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(state.config.network.listen).await?;
    tracing::info!(target: "vaults3_server", addr = %state.config.network.listen, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
