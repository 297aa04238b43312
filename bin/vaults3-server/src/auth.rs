//! SigV4 authentication middleware for the data-plane and inter-site sync
//! surface (spec §6, §9 decision #4). Cluster membership management and
//! health checks stay unauthenticated — they're the reference harness's
//! own control plane, not S3 client traffic.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use vaults3_auth::{AccessKey, KeyStatus, SigV4Verifier, User, UserStore};

use crate::state::AppState;

/// Builds the user store backing this node's `SigV4Verifier`: one operator
/// key (`VAULTS3_ACCESS_KEY_ID`/`VAULTS3_SECRET_ACCESS_KEY`, falling back to
/// a fixed development pair so the harness is usable out of the box) plus
/// one entry per configured replication peer, keyed by that peer's
/// `access_key`/`secret_key` — the same pair `vaults3-replication`'s
/// `SigV4Signer` uses to sign its outgoing requests, so a peer's push or
/// sync call verifies here with no separate credential distribution step.
pub fn build_user_store(peers: &[vaults3_common::config::PeerConfig]) -> Arc<UserStore> {
    let store = Arc::new(UserStore::new());

    let operator_key = std::env::var("VAULTS3_ACCESS_KEY_ID").unwrap_or_else(|_| "AKIAVAULTS3OPERATOR0".into());
    let operator_secret =
        std::env::var("VAULTS3_SECRET_ACCESS_KEY").unwrap_or_else(|_| "vaults3-default-development-secret-key".into());
    register(&store, "operator", &operator_key, &operator_secret);

    for peer in peers {
        register(&store, &format!("peer-{}", peer.name), &peer.access_key, &peer.secret_key);
    }

    store
}

fn register(store: &UserStore, display_name: &str, access_key_id: &str, secret_access_key: &str) {
    let user = User::with_id(format!("user-{display_name}"), display_name);
    let key = AccessKey {
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key.to_string(),
        user_id: user.user_id.clone(),
        created_at: 0,
        status: KeyStatus::Active,
    };
    store.register_key(user, key);
}

/// Rebalance pushes explicitly bypass policy checks (spec §4.11, §6's
/// header table), matching `vaults3-rebalancer`'s `push` not signing its
/// internal transfers — this is the one path trusted on header alone.
pub async fn require_sigv4(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if request.headers().contains_key(vaults3_rebalancer::REBALANCE_HEADER) {
        return next.run(request).await;
    }

    match state.verifier.verify(&request) {
        Ok(_) => next.run(request).await,
        Err(err) => {
            tracing::warn!(target: "vaults3_server", error = %err, "sigv4 verification failed");
            (StatusCode::FORBIDDEN, "signature verification failed").into_response()
        }
    }
}
