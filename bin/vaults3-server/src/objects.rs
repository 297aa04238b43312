//! The reference object surface: a minimal PUT/GET/DELETE/List HTTP front
//! end wired through the Cluster/Failover Proxy, `vaults3-raft` for
//! metadata mutations, and the replication workers for cross-node and
//! cross-site propagation. This is not an S3 wire-protocol parser (spec.md
//! §1 keeps that external); it exists so the core is directly exercisable
//! end to end.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::Method;
use tracing::warn;
use vaults3_common::{ConflictResolverKind, Error, ReplicationMode, Result, SiteId, VectorClock, VersioningState};
use vaults3_meta::{ChangeEntry, ChangeOp, MetaStore, ReplicationOp, StoredBucket, StoredObject};
use vaults3_proxy::{LocalHandler, ProxyRequest, ProxyResponse};
use vaults3_raft::{command::DeleteBucketPayload, Command, VaultRaftNode};
use vaults3_replication::{ChangelogPuller, LargestObject, LastWriterWins, PushQueue, SitePreference, REPLICATION_HEADER};
use vaults3_storage::StorageEngine;

use crate::state::AppState;

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::BucketNotFound(_) | Error::ObjectNotFound { .. } | Error::NodeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        Error::BucketAlreadyExists(_) | Error::AlreadyExists(_) => StatusCode::CONFLICT,
        Error::BucketNotEmpty(_) | Error::Conflict(_) => StatusCode::CONFLICT,
        Error::InvalidBucketName(_) | Error::InvalidObjectKey(_) | Error::InvalidArgument(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::NotLeader { .. } => StatusCode::TEMPORARY_REDIRECT,
        Error::QuotaExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
        Error::AuthFail(_) => StatusCode::FORBIDDEN,
        Error::Transient(_) | Error::Timeout => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> ProxyResponse {
    ProxyResponse {
        status: error_status(&err),
        headers: HeaderMap::new(),
        body: Bytes::from(err.to_string()),
    }
}

/// Components an `ObjectHandler` pushes a confirmed local mutation through,
/// beyond the Raft-replicated metadata write itself.
pub struct ReplicationHooks {
    pub mode: ReplicationMode,
    pub site_id: Option<SiteId>,
    pub push_queue: Option<Arc<PushQueue>>,
    pub changelog_puller: Option<Arc<ChangelogPuller>>,
}

/// Serves object/bucket requests this node's hash ring slot is responsible
/// for (spec §4.10's `LocalHandler` seam).
pub struct ObjectHandler {
    pub store: Arc<MetaStore>,
    pub engine: Arc<dyn StorageEngine>,
    pub raft: Arc<VaultRaftNode>,
    pub replication: ReplicationHooks,
}

fn split_path(path: &str) -> Option<(String, Option<String>)> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('/') {
        Some((bucket, key)) if !key.is_empty() => Some((bucket.to_string(), Some(key.to_string()))),
        _ => Some((trimmed.trim_end_matches('/').to_string(), None)),
    }
}

impl ObjectHandler {
    async fn handle_bucket(&self, method: &Method, bucket: &str, query: &str) -> Result<ProxyResponse> {
        match *method {
            Method::PUT => {
                self.raft
                    .propose(Command::CreateBucket(StoredBucket {
                        name: bucket.to_string(),
                        created_at: now_unix(),
                        versioning: VersioningState::Disabled,
                        object_lock_enabled: false,
                    }))
                    .await?;
                Ok(ProxyResponse { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new() })
            }
            Method::DELETE => {
                self.raft
                    .propose(Command::DeleteBucket(DeleteBucketPayload { name: bucket.to_string() }))
                    .await?;
                Ok(ProxyResponse { status: StatusCode::NO_CONTENT, headers: HeaderMap::new(), body: Bytes::new() })
            }
            Method::GET => {
                let params = parse_query(query);
                let prefix = params.get("prefix").map(String::as_str).unwrap_or("");
                let start_after = params.get("start-after").map(String::as_str).unwrap_or("");
                let max_keys = params
                    .get("max-keys")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(1000);
                let listing = self.engine.list_objects(bucket, prefix, start_after, max_keys).await?;
                let body = serde_json::to_vec(&listing_json(&listing))
                    .map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(ProxyResponse { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::from(body) })
            }
            _ => Ok(ProxyResponse {
                status: StatusCode::METHOD_NOT_ALLOWED,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }),
        }
    }

    async fn handle_object(
        &self,
        method: &Method,
        bucket: &str,
        key: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxyResponse> {
        let replicated_write = headers.contains_key(REPLICATION_HEADER)
            || headers.contains_key(vaults3_rebalancer::REBALANCE_HEADER);

        match *method {
            Method::PUT => {
                let declared_size = body.len() as u64;
                let result = self.engine.put_object(bucket, key, body, declared_size).await?;

                let mut clock = VectorClock::default();
                if let Some(site) = &self.replication.site_id {
                    if let Some(existing) = self.store.get_object_meta(bucket, key)? {
                        clock = existing.vector_clock;
                    }
                    clock.increment(site);
                }

                let object = StoredObject {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    version_id: None,
                    size: result.written,
                    etag: result.etag.clone(),
                    content_type: headers
                        .get(axum::http::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("application/octet-stream")
                        .to_string(),
                    last_modified: now_unix(),
                    vector_clock: clock.clone(),
                    delete_marker: false,
                };
                self.raft.propose(Command::PutObjectMeta(object.clone())).await?;

                if !replicated_write {
                    self.replicate_mutation(bucket, key, ChangeOp::Put, result.written, &result.etag, clock).await;
                }

                let mut resp_headers = HeaderMap::new();
                resp_headers.insert("etag", result.etag.parse().expect("etag is a valid header value"));
                Ok(ProxyResponse { status: StatusCode::OK, headers: resp_headers, body: Bytes::new() })
            }
            Method::GET => {
                let result = self.engine.get_object(bucket, key).await?;
                let meta = self.store.get_object_meta(bucket, key)?;
                let mut resp_headers = HeaderMap::new();
                if let Some(meta) = meta {
                    resp_headers.insert("etag", meta.etag.parse().expect("etag is a valid header value"));
                }
                let _ = result.size;
                Ok(ProxyResponse { status: StatusCode::OK, headers: resp_headers, body: result.data })
            }
            Method::DELETE => {
                self.engine.delete_object(bucket, key).await?;
                self.raft
                    .propose(Command::DeleteObjectMeta(vaults3_raft::command::DeleteObjectMetaPayload {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }))
                    .await?;

                if !replicated_write {
                    let clock = VectorClock::default();
                    self.replicate_mutation(bucket, key, ChangeOp::Delete, 0, "", clock).await;
                }

                Ok(ProxyResponse { status: StatusCode::NO_CONTENT, headers: HeaderMap::new(), body: Bytes::new() })
            }
            Method::HEAD => {
                let exists = self.engine.object_exists(bucket, key).await?;
                let status = if exists { StatusCode::OK } else { StatusCode::NOT_FOUND };
                Ok(ProxyResponse { status, headers: HeaderMap::new(), body: Bytes::new() })
            }
            _ => Ok(ProxyResponse {
                status: StatusCode::METHOD_NOT_ALLOWED,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }),
        }
    }

    /// Fan the confirmed local mutation out to peers per the configured
    /// replication mode (spec §4.13). Active-passive and active-active are
    /// mutually exclusive, never both firing for the same mutation.
    async fn replicate_mutation(
        &self,
        bucket: &str,
        key: &str,
        op: ChangeOp,
        size: u64,
        etag: &str,
        vector_clock: VectorClock,
    ) {
        match self.replication.mode {
            ReplicationMode::Disabled => {}
            ReplicationMode::ActivePassive => {
                if let Some(queue) = &self.replication.push_queue {
                    let replication_op = match op {
                        ChangeOp::Put => ReplicationOp::Put,
                        ChangeOp::Delete => ReplicationOp::Delete,
                    };
                    if let Err(err) = queue.enqueue_replication(bucket, key, replication_op) {
                        warn!(target: "vaults3_server", error = %err, "failed to enqueue replication event");
                    }
                }
            }
            ReplicationMode::ActiveActive => {
                let Some(site_id) = &self.replication.site_id else { return };
                let entry = ChangeEntry {
                    seq: 0,
                    site_id: site_id.clone(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    op,
                    size,
                    etag: etag.to_string(),
                    vector_clock,
                    at: now_unix(),
                };
                if let Err(err) = self.store.append_change_log(entry) {
                    warn!(target: "vaults3_server", error = %err, "failed to append change log entry");
                }
            }
        }
    }
}

#[async_trait]
impl LocalHandler for ObjectHandler {
    async fn handle(&self, req: ProxyRequest) -> ProxyResponse {
        let (path, query) = req.path.split_once('?').unwrap_or((req.path.as_str(), ""));
        let Some((bucket, key)) = split_path(path) else {
            return ProxyResponse { status: StatusCode::BAD_REQUEST, headers: HeaderMap::new(), body: Bytes::new() };
        };

        let result = match key {
            None => self.handle_bucket(&req.method, &bucket, query).await,
            Some(key) => self.handle_object(&req.method, &bucket, &key, &req.headers, req.body).await,
        };

        result.unwrap_or_else(error_response)
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn listing_json(listing: &vaults3_storage::ListResult) -> serde_json::Value {
    serde_json::json!({
        "objects": listing.objects.iter().map(|o| serde_json::json!({"key": o.key, "size": o.size})).collect::<Vec<_>>(),
        "truncated": listing.truncated,
    })
}

/// Build the `ConflictResolver` named by configuration (spec §4.13).
#[must_use]
pub fn build_resolver(kind: ConflictResolverKind, site_id: Option<&SiteId>) -> Arc<dyn vaults3_replication::ConflictResolver> {
    match kind {
        ConflictResolverKind::LastWriterWins => Arc::new(LastWriterWins),
        ConflictResolverKind::LargestObject => Arc::new(LargestObject),
        ConflictResolverKind::SitePreference => {
            let preferred = site_id.cloned().unwrap_or_else(|| SiteId::new("A"));
            Arc::new(SitePreference { preferred })
        }
    }
}

/// The catch-all axum route: every bucket/object request is handed to the
/// Failover Proxy, which decides whether this node serves it locally or
/// forwards to the replica responsible for it.
pub async fn catch_all(
    State(state): State<Arc<AppState>>,
    method: axum::http::Method,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    route_request(state, method, format!("/{bucket}/{key}"), headers, body).await
}

pub async fn bucket_root(
    State(state): State<Arc<AppState>>,
    method: axum::http::Method,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let qs = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let path = if qs.is_empty() { format!("/{bucket}") } else { format!("/{bucket}?{qs}") };
    route_request(state, method, path, headers, body).await
}

async fn route_request(
    state: Arc<AppState>,
    method: axum::http::Method,
    path: String,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (bucket, key) = match split_path(path.split('?').next().unwrap_or(&path)) {
        Some(v) => v,
        None => return StatusCode::BAD_REQUEST.into_response(),
    };
    let mut req = ProxyRequest::new(method, path, body);
    req.headers = headers;
    let resp = state.proxy.route(&bucket, key.as_deref().unwrap_or(""), req).await;
    proxy_response_to_axum(resp)
}

fn proxy_response_to_axum(resp: ProxyResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    for (name, value) in &resp.headers {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(resp.body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
