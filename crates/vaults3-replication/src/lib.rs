//! Cross-cluster replication (spec §4.13): active-passive push to a fixed
//! peer list, active-active pull via a vector-clocked change log, and the
//! conflict resolvers that settle concurrent writes. The two modes are
//! mutually exclusive per a bucket's replication configuration — never
//! both enqueuing for the same mutation.

pub mod changelog;
pub mod queue;
pub mod resolver;

pub use changelog::{build_sync_response, ChangelogConfig, ChangelogPuller, SyncRequest, SyncResponse};
pub use queue::{PushQueue, QueueConfig, REPLICATION_HEADER};
pub use resolver::{Candidate, ConflictResolver, LargestObject, LastWriterWins, SitePreference, Winner};
