//! Conflict resolvers for active-active replication (spec §4.13). A
//! resolver only runs once two vector clocks compare as `Concurrent`; any
//! causally-ordered pair is resolved by the vector clock alone.

use vaults3_common::SiteId;
use vaults3_meta::types::ChangeOp;

/// The minimal shape a resolver needs to decide between two writes to the
/// same (bucket, key): the incoming remote change and the equivalent local
/// state framed as a synthetic change entry.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub site_id: SiteId,
    pub op: ChangeOp,
    pub size: u64,
    pub etag: String,
    pub at: i64,
}

/// Which of the two concurrent candidates should win.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, local: &Candidate, remote: &Candidate) -> Winner;
}

/// Larger timestamp wins; ties break toward the larger site ID.
pub struct LastWriterWins;

impl ConflictResolver for LastWriterWins {
    fn resolve(&self, local: &Candidate, remote: &Candidate) -> Winner {
        match remote.at.cmp(&local.at) {
            std::cmp::Ordering::Greater => Winner::Remote,
            std::cmp::Ordering::Less => Winner::Local,
            std::cmp::Ordering::Equal => {
                if remote.site_id > local.site_id {
                    Winner::Remote
                } else {
                    Winner::Local
                }
            }
        }
    }
}

/// A put always beats a delete; among two puts, the larger object wins,
/// with a larger etag breaking a size tie.
pub struct LargestObject;

impl ConflictResolver for LargestObject {
    fn resolve(&self, local: &Candidate, remote: &Candidate) -> Winner {
        match (local.op, remote.op) {
            (ChangeOp::Delete, ChangeOp::Put) => return Winner::Remote,
            (ChangeOp::Put, ChangeOp::Delete) => return Winner::Local,
            _ => {}
        }
        match remote.size.cmp(&local.size) {
            std::cmp::Ordering::Greater => Winner::Remote,
            std::cmp::Ordering::Less => Winner::Local,
            std::cmp::Ordering::Equal => {
                if remote.etag > local.etag {
                    Winner::Remote
                } else {
                    Winner::Local
                }
            }
        }
    }
}

/// Entries from one designated site always win, regardless of timestamp or
/// size.
pub struct SitePreference {
    pub preferred: SiteId,
}

impl ConflictResolver for SitePreference {
    fn resolve(&self, local: &Candidate, remote: &Candidate) -> Winner {
        if remote.site_id == self.preferred {
            Winner::Remote
        } else if local.site_id == self.preferred {
            Winner::Local
        } else {
            // Neither side is the preferred site; fall back to recency.
            LastWriterWins.resolve(local, remote)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(site: &str, op: ChangeOp, size: u64, etag: &str, at: i64) -> Candidate {
        Candidate { site_id: SiteId::new(site), op, size, etag: etag.into(), at }
    }

    #[test]
    fn last_writer_wins_picks_the_newer_timestamp() {
        let local = candidate("a", ChangeOp::Put, 10, "\"x\"", 100);
        let remote = candidate("b", ChangeOp::Put, 10, "\"y\"", 200);
        assert_eq!(LastWriterWins.resolve(&local, &remote), Winner::Remote);
    }

    #[test]
    fn last_writer_wins_breaks_ties_on_site_id() {
        let local = candidate("a", ChangeOp::Put, 10, "\"x\"", 100);
        let remote = candidate("z", ChangeOp::Put, 10, "\"y\"", 100);
        assert_eq!(LastWriterWins.resolve(&local, &remote), Winner::Remote);
    }

    #[test]
    fn largest_object_prefers_put_over_delete() {
        let local = candidate("a", ChangeOp::Delete, 0, "\"\"", 500);
        let remote = candidate("b", ChangeOp::Put, 1, "\"y\"", 1);
        assert_eq!(LargestObject.resolve(&local, &remote), Winner::Remote);
    }

    #[test]
    fn largest_object_prefers_bigger_size() {
        let local = candidate("a", ChangeOp::Put, 100, "\"x\"", 1);
        let remote = candidate("b", ChangeOp::Put, 50, "\"y\"", 999);
        assert_eq!(LargestObject.resolve(&local, &remote), Winner::Local);
    }

    #[test]
    fn site_preference_always_favors_the_configured_site() {
        let resolver = SitePreference { preferred: SiteId::new("trusted") };
        let local = candidate("trusted", ChangeOp::Put, 1, "\"x\"", 1);
        let remote = candidate("other", ChangeOp::Put, 999, "\"y\"", 999);
        assert_eq!(resolver.resolve(&local, &remote), Winner::Local);
    }
}
