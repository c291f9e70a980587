use std::collections::{HashMap, HashSet};
use std::fmt;

/// Suffix of the key that flags a replica as recovering. The value stored under
/// `{replica}_recovering` is the replica's term at the moment it started recovering.
pub const RECOVERING_TERM_SUFFIX: &str = "_recovering";

/// Version of a snapshot that has never been written to the store.
const UNPERSISTED_VERSION: i64 = -1;

/// ShardTerms is an immutable snapshot of a shard's term node: every replica's term plus the
/// store version the mapping was read at (or written with).
///
/// Only replicas holding the highest term are considered up to date. Terms move in two strict
/// ways: a replica sets its term equal to the leader's, or the leader increases its term (and
/// the terms of replicas that are keeping up) by 1.
///
/// Every transform below is pure. It returns `TermsUpdate::NoChange` when the mapping already
/// satisfies the request, so it can be re-evaluated against successively refreshed snapshots.
#[derive(Clone, PartialEq, Eq)]
pub struct ShardTerms {
    values: HashMap<String, i64>,
    max_term: i64,
    version: i64,
}

/// Result of evaluating a transform against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermsUpdate {
    /// Persist this mapping. Its version is the version of the snapshot it was computed from,
    /// which is the version the conditional write must expect.
    Apply(ShardTerms),
    /// The snapshot already satisfies the request.
    NoChange,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Can not find leader's term {0}")]
pub struct MissingLeaderTerm(pub String);

impl ShardTerms {
    pub fn new(values: HashMap<String, i64>, version: i64) -> Self {
        let max_term = values.values().copied().max().unwrap_or(0);
        ShardTerms {
            values,
            max_term,
            version,
        }
    }

    /// An empty mapping for a term node that does not exist (yet). Any persisted version is
    /// newer than this one.
    pub fn unpersisted() -> Self {
        Self::new(HashMap::new(), UNPERSISTED_VERSION)
    }

    /// Same mapping, stamped with the version the store assigned on write.
    pub fn with_version(&self, version: i64) -> Self {
        ShardTerms {
            values: self.values.clone(),
            max_term: self.max_term,
            version,
        }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn max_term(&self) -> i64 {
        self.max_term
    }

    pub fn values(&self) -> &HashMap<String, i64> {
        &self.values
    }

    pub fn term(&self, replica: &str) -> Option<i64> {
        self.values.get(replica).copied()
    }

    pub fn is_recovering(&self, replica: &str) -> bool {
        self.values.contains_key(&recovering_term(replica))
    }

    /// True iff `replica` has a term and it is the highest one.
    pub fn have_highest_term_value(&self, replica: &str) -> bool {
        self.term(replica) == Some(self.max_term)
    }

    pub fn can_become_leader(&self, replica: &str) -> bool {
        self.have_highest_term_value(replica) && !self.is_recovering(replica)
    }

    /// Increase the leader's term, and the term of every replica that is keeping up with the
    /// leader, so that the replicas in `replicas_needing_recovery` end up behind.
    pub fn increase_terms(
        &self,
        leader: &str,
        replicas_needing_recovery: &HashSet<String>,
    ) -> Result<TermsUpdate, MissingLeaderTerm> {
        let leader_term = self
            .term(leader)
            .ok_or_else(|| MissingLeaderTerm(leader.to_string()))?;

        let mut skipped_any = false;
        let mut found_replicas_needing_recovery = false;
        let mut new_values = self.values.clone();
        for (key, term) in new_values.iter_mut() {
            if replicas_needing_recovery.contains(key) {
                found_replicas_needing_recovery = true;
            }
            if *term == leader_term {
                if skip_increase_term_of(key, replicas_needing_recovery) {
                    skipped_any = true;
                } else {
                    *term = leader_term + 1;
                }
            }
        }

        // Nobody that needs recovery is level with the leader, so they are already behind. If
        // none of them is present at all, our snapshot may be stale and we bump regardless.
        if !skipped_any && found_replicas_needing_recovery {
            return Ok(TermsUpdate::NoChange);
        }
        Ok(self.derive(new_values))
    }

    pub fn register_term(&self, replica: &str) -> TermsUpdate {
        if self.values.contains_key(replica) {
            return TermsUpdate::NoChange;
        }
        let mut new_values = self.values.clone();
        new_values.insert(replica.to_string(), 0);
        self.derive(new_values)
    }

    pub fn remove_term(&self, replica: &str) -> TermsUpdate {
        let recovering_key = recovering_term(replica);
        if !self.values.contains_key(replica) && !self.values.contains_key(&recovering_key) {
            return TermsUpdate::NoChange;
        }
        let mut new_values = self.values.clone();
        new_values.remove(replica);
        new_values.remove(&recovering_key);
        self.derive(new_values)
    }

    pub fn set_term_to_zero(&self, replica: &str) -> TermsUpdate {
        if self.term(replica) == Some(0) {
            return TermsUpdate::NoChange;
        }
        let mut new_values = self.values.clone();
        new_values.insert(replica.to_string(), 0);
        self.derive(new_values)
    }

    /// Also clears the replica's recovering flag.
    pub fn set_term_equals_to_leader(&self, replica: &str) -> TermsUpdate {
        if self.have_highest_term_value(replica) {
            return TermsUpdate::NoChange;
        }
        let mut new_values = self.values.clone();
        new_values.insert(replica.to_string(), self.max_term);
        new_values.remove(&recovering_term(replica));
        self.derive(new_values)
    }

    pub fn start_recovering(&self, replica: &str) -> TermsUpdate {
        if self.have_highest_term_value(replica) {
            return TermsUpdate::NoChange;
        }
        let mut new_values = self.values.clone();
        let recovering_key = recovering_term(replica);
        if !new_values.contains_key(&recovering_key) {
            // Keeping the old term gives leader election more information.
            let current_term = self.term(replica).unwrap_or(0);
            new_values.insert(recovering_key, current_term);
        }
        new_values.insert(replica.to_string(), self.max_term);
        self.derive(new_values)
    }

    pub fn done_recovering(&self, replica: &str) -> TermsUpdate {
        let recovering_key = recovering_term(replica);
        if !self.values.contains_key(&recovering_key) {
            return TermsUpdate::NoChange;
        }
        let mut new_values = self.values.clone();
        new_values.remove(&recovering_key);
        self.derive(new_values)
    }

    /// Once the first update arrives every registered replica has some data, so terms move from
    /// 0 (registered) to 1 (has data). Nothing to promote when nobody registered.
    pub fn ensure_highest_terms_are_not_zero(&self) -> TermsUpdate {
        if self.max_term > 0 || self.values.is_empty() {
            return TermsUpdate::NoChange;
        }
        let new_values = self.values.keys().map(|k| (k.clone(), 1)).collect();
        self.derive(new_values)
    }

    fn derive(&self, new_values: HashMap<String, i64>) -> TermsUpdate {
        TermsUpdate::Apply(ShardTerms::new(new_values, self.version))
    }
}

impl fmt::Debug for ShardTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted: Vec<_> = self.values.iter().collect();
        sorted.sort();
        write!(f, "ShardTerms(version={}, terms={:?})", self.version, sorted)
    }
}

fn recovering_term(replica: &str) -> String {
    format!("{}{}", replica, RECOVERING_TERM_SUFFIX)
}

fn skip_increase_term_of(key: &str, replicas_needing_recovery: &HashSet<String>) -> bool {
    let replica = key.strip_suffix(RECOVERING_TERM_SUFFIX).unwrap_or(key);
    replicas_needing_recovery.contains(replica)
}
