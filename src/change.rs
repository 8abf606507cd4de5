//! Change detection for tickets and pull requests.
//!
//! Every check recomputes its decision from scratch:
//!
//! 1. `force` ⇒ stale, without a lookup.
//! 2. No cached record (or the lookup failed) ⇒ stale.
//! 3. Fingerprint mismatch ⇒ stale. Pull requests compare the commit SHA
//!    first and only hash the file list when the SHAs agree.
//! 4. Matching fingerprint but older than the freshness threshold ⇒ stale.
//!    Otherwise fresh, and the cached record is handed back.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::hash::{pull_request_fingerprint, ticket_fingerprint};
use crate::models::{AnalysisResult, ArtifactKind, Fingerprint, StateRecord};
use crate::state::StateStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    Missing,
    ContentChanged,
    CommitChanged,
    /// Fingerprint matches but the record is older than the threshold.
    Expired { age_secs: i64 },
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::Forced => f.write_str("forced"),
            StaleReason::Missing => f.write_str("no cached analysis"),
            StaleReason::ContentChanged => f.write_str("content changed"),
            StaleReason::CommitChanged => f.write_str("commit changed"),
            StaleReason::Expired { age_secs } => {
                write!(f, "cached analysis is {}s old", age_secs)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The cached analysis still applies.
    Fresh(StateRecord),
    Stale(StaleReason),
}

impl Decision {
    pub fn is_stale(&self) -> bool {
        matches!(self, Decision::Stale(_))
    }

    pub fn cached(&self) -> Option<&StateRecord> {
        match self {
            Decision::Fresh(record) => Some(record),
            Decision::Stale(_) => None,
        }
    }
}

pub struct ChangeDetector {
    store: Arc<StateStore>,
    freshness: chrono::Duration,
}

impl ChangeDetector {
    pub fn new(store: Arc<StateStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            freshness: config.freshness_threshold(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub async fn check_ticket(
        &self,
        key: &str,
        dod_text: &str,
        requirements: &[String],
        force: bool,
    ) -> Decision {
        if force {
            return self.log(ArtifactKind::Ticket, key, Decision::Stale(StaleReason::Forced));
        }
        let Some(record) = self.store.get(ArtifactKind::Ticket, key).await else {
            return self.log(ArtifactKind::Ticket, key, Decision::Stale(StaleReason::Missing));
        };

        let current = ticket_fingerprint(dod_text, requirements);
        let decision = if record.fingerprint.content_hash() != current {
            Decision::Stale(StaleReason::ContentChanged)
        } else {
            self.freshness_decision(record)
        };
        self.log(ArtifactKind::Ticket, key, decision)
    }

    pub async fn check_pull_request<F: AsRef<str>>(
        &self,
        key: &str,
        commit_sha: &str,
        file_names: &[F],
        force: bool,
    ) -> Decision {
        let kind = ArtifactKind::PullRequest;
        if force {
            return self.log(kind, key, Decision::Stale(StaleReason::Forced));
        }
        let Some(record) = self.store.get(kind, key).await else {
            return self.log(kind, key, Decision::Stale(StaleReason::Missing));
        };

        let commit_changed = matches!(
            &record.fingerprint,
            Fingerprint::PullRequest { commit_sha: cached, .. } if cached != commit_sha
        );
        let decision = if commit_changed {
            Decision::Stale(StaleReason::CommitChanged)
        } else if record.fingerprint.content_hash()
            != pull_request_fingerprint(file_names, &[commit_sha])
        {
            Decision::Stale(StaleReason::ContentChanged)
        } else {
            self.freshness_decision(record)
        };
        self.log(kind, key, decision)
    }

    pub async fn has_ticket_changed(&self, key: &str, dod_text: &str, requirements: &[String]) -> bool {
        self.check_ticket(key, dod_text, requirements, false)
            .await
            .is_stale()
    }

    pub async fn has_pr_changed<F: AsRef<str>>(
        &self,
        key: &str,
        commit_sha: &str,
        file_names: &[F],
    ) -> bool {
        self.check_pull_request(key, commit_sha, file_names, false)
            .await
            .is_stale()
    }

    /// Presence and freshness only, for callers that have not fetched the
    /// artifact's current content yet.
    pub async fn should_reanalyze(&self, kind: ArtifactKind, key: &str, force: bool) -> bool {
        if force {
            return true;
        }
        match self.store.get(kind, key).await {
            Some(record) => self.freshness_decision(record).is_stale(),
            None => true,
        }
    }

    /// Fingerprint the ticket's current content and cache it with `result`.
    pub async fn record_ticket_analysis(
        &self,
        key: &str,
        dod_text: &str,
        requirements: &[String],
        result: Option<AnalysisResult>,
    ) -> bool {
        let mut record = StateRecord::ticket(key, ticket_fingerprint(dod_text, requirements));
        record.result = result;
        self.store.put(&record, None).await
    }

    /// Fingerprint the pull request's current head and cache it with `result`.
    pub async fn record_pr_analysis<F: AsRef<str>>(
        &self,
        key: &str,
        commit_sha: &str,
        file_names: &[F],
        result: Option<AnalysisResult>,
    ) -> bool {
        let files_hash = pull_request_fingerprint(file_names, &[commit_sha]);
        let mut record = StateRecord::pull_request(key, commit_sha, files_hash);
        record.result = result;
        self.store.put(&record, None).await
    }

    fn freshness_decision(&self, record: StateRecord) -> Decision {
        // A record dated slightly ahead (writer clock skew) counts as age zero.
        let age = Utc::now()
            .signed_duration_since(record.last_analyzed)
            .max(chrono::Duration::zero());
        if age > self.freshness {
            Decision::Stale(StaleReason::Expired {
                age_secs: age.num_seconds(),
            })
        } else {
            Decision::Fresh(record)
        }
    }

    fn log(&self, kind: ArtifactKind, key: &str, decision: Decision) -> Decision {
        match &decision {
            Decision::Fresh(_) => debug!(kind = %kind, key, "Cached analysis is fresh"),
            Decision::Stale(reason) => info!(kind = %kind, key, %reason, "Reanalysis needed"),
        }
        decision
    }
}
