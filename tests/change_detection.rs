use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use pr_context::change::{ChangeDetector, Decision, StaleReason};
use pr_context::config::CacheConfig;
use pr_context::hash::{pull_request_fingerprint, ticket_fingerprint};
use pr_context::models::{AnalysisResult, ArtifactKind, Finding, StateRecord};
use pr_context::state::{SqliteStateBackend, StateBackend, StateStore};
use pr_context::{db, migrate};

struct Harness {
    _tmp: TempDir,
    backend: Arc<SqliteStateBackend>,
    detector: ChangeDetector,
}

impl Harness {
    fn store(&self) -> &StateStore {
        self.detector.store()
    }
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("state.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let config = CacheConfig::default();
    let backend = Arc::new(SqliteStateBackend::new(pool));
    let store = StateStore::new(backend.clone(), &config);
    Harness {
        _tmp: tmp,
        backend,
        detector: ChangeDetector::new(Arc::new(store), &config),
    }
}

fn reqs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn sample_result() -> AnalysisResult {
    AnalysisResult {
        score: 0.8,
        issues: vec![Finding {
            category: Some("testing".to_string()),
            message: Some("missing integration test".to_string()),
            severity: Some("medium".to_string()),
            ..Finding::default()
        }],
        recommendations: Vec::new(),
        confidence: 0.9,
        timestamp: Utc::now(),
        analyzer_version: "1.0.0".to_string(),
    }
}

#[tokio::test]
async fn test_ticket_round_trip_through_sqlite() {
    let h = harness().await;
    let requirements = reqs(&["login works", "logout works"]);

    assert!(h.detector.has_ticket_changed("PROJ-1", "dod", &requirements).await);
    assert!(
        h.detector
            .record_ticket_analysis("PROJ-1", "dod", &requirements, Some(sample_result()))
            .await
    );

    let reordered = reqs(&["logout works", "login works"]);
    match h.detector.check_ticket("PROJ-1", "dod", &reordered, false).await {
        Decision::Fresh(record) => {
            assert_eq!(record.key, "PROJ-1");
            let result = record.result.unwrap();
            assert_eq!(result.score, 0.8);
            assert_eq!(result.issues.len(), 1);
            assert_eq!(result.issues[0].severity.as_deref(), Some("medium"));
        }
        other => panic!("expected fresh, got {:?}", other),
    }

    assert!(h.detector.has_ticket_changed("PROJ-1", "dod v2", &requirements).await);
    assert!(!h.detector.has_ticket_changed("PROJ-1", "dod", &requirements).await);
}

#[tokio::test]
async fn test_pull_request_commit_and_files() {
    let h = harness().await;
    let files = ["src/b.rs", "src/a.rs"];

    h.detector
        .record_pr_analysis("acme/api#12", "abc123", &files, None)
        .await;

    let same_set = ["src/a.rs", "src/b.rs"];
    assert!(!h.detector.has_pr_changed("acme/api#12", "abc123", &same_set).await);

    assert_eq!(
        h.detector
            .check_pull_request("acme/api#12", "fff999", &same_set, false)
            .await,
        Decision::Stale(StaleReason::CommitChanged)
    );
    assert_eq!(
        h.detector
            .check_pull_request("acme/api#12", "abc123", &["src/a.rs"], false)
            .await,
        Decision::Stale(StaleReason::ContentChanged)
    );
    assert_eq!(
        h.detector
            .check_pull_request("acme/api#12", "abc123", &same_set, true)
            .await,
        Decision::Stale(StaleReason::Forced)
    );
}

#[tokio::test]
async fn test_old_record_is_stale_despite_matching_fingerprint() {
    let h = harness().await;
    let requirements = reqs(&["r1"]);
    let analyzed = Utc::now() - chrono::Duration::hours(3);
    let record = StateRecord::ticket("PROJ-2", ticket_fingerprint("dod", &requirements))
        .analyzed_at(analyzed);
    assert!(h.store().put(&record, None).await);

    let decision = h.detector.check_ticket("PROJ-2", "dod", &requirements, false).await;
    assert!(matches!(
        decision,
        Decision::Stale(StaleReason::Expired { age_secs }) if age_secs >= 3 * 3600
    ));
    assert!(
        h.detector
            .should_reanalyze(ArtifactKind::Ticket, "PROJ-2", false)
            .await
    );
}

#[tokio::test]
async fn test_record_from_clock_ahead_host_is_fresh() {
    let h = harness().await;
    let record = StateRecord::pull_request(
        "acme/api#3",
        "abc",
        pull_request_fingerprint(&["x.py"], &["abc"]),
    )
    .analyzed_at(Utc::now() + chrono::Duration::milliseconds(500));
    assert!(h.store().put(&record, None).await);

    assert!(!h.detector.has_pr_changed("acme/api#3", "abc", &["x.py"]).await);
    assert!(
        !h.detector
            .should_reanalyze(ArtifactKind::PullRequest, "acme/api#3", false)
            .await
    );
}

#[tokio::test]
async fn test_expired_entry_is_a_miss() {
    let h = harness().await;
    let record = StateRecord::ticket("PROJ-3", ticket_fingerprint("dod", &[]));
    assert!(h.store().put(&record, Some(Duration::from_millis(50))).await);
    assert!(h.store().get(ArtifactKind::Ticket, "PROJ-3").await.is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(h.store().get(ArtifactKind::Ticket, "PROJ-3").await.is_none());
    assert_eq!(
        h.detector.check_ticket("PROJ-3", "dod", &[], false).await,
        Decision::Stale(StaleReason::Missing)
    );
    assert_eq!(h.store().count_expired().await, 1);

    // Any write purges elapsed entries
    let other = StateRecord::ticket("PROJ-4", ticket_fingerprint("dod", &[]));
    assert!(h.store().put(&other, None).await);
    let stats = h.store().stats().await.unwrap();
    assert_eq!(stats.expired, 0);
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.per_kind["ticket"], 1);
}

#[tokio::test]
async fn test_zero_ttl_is_rejected() {
    let h = harness().await;
    let record = StateRecord::ticket("PROJ-5", ticket_fingerprint("dod", &[]));
    assert!(!h.store().put(&record, Some(Duration::ZERO)).await);
    assert!(h.store().get(ArtifactKind::Ticket, "PROJ-5").await.is_none());
}

#[tokio::test]
async fn test_version_one_record_is_migrated() {
    let h = harness().await;
    let requirements = reqs(&["r1", "r2"]);
    let analyzed = Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f");
    let legacy = serde_json::json!({
        "ticket_key": "PROJ-9",
        "content_hash": ticket_fingerprint("dod", &requirements),
        "last_analyzed": analyzed.to_string(),
        "analysis_result": {
            "score": 0.5,
            "issues": ["no tests", {"category": "docs", "message": "no README"}],
            "recommendations": [],
            "confidence": 1.7,
            "timestamp": analyzed.to_string(),
        },
    });
    h.backend
        .set_ex(
            "pr_agent:state:jira:PROJ-9",
            &legacy.to_string(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let record = h
        .store()
        .get(ArtifactKind::Ticket, "PROJ-9")
        .await
        .expect("legacy record should be readable");
    assert_eq!(record.metadata["migrated_from_schema"], 1);

    let result = record.result.unwrap();
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.issues[0].message.as_deref(), Some("no tests"));
    assert_eq!(result.issues[1].category.as_deref(), Some("docs"));

    assert!(!h.detector.has_ticket_changed("PROJ-9", "dod", &requirements).await);

    // Invalidation reaches the legacy key too
    assert!(h.store().invalidate(ArtifactKind::Ticket, "PROJ-9").await);
    assert!(h.store().get(ArtifactKind::Ticket, "PROJ-9").await.is_none());
}

#[tokio::test]
async fn test_record_under_wrong_kind_is_ignored() {
    let h = harness().await;
    let record = StateRecord::ticket("acme/api#1", ticket_fingerprint("dod", &[]));
    let encoded = pr_context::state::encode_record(&record).unwrap();
    h.backend
        .set_ex(
            &h.store().key_for(ArtifactKind::PullRequest, "acme/api#1"),
            &encoded,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    assert!(h
        .detector
        .should_reanalyze(ArtifactKind::PullRequest, "acme/api#1", false)
        .await);
}

#[tokio::test]
async fn test_recording_replaces_legacy_record() {
    let h = harness().await;
    let legacy = serde_json::json!({
        "ticket_key": "P-7",
        "content_hash": "old",
        "last_analyzed": "2024-05-01T12:30:00Z",
    });
    h.backend
        .set_ex(
            "pr_agent:state:jira:P-7",
            &legacy.to_string(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let fresh = StateRecord::ticket("P-7", ticket_fingerprint("dod", &[]));
    assert!(h.store().put(&fresh, Some(Duration::from_millis(50))).await);

    let stats = h.store().stats().await.unwrap();
    assert_eq!(stats.total_entries, 1);
    assert_eq!(stats.per_kind["ticket"], 1);
    assert!(h.backend.get("pr_agent:state:jira:P-7").await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(h.store().get(ArtifactKind::Ticket, "P-7").await.is_none());
}
