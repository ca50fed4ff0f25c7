//! Redemption scenarios against the in-memory store.

#![allow(clippy::unwrap_used)]

use guestpass::retry::RetryPolicy;
use guestpass::{
    AppContext, BannerKind, Config, NotFoundCause, PartialFailureStage, RedemptionOutcome,
    RedemptionWarning, Redeemer, Session, SessionContext, WritePolicy,
};
use guestpass_core::backend::{BackendError, collections};
use guestpass_core::model::format_timestamp;
use guestpass_core::qr::QrPayload;
use guestpass_core::{Clock, LoginForm, Role};
use guestpass_testing::{InMemoryAuthenticator, InMemoryBackend, Operation, fixtures, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

async fn guard_session() -> Session {
    let auth = InMemoryAuthenticator::new(Arc::new(test_clock()));
    auth.register("g1", "door@example.com", "secret", Some(Role::Guard));
    let mut sessions = SessionContext::new();
    sessions
        .sign_in(&auth, &LoginForm::new("door@example.com", "secret"), Role::Guard)
        .await
        .unwrap()
        .clone()
}

fn seeded() -> InMemoryBackend {
    guestpass_testing::init_tracing();
    let backend = InMemoryBackend::new();
    fixtures::party(&backend, "e1", "AB12CD", "o1");
    fixtures::attendee(&backend, "a1", "e1", false);
    backend
}

fn redeemer(backend: &InMemoryBackend, policy: WritePolicy) -> Redeemer {
    Redeemer::new(Arc::new(backend.clone()), Arc::new(test_clock()))
        .with_policy(policy)
        .with_audit_retry(
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(100))
                .build(),
        )
}

fn scans_of(backend: &InMemoryBackend, attendee: &str) -> Vec<serde_json::Map<String, Value>> {
    backend
        .records(collections::SCANS)
        .into_iter()
        .filter(|scan| scan["attendeeId"] == json!(attendee))
        .collect()
}

fn attendee_payload() -> QrPayload {
    QrPayload::attendee("a1", "e1", None)
}

// ═══════════════════════════════════════════════════════════════════════
// Core scenarios, under both write policies
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn first_scan_succeeds_and_second_is_already_scanned() {
    for policy in [WritePolicy::ClaimFirst, WritePolicy::AuditFirst] {
        let backend = seeded();
        let redeemer = redeemer(&backend, policy);
        let session = guard_session().await;

        let outcome = redeemer
            .redeem(&attendee_payload(), Some(&session))
            .await
            .unwrap();
        let RedemptionOutcome::Success {
            attendee,
            event,
            scan,
            warnings,
        } = &outcome
        else {
            unreachable!("{policy}: expected success, got {outcome:?}");
        };
        assert!(attendee.scanned);
        assert_eq!(event.as_ref().map(|p| p.title.as_str()), Some("Party e1"));
        assert!(warnings.is_empty());
        assert_eq!(scan.attendee_id.as_str(), "a1");
        assert_eq!(scan.scanned_by.as_str(), "g1");
        assert_eq!(outcome.banner().kind, BannerKind::Pass);

        assert_eq!(
            backend.record(collections::ATTENDEES, "a1").unwrap()["scanned"],
            json!(true)
        );
        let scans = scans_of(&backend, "a1");
        assert_eq!(scans.len(), 1, "{policy}");
        assert_eq!(scans[0]["scannedBy"], json!("g1"));
        assert_eq!(
            scans[0]["scannedAt"],
            json!(format_timestamp(test_clock().now()))
        );

        let again = redeemer
            .redeem(&attendee_payload(), Some(&session))
            .await
            .unwrap();
        assert!(matches!(again, RedemptionOutcome::AlreadyScanned { .. }), "{policy}");
        assert_eq!(again.banner().kind, BannerKind::Fail);
        assert_eq!(scans_of(&backend, "a1").len(), 1, "{policy}");
    }
}

#[tokio::test]
async fn event_payload_is_invalid_without_side_effects() {
    let backend = seeded();
    let session = guard_session().await;
    let text = r#"{"type":"event","id":"e1"}"#;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem_text(text, Some(&session))
        .await
        .unwrap();

    assert!(matches!(outcome, RedemptionOutcome::Invalid { .. }));
    assert!(backend.writes().is_empty());
    assert!(backend.records(collections::SCANS).is_empty());
}

#[tokio::test]
async fn unknown_invitation_is_not_found() {
    let backend = seeded();
    let session = guard_session().await;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem(&QrPayload::attendee("zz", "e1", None), Some(&session))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RedemptionOutcome::NotFound {
            cause: NotFoundCause::Missing
        }
    );
    assert!(backend.writes().is_empty());
}

#[tokio::test]
async fn expired_or_missing_session_touches_nothing() {
    let backend = seeded();
    let mut session = guard_session().await;
    session.expires_at = Some(test_clock().now() - chrono::Duration::minutes(1));
    let redeemer = redeemer(&backend, WritePolicy::ClaimFirst);

    for session in [None, Some(&session)] {
        let outcome = redeemer.redeem(&attendee_payload(), session).await.unwrap();
        assert_eq!(outcome, RedemptionOutcome::Unauthenticated);
    }
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn legacy_party_spelling_in_attendee_payload_is_accepted() {
    let backend = seeded();
    let session = guard_session().await;
    let text = r#"{"type":"attendee","id":"a1","partyId":"e1","code":"0000A1"}"#;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem_text(text, Some(&session))
        .await
        .unwrap();
    assert!(matches!(outcome, RedemptionOutcome::Success { .. }));
}

#[tokio::test]
async fn missing_party_degrades_to_a_warning() {
    let backend = seeded();
    backend.fail_next(
        Operation::GetOne,
        collections::PARTIES,
        1,
        BackendError::Transport("connection reset".to_string()),
    );
    let session = guard_session().await;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    let RedemptionOutcome::Success { event, warnings, .. } = &outcome else {
        unreachable!("expected success, got {outcome:?}");
    };
    assert!(event.is_none());
    assert_eq!(warnings, &[RedemptionWarning::EventUnavailable]);
    assert_eq!(outcome.banner().kind, BannerKind::Pass);
    assert_eq!(scans_of(&backend, "a1").len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
// Concurrent scans of the same invitation
// ═══════════════════════════════════════════════════════════════════════

async fn race(policy: WritePolicy) -> (InMemoryBackend, [RedemptionOutcome; 2]) {
    let backend = seeded();
    // Both lookups complete before either scan writes anything.
    backend.gate_reads(collections::ATTENDEES, Arc::new(Barrier::new(2)));
    let redeemer = redeemer(&backend, policy);
    let session = guard_session().await;
    let payload = attendee_payload();

    let (first, second) = tokio::join!(
        redeemer.redeem(&payload, Some(&session)),
        redeemer.redeem(&payload, Some(&session)),
    );
    (backend, [first.unwrap(), second.unwrap()])
}

#[tokio::test]
async fn claim_first_lets_exactly_one_concurrent_scan_win() {
    let (backend, outcomes) = race(WritePolicy::ClaimFirst).await;

    let successes = outcomes
        .iter()
        .filter(|o| matches!(o, RedemptionOutcome::Success { .. }))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, RedemptionOutcome::AlreadyScanned { .. }))
        .count();
    assert_eq!((successes, rejected), (1, 1));
    assert_eq!(scans_of(&backend, "a1").len(), 1);
}

#[tokio::test]
async fn audit_first_reproduces_the_double_redemption() {
    let (backend, outcomes) = race(WritePolicy::AuditFirst).await;

    assert!(
        outcomes
            .iter()
            .all(|o| matches!(o, RedemptionOutcome::Success { .. }))
    );
    assert_eq!(scans_of(&backend, "a1").len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
// Partial failures
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn audit_write_is_retried_until_it_lands() {
    let backend = seeded();
    backend.fail_next(
        Operation::Create,
        collections::SCANS,
        2,
        BackendError::Timeout(Duration::from_secs(15)),
    );
    let session = guard_session().await;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    assert!(matches!(outcome, RedemptionOutcome::Success { .. }));
    assert_eq!(scans_of(&backend, "a1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_audit_retries_report_missing_audit() {
    let backend = seeded();
    backend.fail_always(
        Operation::Create,
        collections::SCANS,
        BackendError::Transport("offline".to_string()),
    );
    let session = guard_session().await;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    let RedemptionOutcome::PartialFailure { attendee, stage, .. } = &outcome else {
        unreachable!("expected partial failure, got {outcome:?}");
    };
    assert_eq!(*stage, PartialFailureStage::AuditMissing);
    assert!(attendee.scanned);
    assert!(outcome.admits());
    assert_eq!(outcome.banner().kind, BannerKind::Warning);

    let attempts = backend
        .calls()
        .iter()
        .filter(|c| c.operation == Operation::Create && c.collection == collections::SCANS)
        .count();
    assert_eq!(attempts, 3);
    assert!(backend.records(collections::SCANS).is_empty());
}

#[tokio::test]
async fn rejected_audit_write_is_not_retried() {
    let backend = seeded();
    backend.fail_always(
        Operation::Create,
        collections::SCANS,
        BackendError::Forbidden("scans are read-only".to_string()),
    );
    let session = guard_session().await;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        RedemptionOutcome::PartialFailure {
            stage: PartialFailureStage::AuditMissing,
            ..
        }
    ));
    let attempts = backend
        .calls()
        .iter()
        .filter(|c| c.operation == Operation::Create)
        .count();
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn audit_first_flag_failure_leaves_invitation_reusable() {
    let backend = seeded();
    backend.fail_next(
        Operation::Update,
        collections::ATTENDEES,
        1,
        BackendError::Api {
            status: 500,
            message: "database is locked".to_string(),
        },
    );
    let session = guard_session().await;
    let redeemer = redeemer(&backend, WritePolicy::AuditFirst);

    let outcome = redeemer
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RedemptionOutcome::PartialFailure {
            stage: PartialFailureStage::FlagNotSet,
            ..
        }
    ));
    assert_eq!(
        backend.record(collections::ATTENDEES, "a1").unwrap()["scanned"],
        json!(false)
    );
    assert_eq!(scans_of(&backend, "a1").len(), 1);

    // The documented limitation: a re-scan is accepted and double-counted.
    let retry = redeemer
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    assert!(matches!(retry, RedemptionOutcome::Success { .. }));
    assert_eq!(scans_of(&backend, "a1").len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════
// Lost replies
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn claim_that_lands_without_a_reply_still_admits() {
    let backend = seeded();
    backend.lose_reply_next(
        Operation::Update,
        collections::ATTENDEES,
        1,
        BackendError::Timeout(Duration::from_secs(15)),
    );
    let session = guard_session().await;
    let redeemer = redeemer(&backend, WritePolicy::ClaimFirst);

    let outcome = redeemer
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    assert!(matches!(outcome, RedemptionOutcome::Success { .. }), "{outcome:?}");
    assert_eq!(outcome.banner().kind, BannerKind::Pass);
    assert_eq!(scans_of(&backend, "a1").len(), 1);

    let again = redeemer
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    assert!(matches!(again, RedemptionOutcome::AlreadyScanned { .. }));
    assert_eq!(scans_of(&backend, "a1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn audit_write_that_lands_without_a_reply_is_not_duplicated() {
    let backend = seeded();
    backend.lose_reply_next(
        Operation::Create,
        collections::SCANS,
        1,
        BackendError::Transport("connection reset".to_string()),
    );
    let session = guard_session().await;

    let outcome = redeemer(&backend, WritePolicy::ClaimFirst)
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    let RedemptionOutcome::Success { scan, .. } = &outcome else {
        unreachable!("expected success, got {outcome:?}");
    };
    let scans = scans_of(&backend, "a1");
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0]["id"], json!(scan.id.as_str()));
    let creates = backend
        .calls()
        .iter()
        .filter(|c| c.operation == Operation::Create && c.collection == collections::SCANS)
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn rescan_completes_a_claim_left_without_audit() {
    let backend = InMemoryBackend::new();
    fixtures::party(&backend, "e1", "AB12CD", "o1");
    fixtures::attendee(&backend, "a1", "e1", true);
    let session = guard_session().await;

    let baseline = redeemer(&backend, WritePolicy::AuditFirst)
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    assert!(matches!(baseline, RedemptionOutcome::AlreadyScanned { .. }));
    assert!(backend.records(collections::SCANS).is_empty());

    let redeemer = redeemer(&backend, WritePolicy::ClaimFirst);
    let outcome = redeemer
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    let RedemptionOutcome::Success { warnings, .. } = &outcome else {
        unreachable!("expected success, got {outcome:?}");
    };
    assert_eq!(warnings, &[RedemptionWarning::CompletedEarlierClaim]);
    assert!(outcome.admits());
    assert_eq!(outcome.banner().kind, BannerKind::Warning);
    assert_eq!(scans_of(&backend, "a1").len(), 1);

    let again = redeemer
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();
    assert!(matches!(again, RedemptionOutcome::AlreadyScanned { .. }));
    assert_eq!(scans_of(&backend, "a1").len(), 1);
}

#[tokio::test]
async fn invitation_without_scanned_field_is_redeemable() {
    for policy in [WritePolicy::ClaimFirst, WritePolicy::AuditFirst] {
        let backend = seeded();
        backend.seed(
            collections::ATTENDEES,
            json!({"id": "a9", "partyId": "e1", "name": "Legacy"}),
        );
        let session = guard_session().await;

        let outcome = redeemer(&backend, policy)
            .redeem(&QrPayload::attendee("a9", "e1", None), Some(&session))
            .await
            .unwrap();
        assert!(matches!(outcome, RedemptionOutcome::Success { .. }), "{policy}: {outcome:?}");
        assert_eq!(
            backend.record(collections::ATTENDEES, "a9").unwrap()["scanned"],
            json!(true)
        );
        assert_eq!(scans_of(&backend, "a9").len(), 1, "{policy}");
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Uniform timeout
// ═══════════════════════════════════════════════════════════════════════

fn bounded_context(backend: &InMemoryBackend) -> AppContext {
    let clock = Arc::new(test_clock());
    AppContext::new(
        Arc::new(backend.clone()),
        Arc::new(InMemoryAuthenticator::new(clock.clone())),
        clock,
        Config::default().with_request_timeout(Duration::from_secs(10)),
    )
}

#[tokio::test(start_paused = true)]
async fn hung_lookup_times_out_as_unreachable() {
    let backend = seeded();
    backend.hang(Operation::GetOne, collections::ATTENDEES);
    let session = guard_session().await;

    let started = tokio::time::Instant::now();
    let outcome = bounded_context(&backend)
        .redeemer()
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RedemptionOutcome::NotFound {
            cause: NotFoundCause::Unreachable
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn hung_claim_is_a_retryable_connectivity_outcome() {
    let backend = seeded();
    backend.hang(Operation::Update, collections::ATTENDEES);
    let session = guard_session().await;

    let outcome = bounded_context(&backend)
        .redeemer()
        .redeem(&attendee_payload(), Some(&session))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RedemptionOutcome::Connectivity {
            error: BackendError::Timeout(Duration::from_secs(10))
        }
    );
    assert_eq!(outcome.banner().kind, BannerKind::Retry);
    assert!(backend.records(collections::SCANS).is_empty());
}

proptest::proptest! {
    #[test]
    fn scanned_garbage_is_invalid_and_writes_nothing(text in "\\PC{0,64}") {
        let backend = seeded();
        let redeemer = redeemer(&backend, WritePolicy::ClaimFirst);
        let outcome = tokio_test::block_on(async {
            let session = guard_session().await;
            redeemer.redeem_text(&text, Some(&session)).await.unwrap()
        });

        proptest::prop_assert!(!outcome.admits());
        proptest::prop_assert!(backend.records(collections::SCANS).is_empty());
        proptest::prop_assert!(!backend.record(collections::ATTENDEES, "a1").unwrap()["scanned"].as_bool().unwrap());
    }
}
