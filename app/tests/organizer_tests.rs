//! Organizer flows: sign-in, party lifecycle, guest registration, lookup.

#![allow(clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use guestpass::{AppContext, CascadePolicy, Config, DeletedParty, ServiceError, Session, SessionContext};
use guestpass_core::backend::collections;
use guestpass_core::code::{CODE_ALPHABET, CODE_LENGTH};
use guestpass_core::{AttendeeForm, LoginForm, PartyForm, PartyId, Role};
use guestpass_testing::{InMemoryAuthenticator, InMemoryBackend, fixtures, test_clock};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    backend: InMemoryBackend,
    context: AppContext,
    sessions: SessionContext,
}

fn harness(config: Config) -> Harness {
    guestpass_testing::init_tracing();
    let backend = InMemoryBackend::new();
    let clock = Arc::new(test_clock());
    let auth = InMemoryAuthenticator::new(clock.clone());
    auth.register("o1", "host@example.com", "secret", Some(Role::Organizer));
    auth.register("g1", "door@example.com", "secret", Some(Role::Guard));

    Harness {
        context: AppContext::new(Arc::new(backend.clone()), Arc::new(auth), clock, config),
        backend,
        sessions: SessionContext::new(),
    }
}

impl Harness {
    async fn organizer(&mut self) -> Session {
        self.context
            .sign_in(
                &mut self.sessions,
                &LoginForm::new("host@example.com", "secret"),
                Role::Organizer,
            )
            .await
            .unwrap()
    }
}

fn party_form(title: &str) -> PartyForm {
    PartyForm {
        title: title.to_string(),
        description: "Bring your own vinyl".to_string(),
        date: Utc.with_ymd_and_hms(2025, 7, 14, 21, 0, 0).single(),
        location: "Quai 9".to_string(),
    }
}

#[tokio::test]
async fn guard_cannot_sign_into_the_organizer_app() {
    let mut h = harness(Config::default());
    let result = h
        .context
        .sign_in(
            &mut h.sessions,
            &LoginForm::new("door@example.com", "secret"),
            Role::Organizer,
        )
        .await;

    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    assert!(h.sessions.current_user().is_none());
}

#[tokio::test]
async fn created_party_belongs_to_the_organizer_and_gets_a_join_code() {
    let mut h = harness(Config::default());
    let session = h.organizer().await;
    let parties = h.context.parties();

    let party = parties
        .create_party(&party_form("  Summer launch  "), &session)
        .await
        .unwrap();

    assert_eq!(party.title, "Summer launch");
    assert_eq!(party.organizer.as_str(), "o1");
    assert_eq!(party.join_code.len(), CODE_LENGTH);
    assert!(party.join_code.bytes().all(|b| CODE_ALPHABET.contains(&b)));

    let found = parties
        .find_party_by_join_code(&party.join_code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(found.id, party.id);

    let by_qr = parties
        .find_party_by_qr(&parties.party_qr(&party))
        .await
        .unwrap();
    assert_eq!(by_qr.id, party.id);
}

#[tokio::test]
async fn invalid_party_form_sends_nothing() {
    let mut h = harness(Config::default());
    let session = h.organizer().await;
    let mut form = party_form("ab");
    form.date = None;

    let result = h.context.parties().create_party(&form, &session).await;
    let Err(ServiceError::Validation(errors)) = result else {
        unreachable!("expected validation errors, got {result:?}");
    };
    assert!(errors.message_for("title").is_some());
    assert!(errors.message_for("date").is_some());
    assert!(h.backend.calls().is_empty());
}

#[tokio::test]
async fn update_keeps_code_and_organizer() {
    let h = harness(Config::default());
    fixtures::party(&h.backend, "e1", "AB12CD", "o1");

    let updated = h
        .context
        .parties()
        .update_party(&PartyId::new("e1"), &party_form("Renamed party"))
        .await
        .unwrap();

    assert_eq!(updated.title, "Renamed party");
    assert_eq!(updated.join_code, "AB12CD");
    assert_eq!(updated.organizer.as_str(), "o1");
}

#[tokio::test]
async fn unknown_join_code_is_an_invalid_code() {
    let h = harness(Config::default());
    fixtures::party(&h.backend, "e1", "ZZ99ZZ", "o1");

    let result = h.context.parties().find_party_by_join_code("AB12CD").await;
    assert_eq!(result, Err(ServiceError::InvalidJoinCode("AB12CD".to_string())));
}

#[tokio::test]
async fn duplicate_join_codes_resolve_to_the_first_party() {
    let h = harness(Config::default());
    fixtures::party(&h.backend, "e1", "AB12CD", "o1");
    fixtures::party(&h.backend, "e2", "AB12CD", "o1");

    let party = h
        .context
        .parties()
        .find_party_by_join_code("AB12CD")
        .await
        .unwrap();
    assert_eq!(party.id.as_str(), "e1");
}

#[tokio::test]
async fn registered_guest_gets_a_code_unique_within_the_party() {
    let h = harness(Config::default());
    fixtures::party(&h.backend, "e1", "AB12CD", "o1");
    let attendees = h.context.attendees();
    let form = AttendeeForm {
        name: "Ana".to_string(),
        phone: "0612345678".to_string(),
    };

    let first = attendees
        .register_attendee(&PartyId::new("e1"), &form)
        .await
        .unwrap();
    let second = attendees
        .register_attendee(&PartyId::new("e1"), &form)
        .await
        .unwrap();

    assert_ne!(first.code, second.code);
    assert!(!first.scanned && !second.scanned);
    assert_eq!(
        h.context
            .views()
            .attendee_count(&PartyId::new("e1"))
            .await
            .unwrap(),
        2
    );
}

fn seed_party_with_guests(backend: &InMemoryBackend) {
    fixtures::party(backend, "e1", "AB12CD", "o1");
    fixtures::party(backend, "e2", "QW34ER", "o1");
    fixtures::attendee(backend, "a1", "e1", true);
    fixtures::attendee(backend, "a2", "e1", false);
    fixtures::attendee(backend, "b1", "e2", true);
    fixtures::scan(backend, "a1", "g1", "2025-07-14 21:30:00.000Z");
    fixtures::scan(backend, "b1", "g1", "2025-07-14 21:31:00.000Z");
}

#[tokio::test]
async fn orphan_policy_deletes_only_the_party() {
    let h = harness(Config::default());
    seed_party_with_guests(&h.backend);

    let deleted = h
        .context
        .parties()
        .delete_party(&PartyId::new("e1"))
        .await
        .unwrap();

    assert_eq!(deleted, DeletedParty::default());
    assert!(h.backend.record(collections::PARTIES, "e1").is_none());
    assert_eq!(h.backend.records(collections::ATTENDEES).len(), 3);
    assert_eq!(h.backend.records(collections::SCANS).len(), 2);
}

#[tokio::test]
async fn cascade_policy_sweeps_invitations_and_scans() {
    let h = harness(Config::default().with_cascade_policy(CascadePolicy::Cascade));
    seed_party_with_guests(&h.backend);

    let deleted = h
        .context
        .parties()
        .delete_party(&PartyId::new("e1"))
        .await
        .unwrap();

    assert_eq!(
        deleted,
        DeletedParty {
            attendees: 2,
            scans: 1
        }
    );
    assert!(h.backend.record(collections::PARTIES, "e1").is_none());
    let remaining = h.backend.records(collections::ATTENDEES);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["partyId"], json!("e2"));
    let scans = h.backend.records(collections::SCANS);
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0]["attendeeId"], json!("b1"));
}

#[tokio::test]
async fn cascade_of_a_missing_party_is_not_found() {
    let h = harness(Config::default().with_cascade_policy(CascadePolicy::Cascade));
    fixtures::attendee(&h.backend, "a1", "gone", false);

    let result = h
        .context
        .parties()
        .delete_party(&PartyId::new("gone"))
        .await;
    assert!(matches!(result, Err(ServiceError::NotFound { .. })));
    assert_eq!(h.backend.records(collections::ATTENDEES).len(), 1);
}

#[tokio::test]
async fn share_link_uses_configured_base() {
    let h = harness(Config::default().with_share_base_url("https://guestpass.example"));
    fixtures::party(&h.backend, "e1", "AB12CD", "o1");
    let parties = h.context.parties();

    let party = parties.get_party(&PartyId::new("e1")).await.unwrap();
    assert_eq!(
        parties.share_link(&party).as_deref(),
        Some("https://guestpass.example/party?code=AB12CD")
    );
}
