//! HTTP-level tests for the PocketBase binding.

#![allow(clippy::unwrap_used)]

use futures::StreamExt;
use guestpass_core::backend::collections;
use guestpass_core::{Authenticator, Backend, BackendError, Filter, ListQuery, RecordAction, Sort};
use guestpass_pocketbase::PocketBaseClient;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> PocketBaseClient {
    PocketBaseClient::new(server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn get_one_returns_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/attendees/records/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "a1", "partyId": "e1", "scanned": false
        })))
        .mount(&server)
        .await;

    let record = client(&server).get_one("attendees", "a1").await.unwrap();
    assert_eq!(record["partyId"], "e1");
}

#[tokio::test]
async fn statuses_map_to_backend_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/attendees/records/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 404, "message": "The requested resource wasn't found.", "data": {}
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/collections/parties/records/e1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": 403, "message": "Only superusers can perform this action.", "data": {}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/collections/scans/records"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert_eq!(
        client.get_one("attendees", "missing").await,
        Err(BackendError::not_found("attendees", "missing"))
    );
    assert_eq!(
        client.delete("parties", "e1").await,
        Err(BackendError::Forbidden(
            "Only superusers can perform this action.".to_string()
        ))
    );
    assert_eq!(
        client.create("scans", serde_json::Map::new()).await,
        Err(BackendError::Api {
            status: 500,
            message: "boom".to_string()
        })
    );
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/parties/records/e1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "e1"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(server.uri(), Duration::from_millis(50)).unwrap();
    let err = client.get_one("parties", "e1").await.unwrap_err();
    assert_eq!(err, BackendError::Timeout(Duration::from_millis(50)));
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn list_sends_rendered_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/scans/records"))
        .and(query_param("perPage", "50"))
        .and(query_param("sort", "-scannedAt"))
        .and(query_param("filter", r#"scannedBy = "g1""#))
        .and(query_param("expand", "attendeeId"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 1, "perPage": 50, "totalItems": 1, "totalPages": 1,
            "items": [{"id": "s1", "attendeeId": "a1", "scannedBy": "g1"}]
        })))
        .mount(&server)
        .await;

    let query = ListQuery::new()
        .per_page(50)
        .filter(Filter::eq("scannedBy", "g1"))
        .sort(Sort::desc("scannedAt"))
        .expand("attendeeId");
    let page = client(&server).get_list("scans", &query).await.unwrap();
    assert_eq!(page.total_items, 1);
    assert_eq!(page.items[0]["id"], "s1");
}

#[tokio::test]
async fn update_where_skips_patch_when_guard_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/attendees/records/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "a1", "scanned": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let guard = json!({"scanned": false}).as_object().cloned().unwrap();
    let patch = json!({"scanned": true}).as_object().cloned().unwrap();
    let result = client(&server)
        .update_where("attendees", "a1", &guard, patch)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn update_where_treats_rule_rejection_as_lost_race() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/collections/attendees/records/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "a1", "scanned": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/collections/attendees/records/a1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 404, "message": "The requested resource wasn't found.", "data": {}
        })))
        .mount(&server)
        .await;

    let guard = json!({"scanned": false}).as_object().cloned().unwrap();
    let patch = json!({"scanned": true}).as_object().cloned().unwrap();
    let result = client(&server)
        .update_where("attendees", "a1", &guard, patch)
        .await
        .unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn password_sign_in_stores_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-with-password"))
        .and(body_json(json!({"identity": "door@example.com", "password": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-1",
            "record": {"id": "g1", "email": "door@example.com", "role": "vigile"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/collections/attendees/records/a1"))
        .and(header("Authorization", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a1"})))
        .mount(&server)
        .await;

    let client = client(&server);
    let grant = client
        .sign_in_with_password(" door@example.com ", "secret")
        .await
        .unwrap();
    assert_eq!(grant.account.id.as_str(), "g1");
    assert_eq!(client.token().as_deref(), Some("tok-1"));

    assert!(client.get_one("attendees", "a1").await.is_ok());
}

#[tokio::test]
async fn rejected_credentials_are_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/collections/users/auth-with-password"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400, "message": "Failed to authenticate.", "data": {}
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .sign_in_with_password("door@example.com", "nope")
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Unauthorized);
}

#[tokio::test]
async fn realtime_subscription_yields_matching_events() {
    let server = MockServer::start().await;
    let body = concat!(
        "id:c1\nevent:PB_CONNECT\ndata:{\"clientId\":\"c1\"}\n\n",
        "event:parties/*\ndata:{\"action\":\"create\",\"record\":{\"id\":\"e9\"}}\n\n",
        "event:attendees/*\ndata:{\"action\":\"update\",\"record\":{\"id\":\"a1\",\"scanned\":true}}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/realtime"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/realtime"))
        .and(body_json(json!({"clientId": "c1", "subscriptions": ["attendees/*"]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/realtime"))
        .and(body_json(json!({"clientId": "c1", "subscriptions": []})))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let mut subscription = client(&server)
        .subscribe(collections::ATTENDEES, "*")
        .await
        .unwrap();

    let event = subscription.next().await.unwrap();
    assert_eq!(event.action, RecordAction::Update);
    assert_eq!(event.record_id(), Some("a1"));
    assert!(subscription.next().await.is_none());
}
