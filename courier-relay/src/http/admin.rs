//! Admin endpoints: recipient message deletion and account removal.
//!
//! Both operations authenticate through the account layer: the caller
//! names an identity in `x-courier-identity` and proves it with
//! `x-courier-credential`. The relay itself never mints credentials.

use crate::server::Relay;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use courier_types::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const IDENTITY_HEADER: &str = "x-courier-identity";
const CREDENTIAL_HEADER: &str = "x-courier-credential";

/// Request body for message deletion.
#[derive(Debug, Deserialize)]
pub struct DeleteMessagesRequest {
    /// Ids to delete. Unknown or foreign ids are skipped silently.
    pub ids: Vec<MessageId>,
}

/// Response for message deletion.
#[derive(Debug, Serialize)]
pub struct DeleteMessagesResponse {
    /// How many messages were actually removed.
    pub deleted: u64,
}

/// Response for account removal.
#[derive(Debug, Serialize)]
pub struct DeleteAccountResponse {
    /// How many messages the cascade removed.
    pub removed: u64,
}

/// Delete queued messages on behalf of their recipient.
///
/// `POST /messages/delete` with the identity/credential headers and a
/// JSON body of message ids. Returns the count of actual removals; ids
/// that don't exist or belong to another recipient don't fail the call.
pub async fn delete_messages_handler(
    Extension(relay): Extension<Arc<Relay>>,
    headers: HeaderMap,
    Json(req): Json<DeleteMessagesRequest>,
) -> Result<Json<DeleteMessagesResponse>, StatusCode> {
    let identity = authenticate(&relay, &headers).await?;

    let deleted = relay
        .delete_messages(&identity, &req.ids)
        .await
        .map_err(|e| {
            tracing::error!("Message deletion failed for {}: {}", identity, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(DeleteMessagesResponse { deleted }))
}

/// Remove an account's message footprint and close its live session.
///
/// `DELETE /accounts/:identity`, authenticated as that same identity.
/// Deletes every message the account sent or has queued.
pub async fn delete_account_handler(
    Extension(relay): Extension<Arc<Relay>>,
    Path(identity): Path<String>,
    headers: HeaderMap,
) -> Result<Json<DeleteAccountResponse>, StatusCode> {
    let caller = authenticate(&relay, &headers).await?;

    // Accounts may only remove themselves.
    if caller.as_str() != identity {
        return Err(StatusCode::FORBIDDEN);
    }

    let removed = relay.account_deleted(&caller).await.map_err(|e| {
        tracing::error!("Account cascade failed for {}: {}", caller, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(DeleteAccountResponse { removed }))
}

/// Resolve and verify the caller's identity from request headers.
async fn authenticate(relay: &Relay, headers: &HeaderMap) -> Result<UserId, StatusCode> {
    let identity = header_str(headers, IDENTITY_HEADER)?;
    let credential = header_str(headers, CREDENTIAL_HEADER)?;

    let identity = UserId::new(identity);
    if !relay.accounts().verify_credential(&identity, credential).await {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(identity)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, StatusCode> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::StaticAccounts;
    use crate::config::Config;
    use crate::http::build_router;
    use crate::storage::{MemoryStore, MessageStore};
    use axum::body::Body;
    use axum::http::Request;
    use courier_types::Send;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn seeded_relay() -> (Arc<Relay>, MessageId) {
        let accounts = StaticAccounts::new();
        accounts.insert(UserId::new("bob"), "bob-cred");
        accounts.insert(UserId::new("carol"), "carol-cred");

        let relay = Arc::new(Relay::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(accounts),
        ));

        let stored = relay
            .relay_send(
                UserId::new("alice"),
                Send {
                    to: UserId::new("bob"),
                    payload: b"hello".to_vec(),
                    nonce: "n".to_string(),
                },
            )
            .await
            .unwrap();

        (relay, stored.id)
    }

    fn delete_request(identity: &str, credential: &str, ids_json: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/messages/delete")
            .header("content-type", "application/json")
            .header(IDENTITY_HEADER, identity)
            .header(CREDENTIAL_HEADER, credential)
            .body(Body::from(format!(r#"{{"ids":{ids_json}}}"#)))
            .unwrap()
    }

    #[tokio::test]
    async fn recipient_deletes_own_message() {
        let (relay, id) = seeded_relay().await;
        let app = build_router(relay.clone());

        let response = app
            .oneshot(delete_request("bob", "bob-cred", format!(r#"["{id}"]"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["deleted"], 1);
        assert_eq!(relay.store().total_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_recipient_deletion_is_skipped() {
        let (relay, id) = seeded_relay().await;
        let app = build_router(relay.clone());

        // Carol authenticates fine but doesn't own the message.
        let response = app
            .oneshot(delete_request("carol", "carol-cred", format!(r#"["{id}"]"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["deleted"], 0);
        assert_eq!(relay.store().total_messages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bad_credential_is_unauthorized() {
        let (relay, id) = seeded_relay().await;
        let app = build_router(relay);

        let response = app
            .oneshot(delete_request("bob", "wrong", format!(r#"["{id}"]"#)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_headers_are_unauthorized() {
        let (relay, id) = seeded_relay().await;
        let app = build_router(relay);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/messages/delete")
                    .header("content-type", "application/json")
                    .body(Body::from(format!(r#"{{"ids":["{id}"]}}"#)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn account_removal_cascades() {
        let (relay, _) = seeded_relay().await;
        // Bob also sent something, so the cascade covers both directions.
        relay
            .relay_send(
                UserId::new("bob"),
                Send {
                    to: UserId::new("carol"),
                    payload: b"outbound".to_vec(),
                    nonce: "n".to_string(),
                },
            )
            .await
            .unwrap();

        let app = build_router(relay.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/accounts/bob")
                    .header(IDENTITY_HEADER, "bob")
                    .header(CREDENTIAL_HEADER, "bob-cred")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["removed"], 2);
        assert_eq!(relay.store().total_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn account_removal_requires_matching_identity() {
        let (relay, _) = seeded_relay().await;
        let app = build_router(relay);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/accounts/bob")
                    .header(IDENTITY_HEADER, "carol")
                    .header(CREDENTIAL_HEADER, "carol-cred")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
