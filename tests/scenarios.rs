/// End-to-end request flows against an in-memory deployment
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use murmur::{
    config::ServerConfig, context::AppContext, server::build_router, store::MemoryStore,
    test_support::MutableClock,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    router: Router,
    clock: Arc<MutableClock>,
}

/// Application credentials plus one logged-in user
struct Member {
    app_token: String,
    id: String,
    session: String,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(ServerConfig::for_memory()).await
    }

    async fn with_config(config: ServerConfig) -> Self {
        let clock = Arc::new(MutableClock::at(500));
        let ctx = AppContext::with_store(config, Arc::new(MemoryStore::new()), clock.clone())
            .await
            .unwrap();
        Harness {
            router: build_router(ctx),
            clock,
        }
    }

    async fn call(
        &self,
        method: Method,
        uri: &str,
        auth: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some((user, password)) = auth {
            let encoded = STANDARD.encode(format!("{}:{}", user, password));
            request = request.header(header::AUTHORIZATION, format!("Basic {}", encoded));
        }
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Account, administrator session and one staging application
    async fn application(&self) -> String {
        let response = self
            .call(
                Method::POST,
                "/accounts",
                None,
                Some(json!({
                    "name": "acme",
                    "user": {"user_name": "owner", "email": "owner@acme.io", "password": "owner-pass"}
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let account = json_body(response).await;
        let account_token = account["token"].as_str().unwrap().to_string();
        let session = account["user"]["session_token"].as_str().unwrap().to_string();

        let response = self
            .call(
                Method::POST,
                "/account/applications",
                Some((&account_token, &session)),
                Some(json!({"name": "acme-app", "in_production": false})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await["token"].as_str().unwrap().to_string()
    }

    async fn member(&self, app_token: &str, user_name: &str) -> Member {
        let response = self
            .call(
                Method::POST,
                "/users?withLogin=true",
                Some((app_token, "")),
                Some(json!({
                    "user_name": user_name,
                    "email": format!("{}@example.com", user_name),
                    "password": "hunter22"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let user = json_body(response).await;
        Member {
            app_token: app_token.to_string(),
            id: user["id"].as_str().unwrap().to_string(),
            session: user["session_token"].as_str().unwrap().to_string(),
        }
    }

    async fn as_member(
        &self,
        member: &Member,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.call(method, uri, Some((&member.app_token, &member.session)), body)
            .await
    }

    async fn post_event(&self, author: &Member, at: i64, verb: &str) -> i64 {
        self.clock.set(at);
        let response = self
            .as_member(
                author,
                Method::POST,
                "/user/events",
                Some(json!({"type": verb, "visibility": "public"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await["id"].as_i64().unwrap()
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn error_code(response: Response) -> u64 {
    json_body(response).await["errors"][0]["code"].as_u64().unwrap()
}

#[tokio::test]
async fn test_follow_then_feed_then_unfollow() {
    let harness = Harness::new().await;
    let app = harness.application().await;
    let alice = harness.member(&app, "alice").await;
    let bob = harness.member(&app, "bob").await;

    let first = harness.post_event(&alice, 1_000, "like").await;

    harness.clock.set(1_500);
    let response = harness
        .as_member(
            &bob,
            Method::POST,
            "/user/connections",
            Some(json!({"user_to_id": alice.id, "type": "follow"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let second = harness.post_event(&alice, 2_000, "share").await;

    let response = harness.as_member(&bob, Method::GET, "/user/feed", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let feed = json_body(response).await;
    let ids: Vec<i64> = feed["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![second, first]);
    assert_eq!(feed["unread_events_count"], 2);
    assert!(feed["users"][&alice.id].is_object());
    assert!(feed["users"][&alice.id].get("password").is_none());

    let response = harness
        .as_member(&bob, Method::GET, "/user/feed/unread/count", None)
        .await;
    assert_eq!(json_body(response).await["unread_events_count"], 0);

    let response = harness
        .as_member(
            &bob,
            Method::DELETE,
            &format!("/user/connections/{}", alice.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness.as_member(&bob, Method::GET, "/user/feed", None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_unread_feed_advances_cursor() {
    let harness = Harness::new().await;
    let app = harness.application().await;
    let alice = harness.member(&app, "alice").await;
    let bob = harness.member(&app, "bob").await;

    harness
        .as_member(
            &bob,
            Method::POST,
            "/user/connections",
            Some(json!({"user_to_id": alice.id, "type": "follow"})),
        )
        .await;
    harness.post_event(&alice, 1_000, "like").await;

    let response = harness
        .as_member(&bob, Method::GET, "/user/feed/unread", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["events"].as_array().unwrap().len(), 1);

    let response = harness
        .as_member(&bob, Method::GET, "/user/feed/unread", None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    harness.post_event(&alice, 3_000, "comment").await;
    let response = harness
        .as_member(&bob, Method::GET, "/user/feed/unread/count", None)
        .await;
    assert_eq!(json_body(response).await["unread_events_count"], 1);
}

#[tokio::test]
async fn test_friend_request_stays_pending_until_confirmed() {
    let harness = Harness::new().await;
    let app = harness.application().await;
    let alice = harness.member(&app, "alice").await;
    let bob = harness.member(&app, "bob").await;

    let response = harness
        .as_member(
            &alice,
            Method::POST,
            "/user/connections",
            Some(json!({"user_to_id": bob.id, "type": "friend", "enabled": false})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let connection = json_body(response).await;
    assert_eq!(connection["enabled"], false);

    let response = harness
        .as_member(&alice, Method::GET, "/user/friends", None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness
        .as_member(
            &bob,
            Method::POST,
            &format!("/user/connections/{}/confirm", alice.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = harness
        .as_member(&alice, Method::GET, "/user/friends", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let friends = json_body(response).await;
    assert_eq!(friends["users_count"], 1);
    assert_eq!(friends["users"][0]["id"], bob.id.as_str());

    let response = harness
        .as_member(&bob, Method::GET, &format!("/users/{}/friends", alice.id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_connection_errors() {
    let harness = Harness::new().await;
    let app = harness.application().await;
    let alice = harness.member(&app, "alice").await;

    let response = harness
        .as_member(
            &alice,
            Method::POST,
            "/user/connections",
            Some(json!({"user_to_id": alice.id, "type": "follow"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .as_member(&alice, Method::DELETE, "/user/connections/not-a-uuid", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stranger = uuid::Uuid::new_v4().to_string();
    let response = harness
        .as_member(
            &alice,
            Method::DELETE,
            &format!("/user/connections/{}", stranger),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_login_and_session_lifecycle() {
    let harness = Harness::new().await;
    let app = harness.application().await;
    let alice = harness.member(&app, "alice").await;

    let response = harness
        .call(
            Method::POST,
            "/user/login?withUserDetails=true",
            Some((&app, "")),
            Some(json!({"email": "alice@example.com", "password": "wrong-one"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness
        .call(
            Method::POST,
            "/user/login?withUserDetails=true",
            Some((&app, "")),
            Some(json!({"email_name": "alice", "password": "hunter22"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let login = json_body(response).await;
    assert_eq!(login["id"], alice.id.as_str());
    assert_eq!(login["user"]["user_name"], "alice");
    let session = login["session_token"].as_str().unwrap().to_string();

    let response = harness
        .call(Method::GET, "/user", Some((&app, &session)), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .call(Method::DELETE, "/user/logout", Some((&app, &session)), None)
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = harness
        .call(Method::GET, "/user", Some((&app, &session)), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_json_and_missing_auth() {
    let harness = Harness::new().await;
    let app = harness.application().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/users")
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(format!("{}:", app))),
        )
        .body(Body::from("{\"user_name\":"))
        .unwrap();
    let response = harness.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, 1001);

    let response = harness.call(Method::GET, "/user/feed", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_event_search_and_visibility() {
    let harness = Harness::new().await;
    let app = harness.application().await;
    let alice = harness.member(&app, "alice").await;
    let bob = harness.member(&app, "bob").await;

    harness.clock.set(1_000);
    let response = harness
        .as_member(
            &alice,
            Method::POST,
            "/user/events",
            Some(json!({
                "type": "checkin",
                "visibility": "public",
                "latitude": 52.52,
                "longitude": 13.40,
                "location": "berlin"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = harness
        .as_member(
            &alice,
            Method::POST,
            "/user/events",
            Some(json!({"type": "note", "visibility": "private", "location": "berlin"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = harness
        .as_member(&bob, Method::GET, "/events?location=berlin", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["events_count"], 1);

    let response = harness
        .as_member(&bob, Method::GET, "/events?lat=52.5&lon=13.4&rad=1", None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .as_member(&bob, Method::GET, "/events?lat=52.5&lon=13.4&nearest=5", None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .as_member(&bob, Method::GET, &format!("/users/{}/events", alice.id), None)
        .await;
    assert_eq!(json_body(response).await["events_count"], 1);

    let response = harness
        .as_member(&alice, Method::GET, "/user/events", None)
        .await;
    assert_eq!(json_body(response).await["events_count"], 2);
}

#[tokio::test]
async fn test_rate_limit_headers_and_rejection() {
    let mut config = ServerConfig::for_memory();
    config.rate_limit.staging_limit = 2;
    let harness = Harness::with_config(config).await;
    let app = harness.application().await;

    let response = harness
        .call(Method::POST, "/user/login", Some((&app, "")), Some(json!({})))
        .await;
    assert_eq!(response.headers()["X-RateLimit-Limit"], "2");
    assert_eq!(response.headers()["X-RateLimit-Remaining"], "1");

    harness
        .call(Method::POST, "/user/login", Some((&app, "")), Some(json!({})))
        .await;
    let response = harness
        .call(Method::POST, "/user/login", Some((&app, "")), Some(json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["X-RateLimit-Remaining"], "0");
}

#[tokio::test]
async fn test_production_application_cannot_be_deleted() {
    let harness = Harness::new().await;
    let response = harness
        .call(
            Method::POST,
            "/accounts",
            None,
            Some(json!({
                "name": "acme",
                "user": {"user_name": "owner", "email": "owner@acme.io", "password": "owner-pass"}
            })),
        )
        .await;
    let account = json_body(response).await;
    let token = account["token"].as_str().unwrap().to_string();
    let session = account["user"]["session_token"].as_str().unwrap().to_string();

    let response = harness
        .call(
            Method::POST,
            "/account/applications",
            Some((&token, &session)),
            Some(json!({"name": "live", "in_production": true})),
        )
        .await;
    let id = json_body(response).await["id"].as_str().unwrap().to_string();

    let response = harness
        .call(
            Method::DELETE,
            &format!("/account/applications/{}", id),
            Some((&token, &session)),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::GONE);
}
