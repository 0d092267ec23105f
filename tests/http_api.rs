//! HTTP surface, driven in-process through the router

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use booklend_server::{
    api,
    config::AppConfig,
    models::user::CreateUser,
    repository::MemoryStore,
    AppState,
};

struct TestApp {
    router: Router,
    token: String,
    user_id: i64,
}

async fn spawn_app() -> TestApp {
    let state = AppState::new(AppConfig::default(), Arc::new(MemoryStore::new()));

    let user = state
        .services
        .users
        .create_user(CreateUser {
            name: "librarian".to_string(),
            email: "librarian@example.org".to_string(),
            password: "passw0rd".to_string(),
        })
        .await
        .unwrap();
    let (token, _) = state
        .services
        .auth
        .login("librarian@example.org", "passw0rd")
        .await
        .unwrap();

    TestApp {
        router: api::router(state),
        token,
        user_id: user.id,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_book(&self, name: &str) -> i64 {
        let (status, body) = self
            .call(Method::POST, "/books", Some(json!({ "name": name, "author": "Butler" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    fn loan(&self, book_id: i64) -> Value {
        json!({ "user": { "id": self.user_id }, "book": { "id": book_id } })
    }
}

#[tokio::test]
async fn health_needs_no_token() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_token() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/books").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/books")
                .header(header::AUTHORIZATION, "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_and_refresh() {
    let app = spawn_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "username": "librarian@example.org", "password": "wrong" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = app.call(Method::GET, "/refresh_token", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
    assert!(body["expire"].is_string());
}

#[tokio::test]
async fn borrow_return_and_delete_over_http() {
    let app = spawn_app().await;
    let book_id = app.create_book("Kindred").await;

    let (status, body) = app.call(Method::POST, "/books/borrow", Some(app.loan(book_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["borrowers"][0]["id"], app.user_id);
    assert_eq!(body["available"], 0);

    let (status, body) = app.call(Method::POST, "/books/borrow", Some(app.loan(book_id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (status, _) = app.call(Method::DELETE, &format!("/books/{}", book_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.call(Method::POST, "/books/return", Some(app.loan(book_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["borrowers"], json!([]));

    let (status, body) = app.call(Method::POST, "/books/return", Some(app.loan(book_id))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["code"], 7);

    let (status, _) = app.call(Method::DELETE, &format!("/books/{}", book_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.call(Method::GET, &format!("/books/{}", book_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rename_changes_only_the_name() {
    let app = spawn_app().await;
    let book_id = app.create_book("Kindred").await;

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/books/{}", book_id),
            Some(json!({ "name": "Parable of the Sower", "author": "ignored" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Parable of the Sower");
    assert_eq!(body["author"], "Butler");

    let (status, _) = app
        .call(Method::PUT, "/books/999", Some(json!({ "name": "x" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn book_listing_honours_filters() {
    let app = spawn_app().await;
    let lent = app.create_book("lent").await;
    let _kept = app.create_book("kept").await;
    app.call(Method::POST, "/books/borrow", Some(app.loan(lent))).await;

    let (status, body) = app
        .call(Method::GET, &format!("/books?borrowerID={}", app.user_id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let books = body.as_array().unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0]["id"], lent);

    let (_, body) = app.call(Method::GET, "/books", None).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn ledger_endpoints() {
    let app = spawn_app().await;
    let book_id = app.create_book("Kindred").await;

    let (status, record) = app
        .call(
            Method::POST,
            "/borrow-records",
            Some(json!({ "bookID": book_id, "userID": app.user_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(record["status"], "borrowing");
    let record_id = record["id"].as_i64().unwrap();

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/borrow-records?bookID={}&userIDs={}&status=borrowing", book_id, app.user_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["user"]["id"], app.user_id);

    let (status, _) = app.call(Method::GET, "/borrow-records?status=lost", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/borrow-records/{}", record_id);
    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.call(Method::PUT, &uri, Some(json!({ "status": "lost" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.call(Method::PUT, &uri, Some(json!({ "status": "returned" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "returned");

    let (_, book) = app.call(Method::GET, &format!("/books/{}", book_id), None).await;
    assert_eq!(book["borrowers"], json!([]));

    let (status, _) = app.call(Method::PUT, &uri, Some(json!({ "status": "borrowing" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_lookup_and_create() {
    let app = spawn_app().await;

    let (status, body) = app
        .call(
            Method::POST,
            "/users",
            Some(json!({ "name": "ann", "email": "ann@example.org", "password": "secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.get("password").is_none());

    let (status, _) = app
        .call(
            Method::POST,
            "/users",
            Some(json!({ "name": "ann", "email": "ann@example.org", "password": "secret" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app.call(Method::GET, "/users?name=ann", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["email"], "ann@example.org");

    let (status, _) = app.call(Method::GET, "/users/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
