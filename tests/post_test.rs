//! Posting (multipart, with and without images), likes, and feed queries.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use commons::auth::passwords;
use commons::config::Config;
use commons::db;
use commons::mail::LogMailer;
use commons::routes;
use commons::state::AppState;

const BOUNDARY: &str = "------------------------commons-test";

fn test_app() -> (Router, AppState, TempDir) {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.db");
    let pool = db::create_pool(&db_path).unwrap();
    db::run_migrations(&pool).unwrap();

    let mut config = Config::default();
    config.database.path = Some(db_path);
    config.storage.path = Some(temp.path().join("uploads"));

    let state = AppState {
        db: pool,
        config,
        mailer: Arc::new(LogMailer),
    };
    (routes::app(state.clone()), state, temp)
}

fn insert_user(state: &AppState, username: &str) -> String {
    let conn = state.db.get().unwrap();
    let id = uuid::Uuid::now_v7().to_string();
    let hash = passwords::hash("pass").unwrap();
    conn.execute(
        "INSERT INTO users (id, username, email, password_hash) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id, username, format!("{}@x.edu", username), hash],
    )
    .unwrap();
    id
}

async fn login(app: &Router, username: &str) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/login")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .header(header::ACCEPT, "application/json")
                .body(Body::from(format!("username={}&password=pass", username)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .unwrap()
}

fn insert_community(state: &AppState, id: &str, name: &str, creator: &str) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "INSERT INTO communities (id, name, created_by) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, name, creator],
    )
    .unwrap();
    conn.execute(
        "INSERT OR IGNORE INTO memberships (user_id, community_id) VALUES (?1, ?2)",
        rusqlite::params![creator, id],
    )
    .unwrap();
}

fn join(state: &AppState, user_id: &str, community_id: &str) {
    let conn = state.db.get().unwrap();
    conn.execute(
        "INSERT OR IGNORE INTO memberships (user_id, community_id) VALUES (?1, ?2)",
        rusqlite::params![user_id, community_id],
    )
    .unwrap();
}

/// Hand-built multipart/form-data body for the create-post endpoint.
fn multipart_body(
    text: &str,
    community_id: &str,
    image: Option<(&str, &str, &[u8])>,
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in [("post_text", text), ("community_id", community_id)] {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, data)) = image {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"post_image\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn create_post(
    app: &Router,
    cookie: &str,
    text: &str,
    community_id: &str,
    image: Option<(&str, &str, &[u8])>,
) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/communities/create-post")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .header(header::ACCEPT, "application/json")
                .header(header::COOKIE, cookie)
                .body(Body::from(multipart_body(text, community_id, image)))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn like(app: &Router, cookie: &str, post_id: &str) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/posts/{}/like", post_id))
                .header(header::ACCEPT, "application/json")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn members_can_post_text() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    insert_community(&state, "c1", "Hiking", &alice);
    let cookie = login(&app, "alice").await;

    let response = create_post(&app, &cookie, "first hike this weekend", "c1", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);

    let conn = state.db.get().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM posts WHERE community_id = 'c1'", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn empty_post_text_is_rejected() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    insert_community(&state, "c1", "Hiking", &alice);
    let cookie = login(&app, "alice").await;

    let response = create_post(&app, &cookie, "   ", "c1", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Post text is required.");
}

#[tokio::test]
async fn non_members_cannot_post() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    insert_user(&state, "bob");
    insert_community(&state, "c1", "Hiking", &alice);
    let bob_cookie = login(&app, "bob").await;

    let response = create_post(&app, &bob_cookie, "sneaky post", "c1", None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn posting_to_unknown_community_is_404() {
    let (app, state, _temp) = test_app();
    insert_user(&state, "alice");
    let cookie = login(&app, "alice").await;

    let response = create_post(&app, &cookie, "hello", "no-such-community", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn image_uploads_are_stored_and_served() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    insert_community(&state, "c1", "Hiking", &alice);
    let cookie = login(&app, "alice").await;

    let pixels: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
    let response = create_post(
        &app,
        &cookie,
        "summit photo",
        "c1",
        Some(("summit.png", "image/png", pixels)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let image_path = body["post"]["image_path"].as_str().unwrap().to_string();
    assert!(image_path.ends_with(".png"));

    // The stored file round-trips through /uploads
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/uploads/{}", image_path))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    let served = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&served[..], pixels);
}

#[tokio::test]
async fn liking_twice_leaves_the_count_unchanged() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    insert_community(&state, "c1", "Hiking", &alice);
    {
        let conn = state.db.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, user_id, community_id, body) VALUES ('p1', ?1, 'c1', 'hi')",
            rusqlite::params![alice],
        )
        .unwrap();
    }
    let cookie = login(&app, "alice").await;

    let first = like(&app, &cookie, "p1").await;
    assert_eq!(first["likes"], 1);
    let second = like(&app, &cookie, "p1").await;
    assert_eq!(second["likes"], 1);
}

#[tokio::test]
async fn two_distinct_likers_count_two() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    insert_user(&state, "bob");
    insert_community(&state, "c1", "Hiking", &alice);
    {
        let conn = state.db.get().unwrap();
        conn.execute(
            "INSERT INTO posts (id, user_id, community_id, body) VALUES ('p1', ?1, 'c1', 'hi')",
            rusqlite::params![alice],
        )
        .unwrap();
    }

    let alice_cookie = login(&app, "alice").await;
    let bob_cookie = login(&app, "bob").await;

    assert_eq!(like(&app, &alice_cookie, "p1").await["likes"], 1);
    assert_eq!(like(&app, &bob_cookie, "p1").await["likes"], 2);
}

#[tokio::test]
async fn liking_a_missing_post_is_404() {
    let (app, state, _temp) = test_app();
    insert_user(&state, "alice");
    let cookie = login(&app, "alice").await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/posts/no-such-post/like")
                .header(header::ACCEPT, "application/json")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn home_feed_shows_three_newest_from_joined_communities() {
    let (app, state, _temp) = test_app();
    let alice = insert_user(&state, "alice");
    let bob = insert_user(&state, "bob");
    insert_community(&state, "c1", "Hiking", &bob);
    insert_community(&state, "c2", "Chess", &bob);
    join(&state, &alice, "c1");

    {
        let conn = state.db.get().unwrap();
        for i in 1..=5 {
            conn.execute(
                "INSERT INTO posts (id, user_id, community_id, body) VALUES (?1, ?2, 'c1', ?3)",
                rusqlite::params![format!("p{}", i), bob, format!("hiking {}", i)],
            )
            .unwrap();
        }
        // Not visible to alice: she never joined Chess
        conn.execute(
            "INSERT INTO posts (id, user_id, community_id, body) VALUES ('p9', ?1, 'c2', 'chess')",
            rusqlite::params![bob],
        )
        .unwrap();
    }

    let cookie = login(&app, "alice").await;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/home")
                .header(header::ACCEPT, "application/json")
                .header(header::COOKIE, cookie.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let bodies: Vec<&str> = body["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["body"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, vec!["hiking 5", "hiking 4", "hiking 3"]);

    // Activity returns the full history for the same membership set
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/activity")
                .header(header::ACCEPT, "application/json")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["posts"].as_array().unwrap().len(), 5);
}
