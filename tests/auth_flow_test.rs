//! Auth Gateway Integration Tests
//!
//! Login, token verification and brute-force lockout through the router.

mod common;

use axum::http::{Method, StatusCode};
use common::{TestApp, ADMIN, PASSWORD};
use craft_admin::audit::AUDIT_TABLE;
use craft_admin::LockoutPolicy;
use std::sync::Arc;

#[tokio::test]
async fn test_login_then_verify() {
    let app = TestApp::new();

    let (status, body) = app.login(ADMIN, PASSWORD, "203.0.113.7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["username"], ADMIN);
    assert_eq!(body["role"], "admin");
    let token = body["token"].as_str().unwrap();

    let (status, body) = app
        .request(Method::GET, "/auth/verify", None, Some(token), "203.0.113.7")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["username"], ADMIN);

    let audit = app.store.rows(AUDIT_TABLE);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0]["action"], "LOGIN");
    assert_eq!(audit[0]["details"], "Login from IP: 203.0.113.7");
}

#[tokio::test]
async fn test_tampered_token_rejected() {
    let app = TestApp::new();
    let token = app.token().await;

    // Flip the first signature character
    let sig_start = token.rfind('.').unwrap() + 1;
    let original = token.as_bytes()[sig_start] as char;
    let replacement = if original == 'A' { "B" } else { "A" };
    let mut tampered = token.clone();
    tampered.replace_range(sig_start..sig_start + 1, replacement);

    let (status, body) = app
        .request(Method::GET, "/auth/verify", None, Some(&tampered), "10.0.0.1")
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid or expired token");

    let (status, body) = app.request(Method::GET, "/auth/verify", None, None, "10.0.0.1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_wrong_password_and_missing_fields() {
    let app = TestApp::new();

    let (status, body) = app.login(ADMIN, "lager", "10.0.0.2").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid credentials");

    let (status, body) = app.login("", PASSWORD, "10.0.0.2").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Username and password are required");

    assert!(app.store.rows(AUDIT_TABLE).is_empty());
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() {
    let app = TestApp::with(
        Default::default(),
        LockoutPolicy {
            max_failures: 3,
            lockout: chrono::Duration::seconds(120),
        },
    );
    let attacker = "198.51.100.9";

    for _ in 0..3 {
        let (status, _) = app.login(ADMIN, "guess", attacker).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    // Correct password is refused while locked
    let (status, body) = app.login(ADMIN, PASSWORD, attacker).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Too many login attempts. Try again in "));
    assert!(message.ends_with('s'));

    // Other clients are unaffected
    let (status, _) = app.login(ADMIN, PASSWORD, "192.0.2.44").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let app = TestApp::with(
        Default::default(),
        LockoutPolicy {
            max_failures: 2,
            lockout: chrono::Duration::seconds(60),
        },
    );
    let client = "198.51.100.20";

    assert_eq!(app.login(ADMIN, "nope", client).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login(ADMIN, PASSWORD, client).await.0, StatusCode::OK);
    assert_eq!(app.login(ADMIN, "nope", client).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login(ADMIN, PASSWORD, client).await.0, StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_guesses_capped_by_lockout() {
    let app = Arc::new(TestApp::new());
    let attacker = "198.51.100.9";

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let app = app.clone();
            tokio::spawn(async move { app.login(ADMIN, &format!("guess-{}", i), attacker).await.0 })
        })
        .collect();

    let mut rejected = 0;
    let mut locked = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::UNAUTHORIZED => rejected += 1,
            StatusCode::TOO_MANY_REQUESTS => locked += 1,
            other => panic!("unexpected status {}", other),
        }
    }

    // Default policy: five password checks, everything else refused up front
    assert_eq!(rejected, 5);
    assert_eq!(locked, 35);
}
