use std::net::TcpListener;
use std::sync::Arc;

use easypay::configuration::{ClientSettings, JwtSettings, SecuritySettings};
use easypay::startup::run;
use easypay::store::{AuthStore, InMemoryAuthStore, LoginOutcome};
use serde_json::{json, Value};

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: Arc<InMemoryAuthStore>,
}

fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "integration-test-secret-at-least-32-chars".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 604800,
        issuer: "easypay".to_string(),
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with(jwt_settings()).await
}

async fn spawn_app_with(jwt_config: JwtSettings) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = Arc::new(InMemoryAuthStore::new());

    let server = run(
        listener,
        store.clone(),
        jwt_config,
        ClientSettings {
            access_check_interval: 15_000,
            background_check_interval: 45_000,
        },
        SecuritySettings::default(),
    )
    .expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        client: reqwest::Client::new(),
        store,
    }
}

impl TestApp {
    async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(&format!("{}{}", &self.address, path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    async fn register(&self, phone_number: &str) -> Value {
        let response = self
            .post(
                "/api/auth/register",
                &json!({
                    "phoneNumber": phone_number,
                    "password": "easypay123",
                    "name": "Kim Minsu",
                    "email": "minsu@example.com"
                }),
            )
            .await;
        assert_eq!(201, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    async fn login(&self, phone_number: &str, password: &str) -> reqwest::Response {
        self.post(
            "/api/auth/login",
            &json!({ "phoneNumber": phone_number, "password": password }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post("/api/auth/refresh", &json!({ "refreshToken": refresh_token }))
            .await
    }
}

// --- Registration Tests ---

#[tokio::test]
async fn register_returns_201_with_session() {
    let app = spawn_app().await;

    let body = app.register("010-1234-5678").await;

    assert!(body["accessToken"].as_str().is_some());
    assert_eq!(body["refreshToken"].as_str().unwrap().len(), 64);
    assert_eq!(body["userName"], "Kim Minsu");
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["expiresIn"], 900);

    let account_number = body["accountNumber"].as_str().unwrap();
    assert!(account_number.starts_with("VA"));
}

#[tokio::test]
async fn register_returns_409_for_duplicate_phone_number() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    // Same number, different formatting
    let response = app
        .post(
            "/api/auth/register",
            &json!({
                "phoneNumber": "010-1234-5678",
                "password": "easypay123",
                "name": "Lee"
            }),
        )
        .await;

    assert_eq!(409, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_ENTRY");
    assert!(body["errorId"].as_str().is_some());
}

#[tokio::test]
async fn register_returns_400_when_data_is_invalid() {
    let app = spawn_app().await;
    let test_cases = vec![
        (json!({"phoneNumber": "02-123-4567", "password": "easypay123", "name": "Kim"}), "landline number"),
        (json!({"phoneNumber": "01012345678", "password": "short1", "name": "Kim"}), "short password"),
        (json!({"phoneNumber": "01012345678", "password": "onlyletters", "name": "Kim"}), "password without digits"),
        (json!({"phoneNumber": "01012345678", "password": "easypay123", "name": ""}), "empty name"),
        (json!({"phoneNumber": "01012345678", "password": "easypay123", "name": "Kim", "email": "not-an-email"}), "bad email"),
    ];

    for (body, description) in test_cases {
        let response = app.post("/api/auth/register", &body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request for {}.",
            description
        );
    }
}

#[tokio::test]
async fn check_phone_reports_availability() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    for (phone_number, available) in [("010-1234-5678", false), ("01099998888", true)] {
        let response = app
            .client
            .get(&format!("{}/api/auth/check-phone", &app.address))
            .query(&[("phoneNumber", phone_number)])
            .send()
            .await
            .unwrap();

        assert_eq!(200, response.status().as_u16());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["available"], available, "{}", phone_number);
    }
}

#[tokio::test]
async fn check_email_reports_availability() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    for (email, available) in [("minsu@example.com", false), ("jiwoo@example.com", true)] {
        let response = app
            .client
            .get(&format!("{}/api/auth/check-email", &app.address))
            .query(&[("email", email)])
            .send()
            .await
            .unwrap();

        assert_eq!(200, response.status().as_u16());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["available"], available, "{}", email);
    }
}

#[tokio::test]
async fn check_email_returns_400_for_malformed_email() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(&format!("{}/api/auth/check-email", &app.address))
        .query(&[("email", "not-an-email")])
        .send()
        .await
        .unwrap();

    assert_eq!(400, response.status().as_u16());
}

#[tokio::test]
async fn register_returns_409_for_duplicate_email() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    let response = app
        .post(
            "/api/auth/register",
            &json!({
                "phoneNumber": "01099998888",
                "password": "easypay123",
                "name": "Lee",
                "email": "minsu@example.com"
            }),
        )
        .await;

    assert_eq!(409, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "DUPLICATE_ENTRY");
}

// --- Login Tests ---

#[tokio::test]
async fn login_returns_tokens_and_identity() {
    let app = spawn_app().await;
    let registered = app.register("01012345678").await;

    let response = app.login("010-1234-5678", "easypay123").await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert!(body["accessToken"].as_str().is_some());
    assert_ne!(body["refreshToken"], registered["refreshToken"]);
    assert_eq!(body["accountNumber"], registered["accountNumber"]);
    assert_eq!(body["userName"], "Kim Minsu");
}

#[tokio::test]
async fn login_returns_401_for_wrong_password_or_unknown_user() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    for (phone_number, password) in [("01012345678", "wrongpass1"), ("01099998888", "easypay123")] {
        let response = app.login(phone_number, password).await;

        assert_eq!(401, response.status().as_u16());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_CREDENTIALS");
    }
}

#[tokio::test]
async fn account_locks_after_five_failed_logins() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    for _ in 0..5 {
        let response = app.login("01012345678", "wrongpass1").await;
        assert_eq!(401, response.status().as_u16());
    }

    let response = app.login("01012345678", "easypay123").await;

    assert_eq!(423, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "ACCOUNT_LOCKED");
}

#[tokio::test]
async fn successful_login_resets_failure_count() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    for _ in 0..4 {
        app.login("01012345678", "wrongpass1").await;
    }
    assert_eq!(200, app.login("01012345678", "easypay123").await.status().as_u16());

    for _ in 0..4 {
        app.login("01012345678", "wrongpass1").await;
    }
    assert_eq!(200, app.login("01012345678", "easypay123").await.status().as_u16());
}

#[tokio::test]
async fn login_attempts_are_recorded_in_history() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    app.login("01012345678", "wrongpass1").await;
    app.login("010-1234-5678", "easypay123").await;
    app.login("01099998888", "easypay123").await;

    let history = app.store.recent_login_attempts("01012345678", 10).await.unwrap();
    let outcomes: Vec<_> = history.iter().map(|a| a.outcome).collect();
    assert_eq!(outcomes, vec![LoginOutcome::Success, LoginOutcome::WrongPassword]);
    assert_eq!(history[1].fail_count, 1);
    assert!(history.iter().all(|a| a.user_id.is_some()));
    assert!(history.iter().all(|a| a.ip_address.is_some()));

    let unknown = app.store.recent_login_attempts("01099998888", 10).await.unwrap();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].outcome, LoginOutcome::AccountNotFound);
    assert!(unknown[0].user_id.is_none());
}

#[tokio::test]
async fn locked_account_login_is_recorded_as_locked() {
    let app = spawn_app().await;
    app.register("01012345678").await;

    for _ in 0..5 {
        app.login("01012345678", "wrongpass1").await;
    }
    app.login("01012345678", "easypay123").await;

    let history = app.store.recent_login_attempts("01012345678", 2).await.unwrap();
    assert_eq!(history[0].outcome, LoginOutcome::AccountLocked);
    assert!(history[0].is_locked);
    assert_eq!(history[1].outcome, LoginOutcome::WrongPassword);
    assert_eq!(history[1].fail_count, 5);
    assert!(history[1].is_locked);
}

// --- Refresh Tests ---

#[tokio::test]
async fn refresh_rotates_the_token_pair() {
    let app = spawn_app().await;
    let session = app.register("01012345678").await;
    let original = session["refreshToken"].as_str().unwrap();

    let response = app.refresh(original).await;
    assert_eq!(200, response.status().as_u16());
    let rotated: Value = response.json().await.unwrap();

    let new_refresh = rotated["refreshToken"].as_str().unwrap();
    assert_ne!(new_refresh, original);
    assert_ne!(rotated["accessToken"], session["accessToken"]);
    assert_eq!(rotated["tokenType"], "Bearer");

    // The new pair keeps working
    assert_eq!(200, app.refresh(new_refresh).await.status().as_u16());
}

#[tokio::test]
async fn reused_refresh_token_is_rejected() {
    let app = spawn_app().await;
    let session = app.register("01012345678").await;
    let original = session["refreshToken"].as_str().unwrap();

    assert_eq!(200, app.refresh(original).await.status().as_u16());

    let response = app.refresh(original).await;
    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");
}

#[tokio::test]
async fn unknown_refresh_token_is_rejected() {
    let app = spawn_app().await;

    let response = app.refresh("not-a-refresh-token").await;

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_REFRESH_TOKEN");
}

#[tokio::test]
async fn expired_refresh_token_is_reported_as_expired() {
    let mut jwt_config = jwt_settings();
    jwt_config.refresh_token_expiry = -60;
    let app = spawn_app_with(jwt_config).await;
    let session = app.register("01012345678").await;

    let response = app.refresh(session["refreshToken"].as_str().unwrap()).await;

    assert_eq!(400, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EXPIRED_REFRESH_TOKEN");
    assert_eq!(body["status"], 400);
}

// --- Logout & protected routes ---

#[tokio::test]
async fn logout_revokes_every_refresh_token() {
    let app = spawn_app().await;
    let first = app.register("01012345678").await;
    let second: Value = app
        .login("01012345678", "easypay123")
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .client
        .post(&format!("{}/api/auth/logout", &app.address))
        .bearer_auth(second["accessToken"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());

    for session in [&first, &second] {
        let response = app.refresh(session["refreshToken"].as_str().unwrap()).await;
        assert_eq!(400, response.status().as_u16());
    }
}

#[tokio::test]
async fn logout_requires_a_valid_access_token() {
    let app = spawn_app().await;
    let url = format!("{}/api/auth/logout", &app.address);

    let missing = app.client.post(&url).send().await.unwrap();
    assert_eq!(401, missing.status().as_u16());
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["code"], "MISSING_TOKEN");

    let garbage = app
        .client
        .post(&url)
        .bearer_auth("garbage.token.value")
        .send()
        .await
        .unwrap();
    assert_eq!(401, garbage.status().as_u16());
}

#[tokio::test]
async fn expired_access_token_is_rejected() {
    let mut jwt_config = jwt_settings();
    jwt_config.access_token_expiry = -10;
    let app = spawn_app_with(jwt_config).await;
    let session = app.register("01012345678").await;

    let response = app
        .client
        .get(&format!("{}/api/auth/profile", &app.address))
        .bearer_auth(session["accessToken"].as_str().unwrap())
        .send()
        .await
        .unwrap();

    assert_eq!(401, response.status().as_u16());
}

#[tokio::test]
async fn profile_returns_the_signed_in_user() {
    let app = spawn_app().await;
    let session = app.register("01012345678").await;

    let response = app
        .client
        .get(&format!("{}/api/auth/profile", &app.address))
        .bearer_auth(session["accessToken"].as_str().unwrap())
        .send()
        .await
        .unwrap();

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["phoneNumber"], "01012345678");
    assert_eq!(body["accountNumber"], session["accountNumber"]);
    assert_eq!(body["email"], "minsu@example.com");
}

// --- Client config & route aliases ---

#[tokio::test]
async fn client_config_returns_polling_intervals() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(&format!("{}/api/auth/client-config", &app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accessCheckInterval"], 15_000);
    assert_eq!(body["backgroundCheckInterval"], 45_000);
}

#[tokio::test]
async fn auth_routes_are_also_served_without_api_prefix() {
    let app = spawn_app().await;
    let session = app.register("01012345678").await;

    let login = app
        .post(
            "/auth/login",
            &json!({ "phoneNumber": "01012345678", "password": "easypay123" }),
        )
        .await;
    assert_eq!(200, login.status().as_u16());

    let refresh = app
        .post(
            "/auth/refresh",
            &json!({ "refreshToken": session["refreshToken"] }),
        )
        .await;
    assert_eq!(200, refresh.status().as_u16());
}
