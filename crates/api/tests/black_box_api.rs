use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};

use portico_api::app::{build_app, services::AppServices};
use portico_infra::seed::{self, SeedOptions};
use portico_infra::{AppConfig, InMemoryAuthStore};

const WEB_DEVICE: &str = "portico-web";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let store = InMemoryAuthStore::new();
        seed::run(&store, &SeedOptions::default())
            .await
            .expect("seeding in-memory store");

        let config = AppConfig::from_lookup(|key| match key {
            "JWT_SECRET" => Some("black-box-secret".to_string()),
            _ => None,
        })
        .expect("test config");
        let services = Arc::new(AppServices::new(Arc::new(store), &config));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}/api/v1", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn root_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches("/api/v1"), path)
    }

    /// GET with bearer and device headers.
    async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .header("X-Device-UID", WEB_DEVICE)
            .header("X-Platform", "web")
            .send()
            .await
            .unwrap()
    }

    /// POST with bearer and device headers.
    async fn post(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .header("X-Device-UID", WEB_DEVICE)
            .header("X-Platform", "web")
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// PUT with bearer and device headers.
    async fn put(&self, path: &str, token: &str, body: Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .header("X-Device-UID", WEB_DEVICE)
            .header("X-Platform", "web")
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn login(&self) -> Value {
        let res = self
            .client
            .post(self.url("/auth/login"))
            .json(&json!({
                "email": "admin@gerege.mn",
                "password": "Admin@123",
                "device_uid": WEB_DEVICE,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        body["data"].clone()
    }

    async fn switch(&self, token: &str, system_code: &str) -> Value {
        let res = self
            .post("/auth/switch-system", token, json!({ "system_code": system_code }))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        body["data"].clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    body["error"]["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.root_url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .get(srv.url("/auth/me"))
        .header("X-Device-UID", WEB_DEVICE)
        .header("X-Platform", "web")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "UNAUTHORIZED");

    let res = srv.get("/auth/me", "not-a-token").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "INVALID_TOKEN");
}

#[tokio::test]
async fn device_headers_are_required_after_authentication() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    let token = login["access_token"].as_str().unwrap();

    let res = srv
        .client
        .get(srv.url("/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "DEVICE_UID_REQUIRED");

    let res = srv
        .client
        .get(srv.url("/auth/me"))
        .bearer_auth(token)
        .header("X-Device-UID", WEB_DEVICE)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "PLATFORM_REQUIRED");

    let res = srv
        .client
        .get(srv.url("/auth/me"))
        .bearer_auth(token)
        .header("X-Device-UID", "never-registered")
        .header("X-Platform", "web")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "DEVICE_NOT_REGISTERED");
}

#[tokio::test]
async fn login_then_me_reflects_the_platform_credential() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    assert_eq!(login["token_type"], json!("Bearer"));
    assert!(login["user"].get("password_hash").is_none());
    assert!(
        login["available_systems"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["code"] == json!("dsl"))
    );

    let res = srv.get("/auth/me", login["access_token"].as_str().unwrap()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["user"]["email"], json!("admin@gerege.mn"));
    assert_eq!(body["data"]["token_type"], json!("platform"));
    assert_eq!(body["data"]["device_uid"], json!(WEB_DEVICE));
    assert_eq!(body["data"]["platform"], json!("web"));
    assert!(body["data"]["system_id"].is_null());
}

#[tokio::test]
async fn login_failures_are_reported_by_code() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({
            "email": "admin@gerege.mn",
            "password": "wrong",
            "device_uid": WEB_DEVICE,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "INVALID_CREDENTIALS");

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({
            "email": "admin@gerege.mn",
            "password": "Admin@123",
            "device_uid": "unknown-device",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "DEVICE_NOT_REGISTERED");

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({ "email": "", "password": "x", "device_uid": WEB_DEVICE }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn registered_device_can_log_in() {
    let srv = TestServer::spawn().await;

    let res = srv
        .client
        .post(srv.url("/devices/register"))
        .json(&json!({
            "device_uid": "tablet-7",
            "name": "Front desk tablet",
            "platform": "tablet_android",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv
        .client
        .post(srv.url("/devices/heartbeat"))
        .json(&json!({ "device_uid": "tablet-7" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv
        .client
        .post(srv.url("/auth/login"))
        .json(&json!({
            "email": "admin@gerege.mn",
            "password": "Admin@123",
            "device_uid": "tablet-7",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn menus_need_a_system_credential() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    let token = login["access_token"].as_str().unwrap();

    let res = srv.get("/auth/menus", token).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "SYSTEM_CONTEXT_REQUIRED");

    let switched = srv.switch(token, "dsl").await;
    assert_eq!(switched["current_system"]["code"], json!("dsl"));
    assert_eq!(switched["current_role"]["code"], json!("dsl_admin"));
    let system_token = switched["system_token"].as_str().unwrap();

    let res = srv.get("/auth/menus", system_token).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let roots = body["data"].as_array().unwrap();
    assert_eq!(roots.len(), 6);
    assert_eq!(roots[0]["code"], json!("dsl_dashboard"));
}

#[tokio::test]
async fn switching_to_an_unknown_system_is_not_found() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    let token = login["access_token"].as_str().unwrap();

    let res = srv
        .post("/auth/switch-system", token, json!({ "system_code": "nope" }))
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(res).await, "SYSTEM_NOT_FOUND");
}

#[tokio::test]
async fn admin_routes_require_the_admin_system() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    let token = login["access_token"].as_str().unwrap();

    // dsl roles carry no admin.* grants
    let dsl = srv.switch(token, "dsl").await;
    let res = srv.get("/sessions", dsl["system_token"].as_str().unwrap()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(res).await, "FORBIDDEN");

    let admin = srv.switch(token, "admin").await;
    let admin_token = admin["system_token"].as_str().unwrap();

    let res = srv.get("/sessions?limit=10", admin_token).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["total"], json!(1));

    let session_id = body["data"]["items"][0]["id"].as_i64().unwrap();
    let res = srv
        .get(&format!("/sessions/{session_id}/history"), admin_token)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let res = srv.get("/menus/tree?system_id=2", admin_token).await;
    assert_eq!(res.status(), StatusCode::OK);
}

async fn error_message(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    body["error"]["message"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn combined_permission_guards_name_what_is_missing() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    let token = login["access_token"].as_str().unwrap();
    let dsl = srv.switch(token, "dsl").await;
    let dsl_token = dsl["system_token"].as_str().unwrap();

    // Either code opens the switch history.
    let res = srv.get("/sessions/1/history", dsl_token).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        error_message(res).await,
        "missing permission 'admin.session.view|admin.monitoring.view'"
    );

    // Menu grants need role update and menu view together.
    let res = srv.put("/roles/6/menus", dsl_token, json!({ "menu_ids": [21] })).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_message(res).await, "missing permission 'admin.role.update'");

    let admin = srv.switch(token, "admin").await;
    let admin_token = admin["system_token"].as_str().unwrap();
    let res = srv.put("/roles/6/menus", admin_token, json!({ "menu_ids": [21] })).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_invalidates_the_session() {
    let srv = TestServer::spawn().await;
    let login = srv.login().await;
    let token = login["access_token"].as_str().unwrap();

    let res = srv.post("/auth/logout", token, json!({})).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.get("/auth/me", token).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "SESSION_INVALID");

    let res = srv
        .client
        .post(srv.url("/auth/refresh"))
        .json(&json!({ "refresh_token": login["refresh_token"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
