//! Mock portal, identity provider and catalog for integration tests.

#![allow(dead_code)]

use serde_json::{Value, json};
use stacdl::{DownloadExecutor, ServiceEndpoints};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USERNAME: &str = "alice@example.pt";
pub const PASSWORD: &str = "s3cret";

pub const AUTH_PATH: &str = "/realms/test/protocol/openid-connect/auth";
pub const LOGIN_ACTION_PATH: &str = "/realms/test/login-actions/authenticate";

pub fn login_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html><body>
  <form id="kc-form-login" action="{}?session_code=abc" method="post">
    <input id="username" name="username" type="text">
    <input id="password" name="password" type="password">
    <input type="hidden" name="credentialId" value="">
    <input type="hidden" name="csrf_token" value="tok-123">
  </form>
</body></html>"#,
        LOGIN_ACTION_PATH
    )
}

pub struct Portal {
    pub server: MockServer,
}

impl Portal {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn endpoints(&self) -> ServiceEndpoints {
        let uri = self.uri();
        ServiceEndpoints::with_base(
            &format!("{}/portal", uri),
            &format!("{}/realms/test/protocol/openid-connect", uri),
            &format!("{}/search", uri),
        )
    }

    /// Landing page plus the IdP login page.
    pub async fn mount_login_page(&self, html: String) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/portal/?$"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html>portal</html>", "text/html"))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(AUTH_PATH))
            .and(query_param("client_id", "aai-oidc-dgt"))
            .and(query_param("response_type", "code"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
            .mount(&self.server)
            .await;
    }

    /// Full successful login: the form post redirects back to the portal.
    pub async fn mount_login(&self) {
        self.mount_login_page(login_page()).await;

        Mock::given(method("POST"))
            .and(path(LOGIN_ACTION_PATH))
            .and(body_string_contains("csrf_token=tok-123"))
            .and(body_string_contains("password=s3cret"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/portal/", self.uri()).as_str())
                    .insert_header("Set-Cookie", "connect.sid=s%3Aabc; Path=/"),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mount_probe(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"limit": 1})))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({"features": []})))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_search(&self, body: Value) {
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({"limit": 1000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_file(&self, file_path: &str, body: &[u8], content_type: &str, expect: u64) {
        Mock::given(method("GET"))
            .and(path(file_path))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type))
            .expect(expect)
            .mount(&self.server)
            .await;
    }

    /// How many times the IdP login page was fetched.
    pub async fn login_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == AUTH_PATH)
            .count()
    }
}

/// Two records in two collections, served from the mock server.
pub fn search_body(uri: &str) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": [
            {
                "collection": "MDT-2m",
                "id": "record-1",
                "links": [
                    {"rel": "self", "href": format!("{}/collections/MDT-2m/items/MDT2m_t1", uri)}
                ],
                "assets": {
                    "dtm": {"href": format!("{}/files/t1.tif", uri), "type": "image/tiff; application=geotiff"}
                }
            },
            {
                "collection": "LAZ",
                "id": "l1",
                "assets": {
                    "data": {"href": format!("{}/files/l1.laz", uri), "type": "application/vnd.laszip"}
                }
            }
        ]
    })
}

pub fn quick_executor() -> DownloadExecutor {
    DownloadExecutor::new()
        .with_delay(Duration::ZERO)
        .with_retry_delay(Duration::ZERO)
        .with_progress(false)
}
