//! REST client for the caddie backend.
//!
//! [`Backend`] is the narrow repository surface the session writes through;
//! [`ApiClient`] implements it over HTTP and also carries the report, CSV and
//! message endpoints the command line tool uses directly.
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, Request, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::model::{AttendanceRecord, Caddie, ListNumber, ListOrder, ListSettings, Turn};
use crate::validation::{self, ValidationError};

pub mod model;

use self::model::{
    CreateAttendance, CreateCaddie, CreateMessage, CreateTurn, DailyReport, ErrorBody,
    LoginRequest, LoginResponse, Message, UpdateCaddie, UpdateCallTime, UpdateOrder, UpdateRange,
    UpdateTurn, VerifyResponse, WhatsAppUrl,
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to reach backend: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid backend URL: {0}")]
    InvalidUrl(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("backend error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    Invalid(#[from] ValidationError),
}

/// The repository operations the session depends on.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list_caddies(&self) -> Result<Vec<Caddie>, BackendError>;
    async fn create_caddie(&self, caddie: &CreateCaddie) -> Result<Caddie, BackendError>;
    async fn update_caddie(&self, id: &str, patch: &UpdateCaddie) -> Result<Caddie, BackendError>;
    async fn delete_caddie(&self, id: &str) -> Result<(), BackendError>;

    async fn list_turns(&self) -> Result<Vec<Turn>, BackendError>;
    async fn create_turn(&self, turn: &CreateTurn) -> Result<Turn, BackendError>;
    async fn update_turn(&self, id: &str, patch: &UpdateTurn) -> Result<Turn, BackendError>;

    async fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, BackendError>;
    async fn create_attendance(
        &self,
        record: &CreateAttendance,
    ) -> Result<AttendanceRecord, BackendError>;

    async fn list_settings(&self) -> Result<Vec<ListSettings>, BackendError>;
    async fn update_order(
        &self,
        list: ListNumber,
        order: ListOrder,
    ) -> Result<ListSettings, BackendError>;
    async fn update_range(
        &self,
        list: ListNumber,
        start: Option<u32>,
        end: Option<u32>,
    ) -> Result<ListSettings, BackendError>;
    async fn update_call_time(
        &self,
        list: ListNumber,
        call_time: &str,
    ) -> Result<ListSettings, BackendError>;

    /// Whether the current credentials carry admin privileges.
    async fn is_admin(&self) -> Result<bool, BackendError>;
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder()
            .user_agent("caddie-turns/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: None,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, BackendError> {
        let base_url = cfg
            .backend_url()
            .map_err(|_| BackendError::InvalidUrl(cfg.backend.base_url.clone()))?;
        Self::new(base_url, Duration::from_millis(cfg.backend.timeout_ms))
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        auth: bool,
    ) -> Result<Request, BackendError> {
        let endpoint = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", path, e)))?;
        let mut builder = self.http.request(method, endpoint);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        if auth {
            if let Some(token) = &self.token {
                builder = builder.header("Authorization", format!("Bearer {}", token));
            }
        }
        Ok(builder.build()?)
    }

    async fn execute(&self, request: Request) -> Result<Reply, BackendError> {
        debug!(method = %request.method(), url = %request.url(), "backend request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.bytes().await?;
        if status.is_success() {
            return Ok(Reply {
                status,
                bytes: body.to_vec(),
            });
        }
        let err = classify(status, &body);
        warn!(%status, error = %err, "backend rejected request");
        Err(err)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        auth: bool,
    ) -> Result<T, BackendError> {
        let request = self.build_request(method, path, body.as_ref(), auth)?;
        let res = self.execute(request).await?;
        Ok(serde_json::from_slice(&res.bytes)?)
    }

    async fn call_empty(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        auth: bool,
    ) -> Result<(), BackendError> {
        let request = self.build_request(method, path, body.as_ref(), auth)?;
        let res = self.execute(request).await?;
        debug!(status = %res.status, "backend request done");
        Ok(())
    }

    /// Exchange the admin password for a bearer token and keep it.
    #[instrument(skip_all)]
    pub async fn login(&mut self, password: &str) -> Result<LoginResponse, BackendError> {
        validation::password(password)?;
        let body = to_json(&LoginRequest { password })?;
        let res: LoginResponse = self
            .call(Method::POST, "auth/login", Some(body), false)
            .await?;
        self.token = Some(res.token.clone());
        Ok(res)
    }

    /// Drop the token. The local token is cleared even if the backend call fails.
    #[instrument(skip_all)]
    pub async fn logout(&mut self) -> Result<(), BackendError> {
        let res = self
            .call_empty(Method::POST, "auth/logout", Some(Value::Object(Default::default())), true)
            .await;
        self.token = None;
        res
    }

    #[instrument(skip(self))]
    pub async fn daily_report(&self, date: NaiveDate) -> Result<DailyReport, BackendError> {
        self.call(Method::GET, &format!("reports/daily/{}", date), None, false)
            .await
    }

    /// The range report shape is owned by the backend; it is passed through untouched.
    #[instrument(skip(self))]
    pub async fn range_report(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Value, BackendError> {
        self.call(
            Method::GET,
            &format!("reports/range/{}/{}", start, end),
            None,
            false,
        )
        .await
    }

    /// Raw CSV bytes for one day.
    #[instrument(skip(self))]
    pub async fn download_csv(&self, date: NaiveDate) -> Result<Vec<u8>, BackendError> {
        let request =
            self.build_request(Method::GET, &format!("reports/csv/{}", date), None, true)?;
        Ok(self.execute(request).await?.bytes)
    }

    pub async fn list_messages(&self) -> Result<Vec<Message>, BackendError> {
        self.call(Method::GET, "messages", None, false).await
    }

    #[instrument(skip_all)]
    pub async fn create_message(
        &self,
        content: &str,
        target_list: Option<ListNumber>,
    ) -> Result<Message, BackendError> {
        validation::message(content)?;
        let body = to_json(&CreateMessage {
            content: content.to_string(),
            target_list,
        })?;
        self.call(Method::POST, "messages", Some(body), true).await
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), BackendError> {
        self.call_empty(
            Method::PUT,
            &format!("messages/{}/read", id),
            Some(Value::Object(Default::default())),
            true,
        )
        .await
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), BackendError> {
        self.call_empty(Method::DELETE, &format!("messages/{}", id), None, true)
            .await
    }

    pub async fn whatsapp_url(&self, id: &str) -> Result<String, BackendError> {
        let res: WhatsAppUrl = self
            .call(Method::GET, &format!("messages/{}/whatsapp", id), None, false)
            .await?;
        Ok(res.whatsapp_url)
    }
}

struct Reply {
    status: StatusCode,
    bytes: Vec<u8>,
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, BackendError> {
    Ok(serde_json::to_value(value)?)
}

/// Human readable message of a failed response: the body's `error` field when
/// present, otherwise the bare status.
pub fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP error! status: {}", status.as_u16()))
}

fn classify(status: StatusCode, body: &[u8]) -> BackendError {
    let message = error_message(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized,
        StatusCode::NOT_FOUND => BackendError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(message),
        _ => BackendError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl Backend for ApiClient {
    #[instrument(skip_all)]
    async fn list_caddies(&self) -> Result<Vec<Caddie>, BackendError> {
        self.call(Method::GET, "caddies", None, false).await
    }

    #[instrument(skip_all)]
    async fn create_caddie(&self, caddie: &CreateCaddie) -> Result<Caddie, BackendError> {
        self.call(Method::POST, "caddies", Some(to_json(caddie)?), true)
            .await
    }

    #[instrument(skip(self, patch))]
    async fn update_caddie(&self, id: &str, patch: &UpdateCaddie) -> Result<Caddie, BackendError> {
        self.call(
            Method::PUT,
            &format!("caddies/{}", id),
            Some(to_json(patch)?),
            true,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_caddie(&self, id: &str) -> Result<(), BackendError> {
        self.call_empty(Method::DELETE, &format!("caddies/{}", id), None, true)
            .await
    }

    #[instrument(skip_all)]
    async fn list_turns(&self) -> Result<Vec<Turn>, BackendError> {
        self.call(Method::GET, "turns", None, false).await
    }

    #[instrument(skip_all)]
    async fn create_turn(&self, turn: &CreateTurn) -> Result<Turn, BackendError> {
        self.call(Method::POST, "turns", Some(to_json(turn)?), true)
            .await
    }

    #[instrument(skip(self, patch))]
    async fn update_turn(&self, id: &str, patch: &UpdateTurn) -> Result<Turn, BackendError> {
        self.call(
            Method::PUT,
            &format!("turns/{}", id),
            Some(to_json(patch)?),
            true,
        )
        .await
    }

    #[instrument(skip_all)]
    async fn list_attendance(&self) -> Result<Vec<AttendanceRecord>, BackendError> {
        self.call(Method::GET, "attendance", None, false).await
    }

    #[instrument(skip_all)]
    async fn create_attendance(
        &self,
        record: &CreateAttendance,
    ) -> Result<AttendanceRecord, BackendError> {
        self.call(Method::POST, "attendance", Some(to_json(record)?), true)
            .await
    }

    #[instrument(skip_all)]
    async fn list_settings(&self) -> Result<Vec<ListSettings>, BackendError> {
        self.call(Method::GET, "list-settings", None, false).await
    }

    #[instrument(skip(self))]
    async fn update_order(
        &self,
        list: ListNumber,
        order: ListOrder,
    ) -> Result<ListSettings, BackendError> {
        self.call(
            Method::PUT,
            &format!("list-settings/{}/order", list),
            Some(to_json(&UpdateOrder { order })?),
            true,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn update_range(
        &self,
        list: ListNumber,
        start: Option<u32>,
        end: Option<u32>,
    ) -> Result<ListSettings, BackendError> {
        let body = UpdateRange {
            range_start: start,
            range_end: end,
        };
        self.call(
            Method::PUT,
            &format!("list-settings/{}/range", list),
            Some(to_json(&body)?),
            true,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn update_call_time(
        &self,
        list: ListNumber,
        call_time: &str,
    ) -> Result<ListSettings, BackendError> {
        self.call(
            Method::PUT,
            &format!("list-settings/{}", list),
            Some(to_json(&UpdateCallTime { call_time })?),
            true,
        )
        .await
    }

    #[instrument(skip_all)]
    async fn is_admin(&self) -> Result<bool, BackendError> {
        if self.token.is_none() {
            return Ok(false);
        }
        match self
            .call::<VerifyResponse>(Method::GET, "auth/verify", None, true)
            .await
        {
            Ok(res) => Ok(res.valid),
            Err(BackendError::Unauthorized) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> ApiClient {
        let base = Url::parse("http://localhost:3000/api/").unwrap();
        ApiClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn build_request_joins_base_and_sets_json_header() {
        let body = json!({ "order": "descendente" });
        let req = client()
            .build_request(Method::PUT, "list-settings/2/order", Some(&body), true)
            .unwrap();
        assert_eq!(req.method(), Method::PUT);
        assert_eq!(
            req.url().as_str(),
            "http://localhost:3000/api/list-settings/2/order"
        );
        assert_eq!(req.headers()["Content-Type"], "application/json");
        // No token yet: nothing to send.
        assert!(req.headers().get("Authorization").is_none());
    }

    #[test]
    fn build_request_adds_bearer_only_when_asked() {
        let client = client().with_token(Some("secret".into()));
        let authed = client
            .build_request(Method::DELETE, "/caddies/abc", None, true)
            .unwrap();
        assert_eq!(authed.headers()["Authorization"], "Bearer secret");
        assert_eq!(
            authed.url().as_str(),
            "http://localhost:3000/api/caddies/abc"
        );
        assert!(authed.headers().get("Content-Type").is_none());

        let open = client
            .build_request(Method::GET, "caddies", None, false)
            .unwrap();
        assert!(open.headers().get("Authorization").is_none());
    }

    #[test]
    fn debug_hides_token() {
        let client = client().with_token(Some("secret".into()));
        let printed = format!("{:?}", client);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("authenticated: true"));
    }

    #[test]
    fn error_message_prefers_body_error_field() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, br#"{"error":"Caddie no encontrado"}"#),
            "Caddie no encontrado"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, b"<html>oops</html>"),
            "HTTP error! status: 500"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, br#"{"message":"x"}"#),
            "HTTP error! status: 502"
        );
    }

    #[test]
    fn classify_maps_statuses() {
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, b""),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN, b""),
            BackendError::Unauthorized
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, br#"{"error":"gone"}"#),
            BackendError::NotFound(m) if m == "gone"
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, b""),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, b""),
            BackendError::Status { status: 503, .. }
        ));
    }

    #[test]
    fn range_body_sends_explicit_nulls() {
        let body = to_json(&UpdateRange {
            range_start: None,
            range_end: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "rangeStart": null, "rangeEnd": null }));
    }

    #[test]
    fn caddie_patch_omits_unset_fields() {
        let body = to_json(&UpdateCaddie::status(crate::model::CaddieStatus::InField)).unwrap();
        assert_eq!(body, json!({ "status": "En campo" }));
    }

    #[test]
    fn turn_patches_close_and_reopen() {
        use chrono::TimeZone;
        let at = chrono::Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        assert_eq!(
            to_json(&UpdateTurn::close(at)).unwrap(),
            json!({ "endTime": "2024-05-01T09:30:00Z", "completed": true })
        );
        assert_eq!(
            to_json(&UpdateTurn::reopen()).unwrap(),
            json!({ "endTime": null, "completed": false })
        );
    }

    #[tokio::test]
    async fn create_message_validates_before_sending() {
        let err = client().create_message("", None).await.unwrap_err();
        assert!(matches!(err, BackendError::Invalid(ValidationError::MessageLength)));
    }

    #[tokio::test]
    async fn is_admin_without_token_skips_network() {
        assert!(!client().is_admin().await.unwrap());
    }
}
