use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{AuthBackend, BackendError, BackendResult, SecretsBackend};
use crate::error::{Result, ShadowVaultError};
use crate::secrets::{NewSecret, Secret, SecretId};
use crate::session::{Credentials, Identity, Session};
use crate::storage::AppSettings;

const SECRETS_TABLE: &str = "rest/v1/secrets";
const DELETE_ACCOUNT_RPC: &str = "rest/v1/rpc/delete_user";

/// Used when the token response carries neither `expires_at` nor `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// HTTP client for a hosted auth API (`/auth/v1`) plus table API (`/rest/v1`).
#[derive(Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: Url,
    anon_key: String,
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for Identity {
    fn from(user: UserResponse) -> Self {
        Identity {
            id: user.id,
            email: user.email,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| {
                Utc::now() + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS))
            });
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

impl RestBackend {
    pub fn new(settings: &AppSettings) -> Result<Self> {
        settings.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("shadowvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ShadowVaultError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: settings.backend_base_url()?,
            anon_key: settings.anon_key.trim().to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Transport(format!("invalid endpoint {path}: {e}")))
    }

    /// Every request carries the API key; the bearer is the user's token
    /// when there is one and the API key otherwise.
    fn request(&self, method: Method, url: Url, access_token: Option<&str>) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token.unwrap_or(&self.anon_key))
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> BackendResult<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let res = self.request(Method::POST, url, None).json(&body).send().await?;
        let token: TokenResponse = decode(check(res).await?).await?;
        Ok(token.into_session())
    }
}

async fn check(res: Response) -> BackendResult<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    Err(error_from_response(res).await)
}

async fn decode<T: DeserializeOwned>(res: Response) -> BackendResult<T> {
    res.json::<T>()
        .await
        .map_err(|e| BackendError::Decode(e.to_string()))
}

async fn error_from_response(res: Response) -> BackendError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| extract_message(&v))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()))
        });

    debug!(status = status.as_u16(), %message, "backend rejected request");

    if status == StatusCode::UNAUTHORIZED {
        BackendError::Unauthorized(message)
    } else {
        BackendError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// Auth errors use `error_description` or `msg`; table errors use `message`.
fn extract_message(body: &Value) -> Option<String> {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl AuthBackend for RestBackend {
    async fn sign_up(
        &self,
        credentials: &Credentials,
        redirect_to: Option<&str>,
    ) -> BackendResult<()> {
        let mut url = self.endpoint("auth/v1/signup")?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        let res = self
            .request(Method::POST, url, None)
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password(),
            }))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn sign_in(&self, credentials: &Credentials) -> BackendResult<Session> {
        self.token_grant(
            "password",
            serde_json::json!({
                "email": credentials.email,
                "password": credentials.password(),
            }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> BackendResult<Session> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let url = self.endpoint("auth/v1/logout")?;
        let res = self
            .request(Method::POST, url, Some(access_token))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn current_identity(&self, access_token: &str) -> BackendResult<Option<Identity>> {
        let url = self.endpoint("auth/v1/user")?;
        let res = self
            .request(Method::GET, url, Some(access_token))
            .send()
            .await?;
        if matches!(
            res.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            return Ok(None);
        }
        let user: UserResponse = decode(check(res).await?).await?;
        Ok(Some(user.into()))
    }
}

#[async_trait]
impl SecretsBackend for RestBackend {
    async fn list_secrets(&self, access_token: &str) -> BackendResult<Vec<Secret>> {
        let mut url = self.endpoint(SECRETS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "id.desc");
        let res = self
            .request(Method::GET, url, Some(access_token))
            .send()
            .await?;
        decode(check(res).await?).await
    }

    async fn insert_secret(&self, access_token: &str, secret: &NewSecret) -> BackendResult<()> {
        let url = self.endpoint(SECRETS_TABLE)?;
        let res = self
            .request(Method::POST, url, Some(access_token))
            .header("Prefer", "return=minimal")
            .json(&[secret])
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn delete_secret(&self, access_token: &str, id: SecretId) -> BackendResult<()> {
        let mut url = self.endpoint(SECRETS_TABLE)?;
        url.query_pairs_mut()
            .append_pair("id", &format!("eq.{id}"));
        let res = self
            .request(Method::DELETE, url, Some(access_token))
            .send()
            .await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(res).await?;
        Ok(())
    }

    async fn delete_account(&self, access_token: &str) -> BackendResult<()> {
        let url = self.endpoint(DELETE_ACCOUNT_RPC)?;
        let res = self
            .request(Method::POST, url, Some(access_token))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> RestBackend {
        RestBackend::new(&AppSettings {
            backend_url: server.uri(),
            anon_key: "anon-key".into(),
            ..AppSettings::default()
        })
        .unwrap()
    }

    fn token_body() -> Value {
        json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 4102444800i64,
            "user": {"id": "user-1", "email": "agent@example.com"}
        })
    }

    #[tokio::test]
    async fn test_sign_in_uses_password_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(header("apikey", "anon-key"))
            .and(body_json(json!({"email": "agent@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body()))
            .expect(1)
            .mount(&server)
            .await;

        let session = backend_for(&server)
            .sign_in(&Credentials::new("agent@example.com", "pw"))
            .await
            .unwrap();
        assert_eq!(session.access_token, "at-1");
        assert_eq!(session.user.id, "user-1");
        assert_eq!(session.expires_at.timestamp(), 4102444800);
    }

    #[tokio::test]
    async fn test_bad_credentials_surface_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })))
            .mount(&server)
            .await;

        let err = backend_for(&server)
            .sign_in(&Credentials::new("agent@example.com", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 400,
                message: "Invalid login credentials".into()
            }
        );
    }

    #[tokio::test]
    async fn test_sign_up_forwards_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(query_param("redirect_to", "https://vault.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "user-1"})))
            .expect(1)
            .mount(&server)
            .await;

        backend_for(&server)
            .sign_up(
                &Credentials::new("agent@example.com", "pw"),
                Some("https://vault.example.com"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_orders_by_id_desc_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/secrets"))
            .and(query_param("select", "*"))
            .and(query_param("order", "id.desc"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 2, "title": "k2", "value": "v2", "user_id": "user-1"},
                {"id": 1, "title": "k1", "value": "v1", "user_id": "user-1"}
            ])))
            .mount(&server)
            .await;

        let secrets = backend_for(&server).list_secrets("at-1").await.unwrap();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[0].title, "k2");
    }

    #[tokio::test]
    async fn test_expired_jwt_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/secrets"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"code": "PGRST301", "message": "JWT expired"})),
            )
            .mount(&server)
            .await;

        let err = backend_for(&server).list_secrets("stale").await.unwrap_err();
        assert_eq!(err, BackendError::Unauthorized("JWT expired".into()));
    }

    #[tokio::test]
    async fn test_insert_sends_owner_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/secrets"))
            .and(header("prefer", "return=minimal"))
            .and(body_json(json!([{"title": "k1", "value": "v1", "user_id": "user-1"}])))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        backend_for(&server)
            .insert_secret(
                "at-1",
                &NewSecret {
                    title: "k1".into(),
                    value: "v1".into(),
                    user_id: "user-1".into(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_filters_by_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/secrets"))
            .and(query_param("id", "eq.42"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend_for(&server).delete_secret("at-1", 42).await.unwrap();
    }

    #[tokio::test]
    async fn test_who_am_i_without_user_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"msg": "bad_jwt"})))
            .mount(&server)
            .await;

        let identity = backend_for(&server).current_identity("stale").await.unwrap();
        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn test_delete_account_calls_rpc() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/delete_user"))
            .and(header("authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        backend_for(&server).delete_account("at-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_error_without_body_uses_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/delete_user"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = backend_for(&server).delete_account("at-1").await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 500,
                message: "Internal Server Error".into()
            }
        );
    }

    #[test]
    fn test_extract_message_precedence() {
        let body = json!({"error": "invalid_grant", "error_description": "Invalid login credentials"});
        assert_eq!(
            extract_message(&body).as_deref(),
            Some("Invalid login credentials")
        );
        assert_eq!(extract_message(&json!({"code": 1})), None);
    }
}
