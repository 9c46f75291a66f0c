//! Third-party sign-in token verification
//!
//! Provider tokens are never trusted as presented; each one is checked
//! against the provider's own introspection endpoint before the identity
//! reaches the linker.

use async_trait::async_trait;
use identity_core::{AuthError, AuthResult, Provider, ProviderIdentity};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const FACEBOOK_GRAPH_URL: &str = "https://graph.facebook.com";

#[async_trait]
pub trait ProviderVerifier: Send + Sync {
    async fn verify(&self, provider: Provider, token: &str) -> AuthResult<ProviderIdentity>;
}

/// Verifies tokens over HTTPS with `reqwest`
pub struct HttpProviderVerifier {
    client: reqwest::Client,
    google_client_ids: Vec<String>,
    facebook_app: Option<(String, String)>,
    google_url: String,
    facebook_url: String,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenInfo {
    sub: Option<String>,
    aud: Option<String>,
    email: Option<String>,
    email_verified: Option<Value>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacebookProfile {
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacebookDebugToken {
    data: FacebookDebugData,
}

#[derive(Debug, Deserialize)]
struct FacebookDebugData {
    #[serde(default)]
    is_valid: bool,
    app_id: Option<String>,
}

/// Google reports `email_verified` as a bool or as the string `"true"`
fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl HttpProviderVerifier {
    pub fn new(
        google_client_ids: Vec<String>,
        facebook_app_id: Option<String>,
        facebook_app_secret: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            google_client_ids,
            facebook_app: facebook_app_id.zip(facebook_app_secret),
            google_url: GOOGLE_TOKENINFO_URL.to_string(),
            facebook_url: FACEBOOK_GRAPH_URL.to_string(),
        })
    }

    /// Point at alternative endpoints, e.g. a local stub
    pub fn with_endpoints(mut self, google_url: &str, facebook_url: &str) -> Self {
        self.google_url = google_url.to_string();
        self.facebook_url = facebook_url.to_string();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> AuthResult<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                AuthError::Internal(format!("provider unreachable: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::ProviderAssertionInvalid(format!(
                "introspection returned {}",
                status
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AuthError::ProviderAssertionInvalid(format!("unreadable response: {}", e)))
    }

    async fn verify_google(&self, token: &str) -> AuthResult<ProviderIdentity> {
        let info: GoogleTokenInfo = self.get_json(&self.google_url, &[("id_token", token)]).await?;

        if !self.google_client_ids.is_empty() {
            let aud = info.aud.as_deref().unwrap_or_default();
            if !self.google_client_ids.iter().any(|id| id == aud) {
                return Err(AuthError::ProviderAssertionInvalid(format!(
                    "unexpected audience {:?}",
                    aud
                )));
            }
        }

        let subject = non_empty(info.sub).ok_or_else(|| AuthError::MissingClaims("sub".into()))?;
        Ok(ProviderIdentity {
            provider: Provider::Google,
            subject,
            email_verified: truthy(info.email_verified.as_ref()),
            email: non_empty(info.email),
            name: non_empty(info.name),
        })
    }

    async fn verify_facebook(&self, token: &str) -> AuthResult<ProviderIdentity> {
        if let Some((app_id, app_secret)) = &self.facebook_app {
            let app_token = format!("{}|{}", app_id, app_secret);
            let debug: FacebookDebugToken = self
                .get_json(
                    &format!("{}/debug_token", self.facebook_url),
                    &[("input_token", token), ("access_token", &app_token)],
                )
                .await?;
            if !debug.data.is_valid || debug.data.app_id.as_deref() != Some(app_id.as_str()) {
                return Err(AuthError::ProviderAssertionInvalid(
                    "token not issued for this app".to_string(),
                ));
            }
        }

        let profile: FacebookProfile = self
            .get_json(
                &format!("{}/me", self.facebook_url),
                &[("fields", "id,name,email"), ("access_token", token)],
            )
            .await?;

        let subject = non_empty(profile.id).ok_or_else(|| AuthError::MissingClaims("id".into()))?;
        let email = non_empty(profile.email);
        Ok(ProviderIdentity {
            provider: Provider::Facebook,
            subject,
            // The Graph API only returns confirmed addresses
            email_verified: email.is_some(),
            email,
            name: non_empty(profile.name),
        })
    }
}

#[async_trait]
impl ProviderVerifier for HttpProviderVerifier {
    async fn verify(&self, provider: Provider, token: &str) -> AuthResult<ProviderIdentity> {
        if token.trim().is_empty() {
            return Err(AuthError::InvalidRequest("provider token is required".into()));
        }
        debug!(provider = %provider, "Verifying provider token");
        match provider {
            Provider::Google => self.verify_google(token).await,
            Provider::Facebook => self.verify_facebook(token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, Router};
    use serde_json::json;

    #[test]
    fn test_truthy_email_verified() {
        assert!(truthy(Some(&json!(true))));
        assert!(truthy(Some(&json!("true"))));
        assert!(truthy(Some(&json!("TRUE"))));
        assert!(!truthy(Some(&json!("false"))));
        assert!(!truthy(Some(&json!(1))));
        assert!(!truthy(None));
    }

    #[test]
    fn test_google_tokeninfo_shape() {
        let info: GoogleTokenInfo = serde_json::from_value(json!({
            "iss": "https://accounts.google.com",
            "sub": "110169484474386276334",
            "aud": "client-1.apps.googleusercontent.com",
            "email": "someone@example.com",
            "email_verified": "true",
            "name": "Some One",
            "exp": "1700000000"
        }))
        .unwrap();
        assert_eq!(info.sub.as_deref(), Some("110169484474386276334"));
        assert!(truthy(info.email_verified.as_ref()));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some(" x ".into())), Some("x".to_string()));
    }

    #[tokio::test]
    async fn test_blank_token_rejected_before_any_request() {
        let verifier = HttpProviderVerifier::new(vec![], None, None)
            .unwrap()
            .with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9");
        assert!(matches!(
            verifier.verify(Provider::Google, " ").await,
            Err(AuthError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_internal_error() {
        let verifier = HttpProviderVerifier::new(vec![], None, None)
            .unwrap()
            .with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9");
        match verifier.verify(Provider::Facebook, "secret-user-token").await {
            Err(AuthError::Internal(detail)) => assert!(!detail.contains("secret-user-token")),
            other => panic!("expected internal error, got {:?}", other.map(|i| i.subject)),
        }
    }

    /// Serve `status` for every request on a local port
    async fn stub_provider(status: StatusCode) -> String {
        let app = Router::new().fallback(move || async move { status });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_rejected_token_is_invalid_assertion() {
        let base = stub_provider(StatusCode::BAD_REQUEST).await;
        let verifier = HttpProviderVerifier::new(vec![], None, None)
            .unwrap()
            .with_endpoints(&format!("{}/tokeninfo", base), &base);

        assert!(matches!(
            verifier.verify(Provider::Google, "expired-id-token").await,
            Err(AuthError::ProviderAssertionInvalid(_))
        ));
        assert!(matches!(
            verifier.verify(Provider::Facebook, "expired-access-token").await,
            Err(AuthError::ProviderAssertionInvalid(_))
        ));
    }
}
