use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use url::Url;

pub mod secrets;

pub use secrets::{ClientConfig, ClientSecrets};

/// Authorized handle to the hosting platform
#[derive(Clone)]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: "Bearer".to_string(),
            scope: None,
            expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Establishes a session with the hosting platform
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<Session>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// How long the callback server may take to finish in-flight responses
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Query string delivered to the loopback redirect
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// What a request to the redirect URI carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Code { code: String, state: Option<String> },
    Denied { error: String, state: Option<String> },
    /// Anything else the browser requests
    Unrelated,
}

impl From<CallbackQuery> for Callback {
    fn from(query: CallbackQuery) -> Self {
        match (query.code, query.error) {
            (_, Some(error)) => Callback::Denied { error, state: query.state },
            (Some(code), None) => Callback::Code { code, state: query.state },
            (None, None) => Callback::Unrelated,
        }
    }
}

/// Interactive OAuth authorization-code flow with a loopback redirect
pub struct InstalledAppFlow {
    client: Client,
    config: ClientConfig,
    scopes: Vec<String>,
}

impl InstalledAppFlow {
    pub fn new(config: ClientConfig, scopes: Vec<String>) -> Self {
        Self {
            client: Client::new(),
            config,
            scopes,
        }
    }

    /// Build a flow from a client secrets file
    pub fn from_client_secrets_file(path: &Path, scopes: Vec<String>) -> Result<Self> {
        let secrets = ClientSecrets::from_file(path)?;
        Ok(Self::new(secrets.into_client_config()?, scopes))
    }

    /// Bind the redirect listener and prepare the authorization URL
    pub async fn start(&self) -> Result<PendingAuthorization<'_>> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("Failed to bind local callback listener")?;
        let port = listener.local_addr()?.port();

        let redirect_uri = format!("http://127.0.0.1:{}/", port);
        let state = uuid::Uuid::new_v4().simple().to_string();
        let scope = self.scopes.join(" ");

        let authorize_url = Url::parse_with_params(
            &self.config.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                ("access_type", "offline"),
            ],
        )
        .context("Invalid auth_uri in client secrets")?;

        Ok(PendingAuthorization {
            flow: self,
            listener,
            authorize_url,
            redirect_uri,
            state,
        })
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Session> {
        let response = self
            .client
            .post(&self.config.token_uri)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .context("Failed to reach the token endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed: HTTP {} - {}", status, text);
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        Ok(Session {
            access_token: token.access_token,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: token.scope,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl Authenticator for InstalledAppFlow {
    async fn authenticate(&self) -> Result<Session> {
        let pending = self.start().await?;

        println!(
            "Please visit this URL to authorize this application: {}",
            pending.authorize_url()
        );

        pending.complete().await
    }
}

/// Authorization waiting for the browser to hit the redirect URI
pub struct PendingAuthorization<'a> {
    flow: &'a InstalledAppFlow,
    listener: TcpListener,
    authorize_url: Url,
    redirect_uri: String,
    state: String,
}

#[derive(Clone)]
struct CallbackContext {
    expected_state: String,
    outcome: mpsc::UnboundedSender<Result<String>>,
}

impl PendingAuthorization<'_> {
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serve the redirect until it delivers a code, then trade it for a session
    pub async fn complete(self) -> Result<Session> {
        let PendingAuthorization {
            flow,
            listener,
            redirect_uri,
            state,
            ..
        } = self;

        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = Router::new()
            .route("/", get(handle_callback))
            .with_state(CallbackContext {
                expected_state: state,
                outcome: outcome_tx,
            });

        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = outcome_rx.recv().await;
        let _ = shutdown_tx.send(());

        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!("Callback server error: {}", e),
            Ok(Err(e)) => tracing::debug!("Callback server task failed: {}", e),
            Err(_) => {
                tracing::debug!("Callback server did not stop in time");
                server.abort();
            }
        }

        let code = outcome
            .ok_or_else(|| anyhow::anyhow!("Callback server stopped before authorization completed"))??;

        flow.exchange_code(&code, &redirect_uri).await
    }
}

async fn handle_callback(
    State(ctx): State<CallbackContext>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    let (status, message, outcome) = match Callback::from(query) {
        Callback::Unrelated => return (StatusCode::NOT_FOUND, page("Not found.")),
        Callback::Code { state, .. } | Callback::Denied { state, .. }
            if state.as_deref() != Some(ctx.expected_state.as_str()) =>
        {
            (
                StatusCode::BAD_REQUEST,
                "State mismatch. Please retry the authorization.",
                Err(anyhow::anyhow!("Authorization callback state mismatch")),
            )
        }
        Callback::Denied { error, .. } => (
            StatusCode::OK,
            "Authorization was denied. You may close this window.",
            Err(anyhow::anyhow!("Authorization denied: {}", error)),
        ),
        Callback::Code { code, .. } => (
            StatusCode::OK,
            "The authentication flow has completed. You may close this window.",
            Ok(code),
        ),
    };

    if ctx.outcome.send(outcome).is_err() {
        tracing::debug!("Authorization already settled, ignoring callback");
    }

    (status, page(message))
}

fn page(message: &str) -> Html<String> {
    Html(format!("<html><body><p>{}</p></body></html>", message))
}

/// Authenticator that logs its outcome, wrapping the configured flow
pub struct PlatformAuthenticator {
    secrets_file: PathBuf,
    scopes: Vec<String>,
}

impl PlatformAuthenticator {
    pub fn new(secrets_file: PathBuf, scopes: Vec<String>) -> Self {
        Self { secrets_file, scopes }
    }

    async fn run_flow(&self) -> Result<Session> {
        let flow = InstalledAppFlow::from_client_secrets_file(&self.secrets_file, self.scopes.clone())?;
        flow.authenticate().await
    }
}

#[async_trait]
impl Authenticator for PlatformAuthenticator {
    async fn authenticate(&self) -> Result<Session> {
        match self.run_flow().await {
            Ok(session) => {
                tracing::info!("YouTube authentication successful");
                Ok(session)
            }
            Err(e) => {
                tracing::error!("YouTube authentication failed: {:#}", e);
                Err(e)
            }
        }
    }
}
