//! Credential providers: static service principal or the cached Azure CLI user login.
use crate::process::run_command;
use crate::provisioner::ProvisionError;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Refresh tokens this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 300;

const AZ_CLI_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a device-code login to be completed by the operator.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(600);

/// Bearer token for one resource scope.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"***")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Resolves a usable cloud credential for a resource scope.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `scope` is an OAuth2 scope such as `https://management.azure.com/.default`.
    async fn token(&self, scope: &str) -> Result<AccessToken, ProvisionError>;
}

/// OAuth2 client-credentials flow for a configured service principal.
pub struct ServicePrincipalCredential {
    client: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: Mutex<HashMap<String, AccessToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl ServicePrincipalCredential {
    pub fn new(
        authority: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ProvisionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            authority: authority.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl CredentialProvider for ServicePrincipalCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken, ProvisionError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.get(scope) {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);
        tracing::debug!("[Credentials] Requesting service principal token for {}", scope);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Auth(format!(
                "service principal {} token request failed ({}): {}",
                self.client_id,
                status,
                body.trim()
            )));
        }

        let parsed: TokenResponse = response.json().await?;
        let token = AccessToken {
            token: parsed.access_token,
            expires_on: Utc::now() + chrono::Duration::seconds(parsed.expires_in),
        };
        cache.insert(scope.to_string(), token.clone());
        Ok(token)
    }
}

/// Cached user login of the Azure CLI, refreshed interactively when it is missing or expired.
pub struct AzureCliCredential {
    az_path: String,
    interactive: bool,
    cancel: CancellationToken,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    /// Epoch seconds; newer CLI versions emit it alongside the local-time string.
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl AzureCliCredential {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            az_path: "az".to_string(),
            interactive: true,
            cancel,
        }
    }

    /// Never prompt; fail instead (daemon context has no terminal).
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }

    pub fn with_az_path(mut self, az_path: impl Into<String>) -> Self {
        self.az_path = az_path.into();
        self
    }

    async fn cached_token(&self, scope: &str) -> Result<AccessToken, ProvisionError> {
        let output = run_command(
            &self.az_path,
            &["account", "get-access-token", "--scope", scope, "--output", "json"],
            AZ_CLI_TIMEOUT,
            &self.cancel,
        )
        .await?;
        if !output.success() {
            return Err(ProvisionError::Auth(format!(
                "az account get-access-token failed: {}",
                output.last_line()
            )));
        }
        parse_cli_token(&output.stdout)
    }

    async fn interactive_login(&self) -> Result<(), ProvisionError> {
        tracing::warn!("[Credentials] No valid Azure CLI login found; starting device code login");
        let mut child = tokio::process::Command::new(&self.az_path)
            .args(["login", "--use-device-code"])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        let status = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ProvisionError::Cancelled),
            waited = tokio::time::timeout(LOGIN_TIMEOUT, child.wait()) => match waited {
                Ok(status) => status?,
                Err(_) => {
                    return Err(ProvisionError::Timeout(format!(
                        "az login not completed within {}s",
                        LOGIN_TIMEOUT.as_secs()
                    )))
                }
            },
        };
        if !status.success() {
            return Err(ProvisionError::Auth(format!(
                "az login exited with {}",
                status.code().unwrap_or(-1)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken, ProvisionError> {
        match self.cached_token(scope).await {
            Ok(token) if token.is_fresh(Utc::now()) => return Ok(token),
            Ok(_) => tracing::info!("[Credentials] Cached Azure CLI token is about to expire"),
            Err(ProvisionError::Cancelled) => return Err(ProvisionError::Cancelled),
            Err(e) => tracing::info!("[Credentials] Cached Azure CLI token unavailable: {}", e),
        }
        if !self.interactive {
            return Err(ProvisionError::Auth(
                "Azure CLI login missing or expired; run `az login`".to_string(),
            ));
        }
        self.interactive_login().await?;
        self.cached_token(scope).await
    }
}

fn parse_cli_token(stdout: &str) -> Result<AccessToken, ProvisionError> {
    let parsed: CliToken = serde_json::from_str(stdout)
        .map_err(|e| ProvisionError::Auth(format!("unparseable az token output: {}", e)))?;

    let expires_on = match (parsed.expires_on_epoch, parsed.expires_on.as_deref()) {
        (Some(epoch), _) => Utc.timestamp_opt(epoch, 0).single(),
        (None, Some(local)) => NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).single())
            .map(|dt| dt.with_timezone(&Utc)),
        (None, None) => None,
    }
    .ok_or_else(|| ProvisionError::Auth("az token output has no usable expiry".to_string()))?;

    Ok(AccessToken {
        token: parsed.access_token,
        expires_on,
    })
}
