//! Vault transit engine.
//!
//! Keys live in a remote transit secrets engine and are versioned there.
//! Item names travel as the base64 `context` of each batch entry, so a
//! ciphertext only decrypts under the name it was produced for.
//!
//! HTTP goes through [`TransitTransport`]; [`ReqwestTransport`] talks to a
//! real server, tests script their own.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::config::{vault_param, VaultServiceConfig};
use common::record::{param_str, param_u32};
use common::{
    param, well_known, CryptoEngine, DataEncryptionServiceConfiguration, DecryptionResult,
    EncryptionResult, ErrorCode, KeyVersionInfo, Parameters, ServiceError, TextMap,
};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::EncryptionError;

/// Failure below the HTTP status level.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("cannot reach Vault: {0}")]
    Connection(String),
    #[error("Vault request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// One call against the Vault HTTP API; `path` is relative to `/v1/`.
#[derive(Clone)]
pub struct TransitRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub token: Option<String>,
}

impl std::fmt::Debug for TransitRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransitResponse {
    pub status: u16,
    /// Parsed JSON body; `Null` when the server sent none.
    pub body: Value,
}

pub trait TransitTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: TransitRequest,
    ) -> BoxFuture<'a, std::result::Result<TransitResponse, TransportError>>;
}

/// `reqwest` transport (rustls).
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout_secs == 0` keeps the client default.
    pub fn new(
        base_url: &str,
        timeout_secs: u64,
    ) -> std::result::Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(timeout_secs));
        }
        let client = builder.build()?;
        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            client,
        })
    }
}

impl TransitTransport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        request: TransitRequest,
    ) -> BoxFuture<'a, std::result::Result<TransitResponse, TransportError>> {
        Box::pin(async move {
            let url = format!(
                "{}/v1/{}",
                self.base_url,
                request.path.trim_start_matches('/')
            );
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&url),
                HttpMethod::Post => self.client.post(&url),
            };
            if let Some(token) = request.token.as_deref() {
                builder = builder.header("X-Vault-Token", token);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            };
            Ok(TransitResponse { status, body })
        })
    }
}

/// How the engine authenticates against Vault.
#[derive(Clone, PartialEq, Eq)]
pub enum VaultAuth {
    Token(String),
    UserPass { username: String, password: String },
    AppRole {
        role_id: String,
        secret_id: Option<String>,
    },
}

impl std::fmt::Debug for VaultAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultAuth::Token(_) => f.write_str("VaultAuth::Token([REDACTED])"),
            VaultAuth::UserPass { username, .. } => f
                .debug_struct("VaultAuth::UserPass")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            VaultAuth::AppRole { role_id, .. } => f
                .debug_struct("VaultAuth::AppRole")
                .field("role_id", role_id)
                .field("secret_id", &"[REDACTED]")
                .finish(),
        }
    }
}

impl VaultAuth {
    /// Reads the auth method and its credentials; `Err` carries the reason
    /// the engine stays unconfigured.
    pub fn from_config(config: &VaultServiceConfig) -> std::result::Result<Self, String> {
        let method = config
            .auth_method
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match method.as_str() {
            "token" => config
                .parameter(vault_param::TOKEN)
                .map(|token| VaultAuth::Token(token.to_string()))
                .ok_or_else(|| "Token is not configured.".to_string()),
            "userpass" => {
                let username = config
                    .parameter(vault_param::USER_NAME)
                    .ok_or_else(|| "User name is not configured.".to_string())?;
                Ok(VaultAuth::UserPass {
                    username: username.to_string(),
                    password: config
                        .parameter(vault_param::PASSWORD)
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            "approle" => {
                let role_id = config
                    .parameter(vault_param::ROLE_ID)
                    .ok_or_else(|| "The role ID is not configured.".to_string())?;
                Ok(VaultAuth::AppRole {
                    role_id: role_id.to_string(),
                    secret_id: config.parameter(vault_param::SECRET_ID).map(str::to_string),
                })
            }
            "" => Err("No authorization method defined in the configuration.".into()),
            other => Err(format!("Authorization method [{other}] not implemented.")),
        }
    }

    fn requires_login(&self) -> bool {
        !matches!(self, VaultAuth::Token(_))
    }

    fn login_request(&self) -> Option<(String, Value)> {
        match self {
            VaultAuth::Token(_) => None,
            VaultAuth::UserPass { username, password } => Some((
                format!("auth/userpass/login/{username}"),
                json!({ "password": password }),
            )),
            VaultAuth::AppRole { role_id, secret_id } => {
                let mut body = json!({ "role_id": role_id });
                if let Some(secret_id) = secret_id {
                    body["secret_id"] = Value::from(secret_id.clone());
                }
                Some(("auth/approle/login".to_string(), body))
            }
        }
    }
}

/// Extracts `N` from a `vault:v<N>:<payload>` ciphertext.
pub fn parse_key_version(cipher_text: &str) -> Option<u32> {
    let mut parts = cipher_text.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("vault"), Some(version), Some(_)) => version.strip_prefix('v')?.parse().ok(),
        _ => None,
    }
}

/// Maps a non-success Vault response onto the error taxonomy.
pub fn map_vault_error(status: u16, body: &Value) -> ServiceError {
    let message = body
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .unwrap_or_else(|| format!("HTTP status {status}"));

    match status {
        403 => ServiceError::new(
            ErrorCode::CryptoAccessDeniedToKeyOrService,
            format!("Vault access denied - {message}"),
        ),
        503 => ServiceError::new(
            ErrorCode::CryptoServiceNotAvailable,
            format!("Vault service is not available - {message}"),
        ),
        404 => ServiceError::new(
            ErrorCode::CryptoEncryptionKeyNotFound,
            format!("Invalid encryption key or mount - {message}"),
        ),
        400 => {
            let lowered = message.to_lowercase();
            if lowered.contains("invalid username") {
                ServiceError::new(
                    ErrorCode::CryptoInvalidConfiguration,
                    format!("Invalid configuration to access Vault service - {message}"),
                )
            } else if lowered.contains("encryption key not found") {
                ServiceError::new(
                    ErrorCode::CryptoEncryptionKeyNotFound,
                    format!("Orphaned encrypted data - {message}"),
                )
            } else {
                ServiceError::new(ErrorCode::CryptoUndefinedError, message)
            }
        }
        _ => ServiceError::new(ErrorCode::CryptoUndefinedError, message),
    }
}

fn map_transport_error(err: TransportError) -> ServiceError {
    match err {
        TransportError::Connection(message) => {
            ServiceError::new(ErrorCode::NetworkConnectionError, message)
        }
        TransportError::Other(message) => ServiceError::new(ErrorCode::CryptoUndefinedError, message),
    }
}

/// Authenticated access to the Vault HTTP API.
struct VaultClient {
    transport: Arc<dyn TransitTransport>,
    auth: VaultAuth,
    token: Mutex<Option<Zeroizing<String>>>,
}

impl VaultClient {
    fn new(transport: Arc<dyn TransitTransport>, auth: VaultAuth) -> Self {
        Self {
            transport,
            auth,
            token: Mutex::new(None),
        }
    }

    async fn token(&self) -> common::Result<Zeroizing<String>> {
        if let VaultAuth::Token(token) = &self.auth {
            return Ok(Zeroizing::new(token.clone()));
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }

        let Some((path, body)) = self.auth.login_request() else {
            return Err(ServiceError::new(
                ErrorCode::CryptoMissingConfiguration,
                "Vault authentication is not configured.",
            ));
        };
        let response = self
            .transport
            .send(TransitRequest {
                method: HttpMethod::Post,
                path,
                body: Some(body),
                token: None,
            })
            .await
            .map_err(map_transport_error)?;
        if !(200..300).contains(&response.status) {
            return Err(map_vault_error(response.status, &response.body));
        }

        let token = response
            .body
            .pointer("/auth/client_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EncryptionError::UnexpectedResponse("login response carries no client token".into())
            })?;
        debug!("Vault login succeeded");
        let token = Zeroizing::new(token.to_string());
        *cached = Some(token.clone());
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn call(
        &self,
        method: HttpMethod,
        path: String,
        body: Option<Value>,
    ) -> common::Result<Value> {
        let mut retried = false;
        loop {
            let token = self.token().await?;
            let response = self
                .transport
                .send(TransitRequest {
                    method,
                    path: path.clone(),
                    body: body.clone(),
                    token: Some(token.to_string()),
                })
                .await
                .map_err(map_transport_error)?;

            if (200..300).contains(&response.status) {
                return Ok(response.body);
            }

            // A login token may have expired; log in again once.
            if response.status == 403 && self.auth.requires_login() && !retried {
                warn!(path = %path, "Vault denied the cached token; logging in again");
                self.invalidate_token().await;
                retried = true;
                continue;
            }

            return Err(map_vault_error(response.status, &response.body));
        }
    }
}

/// Remote versioned-key engine backed by the Vault transit API.
pub struct VaultTransitEngine {
    client: Option<VaultClient>,
    default_mount_point: Option<String>,
    default_key_name: Option<String>,
}

impl std::fmt::Debug for VaultTransitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultTransitEngine")
            .field("configured", &self.client.is_some())
            .field("default_mount_point", &self.default_mount_point)
            .field("default_key_name", &self.default_key_name)
            .finish()
    }
}

impl VaultTransitEngine {
    pub fn new(
        transport: Arc<dyn TransitTransport>,
        auth: VaultAuth,
        default_mount_point: Option<String>,
        default_key_name: Option<String>,
    ) -> Self {
        Self {
            client: Some(VaultClient::new(transport, auth)),
            default_mount_point: non_empty(default_mount_point),
            default_key_name: non_empty(default_key_name),
        }
    }

    /// Builds the engine from the service configuration. A missing URL or
    /// incomplete credentials leave it unconfigured.
    pub fn from_config(config: &DataEncryptionServiceConfiguration) -> Self {
        let engine_params = config
            .encryption
            .engine_parameters(well_known::VAULT_TRANSIT_ENGINE_ID);
        let lookup = |name: &str| {
            engine_params
                .and_then(|params| params.get(name))
                .map(|value| value.trim().to_string())
        };
        let default_mount_point = non_empty(lookup(vault_param::DEFAULT_MOUNT_POINT));
        let default_key_name = non_empty(lookup(vault_param::DEFAULT_KEY_NAME));

        let client = match Self::client_from_config(&config.vault_service) {
            Ok(client) => Some(client),
            Err(reason) => {
                error!(reason = %reason, "cannot create Vault client for transit engine");
                None
            }
        };

        info!(
            engine_id = %well_known::VAULT_TRANSIT_ENGINE_ID,
            mount_point = ?default_mount_point,
            key_name = ?default_key_name,
            configured = client.is_some(),
            "initialized Vault transit engine"
        );

        Self {
            client,
            default_mount_point,
            default_key_name,
        }
    }

    fn client_from_config(config: &VaultServiceConfig) -> std::result::Result<VaultClient, String> {
        let url = config
            .service_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| "The Vault service URL is not configured.".to_string())?;
        let auth = VaultAuth::from_config(config)?;
        let transport = ReqwestTransport::new(url, config.api_timeout).map_err(|e| e.to_string())?;
        Ok(VaultClient::new(Arc::new(transport), auth))
    }

    fn client(&self) -> common::Result<&VaultClient> {
        self.client.as_ref().ok_or_else(|| {
            ServiceError::new(
                ErrorCode::CryptoMissingConfiguration,
                "The Vault client is not configured.",
            )
        })
    }

    fn mount_point(&self, parameters: Option<&Parameters>) -> common::Result<String> {
        param_str(parameters, param::KEY_SCOPE)
            .filter(|scope| !scope.trim().is_empty())
            .or_else(|| self.default_mount_point.clone())
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::CryptoEncryptionContextNotSpecified,
                    "The encryption key mount point (scope) was not specified explicitly or through configuration.",
                )
            })
    }

    fn key_name(&self, parameters: Option<&Parameters>) -> common::Result<String> {
        param_str(parameters, param::KEY_NAME)
            .filter(|name| !name.trim().is_empty())
            .or_else(|| self.default_key_name.clone())
            .ok_or_else(key_not_specified)
    }

    fn used_parameters(mount_point: &str, key_name: &str, data: &TextMap) -> common::Result<Parameters> {
        let version = data
            .values()
            .next()
            .and_then(|cipher| parse_key_version(cipher))
            .ok_or_else(|| {
                EncryptionError::UnexpectedResponse("ciphertext carries no key version".into())
            })?;
        let mut parameters = Parameters::new();
        parameters.insert(param::KEY_SCOPE.into(), Value::from(mount_point));
        parameters.insert(param::KEY_NAME.into(), Value::from(key_name));
        parameters.insert(param::KEY_VERSION.into(), Value::from(version));
        Ok(parameters)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn key_not_specified() -> ServiceError {
    ServiceError::new(
        ErrorCode::CryptoEncryptionKeyNotSpecified,
        "The encryption key was not specified explicitly or through configuration.",
    )
}

fn request_id(body: &Value) -> Option<String> {
    body.get("request_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Pulls `field` out of every `batch_results` entry, in request order.
fn batch_field(body: &Value, field: &str, expected: usize) -> common::Result<Vec<String>> {
    let results = body
        .pointer("/data/batch_results")
        .and_then(Value::as_array)
        .ok_or_else(|| EncryptionError::UnexpectedResponse("missing batch_results".into()))?;
    if results.len() != expected {
        return Err(EncryptionError::UnexpectedResponse(format!(
            "expected {expected} batch results, got {}",
            results.len()
        ))
        .into());
    }

    results
        .iter()
        .map(|entry| {
            if let Some(err) = entry.get("error").and_then(Value::as_str) {
                if !err.is_empty() {
                    return Err(ServiceError::new(ErrorCode::CryptoUndefinedError, err));
                }
            }
            entry
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    EncryptionError::UnexpectedResponse(format!("batch entry has no {field}"))
                        .into()
                })
        })
        .collect()
}

fn context_of(name: &str) -> String {
    STANDARD.encode(name.as_bytes())
}

impl CryptoEngine for VaultTransitEngine {
    fn engine_id(&self) -> Uuid {
        well_known::VAULT_TRANSIT_ENGINE_ID
    }

    fn display_name(&self) -> &str {
        well_known::VAULT_TRANSIT_ENGINE_NAME
    }

    fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn encrypt<'a>(
        &'a self,
        clear_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        Box::pin(async move {
            if clear_text.keys().any(|name| name.is_empty()) {
                return Err(EncryptionError::EmptyContext.into());
            }
            let mount_point = self.mount_point(parameters)?;
            let key_name = self.key_name(parameters)?;
            let pinned = param_u32(parameters, param::KEY_VERSION).filter(|v| *v > 0);
            if pinned.is_some() && clear_text.len() > 1 {
                return Err(ServiceError::new(
                    ErrorCode::CryptoInvalidServiceParameters,
                    "Key version pinning is not supported for more than one item.",
                ));
            }
            let client = self.client()?;
            let path = format!("{mount_point}/encrypt/{key_name}");

            let (data, response) = match (pinned, clear_text.iter().next()) {
                (Some(version), Some((name, value))) => {
                    let body = json!({
                        "context": context_of(name),
                        "plaintext": STANDARD.encode(value.as_bytes()),
                        "key_version": version,
                    });
                    let response = client.call(HttpMethod::Post, path, Some(body)).await?;
                    let cipher = response
                        .pointer("/data/ciphertext")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            EncryptionError::UnexpectedResponse("missing ciphertext".into())
                        })?
                        .to_string();
                    (TextMap::from([(name.clone(), cipher)]), response)
                }
                _ => {
                    let batch: Vec<Value> = clear_text
                        .iter()
                        .map(|(name, value)| {
                            json!({
                                "context": context_of(name),
                                "plaintext": STANDARD.encode(value.as_bytes()),
                            })
                        })
                        .collect();
                    let response = client
                        .call(HttpMethod::Post, path, Some(json!({ "batch_input": batch })))
                        .await?;
                    let ciphers = batch_field(&response, "ciphertext", clear_text.len())?;
                    (clear_text.keys().cloned().zip(ciphers).collect(), response)
                }
            };

            Ok(EncryptionResult {
                parameters: Self::used_parameters(&mount_point, &key_name, &data)?,
                data,
                request_id: request_id(&response),
            })
        })
    }

    fn decrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<DecryptionResult>> {
        Box::pin(async move {
            let mount_point = self.mount_point(parameters)?;
            let key_name = self.key_name(parameters)?;
            let client = self.client()?;

            let batch: Vec<Value> = cipher_text
                .iter()
                .map(|(name, cipher)| json!({ "context": context_of(name), "ciphertext": cipher }))
                .collect();
            let response = client
                .call(
                    HttpMethod::Post,
                    format!("{mount_point}/decrypt/{key_name}"),
                    Some(json!({ "batch_input": batch })),
                )
                .await?;
            let plaintexts = batch_field(&response, "plaintext", cipher_text.len())?;

            let mut data = TextMap::new();
            for (name, encoded) in cipher_text.keys().zip(plaintexts) {
                let bytes = STANDARD.decode(encoded.trim()).map_err(|_| {
                    EncryptionError::UnexpectedResponse(format!("plaintext of {name} is not base64"))
                })?;
                let text =
                    String::from_utf8(bytes).map_err(|_| EncryptionError::InvalidUtf8(name.clone()))?;
                data.insert(name.clone(), text);
            }
            Ok(DecryptionResult { data })
        })
    }

    fn reencrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        Box::pin(async move {
            let mount_point = self.mount_point(parameters)?;
            let key_name = self.key_name(parameters)?;
            let client = self.client()?;

            let batch: Vec<Value> = cipher_text
                .iter()
                .map(|(name, cipher)| json!({ "context": context_of(name), "ciphertext": cipher }))
                .collect();
            let response = client
                .call(
                    HttpMethod::Post,
                    format!("{mount_point}/rewrap/{key_name}"),
                    Some(json!({ "batch_input": batch })),
                )
                .await?;
            let ciphers = batch_field(&response, "ciphertext", cipher_text.len())?;
            let data: TextMap = cipher_text.keys().cloned().zip(ciphers).collect();

            Ok(EncryptionResult {
                parameters: Self::used_parameters(&mount_point, &key_name, &data)?,
                data,
                request_id: request_id(&response),
            })
        })
    }

    fn rotate_key<'a>(
        &'a self,
        key_name: &'a str,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<()>> {
        Box::pin(async move {
            if key_name.trim().is_empty() {
                return Err(key_not_specified());
            }
            let mount_point = self.mount_point(parameters)?;
            let client = self.client()?;
            client
                .call(
                    HttpMethod::Post,
                    format!("{mount_point}/keys/{key_name}/rotate"),
                    None,
                )
                .await?;
            info!(mount_point = %mount_point, key_name, "rotated Vault transit key");
            Ok(())
        })
    }

    fn key_version_info<'a>(
        &'a self,
        key_name: &'a str,
        key_scope: &'a str,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<KeyVersionInfo>> {
        Box::pin(async move {
            let key_name = match key_name.trim() {
                "" => self.key_name(parameters)?,
                name => name.to_string(),
            };
            let mount_point = match key_scope.trim() {
                "" => self.mount_point(parameters)?,
                scope => scope.to_string(),
            };
            let client = self.client()?;
            let response = client
                .call(
                    HttpMethod::Get,
                    format!("{mount_point}/keys/{key_name}"),
                    None,
                )
                .await?;

            let current_version = response
                .pointer("/data/keys")
                .and_then(Value::as_object)
                .and_then(|keys| keys.keys().filter_map(|k| k.parse::<u32>().ok()).max())
                .ok_or_else(|| {
                    EncryptionError::UnexpectedResponse("key info lists no versions".into())
                })?;
            let version_of = |field: &str| {
                response
                    .pointer(&format!("/data/{field}"))
                    .and_then(Value::as_u64)
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or_default()
            };

            Ok(KeyVersionInfo {
                current_version,
                min_decryption_version: version_of("min_decryption_version"),
                min_encryption_version: version_of("min_encryption_version"),
            })
        })
    }
}
