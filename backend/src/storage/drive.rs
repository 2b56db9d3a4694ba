//! Google Drive archive store.
//!
//! Authenticates as a service account: a short-lived RS256 assertion signed
//! with the account's private key is exchanged for an OAuth2 access token,
//! which is cached until shortly before it expires. Archives are uploaded
//! into one folder shared with the service account.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{RemoteFile, RemoteStore};
use crate::error::{AppError, Result};
use crate::models::backup::BackupSettings;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const MULTIPART_BOUNDARY: &str = "pos_keeper_archive_boundary";

/// Service-account credentials and target folder.
#[derive(Clone)]
pub struct DriveConfig {
    pub service_account_email: String,
    pub private_key: String,
    pub folder_id: String,
}

redacted_debug!(DriveConfig {
    show service_account_email,
    redact private_key,
    show folder_id,
});

impl DriveConfig {
    /// Credentials from settings, or `None` unless all three are set.
    pub fn from_settings(settings: &BackupSettings) -> Option<Self> {
        if !settings.has_drive_credentials() {
            return None;
        }
        Some(Self {
            service_account_email: settings.drive_service_account_email.clone()?.trim().to_string(),
            // Keys pasted through env files or JSON often carry literal "\n"
            private_key: settings.drive_private_key.clone()?.replace("\\n", "\n"),
            folder_id: settings.drive_folder_id.clone()?.trim().to_string(),
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    size: Option<String>,
    created_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Google Drive backend
pub struct DriveStore {
    config: DriveConfig,
    signing_key: EncodingKey,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl DriveStore {
    pub fn new(config: DriveConfig) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|e| AppError::Config(format!("Invalid Drive private key: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AppError::Storage(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            signing_key,
            client,
            token: Mutex::new(None),
        })
    }

    fn assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.config.service_account_email,
            scope: DRIVE_SCOPE,
            aud: TOKEN_URL,
            iat: now,
            exp: now + 3600,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| AppError::Storage(format!("Failed to sign Drive assertion: {}", e)))
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.assertion()?;
        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Drive token request failed: {}", e)))?;
        let response = check(response, "token exchange").await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Storage(format!("Invalid Drive token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn multipart_body(&self, name: &str, content: &[u8]) -> Result<Vec<u8>> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [self.config.folder_id],
            "mimeType": "application/gzip",
        });
        let mut body = Vec::with_capacity(content.len() + 512);
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: application/gzip\r\n\r\n",
                b = MULTIPART_BOUNDARY,
                meta = serde_json::to_string(&metadata)?,
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
        Ok(body)
    }
}

/// Turn a non-success response into a storage error carrying the body.
async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(format!("Drive {}: {}", action, body)));
    }
    Err(AppError::Storage(format!(
        "Drive {} failed with status {}: {}",
        action, status, body
    )))
}

#[async_trait]
impl RemoteStore for DriveStore {
    fn backend(&self) -> &'static str {
        "google_drive"
    }

    fn location(&self) -> String {
        self.config.folder_id.clone()
    }

    async fn upload(&self, name: &str, content: Bytes) -> Result<String> {
        let token = self.access_token().await?;
        let body = self.multipart_body(name, &content)?;
        let response = self
            .client
            .post(UPLOAD_URL)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Drive upload failed: {}", e)))?;
        let file: UploadedFile = check(response, "upload")
            .await?
            .json()
            .await
            .map_err(|e| AppError::Storage(format!("Invalid Drive upload response: {}", e)))?;

        tracing::info!(file_id = %file.id, name, size = content.len(), "Uploaded archive to Drive");
        Ok(file.id)
    }

    async fn download(&self, file_id: &str) -> Result<Bytes> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/{}", FILES_URL, file_id))
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Drive download failed: {}", e)))?;
        check(response, "download")
            .await?
            .bytes()
            .await
            .map_err(|e| AppError::Storage(format!("Failed to read Drive response: {}", e)))
    }

    async fn list(&self) -> Result<Vec<RemoteFile>> {
        let token = self.access_token().await?;
        let query = format!("'{}' in parents and trashed = false", self.config.folder_id);
        let response = self
            .client
            .get(FILES_URL)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,size,createdTime)"),
                ("orderBy", "createdTime desc"),
                ("pageSize", "1000"),
            ])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Drive list failed: {}", e)))?;
        let list: FileList = check(response, "list")
            .await?
            .json()
            .await
            .map_err(|e| AppError::Storage(format!("Invalid Drive list response: {}", e)))?;

        Ok(list
            .files
            .into_iter()
            .map(|f| RemoteFile {
                id: f.id,
                name: f.name,
                size_bytes: f.size.and_then(|s| s.parse().ok()),
                created_at: f.created_time,
            })
            .collect())
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let token = self.access_token().await?;
        let response = self
            .client
            .delete(format!("{}/{}", FILES_URL, file_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("Drive delete failed: {}", e)))?;
        match check(response, "delete").await {
            Ok(_) | Err(AppError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
