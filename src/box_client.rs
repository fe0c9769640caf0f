//! HTTP implementation of the core contracts against the Box content API.
//!
//! One [`BoxApi`] is shared by every client. It owns the `reqwest` connection pool and the
//! Client-Credentials-Grant token of the service account, refreshed shortly before it
//! expires. User clients reuse that token with the `As-User` header.
//!
//! Responses are classified once here: 429 becomes [`ApiError::RateLimited`] (carrying the
//! `Retry-After` hint), any other non-2xx status becomes [`ApiError::Request`] with Box's
//! `code` and `message`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use box_traverse_core::config::BoxAppSettings;
use box_traverse_core::contract::{
    Authenticator, ContentClient, Page, PageCursor, PageRequest, ServiceAccount,
};
use box_traverse_core::error::ApiError;
use box_traverse_core::fetcher::next_offset;
use box_traverse_core::model::{Item, ItemKind, UserProfile};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE_URL: &str = "https://api.box.com";
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://upload.box.com/api/2.0";

const USER_FIELDS: &str = "id,name,login,status";
/// Tokens are renewed this long before Box would reject them.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const COMMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct Collection<T> {
    entries: Vec<T>,
    #[serde(default)]
    total_count: Option<u64>,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct UploadSession {
    id: String,
    part_size: usize,
    #[serde(default)]
    total_parts: Option<usize>,
}

#[derive(Deserialize)]
struct UploadedPart {
    part: Value,
}

/// Shared transport and service-account credentials.
pub struct BoxApi {
    http: reqwest::Client,
    settings: BoxAppSettings,
    api_base: String,
    upload_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl BoxApi {
    pub fn new(settings: BoxAppSettings) -> Arc<Self> {
        let api_base = settings
            .api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let upload_base = settings
            .upload_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_UPLOAD_BASE_URL.to_string());
        Arc::new(Self {
            http: reqwest::Client::new(),
            settings,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/2.0/{}", self.api_base, path)
    }

    fn upload_url(&self, path: &str) -> String {
        format!("{}/{}", self.upload_base, path)
    }

    /// Current service-account token, fetching a new one when the cached one is about to expire.
    async fn access_token(&self) -> Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        debug!(enterprise_id = %self.settings.enterprise_id, "Requesting service account token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("box_subject_type", "enterprise"),
            ("box_subject_id", self.settings.enterprise_id.as_str()),
        ];
        let response = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        let body: TokenResponse = decode(check(response).await?).await?;

        info!(expires_in = body.expires_in, "Service account token acquired");
        let token = body.access_token.clone();
        *cached = Some(CachedToken {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        });
        Ok(token)
    }

    /// Authenticates and sends `request`, optionally on behalf of `as_user`.
    async fn execute(
        &self,
        request: RequestBuilder,
        as_user: Option<&str>,
    ) -> Result<Response, ApiError> {
        let token = self.access_token().await?;
        let mut request = request.bearer_auth(token);
        if let Some(user_id) = as_user {
            request = request.header("As-User", user_id);
        }
        let response = request.send().await.map_err(transport)?;
        check(response).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
        as_user: Option<&str>,
    ) -> Result<T, ApiError> {
        let request = self.http.request(Method::GET, url).query(query);
        decode(self.execute(request, as_user).await?).await
    }
}

fn transport(e: reqwest::Error) -> ApiError {
    ApiError::Transport(e.to_string())
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

/// Passes successful responses through and classifies the rest.
async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(classify(status, retry_after, &body))
}

/// `Retry-After` in delta-seconds form. Box never sends the HTTP-date form.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub fn classify(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    });
    if status == StatusCode::TOO_MANY_REQUESTS {
        ApiError::RateLimited {
            code: parsed.code,
            message,
            retry_after,
        }
    } else {
        ApiError::Request {
            status: status.as_u16(),
            code: parsed.code,
            message,
        }
    }
}

fn collection_path(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::File => "files",
        ItemKind::Folder => "folders",
        ItemKind::WebLink => "web_links",
    }
}

fn page_query(page: &PageRequest) -> Vec<(&'static str, String)> {
    let mut query = vec![("limit", page.limit.to_string())];
    match &page.cursor {
        PageCursor::Offset(offset) => query.push(("offset", offset.to_string())),
        PageCursor::Marker(marker) => {
            query.push(("usemarker", "true".to_string()));
            if let Some(marker) = marker {
                query.push(("marker", marker.clone()));
            }
        }
    }
    query
}

/// Turns a collection response into a [`Page`], computing where the next page starts.
fn into_page<T>(collection: Collection<T>, cursor: &PageCursor) -> Page<T> {
    let next = match cursor {
        PageCursor::Offset(offset) => {
            let total = collection.total_count.unwrap_or(0);
            next_offset(*offset, collection.entries.len(), total)
        }
        PageCursor::Marker(_) => collection
            .next_marker
            .filter(|m| !m.is_empty())
            .map(|m| PageCursor::Marker(Some(m))),
    };
    Page {
        entries: collection.entries,
        next,
        total_count: collection.total_count,
    }
}

/// `sha=<base64 sha1>` as expected by the `Digest` header of upload sessions.
pub fn sha1_digest(bytes: &[u8]) -> String {
    let hash = Sha1::digest(bytes);
    format!(
        "sha={}",
        base64::engine::general_purpose::STANDARD.encode(hash)
    )
}

fn first_entry_id(collection: Collection<IdOnly>) -> Result<String, ApiError> {
    collection
        .entries
        .into_iter()
        .next()
        .map(|e| e.id)
        .ok_or_else(|| ApiError::Decode("upload response without entries".into()))
}

/// Content access as one managed user.
pub struct UserClient {
    api: Arc<BoxApi>,
    user_id: String,
}

#[async_trait]
impl ContentClient for UserClient {
    async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.api
            .get_json(
                self.api.api_url("users/me"),
                &[("fields", USER_FIELDS.to_string())],
                Some(&self.user_id),
            )
            .await
    }

    async fn get_item(
        &self,
        id: &str,
        kind: ItemKind,
        fields: &[String],
    ) -> Result<Item, ApiError> {
        let url = self.api.api_url(&format!("{}/{}", collection_path(kind), id));
        self.api
            .get_json(url, &[("fields", fields.join(","))], Some(&self.user_id))
            .await
    }

    async fn list_folder_children(
        &self,
        folder_id: &str,
        fields: &[String],
        page: PageRequest,
    ) -> Result<Page<Item>, ApiError> {
        let url = self.api.api_url(&format!("folders/{folder_id}/items"));
        let mut query = page_query(&page);
        query.push(("fields", fields.join(",")));
        let collection: Collection<Item> =
            self.api.get_json(url, &query, Some(&self.user_id)).await?;
        Ok(into_page(collection, &page.cursor))
    }

    async fn update_shared_link(
        &self,
        item: &Item,
        access: &str,
        fields: &[String],
    ) -> Result<Item, ApiError> {
        let url = self
            .api
            .api_url(&format!("{}/{}", collection_path(item.kind), item.id));
        let request = self
            .api
            .http
            .request(Method::PUT, url)
            .query(&[("fields", fields.join(","))])
            .json(&json!({ "shared_link": { "access": access } }));
        decode(self.api.execute(request, Some(&self.user_id)).await?).await
    }
}

/// Enterprise-level calls made as the service account itself.
pub struct ServiceClient {
    api: Arc<BoxApi>,
}

impl ServiceClient {
    async fn commit_session(
        &self,
        session_id: &str,
        digest: String,
        parts: Vec<Value>,
    ) -> Result<String, ApiError> {
        let url = self
            .api
            .upload_url(&format!("files/upload_sessions/{session_id}/commit"));
        let body = json!({ "parts": parts });
        for attempt in 1..=COMMIT_ATTEMPTS {
            let request = self
                .api
                .http
                .post(&url)
                .header("Digest", &digest)
                .json(&body);
            let response = self.api.execute(request, None).await?;
            // 202 means the parts are still being processed.
            if response.status() == StatusCode::ACCEPTED {
                let wait = retry_after(response.headers()).unwrap_or(Duration::from_secs(1));
                debug!(session_id, attempt, ?wait, "Upload session commit pending");
                tokio::time::sleep(wait).await;
                continue;
            }
            return first_entry_id(decode(response).await?);
        }
        Err(ApiError::Request {
            status: 202,
            code: None,
            message: format!("upload session {session_id} was not committed"),
        })
    }
}

#[async_trait]
impl ServiceAccount for ServiceClient {
    async fn list_enterprise_users(
        &self,
        page: PageRequest,
    ) -> Result<Page<UserProfile>, ApiError> {
        let mut query = page_query(&page);
        query.push(("user_type", "managed".to_string()));
        query.push(("fields", USER_FIELDS.to_string()));
        let collection: Collection<UserProfile> = self
            .api
            .get_json(self.api.api_url("users"), &query, None)
            .await?;
        Ok(into_page(collection, &page.cursor))
    }

    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<String, ApiError> {
        let attributes = json!({ "name": name, "parent": { "id": folder_id } }).to_string();
        let form = reqwest::multipart::Form::new()
            .text("attributes", attributes)
            .part(
                "file",
                reqwest::multipart::Part::bytes(content).file_name(name.to_string()),
            );
        let request = self
            .api
            .http
            .post(self.api.upload_url("files/content"))
            .multipart(form);
        let id = first_entry_id(decode(self.api.execute(request, None).await?).await?)?;
        info!(file_id = %id, folder_id, name, "Uploaded file");
        Ok(id)
    }

    async fn upload_file_chunked(
        &self,
        folder_id: &str,
        name: &str,
        content: Vec<u8>,
    ) -> Result<String, ApiError> {
        let total = content.len();
        let request = self
            .api
            .http
            .post(self.api.upload_url("files/upload_sessions"))
            .json(&json!({ "folder_id": folder_id, "file_size": total, "file_name": name }));
        let session: UploadSession = decode(self.api.execute(request, None).await?).await?;
        if session.part_size == 0 {
            return Err(ApiError::Decode("upload session with zero part size".into()));
        }
        info!(
            session_id = %session.id,
            part_size = session.part_size,
            total_parts = ?session.total_parts,
            "Created upload session"
        );

        let mut parts = Vec::new();
        for (index, chunk) in content.chunks(session.part_size).enumerate() {
            let start = index * session.part_size;
            let end = start + chunk.len() - 1;
            let request = self
                .api
                .http
                .put(self.api.upload_url(&format!("files/upload_sessions/{}", session.id)))
                .header("Digest", sha1_digest(chunk))
                .header("Content-Range", format!("bytes {start}-{end}/{total}"))
                .header("Content-Type", "application/octet-stream")
                .body(chunk.to_vec());
            let uploaded: UploadedPart = decode(self.api.execute(request, None).await?).await?;
            debug!(session_id = %session.id, part = index, "Uploaded part");
            parts.push(uploaded.part);
        }

        let id = self
            .commit_session(&session.id, sha1_digest(&content), parts)
            .await?;
        info!(file_id = %id, folder_id, name, "Committed upload session");
        Ok(id)
    }
}

/// Hands out clients backed by one shared [`BoxApi`].
pub struct BoxAuthenticator {
    api: Arc<BoxApi>,
}

impl BoxAuthenticator {
    pub fn new(settings: BoxAppSettings) -> Self {
        Self {
            api: BoxApi::new(settings),
        }
    }
}

#[async_trait]
impl Authenticator for BoxAuthenticator {
    async fn user_client(&self, user_id: &str) -> Result<Arc<dyn ContentClient>, ApiError> {
        // Fail here rather than on the first request if the credentials are wrong.
        if let Err(e) = self.api.access_token().await {
            warn!(user_id, error = %e, "Could not authenticate user client");
            return Err(e);
        }
        Ok(Arc::new(UserClient {
            api: Arc::clone(&self.api),
            user_id: user_id.to_string(),
        }))
    }

    async fn service_account(&self) -> Result<Arc<dyn ServiceAccount>, ApiError> {
        self.api.access_token().await?;
        Ok(Arc::new(ServiceClient {
            api: Arc::clone(&self.api),
        }))
    }
}
