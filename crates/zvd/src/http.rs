//! HTTP surface: a thin adapter from requests to [`Vault`] calls.
//!
//! Routes:
//!   POST /upload?burn&expiry&decoy&hash   multipart field `file`
//!   POST /upload/dual?burn&expiry&hash    multipart fields `file` + `decoy`
//!   GET  /files/{id}                      envelope bytes
//!   GET  /info/{id}                       public metadata
//!   GET  /s/{code}                        short code → `{ fileId }`
//!   POST /heal-link/{id}                  `{ masterToken }` → new token
//!   POST /disposable/{id}                 `{ masterToken }` → single-use token
//!   GET  /d/{token}                       envelope bytes via a disposable token
//!
//! Errors answer `{ "error": <code>, "message": <text> }`.

use axum::{
    body::Body,
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use zv_core::{FileInfo, VaultError};
use zv_vault::{
    BurnTicket, DisposableGrant, Download, HealOutcome, UploadOptions, UploadReceipt, Vault,
};

use crate::metrics::Metrics;

/// Burn downloads are streamed in chunks of this size.
const STREAM_CHUNK: usize = 64 * 1024;

/// Multipart framing allowance on top of the envelope bytes.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
    pub metrics: Arc<Metrics>,
    /// Wait between a burn response closing and its blob deletion
    pub burn_delete_delay: Duration,
}

pub fn router(state: AppState) -> Router {
    let max_upload = state.vault.config().max_upload_bytes;
    // a dual upload carries two envelopes
    let body_limit = max_upload
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(upload))
        .route("/upload/dual", post(upload_dual))
        .route("/files/{id}", get(download))
        .route("/info/{id}", get(info))
        .route("/s/{code}", get(short_code))
        .route("/heal-link/{id}", post(heal_link))
        .route("/disposable/{id}", post(issue_disposable))
        .route("/d/{token}", get(redeem_disposable))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "format",
            message: message.into(),
        }
    }

    fn multipart(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                kind: "too_large",
                message: err.body_text(),
            }
        } else {
            Self::bad_request(err.body_text())
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let status = match &err {
            VaultError::Format(_) => StatusCode::BAD_REQUEST,
            VaultError::NotFound(_) => StatusCode::NOT_FOUND,
            VaultError::Forbidden(_) => StatusCode::FORBIDDEN,
            VaultError::Gone(_) => StatusCode::GONE,
            VaultError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            VaultError::Authentication => StatusCode::UNPROCESSABLE_ENTITY,
            VaultError::Storage(_) | VaultError::Io(_) | VaultError::Other(_) => {
                tracing::error!("internal error: {err:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind(),
            message: err.public_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Uploads ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    burn: Option<String>,
    expiry: Option<String>,
    decoy: Option<String>,
    hash: Option<String>,
}

impl UploadQuery {
    fn options(&self) -> ApiResult<UploadOptions> {
        Ok(UploadOptions::from_params(
            self.burn.as_deref(),
            self.expiry.as_deref(),
            self.decoy.as_deref(),
            self.hash.as_deref(),
        )?)
    }
}

/// Collect the named multipart fields. Other fields are skipped.
async fn read_fields(
    mut multipart: Multipart,
    wanted: &[&str],
) -> ApiResult<HashMap<String, Vec<u8>>> {
    let mut fields = HashMap::new();
    while let Some(field) = multipart.next_field().await.map_err(ApiError::multipart)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if !wanted.contains(&name.as_str()) {
            continue;
        }
        let data = field.bytes().await.map_err(ApiError::multipart)?;
        fields.insert(name, data.to_vec());
    }
    Ok(fields)
}

fn take_field(fields: &mut HashMap<String, Vec<u8>>, name: &str) -> ApiResult<Vec<u8>> {
    fields
        .remove(name)
        .ok_or_else(|| ApiError::bad_request(format!("multipart field `{name}` is required")))
}

async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> ApiResult<Json<UploadReceipt>> {
    let options = query.options()?;
    let mut fields = read_fields(multipart, &["file"]).await?;
    let bytes = take_field(&mut fields, "file")?;

    let receipt = state.vault.upload(bytes, options).await?;
    state.metrics.uploads.inc();
    Ok(Json(receipt))
}

async fn upload_dual(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> ApiResult<Json<UploadReceipt>> {
    let options = query.options()?;
    let mut fields = read_fields(multipart, &["file", "decoy"]).await?;
    let bytes = take_field(&mut fields, "file")?;
    let decoy_bytes = take_field(&mut fields, "decoy")?;

    let receipt = state.vault.upload_dual(bytes, decoy_bytes, options).await?;
    state.metrics.dual_uploads.inc();
    Ok(Json(receipt))
}

// ── Downloads ─────────────────────────────────────────────────────────────

async fn download(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let download = state.vault.download(&id).await?;
    state.metrics.downloads.inc();
    envelope_response(&state, download)
}

async fn redeem_disposable(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let download = state.vault.redeem_disposable(&token).await?;
    state.metrics.disposable_redeemed.inc();
    state.metrics.downloads.inc();
    envelope_response(&state, download)
}

fn envelope_response(state: &AppState, download: Download) -> ApiResult<Response> {
    let len = download.bytes.len();
    let body = match download.burn {
        None => Body::from(download.bytes),
        Some(ticket) => {
            state.metrics.burns.inc();
            burn_body(state, Bytes::from(download.bytes), ticket)
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(header::CACHE_CONTROL, "no-store")
        .body(body)
        .map_err(|e| ApiError::from(VaultError::Other(e.into())))
}

/// Stream a burned envelope. The blobs are deleted once the stream is
/// dropped, whether it completed or the client went away.
fn burn_body(state: &AppState, bytes: Bytes, ticket: BurnTicket) -> Body {
    let guard = BurnGuard {
        vault: state.vault.clone(),
        ticket: Some(ticket),
        delay: state.burn_delete_delay,
    };
    let chunks: Vec<Result<Bytes, Infallible>> = (0..bytes.len())
        .step_by(STREAM_CHUNK)
        .map(|start| Ok(bytes.slice(start..(start + STREAM_CHUNK).min(bytes.len()))))
        .collect();

    let stream = futures::stream::iter(chunks).map(move |chunk| {
        let _held = &guard;
        chunk
    });
    Body::from_stream(stream)
}

struct BurnGuard {
    vault: Arc<Vault>,
    ticket: Option<BurnTicket>,
    delay: Duration,
}

impl Drop for BurnGuard {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let vault = self.vault.clone();
                let delay = self.delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    vault.finish_burn(ticket).await;
                });
            }
            // left for the orphan sweep
            Err(_) => tracing::warn!(files = ?ticket.ids(), "no runtime to delete burned blobs"),
        }
    }
}

// ── Metadata and management ───────────────────────────────────────────────

async fn info(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<FileInfo>> {
    Ok(Json(state.vault.info(&id).await?))
}

async fn short_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let file_id = state.vault.resolve_short_code(&code).await?;
    Ok(Json(serde_json::json!({ "fileId": file_id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterTokenBody {
    master_token: String,
}

fn master_token(payload: Result<Json<MasterTokenBody>, JsonRejection>) -> ApiResult<String> {
    payload
        .map(|Json(body)| body.master_token)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

async fn heal_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MasterTokenBody>, JsonRejection>,
) -> ApiResult<Json<HealOutcome>> {
    let token = master_token(payload)?;
    let outcome = state.vault.heal_link(&id, &token).await?;
    state.metrics.heals.inc();
    Ok(Json(outcome))
}

async fn issue_disposable(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<MasterTokenBody>, JsonRejection>,
) -> ApiResult<Json<DisposableGrant>> {
    let token = master_token(payload)?;
    let grant = state.vault.issue_disposable(&id, &token).await?;
    state.metrics.disposable_issued.inc();
    Ok(Json(grant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use zv_core::config::VaultConfig;
    use zv_storage::{build_fs_operator, BlobStore};
    use zv_vault::VaultMetadataStore;

    const BOUNDARY: &str = "zv-test-boundary";

    fn app(dir: &TempDir, config: VaultConfig) -> (Router, Arc<Vault>) {
        let store =
            Arc::new(VaultMetadataStore::open(&dir.path().join("metadata.json")).unwrap());
        let blobs = BlobStore::new(build_fs_operator(dir.path()).unwrap(), "uploads");
        let vault = Arc::new(Vault::new(store, blobs, config));
        let state = AppState {
            vault: vault.clone(),
            metrics: Arc::new(Metrics::new()),
            burn_delete_delay: Duration::ZERO,
        };
        (router(state), vault)
    }

    fn multipart_request(uri: &str, fields: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, data) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                     filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn post_upload(app: &Router, uri: &str, envelope: &[u8]) -> serde_json::Value {
        let resp = app
            .clone()
            .oneshot(multipart_request(uri, &[("file", envelope)]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        json_body(resp).await
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (VaultError::Format("x".into()), StatusCode::BAD_REQUEST),
            (VaultError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (VaultError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (VaultError::Gone("x".into()), StatusCode::GONE),
            (
                VaultError::TooLarge { size: 2, limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (VaultError::Authentication, StatusCode::UNPROCESSABLE_ENTITY),
            (
                VaultError::Storage("disk detail".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }

        let internal = ApiError::from(VaultError::Storage("disk detail".into()));
        assert_eq!(internal.kind, "internal");
        assert!(!internal.message.contains("disk detail"));
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir, VaultConfig::default());
        let envelope = vec![0xA5u8; 200];

        let receipt = post_upload(&app, "/upload?expiry=6h", &envelope).await;
        let id = receipt["filename"].as_str().unwrap().to_string();
        assert!(receipt["masterToken"].is_string());
        assert!(receipt.get("decoyId").is_none());

        let resp = app
            .clone()
            .oneshot(get(&format!("/files/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), envelope.as_slice());

        let info = json_body(
            app.clone()
                .oneshot(get(&format!("/info/{id}")))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(info["downloads"], 1);
        assert_eq!(info["expiryOption"], "6h");
        assert!(info.get("masterToken").is_none());
    }

    #[tokio::test]
    async fn test_burn_download_served_once() {
        let dir = tempfile::tempdir().unwrap();
        let (app, vault) = app(&dir, VaultConfig::default());
        let envelope: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();

        let receipt = post_upload(&app, "/upload?burn=true", &envelope).await;
        let id = receipt["filename"].as_str().unwrap().to_string();

        let resp = app
            .clone()
            .oneshot(get(&format!("/files/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), envelope.as_slice());

        let again = app
            .clone()
            .oneshot(get(&format!("/files/{id}")))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        // blob deletion runs in the background once the body is dropped
        let mut deleted = false;
        for _ in 0..200 {
            if !vault.blobs().exists(&id).await.unwrap() {
                deleted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(deleted, "burned blob still on disk");
    }

    #[tokio::test]
    async fn test_error_bodies() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(
            &dir,
            VaultConfig {
                max_upload_bytes: 64,
                ..Default::default()
            },
        );

        let resp = app.clone().oneshot(get("/info/unknown")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["error"], "not_found");

        let resp = app
            .clone()
            .oneshot(multipart_request("/upload", &[("file", &[1u8; 4][..])]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "format");

        let resp = app
            .clone()
            .oneshot(multipart_request("/upload", &[("file", &[1u8; 100][..])]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(resp).await["error"], "too_large");

        let resp = app
            .clone()
            .oneshot(multipart_request("/upload?expiry=2y", &[("file", &[1u8; 40][..])]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(multipart_request("/upload", &[("other", &[1u8; 40][..])]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app.clone().oneshot(get("/s/NOTHEX!!")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_management_flow() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir, VaultConfig::default());

        let receipt = post_upload(&app, "/upload", &[7u8; 64]).await;
        let id = receipt["filename"].as_str().unwrap().to_string();
        let master = receipt["masterToken"].as_str().unwrap().to_string();

        let resolved = json_body(
            app.clone()
                .oneshot(get(&format!("/s/{}", &id[..8])))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(resolved["fileId"], id.as_str());

        let resp = app
            .clone()
            .oneshot(json_request(
                &format!("/heal-link/{id}"),
                serde_json::json!({ "masterToken": "wrong" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let healed = json_body(
            app.clone()
                .oneshot(json_request(
                    &format!("/heal-link/{id}"),
                    serde_json::json!({ "masterToken": master }),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(healed["linkVersion"], 2);
        let new_master = healed["masterToken"].as_str().unwrap().to_string();

        let grant = json_body(
            app.clone()
                .oneshot(json_request(
                    &format!("/disposable/{id}"),
                    serde_json::json!({ "masterToken": new_master }),
                ))
                .await
                .unwrap(),
        )
        .await;
        let token = grant["token"].as_str().unwrap().to_string();

        let first = app
            .clone()
            .oneshot(get(&format!("/d/{token}")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app
            .clone()
            .oneshot(get(&format!("/d/{token}")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::GONE);
        assert_eq!(json_body(second).await["error"], "gone");
    }

    #[tokio::test]
    async fn test_dual_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(&dir, VaultConfig::default());

        let resp = app
            .clone()
            .oneshot(multipart_request(
                "/upload/dual?burn=1",
                &[("file", &[1u8; 48][..]), ("decoy", &[2u8; 40][..])],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let receipt = json_body(resp).await;
        let decoy_id = receipt["decoyId"].as_str().unwrap().to_string();

        let resp = app
            .clone()
            .oneshot(get(&format!("/files/{decoy_id}")))
            .await
            .unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), &[2u8; 40]);

        let primary = receipt["filename"].as_str().unwrap();
        let resp = app
            .clone()
            .oneshot(get(&format!("/info/{primary}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
