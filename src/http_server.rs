use crate::attachments::{add_part, UploadedFile};
use crate::blob::FsBlobStore;
use crate::capture::{commit, prepare, InboundRequest};
use crate::config::ClientConfig;
use crate::error::CaptureError;
use crate::headers::HeaderBag;
use crate::store::FileRecordStore;
use axum::{
    body::Bytes,
    extract::{multipart::Field, DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Form, Json, Router,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

type Rejection = (StatusCode, String);

#[derive(Clone)]
pub struct ServerState {
    config: Arc<ClientConfig>,
    records: Arc<RwLock<FileRecordStore>>,
    blobs: Arc<FsBlobStore>,
}

impl ServerState {
    pub fn new(config: ClientConfig, records: FileRecordStore, blobs: FsBlobStore) -> Self {
        Self {
            config: Arc::new(config),
            records: Arc::new(RwLock::new(records)),
            blobs: Arc::new(blobs),
        }
    }

    pub fn records(&self) -> Arc<RwLock<FileRecordStore>> {
        self.records.clone()
    }
}

/// Request bodies are not size-limited here; uploads are streamed to disk
/// and only the blob store bounds them.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/webhooks/{profile}", post(handle_webhook))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Bind to `config.listen` and serve until ctrl-c.
pub async fn serve(state: ServerState) -> std::io::Result<()> {
    let listener = TcpListener::bind(&state.config.listen).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, profiles = state.config.profiles.len(), "webhook receiver listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

async fn handle_webhook(
    Path(profile): Path<String>,
    State(state): State<ServerState>,
    request: Request,
) -> Response {
    let config = match state.config.profile(&profile) {
        Ok(c) => c.clone(),
        Err(_) => {
            tracing::debug!(%profile, "webhook for unknown profile");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let inbound = match read_request(request).await {
        Ok(r) => r,
        Err((status, msg)) => {
            tracing::debug!(%profile, %status, error = %msg, "unreadable webhook request");
            return (status, msg).into_response();
        }
    };

    // Blob writes run without the store lock; only the insert is serialized.
    let records = state.records.clone();
    let blobs = state.blobs.clone();
    let captured = tokio::task::spawn_blocking(move || -> Result<_, CaptureError> {
        let prepared = prepare(&config, &inbound, blobs.as_ref())?;
        let mut records = records.blocking_write();
        commit(&mut *records, prepared)
    })
    .await;

    match captured {
        Ok(Ok(call)) => Json(serde_json::json!({ "id": call.id() })).into_response(),
        Ok(Err(e)) => {
            tracing::error!(%profile, error = %e, "failed to capture webhook");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            tracing::error!(%profile, error = %e, "capture task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn bad_request(msg: impl Into<String>) -> Rejection {
    (StatusCode::BAD_REQUEST, msg.into())
}

/// Collect URL, headers, body fields and file parts from an axum request.
///
/// Query parameters and body fields are merged with the body taking
/// precedence on a shared key.
async fn read_request(request: Request) -> Result<InboundRequest, Rejection> {
    let full_url = full_url(request.headers(), request.uri());
    let headers = header_bag(request.headers());

    let mut fields = Map::new();
    if let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
        for (key, value) in pairs {
            insert_field(&mut fields, key, Value::String(value));
        }
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut inbound = InboundRequest {
        full_url,
        headers,
        ..Default::default()
    };

    let mut body_fields = Map::new();
    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(original_name) => {
                    let mime_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let (path, size) = spool(field).await?;
                    add_part(
                        &mut inbound.files,
                        name,
                        UploadedFile::spooled(original_name, mime_type, path, size),
                    );
                }
                None => {
                    let text = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                    insert_field(&mut body_fields, name, Value::String(text));
                }
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        for (key, value) in pairs {
            insert_field(&mut body_fields, key, Value::String(value));
        }
    } else {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        if !body.is_empty() {
            match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(object)) => body_fields = object,
                Ok(_) => return Err(bad_request("JSON body must be an object")),
                Err(e) => return Err(bad_request(format!("invalid JSON body: {e}"))),
            }
        }
    }

    fields.extend(body_fields);
    inbound.fields = fields;
    Ok(inbound)
}

/// Stream a file part to a temporary file, chunk by chunk.
async fn spool(mut field: Field<'_>) -> Result<(TempPath, u64), Rejection> {
    let spool_err = |e: std::io::Error| {
        tracing::error!(error = %e, "failed to spool upload");
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to spool upload".to_string())
    };

    let (file, path) = NamedTempFile::new().map_err(spool_err)?.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(|e| bad_request(e.body_text()))? {
        file.write_all(&chunk).await.map_err(spool_err)?;
        size += chunk.len() as u64;
    }
    file.flush().await.map_err(spool_err)?;
    Ok((path, size))
}

fn full_url(headers: &HeaderMap, uri: &Uri) -> String {
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{scheme}://{host}{path}")
}

fn header_bag(headers: &HeaderMap) -> HeaderBag {
    headers
        .iter()
        .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect()
}

// Repeated keys from one source collect into an array, in order.
fn insert_field(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}
