use crate::attachments::{self, UploadedParts};
use crate::blob::BlobStore;
use crate::config::WebhookConfig;
use crate::error::CaptureError;
use crate::headers::{self, HeaderBag};
use crate::store::RecordStore;
use crate::types::{CapturedRequest, Payload, WebhookCall};
use serde_json::{Map, Value};

/// An inbound webhook request, already accepted by the caller.
#[derive(Debug, Default)]
pub struct InboundRequest {
    pub full_url: String,
    pub headers: HeaderBag,
    pub fields: Map<String, Value>,
    pub files: UploadedParts,
}

/// Turn `request` into a stored webhook call for the `config` profile.
///
/// Either the returned call is fully persisted or nothing is: attachment
/// and store failures are handed back to the caller without retrying.
pub fn capture(
    config: &WebhookConfig,
    request: &InboundRequest,
    records: &mut dyn RecordStore,
    blobs: &dyn BlobStore,
) -> Result<WebhookCall, CaptureError> {
    let captured = prepare(config, request, blobs)?;
    commit(records, captured)
}

/// Select headers and store attachments, without touching the record store.
///
/// Lets a server write blobs for concurrent requests in parallel and only
/// serialize the final insert.
pub fn prepare(
    config: &WebhookConfig,
    request: &InboundRequest,
    blobs: &dyn BlobStore,
) -> Result<CapturedRequest, CaptureError> {
    let headers = headers::select(&config.store_headers, &request.headers);

    let mut payload = Payload::new(request.fields.clone());
    if !request.files.is_empty() {
        let stored = attachments::extract(blobs, &request.files).map_err(CaptureError::Attachments)?;
        payload = payload.with_attachments(stored);
    }

    Ok(CapturedRequest::new(config.name.clone(), request.full_url.clone(), headers, payload))
}

/// Create the record for a prepared capture.
pub fn commit(records: &mut dyn RecordStore, captured: CapturedRequest) -> Result<WebhookCall, CaptureError> {
    let call = records.create(captured).map_err(CaptureError::Create)?;

    tracing::info!(
        id = %call.id(),
        profile = %call.name(),
        attachments = call.payload().attachment_count(),
        "captured webhook call"
    );
    Ok(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::{add_part, UploadedFile};
    use crate::blob::FsBlobStore;
    use crate::headers::HeaderPolicy;
    use crate::store::FileRecordStore;
    use serde_json::json;

    fn config(policy: HeaderPolicy) -> WebhookConfig {
        WebhookConfig {
            name: "default".into(),
            store_headers: policy,
        }
    }

    #[test]
    fn captures_selected_headers_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = FileRecordStore::new(dir.path().join("data"));
        let blobs = FsBlobStore::new(dir.path().join("blobs"));
        let request = InboundRequest {
            full_url: "https://example.com/webhooks/default?x=1".into(),
            headers: [("X-Sig", "abc"), ("Content-Type", "json")].into_iter().collect(),
            fields: json!({"event": "ping"}).as_object().cloned().unwrap(),
            files: UploadedParts::new(),
        };

        let call = capture(&config(HeaderPolicy::Only(vec!["x-sig".into()])), &request, &mut records, &blobs).unwrap();

        assert_eq!(call.name(), "default");
        assert_eq!(call.url(), "https://example.com/webhooks/default?x=1");
        assert_eq!(call.headers(), &[("X-Sig", "abc")].into_iter().collect::<HeaderBag>());
        assert_eq!(Value::Object(call.payload().fields.clone()), json!({"event": "ping"}));
        assert!(call.payload().attachments.is_none());
        assert!(call.exception().is_none());
        assert_eq!(records.get(call.id()), Some(&call));
        assert!(!dir.path().join("blobs").exists());
    }

    #[test]
    fn prepare_stores_blobs_and_commit_creates_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = FileRecordStore::new(dir.path().join("data"));
        let blobs = FsBlobStore::new(dir.path().join("blobs"));
        let mut request = InboundRequest::default();
        add_part(&mut request.files, "doc", UploadedFile::new("a.txt", "text/plain", b"abc".to_vec()));

        let captured = prepare(&config(HeaderPolicy::All), &request, &blobs).unwrap();
        assert!(records.is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("blobs/webhooks")).unwrap().count(), 1);

        let call = commit(&mut records, captured).unwrap();
        assert_eq!(call.payload().attachment_count(), 1);
        assert_eq!(records.get(call.id()), Some(&call));
    }

    #[test]
    fn blob_failure_creates_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = FileRecordStore::new(dir.path().join("data"));
        let blob_root = dir.path().join("blobs");
        std::fs::create_dir_all(&blob_root).unwrap();
        std::fs::write(blob_root.join("webhooks"), b"").unwrap();
        let blobs = FsBlobStore::new(blob_root);

        let mut request = InboundRequest::default();
        add_part(&mut request.files, "doc", UploadedFile::new("a.txt", "text/plain", b"a".to_vec()));

        let err = capture(&config(HeaderPolicy::All), &request, &mut records, &blobs).unwrap_err();
        assert!(matches!(err, CaptureError::Attachments(_)));
        assert!(records.is_empty());
    }
}
