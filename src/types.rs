use crate::headers::HeaderBag;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Captured attachments keyed by the form field they were uploaded under.
pub type Attachments = IndexMap<String, Vec<AttachmentMetadata>>;

/// Describes a stored upload. The file contents live in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub original_name: String,
    pub storage_path: String,
    pub mime_type: String,
    pub size: u64,
}

/// Request body fields plus any attachments stored alongside them.
///
/// Stored as `{"fields": {..}, "attachments": {..}}`, with `attachments`
/// present only when files were captured. Keeping the two apart means a
/// body field named `attachments` reads back exactly as it was received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Attachments>,
}

const ATTACHMENTS_KEY: &str = "attachments";

impl Payload {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            attachments: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Attachments) -> Self {
        self.attachments = Some(attachments);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments
            .as_ref()
            .map(|a| a.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Body fields and attachments as one object, the shape handlers
    /// usually expect. Captured attachments shadow a body field of the
    /// same name.
    pub fn to_object(&self) -> Map<String, Value> {
        let mut object = self.fields.clone();
        if let Some(attachments) = &self.attachments {
            let value = serde_json::to_value(attachments).unwrap_or(Value::Null);
            object.insert(ATTACHMENTS_KEY.to_string(), value);
        }
        object
    }
}

/// The last processing failure recorded against a webhook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub code: i64,
    pub message: String,
    pub trace: String,
}

impl ExceptionRecord {
    pub fn new(code: i64, message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// Build a record from an error and its `source()` chain.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut cause = err.source();
        while let Some(e) = cause {
            trace.push(format!("caused by: {e}"));
            cause = e.source();
        }
        Self::new(0, err.to_string(), trace.join("\n"))
    }
}

/// What was received. Written once when the call is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    name: String,
    url: String,
    headers: HeaderBag,
    payload: Payload,
}

impl CapturedRequest {
    pub fn new(name: String, url: String, headers: HeaderBag, payload: Payload) -> Self {
        Self {
            name,
            url,
            headers,
            payload,
        }
    }
}

/// Processing state. The only part of a call that changes after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStatus {
    pub exception: Option<ExceptionRecord>,
}

/// One stored inbound webhook request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookCall {
    pub(crate) id: String,
    #[serde(flatten)]
    pub(crate) request: CapturedRequest,
    #[serde(flatten)]
    pub(crate) status: CallStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl WebhookCall {
    pub(crate) fn new(id: String, request: CapturedRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            status: CallStatus::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.request.name
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn headers(&self) -> &HeaderBag {
        &self.request.headers
    }

    pub fn payload(&self) -> &Payload {
        &self.request.payload
    }

    pub fn exception(&self) -> Option<&ExceptionRecord> {
        self.status.exception.as_ref()
    }

    pub fn status(&self) -> &CallStatus {
        &self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
