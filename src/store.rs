use crate::error::StorageError;
use crate::types::{CallStatus, CapturedRequest, WebhookCall};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::path::PathBuf;
use uuid::Uuid;

const CALLS_FILE: &str = "webhook_calls.json";

/// Persistence for webhook calls.
///
/// Captured request data is only ever written by `create`; afterwards a
/// call can change through `update_status` alone.
pub trait RecordStore {
    fn create(&mut self, request: CapturedRequest) -> Result<WebhookCall, StorageError>;

    fn get(&self, id: &str) -> Option<&WebhookCall>;

    fn list(&self) -> Vec<&WebhookCall>;

    fn update_status(&mut self, id: &str, status: CallStatus) -> Result<WebhookCall, StorageError>;

    fn delete(&mut self, id: &str) -> Result<bool, StorageError>;

    /// Remove every call created strictly before `cutoff`.
    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// Keeps calls in memory and mirrors them to a JSON file in `data_dir`.
pub struct FileRecordStore {
    calls: IndexMap<String, WebhookCall>,
    data_dir: PathBuf,
}

impl FileRecordStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            calls: IndexMap::new(),
            data_dir,
        }
    }

    /// Open a store, reading previously saved calls if there are any.
    pub fn open(data_dir: PathBuf) -> Result<Self, StorageError> {
        let mut store = Self::new(data_dir);
        store.load()?;
        Ok(store)
    }

    pub fn load(&mut self) -> Result<(), StorageError> {
        let path = self.data_dir.join(CALLS_FILE);
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)?;
        let items: Vec<WebhookCall> = serde_json::from_str(&content)?;
        self.calls = items.into_iter().map(|c| (c.id.clone(), c)).collect();
        tracing::debug!(count = self.calls.len(), "loaded webhook calls");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Write all calls to disk. The file is replaced atomically, so a failed
    /// save leaves the previous contents in place.
    fn save(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.data_dir)?;
        let items: Vec<&WebhookCall> = self.calls.values().collect();
        let content = serde_json::to_string_pretty(&items)?;

        let tmp = self.data_dir.join(format!("{CALLS_FILE}.tmp"));
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, self.data_dir.join(CALLS_FILE))?;
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    fn create(&mut self, request: CapturedRequest) -> Result<WebhookCall, StorageError> {
        let call = WebhookCall::new(Uuid::new_v4().to_string(), request, Utc::now());
        let id = call.id.clone();
        self.calls.insert(id.clone(), call.clone());

        if let Err(e) = self.save() {
            self.calls.shift_remove(&id);
            return Err(e);
        }
        Ok(call)
    }

    fn get(&self, id: &str) -> Option<&WebhookCall> {
        self.calls.get(id)
    }

    fn list(&self) -> Vec<&WebhookCall> {
        let mut items: Vec<&WebhookCall> = self.calls.values().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        items
    }

    fn update_status(&mut self, id: &str, status: CallStatus) -> Result<WebhookCall, StorageError> {
        let call = self
            .calls
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let previous = (std::mem::replace(&mut call.status, status), call.updated_at);
        call.updated_at = Utc::now();
        let updated = call.clone();

        if let Err(e) = self.save() {
            if let Some(call) = self.calls.get_mut(id) {
                (call.status, call.updated_at) = previous;
            }
            return Err(e);
        }
        Ok(updated)
    }

    fn delete(&mut self, id: &str) -> Result<bool, StorageError> {
        let Some(index) = self.calls.get_index_of(id) else {
            return Ok(false);
        };
        let removed = self.calls.shift_remove_index(index);
        if let Err(e) = self.save() {
            if let Some((key, call)) = removed {
                self.calls.shift_insert(index, key, call);
            }
            return Err(e);
        }
        Ok(true)
    }

    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let before = self.calls.clone();
        self.calls.retain(|_, call| call.created_at >= cutoff);
        let removed = before.len() - self.calls.len();
        if removed == 0 {
            return Ok(0);
        }

        if let Err(e) = self.save() {
            self.calls = before;
            return Err(e);
        }
        Ok(removed)
    }
}
