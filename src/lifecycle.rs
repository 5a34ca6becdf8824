//! Recording and clearing processing failures on stored calls.

use crate::error::StorageError;
use crate::store::RecordStore;
use crate::types::{CallStatus, ExceptionRecord, WebhookCall};

/// Record `err` as the call's exception, replacing any earlier one.
pub fn annotate_exception(
    records: &mut dyn RecordStore,
    call: &WebhookCall,
    err: &(dyn std::error::Error + 'static),
) -> Result<WebhookCall, StorageError> {
    save_exception(records, call, ExceptionRecord::from_error(err))
}

pub fn save_exception(
    records: &mut dyn RecordStore,
    call: &WebhookCall,
    exception: ExceptionRecord,
) -> Result<WebhookCall, StorageError> {
    tracing::warn!(id = %call.id(), message = %exception.message, "recording webhook processing failure");
    records.update_status(
        call.id(),
        CallStatus {
            exception: Some(exception),
        },
    )
}

/// Clear the call's exception. Persists even when there was none.
pub fn clear_exception(
    records: &mut dyn RecordStore,
    call: &WebhookCall,
) -> Result<WebhookCall, StorageError> {
    records.update_status(call.id(), CallStatus::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileRecordStore;
    use crate::types::{CapturedRequest, Payload};

    #[derive(Debug, thiserror::Error)]
    #[error("handler failed")]
    struct HandlerFailed(#[source] std::io::Error);

    fn setup() -> (tempfile::TempDir, FileRecordStore, WebhookCall) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileRecordStore::new(dir.path().to_path_buf());
        let call = store
            .create(CapturedRequest::new(
                "default".into(),
                "https://example.com".into(),
                Default::default(),
                Payload::default(),
            ))
            .unwrap();
        (dir, store, call)
    }

    #[test]
    fn annotate_records_message_and_cause() {
        let (_dir, mut store, call) = setup();
        let err = HandlerFailed(std::io::Error::other("timeout"));

        let updated = annotate_exception(&mut store, &call, &err).unwrap();

        let exception = updated.exception().unwrap();
        assert_eq!(exception.message, "handler failed");
        assert_eq!(exception.trace, "caused by: timeout");
        assert_eq!(store.get(call.id()).unwrap().exception(), Some(exception));
    }

    #[test]
    fn annotate_overwrites_previous_exception() {
        let (_dir, mut store, call) = setup();
        save_exception(&mut store, &call, ExceptionRecord::new(1, "first", "")).unwrap();
        let updated = save_exception(&mut store, &call, ExceptionRecord::new(2, "second", "")).unwrap();
        assert_eq!(updated.exception().unwrap().code, 2);
    }

    #[test]
    fn clear_after_annotate_leaves_no_exception() {
        let (_dir, mut store, call) = setup();
        let err = HandlerFailed(std::io::Error::other("timeout"));
        annotate_exception(&mut store, &call, &err).unwrap();

        let cleared = clear_exception(&mut store, &call).unwrap();
        assert!(cleared.exception().is_none());

        // Clearing again is harmless.
        let cleared = clear_exception(&mut store, &cleared).unwrap();
        assert!(cleared.exception().is_none());
        assert_eq!(cleared.payload(), call.payload());
    }
}
