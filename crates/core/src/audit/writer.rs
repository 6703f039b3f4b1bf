use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Background task that drains the audit channel into a store
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Run until every [`AuditHandle`] has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        while let Some(envelope) = self.rx.recv().await {
            let record = AuditRecord {
                id: 0,
                timestamp: envelope.timestamp,
                event_type: envelope.event.event_type().to_string(),
                application_id: envelope.event.application_id().map(String::from),
                data: envelope.event,
            };

            if let Err(e) = self.store.append(&record) {
                tracing::error!("Failed to write audit event: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Create the audit channel.
///
/// Spawn the returned writer with `tokio::spawn(writer.run())` and clone the
/// handle into every component that emits events.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::audit::{AuditError, AuditEvent, AuditFilter, AuditPage};

    struct MockStore {
        records: Mutex<Vec<AuditRecord>>,
        should_fail: bool,
    }

    impl MockStore {
        fn new(should_fail: bool) -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                should_fail,
            }
        }

        fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditStore for MockStore {
        fn append(&self, record: &AuditRecord) -> Result<i64, AuditError> {
            if self.should_fail {
                return Err(AuditError::Database("Mock failure".to_string()));
            }
            let mut records = self.records.lock().unwrap();
            let id = records.len() as i64 + 1;
            let mut stored = record.clone();
            stored.id = id;
            records.push(stored);
            Ok(id)
        }

        fn page(
            &self,
            _filter: &AuditFilter,
            _page: AuditPage,
        ) -> Result<Vec<AuditRecord>, AuditError> {
            Ok(self.records())
        }

        fn count(&self, _filter: &AuditFilter) -> Result<i64, AuditError> {
            Ok(self.records.lock().unwrap().len() as i64)
        }
    }

    #[tokio::test]
    async fn test_writer_stores_events_in_order() {
        let store = Arc::new(MockStore::new(false));
        let (handle, writer) = create_audit_system(Arc::clone(&store) as Arc<dyn AuditStore>, 10);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStarted {
                version: "0.1.0".to_string(),
                config_hash: "abc".to_string(),
            })
            .await;
        handle
            .emit(AuditEvent::StatusChanged {
                application_id: "app-1".to_string(),
                from_status: "queued".to_string(),
                to_status: "enriching".to_string(),
                revision: 2,
            })
            .await;
        drop(handle);
        writer_task.await.unwrap();

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event_type, "service_started");
        assert_eq!(records[0].application_id, None);
        assert_eq!(records[1].event_type, "status_changed");
        assert_eq!(records[1].application_id.as_deref(), Some("app-1"));
    }

    #[tokio::test]
    async fn test_writer_continues_on_insert_failure() {
        let store = Arc::new(MockStore::new(true));
        let (handle, writer) = create_audit_system(Arc::clone(&store) as Arc<dyn AuditStore>, 10);
        let writer_task = tokio::spawn(writer.run());

        handle
            .emit(AuditEvent::ServiceStopped {
                reason: "test".to_string(),
            })
            .await;
        drop(handle);

        writer_task.await.unwrap();
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_writer_waits_for_all_handles() {
        let store = Arc::new(MockStore::new(false));
        let (main_handle, writer) =
            create_audit_system(Arc::clone(&store) as Arc<dyn AuditStore>, 10);
        let sweeper_handle = main_handle.clone();
        let writer_task = tokio::spawn(writer.run());

        main_handle
            .emit(AuditEvent::ServiceStopped {
                reason: "graceful_shutdown".to_string(),
            })
            .await;
        drop(main_handle);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!writer_task.is_finished());

        drop(sweeper_handle);
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), writer_task).await;
        assert!(result.is_ok());
        assert_eq!(store.records().len(), 1);
    }
}
