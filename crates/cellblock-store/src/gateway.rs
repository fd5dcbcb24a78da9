//! Single-writer storage gateway
//!
//! All durable I/O runs on one dedicated worker thread fed by a FIFO queue.
//! Callers get a [`Pending`] future back immediately; two writes to the same
//! record therefore always apply in submission order.

use cellblock_util::{JailName, SubjectId};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::{
    jails_from_document, jails_to_document, JailRecord, MigrationContext, PrisonerRecord,
    RecordStore, SchemaMigrator, StoreError, StoreResult,
};

/// Default time `close` waits for queued work
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

const WORKER_NAME: &str = "cellblock-storage";

type Job = Box<dyn FnOnce(&dyn RecordStore) + Send>;

/// Result of a queued storage operation
#[must_use = "dropping a Pending does not cancel the operation, but its result is lost"]
pub struct Pending<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
}

impl<T> Pending<T> {
    fn failed(err: StoreError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl<T> Future for Pending<T> {
    type Output = StoreResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The job was dropped without running
            Poll::Ready(Err(_)) => Poll::Ready(Err(StoreError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Inner {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancelled: Arc<AtomicBool>,
    prisoners: Arc<SchemaMigrator>,
    jails: Arc<SchemaMigrator>,
}

/// Handle to the storage worker; cheap to clone
#[derive(Clone)]
pub struct StorageGateway {
    inner: Arc<Inner>,
}

impl StorageGateway {
    /// Start the worker thread over `store`
    pub fn start(store: Box<dyn RecordStore>, context: MigrationContext) -> StoreResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();

        let worker = std::thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                for job in receiver {
                    job(store.as_ref());
                }
                debug!("Storage worker drained");
            })?;

        info!("Storage gateway started");

        Ok(Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                worker: Mutex::new(Some(worker)),
                cancelled: Arc::new(AtomicBool::new(false)),
                prisoners: Arc::new(SchemaMigrator::for_prisoners(context.clone())),
                jails: Arc::new(SchemaMigrator::for_jails(context)),
            }),
        })
    }

    fn submit<T, F>(&self, op: &'static str, f: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RecordStore) -> StoreResult<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let cancelled = self.inner.cancelled.clone();

        let job: Job = Box::new(move |store| {
            if cancelled.load(Ordering::SeqCst) {
                debug!(op, "Skipping cancelled storage job");
                let _ = tx.send(Err(StoreError::Cancelled));
                return;
            }
            let _ = tx.send(f(store));
        });

        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let queued = match sender.as_ref() {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };

        if queued {
            Pending { rx }
        } else {
            warn!(op, "Storage gateway is closed; rejecting operation");
            Pending::failed(StoreError::Closed)
        }
    }

    /// Insert or replace one prisoner
    pub fn save_prisoner(&self, record: &PrisonerRecord) -> Pending<()> {
        let id = record.uuid;
        let document = record.to_document();
        self.submit("save_prisoner", move |store| store.put_prisoner(&id, &document))
    }

    /// Write many prisoners, continuing past individual failures
    pub fn save_prisoners(&self, records: &[PrisonerRecord]) -> Pending<()> {
        let batch: Vec<_> = records
            .iter()
            .map(|r| (r.uuid, r.to_document()))
            .collect();

        self.submit("save_prisoners", move |store| {
            let total = batch.len();
            let failed: Vec<String> = batch
                .iter()
                .filter_map(|(id, document)| match store.put_prisoner(id, document) {
                    Ok(()) => None,
                    Err(e) => {
                        error!(subject = %id, error = %e, "Failed to save prisoner");
                        Some(id.to_string())
                    }
                })
                .collect();

            if failed.is_empty() {
                Ok(())
            } else {
                Err(StoreError::Partial { failed, total })
            }
        })
    }

    pub fn delete_prisoner(&self, id: SubjectId) -> Pending<()> {
        self.submit("delete_prisoner", move |store| store.delete_prisoner(&id))
    }

    /// Load every prisoner, migrating old documents and rewriting them
    pub fn load_prisoners(&self) -> Pending<Vec<PrisonerRecord>> {
        let migrator = self.inner.prisoners.clone();

        self.submit("load_prisoners", move |store| {
            let mut records = Vec::new();

            for stored in store.prisoner_documents()? {
                let migrated = migrator.migrate(&stored.key, stored.document);

                let record = match PrisonerRecord::from_document(&stored.key, &migrated.document) {
                    Ok(record) => record,
                    Err(e) => {
                        error!(record = %stored.key, error = %e, "Skipping unusable prisoner record");
                        continue;
                    }
                };

                if migrated.upgraded
                    && let Err(e) = store.put_prisoner(&record.uuid, &migrated.document)
                {
                    error!(subject = %record.uuid, error = %e, "Failed to rewrite migrated prisoner");
                }

                records.push(record);
            }

            debug!(count = records.len(), "Prisoners loaded");
            Ok(records)
        })
    }

    /// Insert a jail or replace the one with the same name
    pub fn save_jail(&self, record: &JailRecord) -> Pending<()> {
        let record = record.clone();
        let migrator = self.inner.jails.clone();

        self.submit("save_jail", move |store| {
            let mut jails = read_jails(store, &migrator)?;
            match jails.iter_mut().find(|j| j.name == record.name) {
                Some(existing) => *existing = record,
                None => jails.push(record),
            }
            store.put_jails(&jails_to_document(&jails))
        })
    }

    /// Replace the whole jail list
    pub fn save_jails(&self, records: &[JailRecord]) -> Pending<()> {
        let document = jails_to_document(records);
        self.submit("save_jails", move |store| store.put_jails(&document))
    }

    /// Remove a jail by name; returns whether it existed
    pub fn delete_jail(&self, name: JailName) -> Pending<bool> {
        let migrator = self.inner.jails.clone();

        self.submit("delete_jail", move |store| {
            let mut jails = read_jails(store, &migrator)?;
            let before = jails.len();
            jails.retain(|j| j.name != name);
            if jails.len() == before {
                return Ok(false);
            }
            store.put_jails(&jails_to_document(&jails))?;
            Ok(true)
        })
    }

    /// Load every jail, migrating and rewriting an old document
    pub fn load_jails(&self) -> Pending<Vec<JailRecord>> {
        let migrator = self.inner.jails.clone();
        self.submit("load_jails", move |store| read_jails(store, &migrator))
    }

    /// Resolves once everything queued before it has run
    pub fn flush(&self) -> Pending<()> {
        self.submit("flush", |_| Ok(()))
    }

    /// Stop accepting work and wait up to `timeout` for the queue to drain.
    ///
    /// Work still queued after the timeout resolves to
    /// [`StoreError::Cancelled`]. Returns whether the queue drained in time.
    pub async fn close(&self, timeout: Duration) -> bool {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return true;
        };

        let join = tokio::task::spawn_blocking(move || worker.join());
        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(Ok(()))) => {
                info!("Storage gateway closed");
                true
            }
            Ok(_) => {
                error!("Storage worker panicked");
                false
            }
            Err(_) => {
                self.inner.cancelled.store(true, Ordering::SeqCst);
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Storage queue did not drain in time; cancelling remaining work"
                );
                false
            }
        }
    }
}

fn read_jails(store: &dyn RecordStore, migrator: &SchemaMigrator) -> StoreResult<Vec<JailRecord>> {
    let Some(document) = store.jails_document()? else {
        return Ok(Vec::new());
    };

    let migrated = migrator.migrate("jails", document);
    if migrated.upgraded
        && let Err(e) = store.put_jails(&migrated.document)
    {
        error!(error = %e, "Failed to rewrite migrated jail list");
    }

    Ok(jails_from_document(&migrated.document))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Document, SqliteStore, StoredDocument};
    use cellblock_api::Location;
    use serde_json::json;
    use std::sync::Condvar;

    fn gateway() -> StorageGateway {
        let store = SqliteStore::in_memory().unwrap();
        StorageGateway::start(Box::new(store), MigrationContext::default()).unwrap()
    }

    fn prisoner(seconds_left: u64) -> PrisonerRecord {
        PrisonerRecord {
            uuid: SubjectId::new(),
            name: Some("Steve".into()),
            jail: JailName::new("max"),
            jailed_by: None,
            seconds_left,
            total_sentence_time: seconds_left,
            reason: None,
            last_location: None,
            group: None,
            extra_groups: vec![],
        }
    }

    fn jail(name: &str, x: f64) -> JailRecord {
        JailRecord {
            name: JailName::new(name),
            location: Location::new("world", x, 64.0, 0.0),
            release_location: None,
        }
    }

    #[tokio::test]
    async fn test_writes_apply_in_order() {
        let gw = gateway();
        let first = prisoner(100);
        let mut second = first.clone();
        second.seconds_left = 40;

        let w1 = gw.save_prisoner(&first);
        let w2 = gw.save_prisoner(&second);
        w2.await.unwrap();
        w1.await.unwrap();

        let loaded = gw.load_prisoners().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].seconds_left, 40);
    }

    #[tokio::test]
    async fn test_save_prisoners_copies_batch() {
        let gw = gateway();
        let mut batch = vec![prisoner(10), prisoner(20)];
        let pending = gw.save_prisoners(&batch);
        batch.clear();
        pending.await.unwrap();

        assert_eq!(gw.load_prisoners().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_prisoner() {
        let gw = gateway();
        let record = prisoner(10);
        gw.save_prisoner(&record).await.unwrap();
        gw.delete_prisoner(record.uuid).await.unwrap();
        assert!(gw.load_prisoners().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jail_list_operations() {
        let gw = gateway();
        gw.save_jail(&jail("Max", 0.0)).await.unwrap();
        gw.save_jail(&jail("min", 5.0)).await.unwrap();
        gw.save_jail(&jail("MAX", 10.0)).await.unwrap();

        let jails = gw.load_jails().await.unwrap();
        assert_eq!(jails.len(), 2);
        assert_eq!(jails[0].location.x, 10.0);

        assert!(gw.delete_jail(JailName::new("min")).await.unwrap());
        assert!(!gw.delete_jail(JailName::new("min")).await.unwrap());

        gw.save_jails(&[jail("solitary", 1.0)]).await.unwrap();
        let names: Vec<_> = gw
            .load_jails()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec![JailName::new("solitary")]);
    }

    #[tokio::test]
    async fn test_legacy_prisoner_rewritten_on_load() {
        let store = SqliteStore::in_memory().unwrap();
        let id = SubjectId::new();
        let legacy = json!({"jail": "max", "secondsleft": 30, "lastlocation": null});
        let Some(legacy) = legacy.as_object().cloned() else {
            panic!("expected an object");
        };
        store.put_prisoner(&id, &legacy).unwrap();

        let gw = StorageGateway::start(Box::new(store), MigrationContext::default()).unwrap();
        let loaded = gw.load_prisoners().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uuid, id);
        assert_eq!(loaded[0].seconds_left, 30);

        // Second load sees the rewritten document
        let loaded_again = gw.load_prisoners().await.unwrap();
        assert_eq!(loaded_again, loaded);
    }

    #[tokio::test]
    async fn test_rejects_after_close() {
        let gw = gateway();
        gw.save_prisoner(&prisoner(5)).await.unwrap();
        assert!(gw.close(Duration::from_secs(5)).await);

        let result = gw.save_prisoner(&prisoner(5)).await;
        assert!(matches!(result, Err(StoreError::Closed)));
    }

    /// A store whose writes block until released
    struct GatedStore {
        gate: Arc<(Mutex<bool>, Condvar)>,
        fail: bool,
    }

    impl GatedStore {
        fn wait(&self) {
            let (lock, cvar) = &*self.gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
        }
    }

    impl RecordStore for GatedStore {
        fn put_prisoner(&self, _: &SubjectId, _: &Document) -> StoreResult<()> {
            self.wait();
            if self.fail {
                Err(StoreError::Database("disk full".into()))
            } else {
                Ok(())
            }
        }
        fn delete_prisoner(&self, _: &SubjectId) -> StoreResult<()> {
            Ok(())
        }
        fn prisoner_documents(&self) -> StoreResult<Vec<StoredDocument>> {
            Ok(vec![])
        }
        fn put_jails(&self, _: &Document) -> StoreResult<()> {
            Ok(())
        }
        fn jails_document(&self) -> StoreResult<Option<Document>> {
            Ok(None)
        }
        fn is_healthy(&self) -> bool {
            true
        }
    }

    fn open_gate(gate: &Arc<(Mutex<bool>, Condvar)>) {
        let (lock, cvar) = &**gate;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_times_out_and_cancels() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let store = GatedStore {
            gate: gate.clone(),
            fail: false,
        };
        let gw = StorageGateway::start(Box::new(store), MigrationContext::default()).unwrap();

        let blocked = gw.save_prisoner(&prisoner(1));
        let queued = gw.save_prisoner(&prisoner(2));

        assert!(!gw.close(Duration::from_millis(50)).await);
        open_gate(&gate);

        assert!(blocked.await.is_ok());
        assert!(matches!(queued.await, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_batch_reports_failures() {
        let gate = Arc::new((Mutex::new(true), Condvar::new()));
        let store = GatedStore { gate, fail: true };
        let gw = StorageGateway::start(Box::new(store), MigrationContext::default()).unwrap();

        let result = gw.save_prisoners(&[prisoner(1), prisoner(2)]).await;
        assert!(matches!(
            result,
            Err(StoreError::Partial { ref failed, total: 2 }) if failed.len() == 2
        ));
    }
}
