//! Loop consumidor de jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::queue::{Delivery, JobSource, Received};
use crate::types::config::QueueConfig;
use crate::{CacheFieldError, CacheFieldResult};

use super::{DispatchOutcome, Dispatcher};

/// Parâmetros do worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Jobs processados em paralelo.
    pub concurrency: usize,

    /// Tentativas antes de descartar um job.
    pub max_attempts: u32,

    /// Espera antes de devolver um job falho à fila (multiplicada pela tentativa).
    pub retry_backoff: Duration,

    /// Intervalo entre consultas quando a fonte está vazia.
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for WorkerOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Contadores de uma execução do worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Entregas processadas (inclui tentativas que falharam).
    pub processed: usize,
    pub reconciled: usize,
    pub vanished: usize,
    /// Entregas que falharam e voltaram para a fila.
    pub retried: usize,
    /// Jobs descartados após esgotar as tentativas.
    pub dropped: usize,
}

impl WorkerReport {
    fn record(&mut self, joined: Result<Processed, JoinError>) {
        self.processed += 1;
        match joined {
            Ok(Processed::Reconciled) => self.reconciled += 1,
            Ok(Processed::Vanished) => self.vanished += 1,
            Ok(Processed::Retried) => self.retried += 1,
            Ok(Processed::Dropped) => self.dropped += 1,
            Err(e) => {
                tracing::error!(error = %e, "Recalculation task panicked");
                self.dropped += 1;
            }
        }
    }
}

enum Processed {
    Reconciled,
    Vanished,
    Retried,
    Dropped,
}

/// Consome uma [`JobSource`] e despacha cada job.
pub struct Worker {
    dispatcher: Arc<Dispatcher>,
    source: Arc<dyn JobSource>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        source: Arc<dyn JobSource>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            dispatcher,
            source,
            options,
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Processa jobs até a fonte fechar ou o sinal de shutdown chegar.
    ///
    /// Jobs em andamento terminam antes do retorno.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CacheFieldResult<WorkerReport> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();
        let mut report = WorkerReport::default();

        tracing::info!(
            concurrency = self.options.concurrency,
            max_attempts = self.options.max_attempts,
            "Recalculation worker started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                report.record(joined);
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| CacheFieldError::other("worker semaphore closed"))?;

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Recalculation worker shutting down");
                        break;
                    }
                    continue;
                }
                received = self.source.receive() => received?,
            };

            match received {
                Received::Job(delivery) => {
                    tasks.spawn(self.process(delivery, permit));
                }
                Received::Idle => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(self.options.poll_interval) => {}
                    }
                }
                Received::Closed => {
                    tracing::info!("Job source closed");
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }

        tracing::info!(
            processed = report.processed,
            reconciled = report.reconciled,
            vanished = report.vanished,
            retried = report.retried,
            dropped = report.dropped,
            "Recalculation worker stopped"
        );

        Ok(report)
    }

    /// Processa o que estiver disponível e retorna quando a fonte esvaziar.
    ///
    /// Retentativas devolvidas à fila durante a execução também são
    /// processadas.
    pub async fn run_until_idle(&self) -> CacheFieldResult<WorkerReport> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency));
        let mut tasks = JoinSet::new();
        let mut report = WorkerReport::default();

        loop {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| CacheFieldError::other("worker semaphore closed"))?;

            match self.source.try_receive().await? {
                Received::Job(delivery) => {
                    tasks.spawn(self.process(delivery, permit));
                }
                Received::Idle => {
                    drop(permit);
                    // Jobs em andamento podem voltar para a fila.
                    match tasks.join_next().await {
                        Some(joined) => report.record(joined),
                        None => break,
                    }
                }
                Received::Closed => break,
            }
        }

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }

        Ok(report)
    }

    /// O permit é liberado antes de devolver um job à fila: o loop principal
    /// precisa de um permit livre para drenar uma fonte cheia.
    fn process(
        &self,
        delivery: Delivery,
        permit: OwnedSemaphorePermit,
    ) -> impl std::future::Future<Output = Processed> + Send + 'static {
        let dispatcher = Arc::clone(&self.dispatcher);
        let source = Arc::clone(&self.source);
        let options = self.options.clone();

        async move {
            let job = &delivery.job;
            let result = dispatcher.dispatch(job).await;

            let processed = match result {
                Ok(DispatchOutcome::Vanished) => Processed::Vanished,
                Ok(DispatchOutcome::Reconciled { .. }) => Processed::Reconciled,
                Err(e) if delivery.attempt >= options.max_attempts => {
                    tracing::error!(
                        job_id = %job.job_id,
                        store_kind = %job.store_kind,
                        record_kind = %job.record_kind,
                        record_id = job.record_id,
                        attempt = delivery.attempt,
                        error = %e,
                        "Recalculation job failed, dropping after max attempts"
                    );
                    Processed::Dropped
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.job_id,
                        record_id = job.record_id,
                        attempt = delivery.attempt,
                        error = %e,
                        "Recalculation job failed, retrying"
                    );
                    drop(permit);
                    tokio::time::sleep(options.retry_backoff * delivery.attempt).await;

                    return match source.retry(delivery).await {
                        Ok(()) => Processed::Retried,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to requeue recalculation job");
                            Processed::Dropped
                        }
                    };
                }
            };

            if let Err(e) = source.complete(&delivery).await {
                tracing::warn!(
                    job_id = %delivery.job.job_id,
                    error = %e,
                    "Failed to acknowledge recalculation job"
                );
            }
            drop(permit);
            processed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::engine::CachedFields;
    use crate::field::{AttributeDefinition, KindRegistry, RecordKind};
    use crate::queue::{self, MemoryQueue, RecalculationJob, TaskQueue};
    use crate::store::{MemoryStore, RecordStore};
    use crate::types::{ChangeSet, Value};

    fn options() -> WorkerOptions {
        WorkerOptions {
            concurrency: 2,
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn dispatcher(store: Arc<MemoryStore>, kind: RecordKind) -> Arc<Dispatcher> {
        let mut registry = KindRegistry::new();
        registry.register(kind).unwrap();
        let fields = Arc::new(CachedFields::new(store, Arc::new(MemoryQueue::new())));
        Arc::new(Dispatcher::new(Arc::new(registry), fields))
    }

    #[tokio::test]
    async fn test_run_until_idle_drains_queue() {
        let store = Arc::new(MemoryStore::new());
        let kind = RecordKind::builder("shop", "Order")
            .attribute(AttributeDefinition::new("total"), |_| Ok(Value::Integer(5)))
            .build()
            .unwrap();
        let schema = kind.schema().clone();
        let dispatcher = dispatcher(store.clone(), kind);

        let queue = Arc::new(MemoryQueue::new());
        for _ in 0..3 {
            let id = store.insert(&schema, ChangeSet::new()).await.unwrap();
            queue.enqueue(RecalculationJob::new(schema.id(), id)).await.unwrap();
        }
        queue.enqueue(RecalculationJob::new(schema.id(), 99)).await.unwrap();

        let worker = Worker::new(dispatcher, queue.clone(), options());
        let report = worker.run_until_idle().await.unwrap();

        assert_eq!(report.reconciled, 3);
        assert_eq!(report.vanished, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failing_job_is_retried_then_dropped() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let kind = RecordKind::builder("shop", "Order")
            .attribute(AttributeDefinition::new("total"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("upstream unavailable"))
            })
            .build()
            .unwrap();
        let schema = kind.schema().clone();
        let dispatcher = dispatcher(store.clone(), kind);

        let queue = Arc::new(MemoryQueue::new());
        let id = store.insert(&schema, ChangeSet::new()).await.unwrap();
        queue.enqueue(RecalculationJob::new(schema.id(), id)).await.unwrap();

        let report = Worker::new(dispatcher, queue.clone(), options())
            .run_until_idle()
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.retried, 2);
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let store = Arc::new(MemoryStore::new());
        let kind = RecordKind::builder("shop", "Order")
            .attribute(AttributeDefinition::new("total"), |_| Ok(Value::Integer(1)))
            .build()
            .unwrap();
        let schema = kind.schema().clone();
        let dispatcher = dispatcher(store.clone(), kind);

        let (producer, source) = queue::channel(8);
        let id = store.insert(&schema, ChangeSet::new()).await.unwrap();
        producer.enqueue(RecalculationJob::new(schema.id(), id)).await.unwrap();
        drop(producer);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let report = Worker::new(dispatcher, Arc::new(source), options())
            .run(shutdown_rx)
            .await
            .unwrap();

        assert_eq!(report.reconciled, 1);
        let record = store.get(&schema, id).await.unwrap().unwrap();
        assert_eq!(record.get("cached_total"), &Value::Integer(1));
    }

    #[tokio::test]
    async fn test_retry_on_full_channel_keeps_worker_moving() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let kind = RecordKind::builder("shop", "Order")
            .attribute(AttributeDefinition::new("total"), move |_| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(anyhow::anyhow!("transient failure"));
                }
                Ok(Value::Integer(3))
            })
            .build()
            .unwrap();
        let schema = kind.schema().clone();
        let dispatcher = dispatcher(store.clone(), kind);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(store.insert(&schema, ChangeSet::new()).await.unwrap());
        }

        let (producer, source) = queue::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker::new(
            dispatcher,
            Arc::new(source),
            WorkerOptions {
                concurrency: 1,
                ..options()
            },
        );
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        for id in &ids {
            let job = RecalculationJob::new(schema.id(), *id);
            loop {
                let enqueue = producer.enqueue(job.clone());
                let sent = tokio::time::timeout(Duration::from_secs(1), enqueue)
                    .await
                    .expect("enqueue must not block");
                match sent {
                    Ok(()) => break,
                    Err(CacheFieldError::QueueFull { .. }) => {
                        tokio::time::sleep(Duration::from_millis(1)).await
                    }
                    Err(e) => panic!("unexpected {e}"),
                }
            }
        }

        let mut reconciled = false;
        for _ in 0..400 {
            let mut fresh = 0;
            for id in &ids {
                let record = store.get(&schema, *id).await.unwrap().unwrap();
                if record.get("cached_total") == &Value::Integer(3) {
                    fresh += 1;
                }
            }
            if fresh == ids.len() {
                reconciled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(reconciled);

        drop(producer);
        let report = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker must stop once the channel closes")
            .unwrap()
            .unwrap();

        assert_eq!(report.reconciled, 3);
        assert_eq!(report.retried, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let kind = RecordKind::builder("shop", "Order")
            .attribute(AttributeDefinition::new("total"), |_| Ok(Value::Integer(1)))
            .build()
            .unwrap();
        let dispatcher = dispatcher(store, kind);

        let (_producer, source) = queue::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker::new(dispatcher, Arc::new(source), options());

        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
        shutdown_tx.send(true).unwrap();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.processed, 0);
    }
}
