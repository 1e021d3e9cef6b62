//! Varredura de registros stale.
//!
//! Com recálculo eager desligado nenhum job é enfileirado automaticamente;
//! a varredura garante que registros marcados sejam reconciliados em algum
//! momento.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::field::KindSchema;
use crate::queue::{RecalculationJob, TaskQueue};
use crate::store::RecordStore;
use crate::types::{ChangeSet, Record};
use crate::CacheFieldResult;

/// Menor intervalo aceito por [`Sweeper::run`].
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Resultado de uma varredura.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tipos varridos.
    pub kinds: usize,
    /// Atributos expirados que tiveram a flag ligada.
    pub flagged_expired: usize,
    /// Jobs enfileirados.
    pub enqueued: usize,
}

impl SweepReport {
    fn add(&mut self, other: SweepReport) {
        self.kinds += other.kinds;
        self.flagged_expired += other.flagged_expired;
        self.enqueued += other.enqueued;
    }
}

/// Enfileira um job por registro com alguma flag ligada.
pub struct Sweeper {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    include_expired: bool,
}

impl Sweeper {
    pub fn new(store: Arc<dyn RecordStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            include_expired: false,
        }
    }

    /// Também trata registros cuja expiração passou: liga a flag dos
    /// atributos expirados antes de enfileirar.
    pub fn include_expired(mut self, include: bool) -> Self {
        self.include_expired = include;
        self
    }

    /// Varre um tipo.
    pub async fn sweep_kind(&self, kind: &KindSchema) -> CacheFieldResult<SweepReport> {
        let now = Utc::now();
        let ids = self.store.stale_ids(kind, self.include_expired, now).await?;
        let mut report = SweepReport {
            kinds: 1,
            ..SweepReport::default()
        };

        for id in ids {
            if self.include_expired {
                let Some(record) = self.store.get(kind, id).await? else {
                    continue;
                };
                let changes = expired_flags(kind, &record, now);
                if !changes.is_empty() {
                    match self.store.update(kind, id, &changes).await {
                        Ok(()) => report.flagged_expired += changes.len(),
                        Err(e) if e.is_vanished() => continue,
                        Err(e) => return Err(e),
                    }
                }
            }

            self.queue
                .enqueue(RecalculationJob::new(kind.id(), id))
                .await?;
            report.enqueued += 1;
        }

        tracing::info!(
            kind = %kind.id(),
            enqueued = report.enqueued,
            flagged_expired = report.flagged_expired,
            "Sweep completed"
        );
        Ok(report)
    }

    /// Varre todos os tipos.
    pub async fn sweep(&self, kinds: &[KindSchema]) -> CacheFieldResult<SweepReport> {
        let mut report = SweepReport::default();
        for kind in kinds {
            report.add(self.sweep_kind(kind).await?);
        }
        Ok(report)
    }

    /// Varre periodicamente até o sinal de shutdown.
    ///
    /// Falhas de uma varredura são registradas e a próxima acontece no
    /// intervalo seguinte.
    pub async fn run(
        &self,
        kinds: &[KindSchema],
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> SweepReport {
        if every < MIN_SWEEP_INTERVAL {
            tracing::warn!(
                requested_ms = every.as_millis() as u64,
                min_ms = MIN_SWEEP_INTERVAL.as_millis() as u64,
                "Sweep interval too short, using minimum"
            );
        }
        let mut ticker = interval(every.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut total = SweepReport::default();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Sweeper shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.sweep(kinds).await {
                        Ok(report) => total.add(report),
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
            }
        }

        total
    }
}

/// Flags a ligar para atributos com expiração vencida e flag desligada.
fn expired_flags(kind: &KindSchema, record: &Record, now: chrono::DateTime<Utc>) -> ChangeSet {
    kind.attributes()
        .iter()
        .filter(|attribute| !record.flag(&attribute.stale_flag_column))
        .filter(|attribute| {
            attribute
                .expiration_column
                .as_deref()
                .and_then(|column| record.timestamp(column))
                .is_some_and(|expires| expires < now)
        })
        .map(|attribute| (attribute.stale_flag_column.clone(), true.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{AttributeDefinition, KindId};
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;

    fn kind() -> KindSchema {
        KindSchema::new(
            KindId::new("shop", "Order"),
            "orders",
            vec![AttributeDefinition::new("total").with_temporal_triggers()],
        )
        .unwrap()
    }

    fn fresh() -> ChangeSet {
        ChangeSet::new()
            .with("cached_total", 1)
            .with("total_recalculation_needed", false)
    }

    #[tokio::test]
    async fn test_sweep_enqueues_flagged_records() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let kind = kind();

        let stale = store.insert(&kind, ChangeSet::new()).await.unwrap();
        store.insert(&kind, fresh()).await.unwrap();

        let report = Sweeper::new(store, queue.clone())
            .sweep(std::slice::from_ref(&kind))
            .await
            .unwrap();

        assert_eq!(report.enqueued, 1);
        assert_eq!(queue.jobs()[0].record_id, stale);
    }

    #[tokio::test]
    async fn test_sweep_ignores_expired_by_default() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let kind = kind();
        let past = Utc::now() - ChronoDuration::hours(1);

        store
            .insert(&kind, fresh().with("total_expires_after", past))
            .await
            .unwrap();

        let report = Sweeper::new(store, queue.clone())
            .sweep_kind(&kind)
            .await
            .unwrap();

        assert_eq!(report.enqueued, 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_include_expired_flags_first() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let kind = kind();
        let past = Utc::now() - ChronoDuration::hours(1);

        let id = store
            .insert(&kind, fresh().with("total_expires_after", past))
            .await
            .unwrap();

        let report = Sweeper::new(store.clone(), queue.clone())
            .include_expired(true)
            .sweep_kind(&kind)
            .await
            .unwrap();

        assert_eq!(report.flagged_expired, 1);
        assert_eq!(report.enqueued, 1);
        let record = store.get(&kind, id).await.unwrap().unwrap();
        assert!(record.flag("total_recalculation_needed"));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let sweeper = Sweeper::new(Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        let report = sweeper
            .run(&[kind()], Duration::from_secs(60), shutdown_rx)
            .await;
        assert!(report.kinds <= 1);
    }

    #[tokio::test]
    async fn test_run_with_zero_interval_uses_minimum() {
        let sweeper = Sweeper::new(Arc::new(MemoryStore::new()), Arc::new(MemoryQueue::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = shutdown_tx.send(true);
        });

        let report = sweeper.run(&[kind()], Duration::ZERO, shutdown_rx).await;
        assert!(report.kinds >= 1);
    }
}
