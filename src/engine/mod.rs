//! Motor de staleness e recálculo.
//!
//! Cada par (registro, atributo) está em um de três estados:
//!
//! ```text
//! FRESH ──flag_as_stale / expiração──▶ STALE ──recalculate──▶ RECALCULATING ──▶ FRESH
//! ```
//!
//! A expiração é observada de forma preguiçosa, na leitura; não há timer.
//! O motor não usa locks entre processos: escritas concorrentes no mesmo
//! registro resolvem por last-write-wins e recálculos duplicados são
//! desperdício, não erro.

mod state;

pub use state::{evaluate, FieldState, StaleReason};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::field::{AttributeDefinition, CachedAttribute, KindId, KindSchema, RecordKind};
use crate::hooks::{HookContext, HookSystem};
use crate::queue::{RecalculationJob, TaskQueue};
use crate::store::RecordStore;
use crate::types::{ChangeSet, Record, RecordId, Value};
use crate::{CacheFieldError, CacheFieldResult};

/// Quando persistir uma mudança.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Commit {
    /// Persiste no store imediatamente (e enfileira, se for o caso).
    #[default]
    Immediate,

    /// Só devolve o change-set; o chamador persiste depois com
    /// [`CachedFields::commit`].
    Deferred,
}

impl Commit {
    pub fn is_immediate(self) -> bool {
        matches!(self, Commit::Immediate)
    }
}

type InFlightKey = (KindId, RecordId, String);

/// Marca um recálculo em andamento enquanto estiver vivo.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl<'a> InFlight<'a> {
    fn enter(set: &'a Mutex<HashSet<InFlightKey>>, key: InFlightKey) -> Self {
        if let Ok(mut set) = set.lock() {
            set.insert(key.clone());
        }
        Self { set, key }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}

/// Ponto de entrada do motor: junta store, fila e hooks.
pub struct CachedFields {
    store: Arc<dyn RecordStore>,
    queue: Arc<dyn TaskQueue>,
    hooks: Arc<HookSystem>,
    in_flight: Mutex<HashSet<InFlightKey>>,
}

impl CachedFields {
    /// Cria o motor com os hooks padrão.
    pub fn new(store: Arc<dyn RecordStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            store,
            queue,
            hooks: Arc::new(HookSystem::with_defaults()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Substitui o sistema de hooks.
    pub fn with_hooks(mut self, hooks: Arc<HookSystem>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn hooks(&self) -> &Arc<HookSystem> {
        &self.hooks
    }

    /// Handle de um atributo do tipo.
    pub fn field<'a>(&'a self, kind: &'a RecordKind, attribute: &str) -> CacheFieldResult<Field<'a>> {
        Ok(Field {
            fields: self,
            kind,
            attribute: kind.attribute(attribute)?,
        })
    }

    /// Carrega um registro do store.
    pub async fn load(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<Record> {
        self.store
            .get(kind, id)
            .await?
            .ok_or_else(|| CacheFieldError::RecordNotFound {
                kind: kind.id().to_string(),
                id,
            })
    }

    /// Persiste um change-set (possivelmente a junção de vários
    /// `Commit::Deferred`) em uma única escrita parcial.
    pub async fn commit(
        &self,
        kind: &KindSchema,
        record_id: RecordId,
        changes: &ChangeSet,
    ) -> CacheFieldResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        self.store.update(kind, record_id, changes).await.map_err(|e| {
            tracing::error!(
                kind = %kind.id(),
                record_id,
                error = %e,
                "Failed to persist cached columns"
            );
            e
        })
    }

    /// Enfileira um job de recálculo para o registro, incondicionalmente.
    pub async fn trigger_recalculation(
        &self,
        kind: &KindSchema,
        record_id: RecordId,
    ) -> CacheFieldResult<()> {
        let job = RecalculationJob::new(kind.id(), record_id);
        tracing::debug!(
            kind = %kind.id(),
            record_id,
            job_id = %job.job_id,
            "Enqueueing recalculation job"
        );
        self.queue.enqueue(job).await
    }

    fn is_recalculating(&self, key: &InFlightKey) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(key))
            .unwrap_or(false)
    }
}

/// Operações de um atributo cacheado de um tipo.
pub struct Field<'a> {
    fields: &'a CachedFields,
    kind: &'a RecordKind,
    attribute: &'a Arc<dyn CachedAttribute>,
}

impl<'a> Field<'a> {
    pub fn definition(&self) -> &AttributeDefinition {
        self.attribute.definition()
    }

    pub fn name(&self) -> &str {
        self.attribute.name()
    }

    fn schema(&self) -> &KindSchema {
        self.kind.schema()
    }

    fn in_flight_key(&self, record_id: RecordId) -> InFlightKey {
        (self.kind.id().clone(), record_id, self.name().to_string())
    }

    /// Estado atual do atributo no registro.
    pub fn state(&self, record: &Record, now: DateTime<Utc>) -> FieldState {
        if self.fields.is_recalculating(&self.in_flight_key(record.id)) {
            return FieldState::Recalculating;
        }
        evaluate(self.definition(), record, now)
    }

    /// Valor confiável do atributo.
    ///
    /// Se o valor estiver ausente, marcado ou expirado, recalcula e persiste
    /// antes de devolver. Uma falha no recálculo é propagada; nunca devolve
    /// um valor stale.
    pub async fn read(&self, record: &mut Record) -> CacheFieldResult<Value> {
        let state = evaluate(self.definition(), record, Utc::now());
        if let FieldState::Stale(reason) = state {
            tracing::debug!(
                kind = %self.kind.id(),
                record_id = record.id,
                attribute = self.name(),
                reason = %reason,
                "Stale value on read, recalculating"
            );
            self.recalculate(record, Commit::Immediate).await?;
        }

        Ok(record.get(&self.definition().storage_column).clone())
    }

    /// Escreve o valor só em memória. Não persiste nem limpa a flag.
    pub fn write(&self, record: &mut Record, value: impl Into<Value>) {
        record.set(self.definition().storage_column.clone(), value);
    }

    /// Recalcula o valor, limpa a flag e, se já passou, a expiração.
    ///
    /// Devolve as colunas alteradas. Com [`Commit::Immediate`] elas são
    /// gravadas numa única escrita parcial.
    pub async fn recalculate(
        &self,
        record: &mut Record,
        commit: Commit,
    ) -> CacheFieldResult<ChangeSet> {
        let definition = self.definition();
        let _in_flight = InFlight::enter(&self.fields.in_flight, self.in_flight_key(record.id));

        let value = self
            .attribute
            .compute(record)
            .map_err(|source| CacheFieldError::Compute {
                attribute: definition.name.clone(),
                source,
            })?;

        self.write(record, value.clone());
        record.set(definition.stale_flag_column.clone(), false);

        let mut changes = ChangeSet::new()
            .with(definition.storage_column.clone(), value)
            .with(definition.stale_flag_column.clone(), false);

        if let Some(column) = &definition.expiration_column {
            let now = Utc::now();
            if record.timestamp(column).is_some_and(|expires| expires < now) {
                record.set(column.clone(), Value::Null);
                changes.set(column.clone(), Value::Null);
            }
        }

        if commit.is_immediate() {
            self.fields.commit(self.schema(), record.id, &changes).await?;
        }

        tracing::debug!(
            kind = %self.kind.id(),
            record_id = record.id,
            attribute = self.name(),
            committed = commit.is_immediate(),
            "Attribute recalculated"
        );

        self.fields
            .hooks
            .run(HookContext::OnRecalculated {
                kind: self.kind.id(),
                record_id: record.id,
                attribute: self.name(),
                changes: &changes,
                committed: commit.is_immediate(),
            })
            .await;

        Ok(changes)
    }

    /// Marca o atributo como stale.
    ///
    /// Só age na transição false → true; se a flag já estiver ligada, não
    /// persiste, não enfileira e devolve um change-set vazio. Com
    /// `and_recalculate` ausente usa o padrão da definição.
    pub async fn flag_as_stale(
        &self,
        record: &mut Record,
        and_recalculate: Option<bool>,
        commit: Commit,
    ) -> CacheFieldResult<ChangeSet> {
        let definition = self.definition();
        if record.flag(&definition.stale_flag_column) {
            return Ok(ChangeSet::new());
        }

        record.set(definition.stale_flag_column.clone(), true);
        let changes = ChangeSet::new().with(definition.stale_flag_column.clone(), true);

        let mut enqueued = false;
        if commit.is_immediate() {
            self.fields.commit(self.schema(), record.id, &changes).await?;

            if and_recalculate.unwrap_or(definition.eager_recalculation_default) {
                self.fields
                    .trigger_recalculation(self.schema(), record.id)
                    .await?;
                enqueued = true;
            }
        }

        self.fields
            .hooks
            .run(HookContext::OnFlagged {
                kind: self.kind.id(),
                record_id: record.id,
                attribute: self.name(),
                committed: commit.is_immediate(),
                enqueued,
            })
            .await;

        Ok(changes)
    }

    /// Define e persiste a expiração. `None` desliga a staleness temporal.
    ///
    /// Só vale para atributos com gatilhos temporais.
    pub async fn expire_after(
        &self,
        record: &mut Record,
        when: Option<DateTime<Utc>>,
    ) -> CacheFieldResult<()> {
        let column = self.definition().expiration_column.as_ref().ok_or_else(|| {
            CacheFieldError::config(format!(
                "atributo '{}' em {} não tem gatilhos temporais",
                self.name(),
                self.kind.id()
            ))
        })?;

        let value = Value::from(when);
        record.set(column.clone(), value.clone());
        self.fields
            .commit(self.schema(), record.id, &ChangeSet::new().with(column.clone(), value))
            .await
    }

    /// Enfileira um job para o registro, mesmo sem staleness.
    pub async fn trigger_recalculation(&self, record: &Record) -> CacheFieldResult<()> {
        self.fields
            .trigger_recalculation(self.schema(), record.id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::AttributeDefinition;
    use crate::hooks::MetricsHook;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryStore;
    use chrono::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        metrics: Arc<MetricsHook>,
        fields: CachedFields,
        kind: RecordKind,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let metrics = Arc::new(MetricsHook::new());

        let mut hooks = HookSystem::new();
        hooks.register(metrics.clone());

        let fields = CachedFields::new(store.clone(), queue.clone()).with_hooks(Arc::new(hooks));
        let kind = RecordKind::builder("game", "Player")
            .attribute(
                AttributeDefinition::new("score").with_temporal_triggers(),
                |_| Ok(Value::Integer(42)),
            )
            .attribute(AttributeDefinition::new("rank"), |record| {
                Ok(Value::Integer(record.get("level").as_i64().unwrap_or(0) * 10))
            })
            .build()
            .unwrap();

        Fixture {
            store,
            queue,
            metrics,
            fields,
            kind,
        }
    }

    async fn insert(f: &Fixture) -> Record {
        let id = f
            .store
            .insert(f.kind.schema(), ChangeSet::new().with("level", 3))
            .await
            .unwrap();
        f.fields.load(f.kind.schema(), id).await.unwrap()
    }

    #[tokio::test]
    async fn test_read_recalculates_new_record() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();

        assert_eq!(
            score.state(&record, Utc::now()),
            FieldState::Stale(StaleReason::MissingValue)
        );
        assert_eq!(score.read(&mut record).await.unwrap(), Value::Integer(42));
        assert!(score.state(&record, Utc::now()).is_fresh());

        let stored = f.fields.load(f.kind.schema(), record.id).await.unwrap();
        assert_eq!(stored.get("cached_score"), &Value::Integer(42));
        assert!(!stored.flag("score_recalculation_needed"));
    }

    #[tokio::test]
    async fn test_read_fresh_does_not_write() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();

        score.read(&mut record).await.unwrap();
        let writes = f.store.updates();
        score.read(&mut record).await.unwrap();

        assert_eq!(f.store.updates(), writes);
    }

    #[tokio::test]
    async fn test_write_is_local_only() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();

        score.write(&mut record, 7);

        assert_eq!(record.get("cached_score"), &Value::Integer(7));
        assert!(record.flag("score_recalculation_needed"));
        assert_eq!(f.store.updates(), 0);
    }

    #[tokio::test]
    async fn test_flag_as_stale_is_idempotent() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();
        score.recalculate(&mut record, Commit::Immediate).await.unwrap();

        let first = score
            .flag_as_stale(&mut record, None, Commit::Immediate)
            .await
            .unwrap();
        let writes = f.store.updates();
        let second = score
            .flag_as_stale(&mut record, None, Commit::Immediate)
            .await
            .unwrap();

        assert_eq!(first.get("score_recalculation_needed"), Some(&Value::Bool(true)));
        assert!(second.is_empty());
        assert_eq!(f.store.updates(), writes);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.metrics.total_flagged(), 1);
        assert_eq!(f.metrics.total_enqueued(), 1);
    }

    #[tokio::test]
    async fn test_flag_without_eager_does_not_enqueue() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();
        score.recalculate(&mut record, Commit::Immediate).await.unwrap();

        score
            .flag_as_stale(&mut record, Some(false), Commit::Immediate)
            .await
            .unwrap();

        assert!(f.queue.is_empty());
        let stored = f.fields.load(f.kind.schema(), record.id).await.unwrap();
        assert!(stored.flag("score_recalculation_needed"));
    }

    #[tokio::test]
    async fn test_deferred_changes_merge_into_one_write() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();
        let rank = f.fields.field(&f.kind, "rank").unwrap();

        let mut changes = score.recalculate(&mut record, Commit::Deferred).await.unwrap();
        changes.merge(rank.recalculate(&mut record, Commit::Deferred).await.unwrap());
        assert_eq!(f.store.updates(), 0);

        f.fields
            .commit(f.kind.schema(), record.id, &changes)
            .await
            .unwrap();

        assert_eq!(f.store.updates(), 1);
        let stored = f.fields.load(f.kind.schema(), record.id).await.unwrap();
        assert_eq!(stored.get("cached_rank"), &Value::Integer(30));
        assert_eq!(f.metrics.total_deferred(), 2);
    }

    #[tokio::test]
    async fn test_recalculate_keeps_future_expiration() {
        let f = fixture();
        let mut record = insert(&f).await;
        let score = f.fields.field(&f.kind, "score").unwrap();
        let later = Utc::now() + Duration::hours(1);

        score.expire_after(&mut record, Some(later)).await.unwrap();
        let changes = score.recalculate(&mut record, Commit::Immediate).await.unwrap();

        assert!(!changes.contains("score_expires_after"));
        assert_eq!(record.timestamp("score_expires_after"), Some(later));
    }

    #[tokio::test]
    async fn test_expire_after_requires_temporal_triggers() {
        let f = fixture();
        let mut record = insert(&f).await;
        let rank = f.fields.field(&f.kind, "rank").unwrap();

        let result = rank.expire_after(&mut record, Some(Utc::now())).await;
        assert!(matches!(result, Err(CacheFieldError::Config(_))));
    }

    #[tokio::test]
    async fn test_compute_failure_propagates() {
        let f = fixture();
        let kind = RecordKind::builder("game", "Broken")
            .attribute(AttributeDefinition::new("score"), |_| {
                Err(anyhow::anyhow!("no data"))
            })
            .build()
            .unwrap();
        let id = f.store.insert(kind.schema(), ChangeSet::new()).await.unwrap();
        let mut record = f.fields.load(kind.schema(), id).await.unwrap();

        let result = f.fields.field(&kind, "score").unwrap().read(&mut record).await;

        match result {
            Err(CacheFieldError::Compute { attribute, .. }) => assert_eq!(attribute, "score"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.store.updates(), 0);
    }

    #[tokio::test]
    async fn test_unknown_attribute() {
        let f = fixture();
        assert!(matches!(
            f.fields.field(&f.kind, "missing"),
            Err(CacheFieldError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_in_flight_guard_marks_recalculating() {
        let f = fixture();
        let score = f.fields.field(&f.kind, "score").unwrap();
        let record = Record::new(1).with("cached_score", 1);

        {
            let _guard = InFlight::enter(&f.fields.in_flight, score.in_flight_key(1));
            assert_eq!(score.state(&record, Utc::now()), FieldState::Recalculating);
        }
        assert!(score.state(&record, Utc::now()).is_fresh());
    }
}
