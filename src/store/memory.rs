//! Store em memória.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::field::KindSchema;
use crate::types::{ChangeSet, Record, RecordId, Value};
use crate::{CacheFieldError, CacheFieldResult};

use super::RecordStore;

#[derive(Default)]
struct Table {
    next_id: RecordId,
    rows: BTreeMap<RecordId, BTreeMap<String, Value>>,
}

/// Store em memória, indexado por tabela.
///
/// Conta as escritas parciais aplicadas, o que permite verificar quantas
/// vezes o motor realmente tocou o store.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Table>>,
    updates: AtomicU64,
}

impl MemoryStore {
    /// Cria um store vazio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Número de escritas parciais aplicadas.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    fn lock(&self) -> CacheFieldResult<std::sync::MutexGuard<'_, HashMap<String, Table>>> {
        self.tables
            .lock()
            .map_err(|_| CacheFieldError::persistence("memory store lock poisoned"))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<Option<Record>> {
        let tables = self.lock()?;
        Ok(tables
            .get(kind.table())
            .and_then(|table| table.rows.get(&id))
            .map(|columns| Record {
                id,
                columns: columns.clone(),
            }))
    }

    async fn update(
        &self,
        kind: &KindSchema,
        id: RecordId,
        changes: &ChangeSet,
    ) -> CacheFieldResult<()> {
        let mut tables = self.lock()?;
        let row = tables
            .get_mut(kind.table())
            .and_then(|table| table.rows.get_mut(&id))
            .ok_or_else(|| CacheFieldError::RecordNotFound {
                kind: kind.id().to_string(),
                id,
            })?;

        for (column, value) in changes.iter() {
            row.insert(column.clone(), value.clone());
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, kind: &KindSchema, columns: ChangeSet) -> CacheFieldResult<RecordId> {
        let mut row = kind.defaults();
        row.merge(columns);

        let mut tables = self.lock()?;
        let table = tables.entry(kind.table().to_string()).or_default();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, row.into_iter().collect());
        Ok(id)
    }

    async fn delete(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<bool> {
        let mut tables = self.lock()?;
        Ok(tables
            .get_mut(kind.table())
            .map(|table| table.rows.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn ids(&self, kind: &KindSchema) -> CacheFieldResult<Vec<RecordId>> {
        let tables = self.lock()?;
        Ok(tables
            .get(kind.table())
            .map(|table| table.rows.keys().copied().collect())
            .unwrap_or_default())
    }
}
