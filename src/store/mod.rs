//! Record store: persistência das colunas dos registros.
//!
//! O store é um colaborador externo do motor de staleness. Ele só precisa
//! ler um registro pela chave primária e aplicar escritas parciais
//! atômicas em relação às colunas dadas.
//!
//! ## Implementações
//!
//! - [`MemoryStore`]: store em memória, útil para testes e embutir
//! - [`SqliteStore`]: store SQLite via rusqlite

mod memory;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use schema::{column_specs, ColumnSpec};
#[cfg(feature = "sqlite")]
pub(crate) use sqlite::format_timestamp;
#[cfg(feature = "sqlite")]
pub use sqlite::{AttributeStats, SqliteStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::field::KindSchema;
use crate::types::{ChangeSet, Record, RecordId};
use crate::CacheFieldResult;

/// Trait para stores de registros.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Lê um registro. `None` se não existir.
    async fn get(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<Option<Record>>;

    /// Escrita parcial das colunas dadas.
    ///
    /// Retorna [`RecordNotFound`](crate::CacheFieldError::RecordNotFound)
    /// se o registro não existir.
    async fn update(
        &self,
        kind: &KindSchema,
        id: RecordId,
        changes: &ChangeSet,
    ) -> CacheFieldResult<()>;

    /// Cria um registro. As colunas de cache começam com
    /// [`KindSchema::defaults`], sobrescritas por `columns`.
    async fn insert(&self, kind: &KindSchema, columns: ChangeSet) -> CacheFieldResult<RecordId>;

    /// Remove um registro. Retorna false se ele não existia.
    async fn delete(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<bool>;

    /// Lista as chaves primárias do tipo.
    async fn ids(&self, kind: &KindSchema) -> CacheFieldResult<Vec<RecordId>>;

    /// Lista registros com ao menos uma flag de staleness ligada.
    ///
    /// Com `include_expired`, inclui também registros cuja expiração já passou.
    async fn stale_ids(
        &self,
        kind: &KindSchema,
        include_expired: bool,
        now: DateTime<Utc>,
    ) -> CacheFieldResult<Vec<RecordId>> {
        let mut stale = Vec::new();
        for id in self.ids(kind).await? {
            if let Some(record) = self.get(kind, id).await? {
                if needs_reconcile(kind, &record, include_expired, now) {
                    stale.push(id);
                }
            }
        }
        Ok(stale)
    }
}

/// Verifica se algum atributo do registro está marcado (ou expirado).
pub(crate) fn needs_reconcile(
    kind: &KindSchema,
    record: &Record,
    include_expired: bool,
    now: DateTime<Utc>,
) -> bool {
    kind.attributes().iter().any(|attribute| {
        record.flag(&attribute.stale_flag_column)
            || (include_expired
                && attribute
                    .expiration_column
                    .as_deref()
                    .and_then(|column| record.timestamp(column))
                    .is_some_and(|expires| expires < now))
    })
}
