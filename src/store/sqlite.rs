//! Store SQLite.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use tokio::sync::Mutex;

use crate::field::KindSchema;
use crate::types::{ChangeSet, Record, RecordId, Value};
use crate::{CacheFieldError, CacheFieldResult};

use super::schema::{self, quote_ident};
use super::RecordStore;

/// Formato fixo de timestamps no SQLite: ordenável como texto.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
            Value::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(ts) => {
                ToSqlOutput::Owned(rusqlite::types::Value::Text(format_timestamp(ts)))
            }
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        })
    }
}

/// Estatísticas de um atributo numa tabela.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeStats {
    pub attribute: String,
    /// Registros com a flag de staleness ligada.
    pub stale: usize,
    /// Registros com valor NULL.
    pub missing: usize,
    /// Registros com expiração no passado.
    pub expired: usize,
}

/// Store SQLite.
///
/// A conexão fica atrás de um mutex assíncrono; cada operação é uma
/// única instrução SQL.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Abre (ou cria) o banco.
    pub fn open(db_path: &Path) -> CacheFieldResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self::from_connection(conn))
    }

    /// Abre um banco em memória.
    pub fn in_memory() -> CacheFieldResult<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Colunas exigidas pelos atributos que faltam na tabela.
    pub async fn missing_columns(&self, kind: &KindSchema) -> CacheFieldResult<Vec<String>> {
        let conn = self.conn.lock().await;
        schema::missing_columns(&conn, kind)
    }

    /// Cria a tabela e adiciona as colunas que faltam.
    pub async fn ensure_schema(&self, kind: &KindSchema) -> CacheFieldResult<Vec<String>> {
        let conn = self.conn.lock().await;
        schema::ensure_schema(&conn, kind)
    }

    /// Retorna true se a tabela do tipo existe.
    pub async fn table_exists(&self, kind: &KindSchema) -> CacheFieldResult<bool> {
        let conn = self.conn.lock().await;
        Ok(!schema::table_columns(&conn, kind.table())?.is_empty())
    }

    /// Conta registros do tipo.
    pub async fn count(&self, kind: &KindSchema) -> CacheFieldResult<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(kind.table())),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Estatísticas de staleness por atributo.
    pub async fn attribute_stats(
        &self,
        kind: &KindSchema,
        now: DateTime<Utc>,
    ) -> CacheFieldResult<Vec<AttributeStats>> {
        let conn = self.conn.lock().await;
        let table = quote_ident(kind.table());
        let now = format_timestamp(&now);

        let mut stats = Vec::new();
        for attribute in kind.attributes() {
            let flag = quote_ident(&attribute.stale_flag_column);
            let storage = quote_ident(&attribute.storage_column);

            let (stale, missing): (i64, i64) = conn.query_row(
                &format!(
                    "SELECT COALESCE(SUM({flag} = 1), 0), COALESCE(SUM({storage} IS NULL), 0) FROM {table}"
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let expired: i64 = match &attribute.expiration_column {
                Some(column) => conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {table} WHERE {col} IS NOT NULL AND {col} < ?1",
                        col = quote_ident(column)
                    ),
                    params![now],
                    |row| row.get(0),
                )?,
                None => 0,
            };

            stats.push(AttributeStats {
                attribute: attribute.name.clone(),
                stale: stale as usize,
                missing: missing as usize,
                expired: expired as usize,
            });
        }

        Ok(stats)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<Option<Record>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE id = ?1",
            quote_ident(kind.table())
        ))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let record = stmt
            .query_row(params![id], |row| {
                let mut record = Record::new(id);
                for (i, name) in names.iter().enumerate() {
                    if name == "id" {
                        continue;
                    }
                    record.set(name.clone(), row.get::<_, Value>(i)?);
                }
                Ok(record)
            })
            .optional()?;

        Ok(record)
    }

    async fn update(
        &self,
        kind: &KindSchema,
        id: RecordId,
        changes: &ChangeSet,
    ) -> CacheFieldResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let assignments: Vec<String> = changes
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("{} = ?{}", quote_ident(column), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            quote_ident(kind.table()),
            assignments.join(", "),
            changes.len() + 1
        );

        let id_value = Value::Integer(id);
        let values = changes.iter().map(|(_, value)| value).chain(std::iter::once(&id_value));

        let conn = self.conn.lock().await;
        let affected = conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| CacheFieldError::persistence(format!("{}: {}", kind.id(), e)))?;

        if affected == 0 {
            return Err(CacheFieldError::RecordNotFound {
                kind: kind.id().to_string(),
                id,
            });
        }
        Ok(())
    }

    async fn insert(&self, kind: &KindSchema, columns: ChangeSet) -> CacheFieldResult<RecordId> {
        let mut row = kind.defaults();
        row.merge(columns);

        let conn = self.conn.lock().await;
        let table = quote_ident(kind.table());

        if row.is_empty() {
            conn.execute(&format!("INSERT INTO {} DEFAULT VALUES", table), [])?;
        } else {
            let names: Vec<String> = row.iter().map(|(column, _)| quote_ident(column)).collect();
            let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    names.join(", "),
                    placeholders.join(", ")
                ),
                params_from_iter(row.iter().map(|(_, value)| value)),
            )?;
        }

        Ok(conn.last_insert_rowid())
    }

    async fn delete(&self, kind: &KindSchema, id: RecordId) -> CacheFieldResult<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", quote_ident(kind.table())),
            params![id],
        )?;
        Ok(deleted > 0)
    }

    async fn ids(&self, kind: &KindSchema) -> CacheFieldResult<Vec<RecordId>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM {} ORDER BY id",
            quote_ident(kind.table())
        ))?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<RecordId>, _>>()?;
        Ok(ids)
    }

    async fn stale_ids(
        &self,
        kind: &KindSchema,
        include_expired: bool,
        now: DateTime<Utc>,
    ) -> CacheFieldResult<Vec<RecordId>> {
        let mut conditions = Vec::new();
        let mut uses_now = false;
        for attribute in kind.attributes() {
            conditions.push(format!("{} = 1", quote_ident(&attribute.stale_flag_column)));
            if include_expired {
                if let Some(column) = &attribute.expiration_column {
                    conditions.push(format!(
                        "({col} IS NOT NULL AND {col} < ?1)",
                        col = quote_ident(column)
                    ));
                    uses_now = true;
                }
            }
        }
        if conditions.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id FROM {} WHERE {} ORDER BY id",
            quote_ident(kind.table()),
            conditions.join(" OR ")
        );
        let now = format_timestamp(&now);

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = if uses_now {
            stmt.query_map(params![now], |row| row.get(0))?
                .collect::<Result<Vec<RecordId>, _>>()?
        } else {
            stmt.query_map([], |row| row.get(0))?
                .collect::<Result<Vec<RecordId>, _>>()?
        };
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{AttributeDefinition, KindId};
    use chrono::Duration as ChronoDuration;

    async fn setup() -> (SqliteStore, KindSchema) {
        let store = SqliteStore::in_memory().unwrap();
        let kind = KindSchema::new(
            KindId::new("shop", "Order"),
            "orders",
            vec![AttributeDefinition::new("total")
                .with_column_type("INTEGER")
                .with_temporal_triggers()],
        )
        .unwrap();
        store.ensure_schema(&kind).await.unwrap();
        (store, kind)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (store, kind) = setup().await;

        let id = store.insert(&kind, ChangeSet::new()).await.unwrap();
        let record = store.get(&kind, id).await.unwrap().unwrap();

        assert_eq!(record.id, id);
        assert!(record.get("cached_total").is_null());
        assert!(record.flag("total_recalculation_needed"));
        assert!(record.timestamp("total_expires_after").is_none());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (store, kind) = setup().await;
        assert!(store.get(&kind, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_update() {
        let (store, kind) = setup().await;
        let id = store.insert(&kind, ChangeSet::new()).await.unwrap();
        let expires = Utc::now() + ChronoDuration::hours(1);

        store
            .update(
                &kind,
                id,
                &ChangeSet::new()
                    .with("cached_total", 42)
                    .with("total_recalculation_needed", false)
                    .with("total_expires_after", expires),
            )
            .await
            .unwrap();

        let record = store.get(&kind, id).await.unwrap().unwrap();
        assert_eq!(record.get("cached_total"), &Value::Integer(42));
        assert!(!record.flag("total_recalculation_needed"));
        assert_eq!(
            record.timestamp("total_expires_after").map(|t| t.timestamp_micros()),
            Some(expires.timestamp_micros())
        );
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let (store, kind) = setup().await;
        let result = store
            .update(&kind, 5, &ChangeSet::new().with("cached_total", 1))
            .await;
        assert!(matches!(result, Err(CacheFieldError::RecordNotFound { id: 5, .. })));
    }

    #[tokio::test]
    async fn test_stale_ids_sql_scan() {
        let (store, kind) = setup().await;
        let now = Utc::now();

        let stale = store.insert(&kind, ChangeSet::new()).await.unwrap();
        let _fresh = store
            .insert(
                &kind,
                ChangeSet::new()
                    .with("cached_total", 1)
                    .with("total_recalculation_needed", false),
            )
            .await
            .unwrap();
        let expired = store
            .insert(
                &kind,
                ChangeSet::new()
                    .with("cached_total", 1)
                    .with("total_recalculation_needed", false)
                    .with("total_expires_after", now - ChronoDuration::minutes(5)),
            )
            .await
            .unwrap();

        assert_eq!(store.stale_ids(&kind, false, now).await.unwrap(), vec![stale]);
        assert_eq!(
            store.stale_ids(&kind, true, now).await.unwrap(),
            vec![stale, expired]
        );
    }

    #[tokio::test]
    async fn test_stale_ids_with_placeholder_like_names() {
        let store = SqliteStore::in_memory().unwrap();
        let kind = KindSchema::new(
            KindId::new("shop", "Odd"),
            "odd?1",
            vec![AttributeDefinition::new("total").with_stale_flag_column("flag?1")],
        )
        .unwrap();
        store.ensure_schema(&kind).await.unwrap();
        let id = store.insert(&kind, ChangeSet::new()).await.unwrap();

        // Sem gatilhos temporais a consulta não tem parâmetros.
        assert_eq!(
            store.stale_ids(&kind, true, Utc::now()).await.unwrap(),
            vec![id]
        );
    }

    #[tokio::test]
    async fn test_attribute_stats() {
        let (store, kind) = setup().await;
        let now = Utc::now();

        store.insert(&kind, ChangeSet::new()).await.unwrap();
        store
            .insert(
                &kind,
                ChangeSet::new()
                    .with("cached_total", 3)
                    .with("total_recalculation_needed", false)
                    .with("total_expires_after", now - ChronoDuration::minutes(1)),
            )
            .await
            .unwrap();

        let stats = store.attribute_stats(&kind, now).await.unwrap();
        assert_eq!(
            stats,
            vec![AttributeStats {
                attribute: "total".to_string(),
                stale: 1,
                missing: 1,
                expired: 1,
            }]
        );
        assert_eq!(store.count(&kind).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, kind) = setup().await;
        let id = store.insert(&kind, ChangeSet::new()).await.unwrap();

        assert!(store.delete(&kind, id).await.unwrap());
        assert!(store.ids(&kind).await.unwrap().is_empty());
    }
}
