//! Colunas exigidas pelos atributos cacheados e migração do SQLite.

use rusqlite::Connection;

use crate::field::KindSchema;
use crate::CacheFieldResult;

/// Coluna exigida por um atributo cacheado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Nome da coluna.
    pub name: String,

    /// Declaração SQL usada no `ALTER TABLE ... ADD COLUMN`.
    pub declaration: String,
}

/// Colunas exigidas por todos os atributos do tipo.
///
/// A flag de staleness nasce `NOT NULL DEFAULT 1`, então linhas antigas
/// passam a ser recalculadas na primeira leitura.
pub fn column_specs(kind: &KindSchema) -> Vec<ColumnSpec> {
    let mut specs = Vec::new();
    for attribute in kind.attributes() {
        specs.push(ColumnSpec {
            name: attribute.storage_column.clone(),
            declaration: attribute.column_type.clone().unwrap_or_default(),
        });
        specs.push(ColumnSpec {
            name: attribute.stale_flag_column.clone(),
            declaration: "BOOLEAN NOT NULL DEFAULT 1".to_string(),
        });
        if let Some(expiration) = &attribute.expiration_column {
            specs.push(ColumnSpec {
                name: expiration.clone(),
                declaration: "TEXT".to_string(),
            });
        }
    }
    specs
}

/// Quota um identificador SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Colunas existentes numa tabela (vazio se a tabela não existe).
pub(crate) fn table_columns(conn: &Connection, table: &str) -> CacheFieldResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Colunas exigidas que faltam na tabela.
pub(crate) fn missing_columns(conn: &Connection, kind: &KindSchema) -> CacheFieldResult<Vec<String>> {
    let existing = table_columns(conn, kind.table())?;
    Ok(column_specs(kind)
        .into_iter()
        .filter(|spec| !existing.contains(&spec.name))
        .map(|spec| spec.name)
        .collect())
}

/// Cria a tabela (se preciso) e adiciona as colunas que faltam.
///
/// Retorna os nomes das colunas adicionadas.
pub(crate) fn ensure_schema(conn: &Connection, kind: &KindSchema) -> CacheFieldResult<Vec<String>> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT);",
        quote_ident(kind.table())
    ))?;

    let existing = table_columns(conn, kind.table())?;
    let mut added = Vec::new();

    for spec in column_specs(kind) {
        if existing.contains(&spec.name) {
            continue;
        }

        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            quote_ident(kind.table()),
            quote_ident(&spec.name),
            spec.declaration
        ))?;

        tracing::info!(
            kind = %kind.id(),
            table = kind.table(),
            column = %spec.name,
            "Column added"
        );
        added.push(spec.name);
    }

    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{AttributeDefinition, KindId};

    fn schema() -> KindSchema {
        KindSchema::new(
            KindId::new("shop", "Order"),
            "orders",
            vec![
                AttributeDefinition::new("total").with_column_type("REAL"),
                AttributeDefinition::new("score").with_temporal_triggers(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_column_specs() {
        let specs = column_specs(&schema());
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "cached_total",
                "total_recalculation_needed",
                "cached_score",
                "score_recalculation_needed",
                "score_expires_after",
            ]
        );
        assert_eq!(specs[0].declaration, "REAL");
        assert_eq!(specs[2].declaration, "");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("orders"), "\"orders\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_ensure_schema_adds_missing_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE orders (id INTEGER PRIMARY KEY, cached_total REAL);")
            .unwrap();

        let kind = schema();
        let missing = missing_columns(&conn, &kind).unwrap();
        assert_eq!(missing.len(), 4);
        assert!(!missing.contains(&"cached_total".to_string()));

        let added = ensure_schema(&conn, &kind).unwrap();
        assert_eq!(added, missing);
        assert!(missing_columns(&conn, &kind).unwrap().is_empty());

        // Idempotente
        assert!(ensure_schema(&conn, &kind).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_schema_creates_table() {
        let conn = Connection::open_in_memory().unwrap();
        let kind = schema();

        ensure_schema(&conn, &kind).unwrap();

        let columns = table_columns(&conn, "orders").unwrap();
        assert!(columns.contains(&"id".to_string()));
        assert!(columns.contains(&"score_expires_after".to_string()));
    }
}
