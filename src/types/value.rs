//! Valores de coluna, registros e change-sets.
//!
//! O store persiste colunas tipadas; o cachefield só precisa de um
//! conjunto pequeno de tipos escalares para guardar o valor calculado,
//! a flag de staleness e o timestamp de expiração.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chave primária de um registro.
pub type RecordId = i64;

/// Valor de uma coluna.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Retorna true se o valor é nulo.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Interpreta o valor como booleano.
    ///
    /// Stores SQL devolvem booleanos como inteiros 0/1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Interpreta o valor como timestamp.
    ///
    /// Aceita tanto `Timestamp` quanto texto RFC 3339 (formato usado no SQLite).
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Conjunto de colunas pendentes para uma escrita parcial.
///
/// Vazio significa "nada a escrever": persistir um change-set vazio
/// não gera escrita no store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    columns: BTreeMap<String, Value>,
}

impl ChangeSet {
    /// Cria um change-set vazio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define uma coluna.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Versão encadeável de [`ChangeSet::set`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Incorpora outro change-set. Em conflito, vence `other`.
    pub fn merge(&mut self, other: ChangeSet) {
        self.columns.extend(other.columns);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }
}

impl IntoIterator for ChangeSet {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl FromIterator<(String, Value)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Cópia em memória de um registro do store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Chave primária.
    pub id: RecordId,

    /// Colunas carregadas.
    pub columns: BTreeMap<String, Value>,
}

impl Record {
    /// Cria um registro sem colunas.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            columns: BTreeMap::new(),
        }
    }

    /// Adiciona uma coluna (builder).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Lê uma coluna. Colunas ausentes são tratadas como NULL.
    pub fn get(&self, column: &str) -> &Value {
        self.columns.get(column).unwrap_or(&Value::Null)
    }

    /// Escreve uma coluna apenas em memória.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Lê uma coluna booleana; NULL ou ausente vira `false`.
    pub fn flag(&self, column: &str) -> bool {
        self.get(column).as_bool().unwrap_or(false)
    }

    /// Lê uma coluna de timestamp.
    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get(column).as_timestamp()
    }

    /// Aplica um change-set em memória.
    pub fn apply(&mut self, changes: &ChangeSet) {
        for (column, value) in changes.iter() {
            self.columns.insert(column.clone(), value.clone());
        }
    }
}
