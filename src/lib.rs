//! # cachefield
//!
//! Atributos derivados, calculados sob demanda e cacheados junto do registro.
//!
//! Um atributo cacheado guarda o último valor calculado numa coluna do
//! registro, uma flag de staleness e, opcionalmente, um timestamp de
//! expiração. A leitura de um valor stale recalcula na hora; marcar como
//! stale pode enfileirar um job para o dispatcher recalcular depois.
//!
//! ## Módulos
//!
//! - [`field`] - Definições de atributos e registro de tipos
//! - [`engine`] - Máquina de estados de staleness e recálculo
//! - [`store`] - Persistência dos registros (memória, SQLite)
//! - [`queue`] - Fila de jobs de recálculo
//! - [`dispatcher`] - Consumo de jobs, worker e varredura
//! - [`hooks`] - Sistema de hooks para observar transições
//! - [`cli`] - Interface de linha de comando
//! - [`types`] - Tipos compartilhados
//!
//! ## Exemplo
//!
//! ```no_run
//! use std::sync::Arc;
//! use cachefield::engine::CachedFields;
//! use cachefield::field::{AttributeDefinition, RecordKind};
//! use cachefield::queue::MemoryQueue;
//! use cachefield::store::{MemoryStore, RecordStore};
//! use cachefield::types::{ChangeSet, Value};
//!
//! # async fn example() -> cachefield::CacheFieldResult<()> {
//! let kind = RecordKind::builder("game", "Player")
//!     .attribute(AttributeDefinition::new("score"), |_| Ok(Value::Integer(42)))
//!     .build()?;
//!
//! let store = Arc::new(MemoryStore::new());
//! let fields = CachedFields::new(store.clone(), Arc::new(MemoryQueue::new()));
//!
//! let id = store.insert(kind.schema(), ChangeSet::new()).await?;
//! let mut player = fields.load(kind.schema(), id).await?;
//! let score = fields.field(&kind, "score")?.read(&mut player).await?;
//! assert_eq!(score, Value::Integer(42));
//! # Ok(())
//! # }
//! ```

#[cfg(all(feature = "cli", feature = "sqlite"))]
pub mod cli;
pub mod dispatcher;
pub mod engine;
pub mod field;
pub mod hooks;
pub mod queue;
pub mod store;
pub mod types;

pub use types::config::Config;
pub use types::errors::{CacheFieldError, CacheFieldResult};
