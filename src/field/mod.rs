//! Registro de atributos cacheados.
//!
//! Cada atributo é descrito por uma [`AttributeDefinition`] imutável e
//! implementado por um [`CachedAttribute`]. Os atributos de um tipo de
//! registro ficam num [`RecordKind`], e os tipos num [`KindRegistry`]
//! consultado pelo dispatcher.

mod attribute;
mod definition;
mod kind;

pub use attribute::{CachedAttribute, ComputeFn, ComputeRegistry, FnAttribute};
pub use definition::AttributeDefinition;
pub use kind::{schemas_from_config, KindId, KindRegistry, KindSchema, RecordKind, RecordKindBuilder};
