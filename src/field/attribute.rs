//! Trait de atributo cacheado e métodos de cálculo.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{Record, Value};

use super::definition::AttributeDefinition;

/// Função de cálculo: recebe o registro dono e produz o valor a cachear.
pub type ComputeFn = Arc<dyn Fn(&Record) -> anyhow::Result<Value> + Send + Sync>;

/// Trait implementado uma vez por definição de atributo cacheado.
///
/// As operações (read, write, recalculate, flag_as_stale, expire_after)
/// vivem em [`Field`](crate::engine::Field) e são comuns a todos os
/// atributos; cada implementação só fornece a definição e o cálculo.
pub trait CachedAttribute: Send + Sync {
    /// Definição do atributo.
    fn definition(&self) -> &AttributeDefinition;

    /// Calcula o valor a partir do registro.
    fn compute(&self, record: &Record) -> anyhow::Result<Value>;

    /// Nome do atributo.
    fn name(&self) -> &str {
        &self.definition().name
    }
}

/// Atributo cacheado cujo cálculo é uma closure.
pub struct FnAttribute {
    definition: AttributeDefinition,
    compute: ComputeFn,
}

impl FnAttribute {
    /// Cria um atributo a partir de uma closure.
    pub fn new<F>(definition: AttributeDefinition, compute: F) -> Self
    where
        F: Fn(&Record) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            definition,
            compute: Arc::new(compute),
        }
    }

    /// Cria um atributo a partir de uma função já registrada.
    pub fn from_compute_fn(definition: AttributeDefinition, compute: ComputeFn) -> Self {
        Self {
            definition,
            compute,
        }
    }
}

impl CachedAttribute for FnAttribute {
    fn definition(&self) -> &AttributeDefinition {
        &self.definition
    }

    fn compute(&self, record: &Record) -> anyhow::Result<Value> {
        (self.compute)(record)
    }
}

impl std::fmt::Debug for FnAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAttribute")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Métodos de cálculo indexados por nome.
///
/// Usado para ligar `compute_method_name` da configuração a código.
#[derive(Clone, Default)]
pub struct ComputeRegistry {
    methods: HashMap<String, ComputeFn>,
}

impl ComputeRegistry {
    /// Cria um registry vazio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra um método de cálculo.
    pub fn register<F>(&mut self, method: impl Into<String>, compute: F)
    where
        F: Fn(&Record) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let method = method.into();
        tracing::debug!(method = %method, "Registering compute method");
        self.methods.insert(method, Arc::new(compute));
    }

    /// Versão encadeável de [`ComputeRegistry::register`].
    pub fn with<F>(mut self, method: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Record) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(method, compute);
        self
    }

    /// Busca um método pelo nome.
    pub fn get(&self, method: &str) -> Option<ComputeFn> {
        self.methods.get(method).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
