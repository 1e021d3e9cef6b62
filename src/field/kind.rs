//! Tipos de registro e o registry de tipos.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::config::{Config, KindConfig};
use crate::types::{ChangeSet, Value};
use crate::{CacheFieldError, CacheFieldResult};

use super::attribute::{CachedAttribute, ComputeRegistry, FnAttribute};
use super::definition::AttributeDefinition;

/// Identidade de um tipo de registro: (store-kind, record-kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KindId {
    /// Store-kind (aplicação dona do tipo).
    pub store: String,

    /// Record-kind.
    pub name: String,
}

impl KindId {
    pub fn new(store: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            name: name.into(),
        }
    }

    /// Nome de tabela padrão: `<store>_<name>` em minúsculas.
    pub fn default_table(&self) -> String {
        format!("{}_{}", self.store, self.name).to_lowercase()
    }
}

impl std::fmt::Display for KindId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.store, self.name)
    }
}

/// Formato persistido de um tipo: tabela e definições dos atributos.
///
/// Não conhece os métodos de cálculo; é o que a CLI e o sweeper precisam.
#[derive(Debug, Clone)]
pub struct KindSchema {
    id: KindId,
    table: String,
    attributes: Vec<AttributeDefinition>,
}

impl KindSchema {
    /// Cria e valida um schema.
    pub fn new(
        id: KindId,
        table: impl Into<String>,
        attributes: Vec<AttributeDefinition>,
    ) -> CacheFieldResult<Self> {
        let schema = Self {
            id,
            table: table.into(),
            attributes,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Resolve o schema a partir da configuração.
    pub fn from_config(kind: &KindConfig, eager_default: bool) -> CacheFieldResult<Self> {
        let id = KindId::new(&kind.store, &kind.name);
        let table = kind.table.clone().unwrap_or_else(|| id.default_table());
        let attributes = kind
            .attributes
            .iter()
            .map(|options| AttributeDefinition::from_options(options, eager_default))
            .collect::<CacheFieldResult<Vec<_>>>()?;

        Self::new(id, table, attributes)
    }

    pub fn id(&self) -> &KindId {
        &self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    /// Busca a definição de um atributo.
    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Valores iniciais das colunas de cache para um registro novo.
    ///
    /// Valor NULL, flag de staleness TRUE (a primeira leitura calcula) e
    /// expiração NULL.
    pub fn defaults(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        for attribute in &self.attributes {
            changes.set(&attribute.storage_column, Value::Null);
            changes.set(&attribute.stale_flag_column, true);
            if let Some(expiration) = &attribute.expiration_column {
                changes.set(expiration, Value::Null);
            }
        }
        changes
    }

    fn validate(&self) -> CacheFieldResult<()> {
        if self.table.trim().is_empty() {
            return Err(CacheFieldError::config(format!("{} sem tabela", self.id)));
        }

        let mut names = std::collections::HashSet::new();
        let mut columns = std::collections::HashSet::new();

        for attribute in &self.attributes {
            attribute.validate()?;

            if !names.insert(attribute.name.as_str()) {
                return Err(CacheFieldError::config(format!(
                    "atributo '{}' definido duas vezes em {}",
                    attribute.name, self.id
                )));
            }

            for column in attribute.columns() {
                if column == "id" || !columns.insert(column) {
                    return Err(CacheFieldError::config(format!(
                        "coluna '{}' de '{}' colide com outra coluna de {}",
                        column, attribute.name, self.id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Tipo de registro com seus atributos cacheados.
pub struct RecordKind {
    schema: KindSchema,
    attributes: Vec<Arc<dyn CachedAttribute>>,
}

impl RecordKind {
    /// Inicia um builder.
    pub fn builder(store: impl Into<String>, name: impl Into<String>) -> RecordKindBuilder {
        RecordKindBuilder {
            id: KindId::new(store, name),
            table: None,
            attributes: Vec::new(),
        }
    }

    /// Monta o tipo a partir da configuração, resolvendo os métodos de cálculo.
    pub fn from_config(
        kind: &KindConfig,
        methods: &ComputeRegistry,
        eager_default: bool,
    ) -> CacheFieldResult<Self> {
        let schema = KindSchema::from_config(kind, eager_default)?;

        let attributes = schema
            .attributes()
            .iter()
            .map(|definition| -> CacheFieldResult<Arc<dyn CachedAttribute>> {
                let compute = methods.get(&definition.compute_method_name).ok_or_else(|| {
                    CacheFieldError::config(format!(
                        "método '{}' do atributo '{}' em {} não registrado",
                        definition.compute_method_name,
                        definition.name,
                        schema.id()
                    ))
                })?;
                Ok(Arc::new(FnAttribute::from_compute_fn(
                    definition.clone(),
                    compute,
                )))
            })
            .collect::<CacheFieldResult<Vec<_>>>()?;

        Ok(Self { schema, attributes })
    }

    pub fn id(&self) -> &KindId {
        self.schema.id()
    }

    pub fn schema(&self) -> &KindSchema {
        &self.schema
    }

    /// Atributos na ordem de definição.
    pub fn attributes(&self) -> &[Arc<dyn CachedAttribute>] {
        &self.attributes
    }

    /// Busca um atributo pelo nome.
    pub fn attribute(&self, name: &str) -> CacheFieldResult<&Arc<dyn CachedAttribute>> {
        self.attributes
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| CacheFieldError::UnknownAttribute {
                kind: self.id().to_string(),
                attribute: name.to_string(),
            })
    }
}

impl std::fmt::Debug for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordKind")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Builder de [`RecordKind`].
pub struct RecordKindBuilder {
    id: KindId,
    table: Option<String>,
    attributes: Vec<Arc<dyn CachedAttribute>>,
}

impl RecordKindBuilder {
    /// Define a tabela (padrão: `<store>_<name>`).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Adiciona um atributo calculado por uma closure.
    pub fn attribute<F>(self, definition: AttributeDefinition, compute: F) -> Self
    where
        F: Fn(&crate::types::Record) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.cached(Arc::new(FnAttribute::new(definition, compute)))
    }

    /// Adiciona uma implementação própria de [`CachedAttribute`].
    pub fn cached(mut self, attribute: Arc<dyn CachedAttribute>) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Valida e constrói o tipo.
    pub fn build(self) -> CacheFieldResult<RecordKind> {
        let table = self.table.unwrap_or_else(|| self.id.default_table());
        let definitions = self
            .attributes
            .iter()
            .map(|a| a.definition().clone())
            .collect();
        let schema = KindSchema::new(self.id, table, definitions)?;

        Ok(RecordKind {
            schema,
            attributes: self.attributes,
        })
    }
}

/// Registry de tipos, indexado por (store-kind, record-kind).
#[derive(Default)]
pub struct KindRegistry {
    kinds: HashMap<KindId, Arc<RecordKind>>,
}

impl KindRegistry {
    /// Cria um registry vazio.
    pub fn new() -> Self {
        Self::default()
    }

    /// Monta todos os tipos da configuração.
    pub fn from_config(config: &Config, methods: &ComputeRegistry) -> CacheFieldResult<Self> {
        let mut registry = Self::new();
        for kind in &config.kinds {
            registry.register(RecordKind::from_config(
                kind,
                methods,
                config.recalculation.eager_default,
            )?)?;
        }
        Ok(registry)
    }

    /// Registra um tipo. Registrar o mesmo id duas vezes é erro.
    pub fn register(&mut self, kind: RecordKind) -> CacheFieldResult<Arc<RecordKind>> {
        let id = kind.id().clone();
        if self.kinds.contains_key(&id) {
            return Err(CacheFieldError::config(format!("{} registrado duas vezes", id)));
        }

        tracing::debug!(
            kind = %id,
            attributes = kind.attributes().len(),
            "Registering record kind"
        );

        let kind = Arc::new(kind);
        self.kinds.insert(id, Arc::clone(&kind));
        Ok(kind)
    }

    /// Busca um tipo pelos identificadores de um job.
    pub fn get(&self, store: &str, name: &str) -> Option<Arc<RecordKind>> {
        self.kinds.get(&KindId::new(store, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecordKind>> {
        self.kinds.values()
    }
}

/// Resolve os schemas de todos os tipos configurados (sem métodos de cálculo).
pub fn schemas_from_config(config: &Config) -> CacheFieldResult<Vec<KindSchema>> {
    config
        .kinds
        .iter()
        .map(|kind| KindSchema::from_config(kind, config.recalculation.eager_default))
        .collect()
}
