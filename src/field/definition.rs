//! Definição imutável de um atributo cacheado.

use crate::types::config::AttributeOptions;
use crate::{CacheFieldError, CacheFieldResult};

/// Configuração resolvida de um atributo cacheado.
///
/// Todos os nomes de coluna já estão resolvidos (padrão ou override).
/// `expiration_column` só existe quando os gatilhos temporais estão ativos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDefinition {
    /// Identificador do atributo.
    pub name: String,

    /// Nome do método de cálculo registrado.
    pub compute_method_name: String,

    /// Coluna com o último valor calculado.
    pub storage_column: String,

    /// Coluna booleana: true = recalcular antes de confiar no valor.
    pub stale_flag_column: String,

    /// Coluna de expiração (apenas com gatilhos temporais).
    pub expiration_column: Option<String>,

    /// Se `flag_as_stale` enfileira recálculo por padrão.
    pub eager_recalculation_default: bool,

    /// Tipo SQL da coluna de armazenamento.
    pub column_type: Option<String>,
}

impl AttributeDefinition {
    /// Cria uma definição com os nomes padrão.
    ///
    /// Recálculo eager vem ligado; use [`with_eager_recalculation`](Self::with_eager_recalculation)
    /// para trocar.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            compute_method_name: default_compute_method_name(&name),
            storage_column: default_storage_column(&name),
            stale_flag_column: default_stale_flag_column(&name),
            expiration_column: None,
            eager_recalculation_default: true,
            column_type: None,
            name,
        }
    }

    /// Resolve as opções de configuração.
    ///
    /// `eager_default` é o valor usado quando a opção não define
    /// `eager_recalculation_default`.
    pub fn from_options(options: &AttributeOptions, eager_default: bool) -> CacheFieldResult<Self> {
        let name = options.name.trim();
        let mut definition = Self::new(name);

        if let Some(method) = &options.compute_method_name {
            definition.compute_method_name = method.clone();
        }
        if let Some(column) = &options.storage_column_name {
            definition.storage_column = column.clone();
        }
        if let Some(column) = &options.stale_flag_column_name {
            definition.stale_flag_column = column.clone();
        }
        if options.temporal_triggers {
            definition.expiration_column = Some(
                options
                    .expiration_column_name
                    .clone()
                    .unwrap_or_else(|| default_expiration_column(name)),
            );
        } else if options.expiration_column_name.is_some() {
            tracing::warn!(
                attribute = name,
                "expiration_column_name ignored: temporal_triggers is disabled"
            );
        }
        definition.eager_recalculation_default =
            options.eager_recalculation_default.unwrap_or(eager_default);
        definition.column_type = options.column_type.clone();

        definition.validate()?;
        Ok(definition)
    }

    /// Define o método de cálculo.
    pub fn with_compute_method(mut self, method: impl Into<String>) -> Self {
        self.compute_method_name = method.into();
        self
    }

    /// Troca a coluna de armazenamento.
    pub fn with_storage_column(mut self, column: impl Into<String>) -> Self {
        self.storage_column = column.into();
        self
    }

    /// Troca a coluna da flag de staleness.
    pub fn with_stale_flag_column(mut self, column: impl Into<String>) -> Self {
        self.stale_flag_column = column.into();
        self
    }

    /// Liga os gatilhos temporais com a coluna padrão.
    pub fn with_temporal_triggers(mut self) -> Self {
        self.expiration_column = Some(default_expiration_column(&self.name));
        self
    }

    /// Liga os gatilhos temporais com uma coluna específica.
    pub fn with_expiration_column(mut self, column: impl Into<String>) -> Self {
        self.expiration_column = Some(column.into());
        self
    }

    pub fn with_eager_recalculation(mut self, eager: bool) -> Self {
        self.eager_recalculation_default = eager;
        self
    }

    pub fn with_column_type(mut self, column_type: impl Into<String>) -> Self {
        self.column_type = Some(column_type.into());
        self
    }

    /// Retorna true se a expiração participa da staleness.
    pub fn temporal_triggers(&self) -> bool {
        self.expiration_column.is_some()
    }

    /// Colunas persistidas por este atributo.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = vec![self.storage_column.as_str(), self.stale_flag_column.as_str()];
        if let Some(expiration) = &self.expiration_column {
            columns.push(expiration.as_str());
        }
        columns
    }

    /// Valida nomes e colisões de colunas.
    pub fn validate(&self) -> CacheFieldResult<()> {
        if self.name.is_empty() {
            return Err(CacheFieldError::config("atributo sem nome"));
        }

        let columns = self.columns();
        if columns.iter().any(|c| c.is_empty()) {
            return Err(CacheFieldError::config(format!(
                "atributo '{}' com nome de coluna vazio",
                self.name
            )));
        }

        for (i, column) in columns.iter().enumerate() {
            if columns[i + 1..].contains(column) {
                return Err(CacheFieldError::config(format!(
                    "atributo '{}' usa a coluna '{}' mais de uma vez",
                    self.name, column
                )));
            }
        }

        Ok(())
    }
}

fn default_compute_method_name(name: &str) -> String {
    format!("calculate_{}", name)
}

fn default_storage_column(name: &str) -> String {
    format!("cached_{}", name)
}

fn default_stale_flag_column(name: &str) -> String {
    format!("{}_recalculation_needed", name)
}

fn default_expiration_column(name: &str) -> String {
    format!("{}_expires_after", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let def = AttributeDefinition::new("score");

        assert_eq!(def.compute_method_name, "calculate_score");
        assert_eq!(def.storage_column, "cached_score");
        assert_eq!(def.stale_flag_column, "score_recalculation_needed");
        assert!(def.expiration_column.is_none());
        assert!(!def.temporal_triggers());
        assert!(def.eager_recalculation_default);
    }

    #[test]
    fn test_temporal_default_column() {
        let def = AttributeDefinition::new("score").with_temporal_triggers();
        assert_eq!(def.expiration_column.as_deref(), Some("score_expires_after"));
        assert_eq!(def.columns().len(), 3);
    }

    #[test]
    fn test_from_options_overrides() {
        let options = AttributeOptions {
            name: "total".to_string(),
            compute_method_name: Some("sum_lines".to_string()),
            storage_column_name: Some("total_cache".to_string()),
            stale_flag_column_name: Some("total_dirty".to_string()),
            temporal_triggers: true,
            expiration_column_name: Some("total_ttl".to_string()),
            eager_recalculation_default: None,
            column_type: Some("REAL".to_string()),
        };

        let def = AttributeDefinition::from_options(&options, false).unwrap();

        assert_eq!(def.compute_method_name, "sum_lines");
        assert_eq!(def.storage_column, "total_cache");
        assert_eq!(def.stale_flag_column, "total_dirty");
        assert_eq!(def.expiration_column.as_deref(), Some("total_ttl"));
        assert!(!def.eager_recalculation_default);
        assert_eq!(def.column_type.as_deref(), Some("REAL"));
    }

    #[test]
    fn test_expiration_name_without_temporal_is_ignored() {
        let mut options = AttributeOptions::new("total");
        options.expiration_column_name = Some("total_ttl".to_string());

        let def = AttributeDefinition::from_options(&options, true).unwrap();
        assert!(def.expiration_column.is_none());
    }

    #[test]
    fn test_attribute_eager_overrides_global() {
        let mut options = AttributeOptions::new("total");
        options.eager_recalculation_default = Some(true);

        let def = AttributeDefinition::from_options(&options, false).unwrap();
        assert!(def.eager_recalculation_default);
    }

    #[test]
    fn test_validate_rejects_column_collision() {
        let def = AttributeDefinition::new("score").with_stale_flag_column("cached_score");
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let options = AttributeOptions::new("  ");
        assert!(AttributeDefinition::from_options(&options, true).is_err());
    }
}
