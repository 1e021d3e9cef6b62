//! Tipos de erro do cachefield.

use thiserror::Error;

/// Tipo de resultado padrão do cachefield.
pub type CacheFieldResult<T> = Result<T, CacheFieldError>;

/// Erros possíveis no cachefield.
#[derive(Error, Debug)]
pub enum CacheFieldError {
    #[error("Erro de configuração: {0}")]
    Config(String),

    #[error("Erro de IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro ao parsear TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Erro ao serializar TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[cfg(feature = "sqlite")]
    #[error("Erro de banco de dados: {0}")]
    Database(#[from] rusqlite::Error),

    /// O registro não existe mais no store (removido antes do job rodar).
    #[error("Registro {kind} com id {id} não existe")]
    RecordNotFound { kind: String, id: i64 },

    #[error("Tipo de registro '{0}' não registrado")]
    UnknownKind(String),

    #[error("Atributo '{attribute}' não definido em {kind}")]
    UnknownAttribute { kind: String, attribute: String },

    /// O método de cálculo do usuário falhou.
    #[error("Falha ao calcular '{attribute}': {source}")]
    Compute {
        attribute: String,
        #[source]
        source: anyhow::Error,
    },

    /// A escrita no store falhou. Memória e store podem divergir.
    #[error("Falha de persistência: {0}")]
    Persistence(String),

    #[error("Fila de recálculo fechada")]
    QueueClosed,

    /// A fila em processo está cheia; o job não foi aceito.
    #[error("Fila de recálculo cheia (capacidade {capacity})")]
    QueueFull { capacity: usize },

    #[error("{0}")]
    Other(String),
}

impl CacheFieldError {
    /// Cria um erro genérico.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Cria um erro de configuração.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Cria um erro de persistência.
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// Indica que o registro alvo sumiu do store.
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }

    /// Indica falha ao escrever no store.
    pub fn is_persistence(&self) -> bool {
        match self {
            Self::Persistence(_) => true,
            #[cfg(feature = "sqlite")]
            Self::Database(_) => true,
            _ => false,
        }
    }
}
