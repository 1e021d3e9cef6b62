//! Job de recálculo e entrega.

use serde::{Deserialize, Serialize};

use crate::field::KindId;
use crate::types::RecordId;

/// Pedido para reconciliar todos os atributos stale de um registro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculationJob {
    /// ID único do job (apenas para logs).
    pub job_id: String,

    /// Store-kind do registro.
    pub store_kind: String,

    /// Record-kind do registro.
    pub record_kind: String,

    /// Chave primária do registro.
    pub record_id: RecordId,
}

impl RecalculationJob {
    /// Cria um job para o registro.
    pub fn new(kind: &KindId, record_id: RecordId) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            store_kind: kind.store.clone(),
            record_kind: kind.name.clone(),
            record_id,
        }
    }

    /// Identidade do tipo alvo.
    pub fn kind_id(&self) -> KindId {
        KindId::new(&self.store_kind, &self.record_kind)
    }
}

/// Um job entregue ao worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub job: RecalculationJob,

    /// Número da tentativa (começa em 1).
    pub attempt: u32,

    /// Identificador do job na fila durável.
    pub receipt: Option<i64>,
}

impl Delivery {
    /// Primeira entrega de um job.
    pub fn first(job: RecalculationJob) -> Self {
        Self {
            job,
            attempt: 1,
            receipt: None,
        }
    }

    /// Próxima tentativa do mesmo job.
    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}
