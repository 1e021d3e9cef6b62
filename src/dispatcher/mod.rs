//! Dispatcher de recálculo.
//!
//! Consome jobs da fila e reconcilia o registro inteiro: todo atributo
//! com a flag de staleness ligada no momento da execução é recalculado e
//! persistido. Um job nunca diz qual atributo mudou.
//!
//! - [`Dispatcher`]: processa um job
//! - [`Worker`]: loop consumidor com concorrência limitada e retentativas
//! - [`Sweeper`]: varredura periódica que enfileira registros stale

mod sweeper;
mod worker;

pub use sweeper::{SweepReport, Sweeper, MIN_SWEEP_INTERVAL};
pub use worker::{Worker, WorkerOptions, WorkerReport};

use std::sync::Arc;

use crate::engine::{CachedFields, Commit};
use crate::field::KindRegistry;
use crate::hooks::HookContext;
use crate::queue::RecalculationJob;
use crate::{CacheFieldError, CacheFieldResult};

/// Resultado de um job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// O registro não existe mais. Não é erro.
    Vanished,

    /// Atributos recalculados (vazio se o registro já estava fresco).
    Reconciled { recalculated: Vec<String> },
}

impl DispatchOutcome {
    pub fn is_vanished(&self) -> bool {
        matches!(self, DispatchOutcome::Vanished)
    }

    /// Atributos recalculados.
    pub fn recalculated(&self) -> &[String] {
        match self {
            DispatchOutcome::Vanished => &[],
            DispatchOutcome::Reconciled { recalculated } => recalculated,
        }
    }
}

/// Processa jobs de recálculo.
pub struct Dispatcher {
    registry: Arc<KindRegistry>,
    fields: Arc<CachedFields>,
}

impl Dispatcher {
    pub fn new(registry: Arc<KindRegistry>, fields: Arc<CachedFields>) -> Self {
        Self { registry, fields }
    }

    pub fn registry(&self) -> &Arc<KindRegistry> {
        &self.registry
    }

    pub fn fields(&self) -> &Arc<CachedFields> {
        &self.fields
    }

    /// Reconcilia todos os atributos stale do registro do job.
    ///
    /// Idempotente: num registro já fresco não escreve nada. Um registro
    /// ausente (ou removido no meio da reconciliação) devolve
    /// [`DispatchOutcome::Vanished`].
    pub async fn dispatch(&self, job: &RecalculationJob) -> CacheFieldResult<DispatchOutcome> {
        let kind = self
            .registry
            .get(&job.store_kind, &job.record_kind)
            .ok_or_else(|| CacheFieldError::UnknownKind(job.kind_id().to_string()))?;

        let Some(mut record) = self.fields.store().get(kind.schema(), job.record_id).await? else {
            return Ok(self.vanished(job).await);
        };

        let mut recalculated = Vec::new();
        for attribute in kind.attributes() {
            if !record.flag(&attribute.definition().stale_flag_column) {
                continue;
            }

            let field = self.fields.field(&kind, attribute.name())?;
            match field.recalculate(&mut record, Commit::Immediate).await {
                Ok(_) => recalculated.push(attribute.name().to_string()),
                Err(e) if e.is_vanished() => return Ok(self.vanished(job).await),
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            job_id = %job.job_id,
            kind = %kind.id(),
            record_id = job.record_id,
            recalculated = recalculated.len(),
            "Record reconciled"
        );

        Ok(DispatchOutcome::Reconciled { recalculated })
    }

    async fn vanished(&self, job: &RecalculationJob) -> DispatchOutcome {
        let kind = job.kind_id();
        tracing::warn!(
            job_id = %job.job_id,
            kind = %kind,
            record_id = job.record_id,
            "Record vanished before recalculation job ran"
        );

        self.fields
            .hooks()
            .run(HookContext::OnVanished {
                kind: &kind,
                record_id: job.record_id,
                job_id: &job.job_id,
            })
            .await;

        DispatchOutcome::Vanished
    }
}
