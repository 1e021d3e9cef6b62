//! Fila de jobs de recálculo.
//!
//! Um job carrega apenas (store-kind, record-kind, id): é um pedido para
//! reconciliar todos os atributos stale do registro, não um atributo
//! específico. Entrega é at-least-once e sem garantia de ordem; não existe
//! cancelamento.
//!
//! ## Implementações
//!
//! - [`ChannelQueue`]/[`ChannelSource`]: canal tokio em processo
//! - [`MemoryQueue`]: fila em memória que também serve de fonte
//! - [`SqliteQueue`]: fila durável com timeout de visibilidade

mod channel;
mod job;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use channel::{channel, ChannelQueue, ChannelSource};
pub use job::{Delivery, RecalculationJob};
pub use memory::MemoryQueue;
#[cfg(feature = "sqlite")]
pub use sqlite::{QueuedJob, SqliteQueue};

use async_trait::async_trait;

use crate::CacheFieldResult;

/// Lado produtor da fila.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Envia um job. Não espera a execução.
    async fn enqueue(&self, job: RecalculationJob) -> CacheFieldResult<()>;
}

/// Resultado de uma tentativa de receber um job.
#[derive(Debug)]
pub enum Received {
    /// Um job pronto para processar.
    Job(Delivery),

    /// Nada disponível agora.
    Idle,

    /// A fila foi fechada e não entregará mais nada.
    Closed,
}

/// Lado consumidor da fila, usado pelo worker.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Espera pelo próximo job.
    ///
    /// Fontes que não conseguem esperar (polling) devolvem [`Received::Idle`].
    async fn receive(&self) -> CacheFieldResult<Received>;

    /// Recebe sem esperar.
    async fn try_receive(&self) -> CacheFieldResult<Received>;

    /// Confirma o processamento (ou descarta o job).
    async fn complete(&self, delivery: &Delivery) -> CacheFieldResult<()>;

    /// Devolve o job para nova tentativa.
    async fn retry(&self, delivery: Delivery) -> CacheFieldResult<()>;
}
