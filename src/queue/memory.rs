//! Fila em memória.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{CacheFieldError, CacheFieldResult};

use super::{Delivery, JobSource, RecalculationJob, Received, TaskQueue};

/// Fila FIFO em memória.
///
/// Serve tanto de produtor quanto de fonte; nunca fecha, então
/// [`JobSource::receive`] devolve `Idle` quando está vazia.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<Delivery>>,
}

impl MemoryQueue {
    /// Cria uma fila vazia.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs pendentes, em ordem.
    pub fn jobs(&self) -> Vec<RecalculationJob> {
        self.pending
            .lock()
            .map(|pending| pending.iter().map(|d| d.job.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, delivery: Delivery) -> CacheFieldResult<()> {
        self.pending
            .lock()
            .map_err(|_| CacheFieldError::other("memory queue lock poisoned"))?
            .push_back(delivery);
        Ok(())
    }

    fn pop(&self) -> CacheFieldResult<Received> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| CacheFieldError::other("memory queue lock poisoned"))?;
        Ok(match pending.pop_front() {
            Some(delivery) => Received::Job(delivery),
            None => Received::Idle,
        })
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, job: RecalculationJob) -> CacheFieldResult<()> {
        tracing::debug!(job_id = %job.job_id, record_id = job.record_id, "Job enqueued");
        self.push(Delivery::first(job))
    }
}

#[async_trait]
impl JobSource for MemoryQueue {
    async fn receive(&self) -> CacheFieldResult<Received> {
        self.pop()
    }

    async fn try_receive(&self) -> CacheFieldResult<Received> {
        self.pop()
    }

    async fn complete(&self, _delivery: &Delivery) -> CacheFieldResult<()> {
        Ok(())
    }

    async fn retry(&self, delivery: Delivery) -> CacheFieldResult<()> {
        self.push(delivery.next_attempt())
    }
}
