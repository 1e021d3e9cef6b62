//! Fila em processo sobre um canal tokio.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::{CacheFieldError, CacheFieldResult};

use super::{Delivery, JobSource, RecalculationJob, Received, TaskQueue};

/// Cria um par produtor/consumidor com a capacidade dada.
pub fn channel(capacity: usize) -> (ChannelQueue, ChannelSource) {
    let capacity = capacity.max(1);
    let (sender, receiver) = mpsc::channel(capacity);
    let retry = sender.downgrade();
    (
        ChannelQueue { sender, capacity },
        ChannelSource {
            receiver: Mutex::new(receiver),
            retry,
        },
    )
}

/// Produtor: clonável, um por chamador.
///
/// `enqueue` nunca espera: com o canal cheio retorna
/// [`CacheFieldError::QueueFull`] e o registro continua marcado como stale
/// para a próxima varredura.
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<Delivery>,
    capacity: usize,
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn enqueue(&self, job: RecalculationJob) -> CacheFieldResult<()> {
        tracing::debug!(
            job_id = %job.job_id,
            store_kind = %job.store_kind,
            record_kind = %job.record_kind,
            record_id = job.record_id,
            "Job enqueued"
        );
        self.sender
            .try_send(Delivery::first(job))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => CacheFieldError::QueueFull {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => CacheFieldError::QueueClosed,
            })
    }
}

/// Consumidor. O canal fecha quando todos os [`ChannelQueue`] somem.
pub struct ChannelSource {
    receiver: Mutex<mpsc::Receiver<Delivery>>,
    // Fraco para não manter o canal aberto sozinho.
    retry: mpsc::WeakSender<Delivery>,
}

#[async_trait]
impl JobSource for ChannelSource {
    async fn receive(&self) -> CacheFieldResult<Received> {
        let mut receiver = self.receiver.lock().await;
        Ok(match receiver.recv().await {
            Some(delivery) => Received::Job(delivery),
            None => Received::Closed,
        })
    }

    async fn try_receive(&self) -> CacheFieldResult<Received> {
        let mut receiver = self.receiver.lock().await;
        Ok(match receiver.try_recv() {
            Ok(delivery) => Received::Job(delivery),
            Err(mpsc::error::TryRecvError::Empty) => Received::Idle,
            Err(mpsc::error::TryRecvError::Disconnected) => Received::Closed,
        })
    }

    async fn complete(&self, _delivery: &Delivery) -> CacheFieldResult<()> {
        Ok(())
    }

    /// Espera por espaço no canal. O chamador não deve segurar recursos de
    /// que o consumidor precise para drenar a fila.
    async fn retry(&self, delivery: Delivery) -> CacheFieldResult<()> {
        let sender = self.retry.upgrade().ok_or(CacheFieldError::QueueClosed)?;
        sender
            .send(delivery.next_attempt())
            .await
            .map_err(|_| CacheFieldError::QueueClosed)
    }
}
