//! Hooks padrão do cachefield.
//!
//! Este módulo contém hooks que vêm pré-configurados:
//! - `LoggingHook`: Registra transições no log
//! - `MetricsHook`: Conta flags, recálculos e registros sumidos

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::CacheFieldResult;

use super::{Hook, HookContext, HookEvent};

const ALL_EVENTS: [HookEvent; 3] = [
    HookEvent::OnFlagged,
    HookEvent::OnRecalculated,
    HookEvent::OnVanished,
];

// ═══════════════════════════════════════════════════════════════════════════
// LoggingHook
// ═══════════════════════════════════════════════════════════════════════════

/// Hook que registra transições de staleness no log (tracing).
#[derive(Debug, Default)]
pub struct LoggingHook;

impl LoggingHook {
    /// Cria um novo LoggingHook.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Hook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    fn events(&self) -> &[HookEvent] {
        &ALL_EVENTS
    }

    async fn execute(&self, context: &HookContext<'_>) -> CacheFieldResult<()> {
        match context {
            HookContext::OnFlagged {
                kind,
                record_id,
                attribute,
                committed,
                enqueued,
            } => {
                tracing::debug!(
                    kind = %kind,
                    record_id = *record_id,
                    attribute = *attribute,
                    committed = *committed,
                    enqueued = *enqueued,
                    "Attribute flagged as stale"
                );
            }
            HookContext::OnRecalculated {
                kind,
                record_id,
                attribute,
                changes,
                committed,
            } => {
                tracing::debug!(
                    kind = %kind,
                    record_id = *record_id,
                    attribute = *attribute,
                    columns = changes.len(),
                    committed = *committed,
                    "Attribute recalculated"
                );
            }
            HookContext::OnVanished {
                kind,
                record_id,
                job_id,
            } => {
                tracing::info!(
                    kind = %kind,
                    record_id = *record_id,
                    job_id = *job_id,
                    "Recalculation skipped for vanished record"
                );
            }
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MetricsHook
// ═══════════════════════════════════════════════════════════════════════════

/// Hook que coleta contadores de staleness.
#[derive(Debug, Default)]
pub struct MetricsHook {
    /// Transições para STALE.
    flagged: AtomicU64,

    /// Jobs enfileirados por flag_as_stale.
    enqueued: AtomicU64,

    /// Recálculos concluídos.
    recalculated: AtomicU64,

    /// Recálculos não persistidos (commit adiado).
    deferred: AtomicU64,

    /// Registros que sumiram antes do job.
    vanished: AtomicU64,
}

impl MetricsHook {
    /// Cria um novo MetricsHook.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_flagged(&self) -> u64 {
        self.flagged.load(Ordering::Relaxed)
    }

    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn total_recalculated(&self) -> u64 {
        self.recalculated.load(Ordering::Relaxed)
    }

    pub fn total_deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    pub fn total_vanished(&self) -> u64 {
        self.vanished.load(Ordering::Relaxed)
    }

    /// Retorna as métricas em formato estruturado.
    pub fn metrics(&self) -> Metrics {
        Metrics {
            flagged: self.total_flagged(),
            enqueued: self.total_enqueued(),
            recalculated: self.total_recalculated(),
            deferred: self.total_deferred(),
            vanished: self.total_vanished(),
        }
    }
}

/// Métricas coletadas pelo MetricsHook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metrics {
    pub flagged: u64,
    pub enqueued: u64,
    pub recalculated: u64,
    pub deferred: u64,
    pub vanished: u64,
}

#[async_trait]
impl Hook for MetricsHook {
    fn name(&self) -> &str {
        "metrics"
    }

    fn events(&self) -> &[HookEvent] {
        &ALL_EVENTS
    }

    async fn execute(&self, context: &HookContext<'_>) -> CacheFieldResult<()> {
        match context {
            HookContext::OnFlagged { enqueued, .. } => {
                self.flagged.fetch_add(1, Ordering::Relaxed);
                if *enqueued {
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                }
            }
            HookContext::OnRecalculated { committed, .. } => {
                self.recalculated.fetch_add(1, Ordering::Relaxed);
                if !*committed {
                    self.deferred.fetch_add(1, Ordering::Relaxed);
                }
            }
            HookContext::OnVanished { .. } => {
                self.vanished.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::KindId;
    use crate::types::ChangeSet;

    #[test]
    fn test_logging_hook_name() {
        let hook = LoggingHook::new();
        assert_eq!(hook.name(), "logging");
        assert_eq!(hook.events().len(), 3);
    }

    #[tokio::test]
    async fn test_logging_hook_execute() {
        let hook = LoggingHook::new();
        let kind = KindId::new("shop", "Order");

        let result = hook
            .execute(&HookContext::OnVanished {
                kind: &kind,
                record_id: 9,
                job_id: "job-9",
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_metrics_hook_counts() {
        let hook = MetricsHook::new();
        let kind = KindId::new("shop", "Order");
        let changes = ChangeSet::new().with("cached_total", 10);

        hook.execute(&HookContext::OnFlagged {
            kind: &kind,
            record_id: 1,
            attribute: "total",
            committed: true,
            enqueued: true,
        })
        .await
        .unwrap();
        hook.execute(&HookContext::OnFlagged {
            kind: &kind,
            record_id: 2,
            attribute: "total",
            committed: false,
            enqueued: false,
        })
        .await
        .unwrap();
        hook.execute(&HookContext::OnRecalculated {
            kind: &kind,
            record_id: 1,
            attribute: "total",
            changes: &changes,
            committed: false,
        })
        .await
        .unwrap();

        assert_eq!(
            hook.metrics(),
            Metrics {
                flagged: 2,
                enqueued: 1,
                recalculated: 1,
                deferred: 1,
                vanished: 0,
            }
        );
    }

    #[test]
    fn test_metrics_hook_empty() {
        let hook = MetricsHook::new();
        assert_eq!(hook.total_flagged(), 0);
        assert_eq!(hook.total_recalculated(), 0);
        assert_eq!(hook.total_vanished(), 0);
    }
}
