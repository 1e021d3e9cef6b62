//! Sistema de hooks do cachefield.
//!
//! Hooks observam as transições de estado dos atributos cacheados:
//!
//! - `on_flagged`: Atributo marcado como stale
//! - `on_recalculated`: Valor recalculado
//! - `on_vanished`: Job de recálculo encontrou o registro removido
//!
//! Hooks são observadores: uma falha é registrada no log e não desfaz
//! nem interrompe a operação que a disparou.

mod builtin;

pub use builtin::{LoggingHook, Metrics, MetricsHook};

use std::sync::Arc;

use async_trait::async_trait;

use crate::field::KindId;
use crate::types::{ChangeSet, RecordId};
use crate::CacheFieldResult;

// ═══════════════════════════════════════════════════════════════════════════
// Tipos de eventos
// ═══════════════════════════════════════════════════════════════════════════

/// Evento que dispara um hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// Atributo passou de FRESH para STALE.
    OnFlagged,

    /// Atributo passou por RECALCULATING e voltou a FRESH.
    OnRecalculated,

    /// Registro sumiu antes do job de recálculo rodar.
    OnVanished,
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookEvent::OnFlagged => write!(f, "on_flagged"),
            HookEvent::OnRecalculated => write!(f, "on_recalculated"),
            HookEvent::OnVanished => write!(f, "on_vanished"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Contexto de hooks
// ═══════════════════════════════════════════════════════════════════════════

/// Contexto passado para hooks.
pub enum HookContext<'a> {
    /// Contexto para on_flagged.
    OnFlagged {
        kind: &'a KindId,
        record_id: RecordId,
        attribute: &'a str,
        /// Se a mudança foi persistida.
        committed: bool,
        /// Se um job de recálculo foi enfileirado.
        enqueued: bool,
    },

    /// Contexto para on_recalculated.
    OnRecalculated {
        kind: &'a KindId,
        record_id: RecordId,
        attribute: &'a str,
        /// Colunas escritas (ou pendentes, se não persistido).
        changes: &'a ChangeSet,
        committed: bool,
    },

    /// Contexto para on_vanished.
    OnVanished {
        kind: &'a KindId,
        record_id: RecordId,
        job_id: &'a str,
    },
}

impl<'a> HookContext<'a> {
    /// Retorna o evento correspondente ao contexto.
    pub fn event(&self) -> HookEvent {
        match self {
            HookContext::OnFlagged { .. } => HookEvent::OnFlagged,
            HookContext::OnRecalculated { .. } => HookEvent::OnRecalculated,
            HookContext::OnVanished { .. } => HookEvent::OnVanished,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Trait Hook
// ═══════════════════════════════════════════════════════════════════════════

/// Trait para hooks customizáveis.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Nome do hook.
    fn name(&self) -> &str;

    /// Eventos que disparam este hook.
    fn events(&self) -> &[HookEvent];

    /// Executa o hook.
    async fn execute(&self, context: &HookContext<'_>) -> CacheFieldResult<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Sistema de hooks
// ═══════════════════════════════════════════════════════════════════════════

/// Gerenciador de hooks.
pub struct HookSystem {
    on_flagged: Vec<Arc<dyn Hook>>,
    on_recalculated: Vec<Arc<dyn Hook>>,
    on_vanished: Vec<Arc<dyn Hook>>,
}

impl HookSystem {
    /// Cria um novo sistema de hooks vazio.
    pub fn new() -> Self {
        Self {
            on_flagged: Vec::new(),
            on_recalculated: Vec::new(),
            on_vanished: Vec::new(),
        }
    }

    /// Cria um sistema com hooks padrão (logging).
    pub fn with_defaults() -> Self {
        let mut system = Self::new();
        system.register(Arc::new(LoggingHook));
        system
    }

    /// Registra um hook em todos os eventos que ele declara.
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        for event in hook.events() {
            tracing::debug!(
                hook_name = hook.name(),
                event = %event,
                "Registering hook"
            );

            let hooks = match event {
                HookEvent::OnFlagged => &mut self.on_flagged,
                HookEvent::OnRecalculated => &mut self.on_recalculated,
                HookEvent::OnVanished => &mut self.on_vanished,
            };
            hooks.push(Arc::clone(&hook));
        }
    }

    /// Executa os hooks do evento do contexto.
    pub async fn run(&self, context: HookContext<'_>) {
        let hooks = match context.event() {
            HookEvent::OnFlagged => &self.on_flagged,
            HookEvent::OnRecalculated => &self.on_recalculated,
            HookEvent::OnVanished => &self.on_vanished,
        };

        for hook in hooks {
            if let Err(e) = hook.execute(&context).await {
                tracing::warn!(
                    hook_name = hook.name(),
                    event = %context.event(),
                    error = %e,
                    "Hook failed"
                );
            }
        }
    }

    /// Retorna o número total de registros de hooks.
    pub fn count(&self) -> usize {
        self.on_flagged.len() + self.on_recalculated.len() + self.on_vanished.len()
    }

    /// Retorna o número de hooks para um evento específico.
    pub fn count_for_event(&self, event: HookEvent) -> usize {
        match event {
            HookEvent::OnFlagged => self.on_flagged.len(),
            HookEvent::OnRecalculated => self.on_recalculated.len(),
            HookEvent::OnVanished => self.on_vanished.len(),
        }
    }
}

impl Default for HookSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheFieldError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Hook de teste que conta execuções
    struct CountingHook {
        events: Vec<HookEvent>,
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Hook for CountingHook {
        fn name(&self) -> &str {
            "counting"
        }

        fn events(&self) -> &[HookEvent] {
            &self.events
        }

        async fn execute(&self, _context: &HookContext<'_>) -> CacheFieldResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CacheFieldError::other("boom"));
            }
            Ok(())
        }
    }

    fn counting(events: &[HookEvent], count: Arc<AtomicUsize>, fail: bool) -> Arc<dyn Hook> {
        Arc::new(CountingHook {
            events: events.to_vec(),
            count,
            fail,
        })
    }

    #[test]
    fn test_hook_registration_per_event() {
        let mut system = HookSystem::new();
        let count = Arc::new(AtomicUsize::new(0));

        system.register(counting(
            &[HookEvent::OnFlagged, HookEvent::OnVanished],
            count,
            false,
        ));

        assert_eq!(system.count(), 2);
        assert_eq!(system.count_for_event(HookEvent::OnFlagged), 1);
        assert_eq!(system.count_for_event(HookEvent::OnRecalculated), 0);
        assert_eq!(system.count_for_event(HookEvent::OnVanished), 1);
    }

    #[tokio::test]
    async fn test_run_only_matching_event() {
        let mut system = HookSystem::new();
        let count = Arc::new(AtomicUsize::new(0));
        system.register(counting(&[HookEvent::OnFlagged], count.clone(), false));

        let kind = KindId::new("shop", "Order");
        system
            .run(HookContext::OnVanished {
                kind: &kind,
                record_id: 1,
                job_id: "job-1",
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        system
            .run(HookContext::OnFlagged {
                kind: &kind,
                record_id: 1,
                attribute: "total",
                committed: true,
                enqueued: true,
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_stop_chain() {
        let mut system = HookSystem::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        system.register(counting(&[HookEvent::OnRecalculated], first.clone(), true));
        system.register(counting(&[HookEvent::OnRecalculated], second.clone(), false));

        let kind = KindId::new("shop", "Order");
        let changes = ChangeSet::new();
        system
            .run(HookContext::OnRecalculated {
                kind: &kind,
                record_id: 1,
                attribute: "total",
                changes: &changes,
                committed: true,
            })
            .await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_event_display() {
        assert_eq!(format!("{}", HookEvent::OnFlagged), "on_flagged");
        assert_eq!(format!("{}", HookEvent::OnRecalculated), "on_recalculated");
        assert_eq!(format!("{}", HookEvent::OnVanished), "on_vanished");
    }

    #[test]
    fn test_defaults_register_logging() {
        let system = HookSystem::with_defaults();
        assert_eq!(system.count(), 3);
    }
}
