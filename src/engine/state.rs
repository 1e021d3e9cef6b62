//! Estado de um atributo cacheado.

use chrono::{DateTime, Utc};

use crate::field::AttributeDefinition;
use crate::types::Record;

/// Motivo pelo qual o valor armazenado não é confiável.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Coluna de armazenamento é NULL.
    MissingValue,

    /// Flag de staleness ligada.
    Flagged,

    /// Expiração no passado (só com gatilhos temporais).
    Expired,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::MissingValue => write!(f, "missing_value"),
            StaleReason::Flagged => write!(f, "flagged"),
            StaleReason::Expired => write!(f, "expired"),
        }
    }
}

/// Estado de um par (registro, atributo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    /// Valor confiável.
    Fresh,

    /// Precisa ser recalculado antes de ser usado.
    Stale(StaleReason),

    /// Recálculo em andamento neste processo. Nunca é persistido.
    Recalculating,
}

impl FieldState {
    pub fn is_fresh(&self) -> bool {
        matches!(self, FieldState::Fresh)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, FieldState::Stale(_))
    }

    /// Motivo da staleness, se houver.
    pub fn reason(&self) -> Option<StaleReason> {
        match self {
            FieldState::Stale(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldState::Fresh => write!(f, "fresh"),
            FieldState::Stale(reason) => write!(f, "stale ({})", reason),
            FieldState::Recalculating => write!(f, "recalculating"),
        }
    }
}

/// Avalia o estado persistido do atributo no registro.
///
/// Ordem de verificação: valor ausente, flag, expiração. A expiração só é
/// considerada quando o atributo tem gatilhos temporais.
pub fn evaluate(definition: &AttributeDefinition, record: &Record, now: DateTime<Utc>) -> FieldState {
    if record.get(&definition.storage_column).is_null() {
        return FieldState::Stale(StaleReason::MissingValue);
    }

    if record.flag(&definition.stale_flag_column) {
        return FieldState::Stale(StaleReason::Flagged);
    }

    let expired = definition
        .expiration_column
        .as_deref()
        .and_then(|column| record.timestamp(column))
        .is_some_and(|expires| expires < now);
    if expired {
        return FieldState::Stale(StaleReason::Expired);
    }

    FieldState::Fresh
}
