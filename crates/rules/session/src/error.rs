//! Session-layer errors.

use rules_core::{CostError, EligibilityError, EvalError, PurchaseError, RetractError, SlotError};

/// Errors surfaced by a character session.
///
/// Core rejections pass through unchanged; `Closed` means the worker task is
/// gone (registry removal or runtime shutdown).
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    #[error("character session is closed")]
    Closed,

    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    #[error(transparent)]
    Eligibility(#[from] EligibilityError),

    #[error(transparent)]
    Cost(#[from] CostError),

    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error(transparent)]
    Retract(#[from] RetractError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub(crate) type Result<T> = std::result::Result<T, SessionError>;
