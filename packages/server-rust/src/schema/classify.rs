//! Column type change classification.

use stencil_core::ColumnKind;

/// How a live column type relates to the type a declaration expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeChange {
    /// Already the expected type.
    Same,
    /// Widening, non-lossy conversion that may be applied automatically.
    Safe,
    /// Narrowing or unrecognized conversion; needs manual action.
    Unsafe,
}

impl TypeChange {
    /// `Same` counts as safe: there is nothing to lose.
    #[must_use]
    pub fn is_safe(self) -> bool {
        !matches!(self, Self::Unsafe)
    }
}

/// Classifies converting a column from `existing` to `expected`.
#[must_use]
pub fn classify(existing: &ColumnKind, expected: &ColumnKind) -> TypeChange {
    use ColumnKind::{Boolean, Date, Numeric, Text, Timestamp, Varchar};

    if existing == expected {
        return TypeChange::Same;
    }
    match (existing, expected) {
        (Varchar(_) | Numeric | Boolean | Timestamp | Date, Text) => TypeChange::Safe,
        (Varchar(from), Varchar(to)) if to > from => TypeChange::Safe,
        _ => TypeChange::Unsafe,
    }
}
