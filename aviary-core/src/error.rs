use crate::ports::Slot;

/// Errors produced by the `aviary-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A resource profile string could not be parsed.
    #[error("unknown resource profile '{value}': expected low, medium or high")]
    UnknownProfile { value: String },

    /// A slot index was outside the valid range.
    #[error("invalid slot {value}: must be between 1 and {}", Slot::MAX)]
    InvalidSlot { value: u16 },
}
