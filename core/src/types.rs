//! Shared primitive types used across the backend.

/// Opaque owning key for a user. Issued by the external identity layer.
pub type UserId = String;

/// Stable identifier for a withdrawal record.
pub type WithdrawalId = String;

/// A subscription stage number. Valid stages are 1..=5.
pub type Stage = u8;

/// Amount due for a stage, in whole currency units.
pub type Amount = i64;
