//! Position sizing and exit decisions.
//!
//! - Signal-scaled target sizes capped at a multiple of the base allocation
//! - Asymmetric stop-loss / take-profit per symbol profile
//! - Threshold-gated rebalancing toward the target quantity

mod exit;
mod sizing;

pub use exit::{ExitPolicy, ExitReason, RebalanceOrder};
pub use sizing::{PositionSizer, TargetPosition};
