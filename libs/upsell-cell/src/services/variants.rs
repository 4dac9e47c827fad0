use rand::Rng;

use crate::models::{CopyVariant, PositionVariant, Variant};

/// Weighted A/B assignment, drawn fresh per invocation (not per user).
/// Given a fixed random source the assignment is pure, which is what the
/// experiment analysis relies on.
#[derive(Debug, Clone)]
pub struct VariantPicker {
    copy_a_weight: f64,
    position_immediate_weight: f64,
}

impl VariantPicker {
    pub fn new(copy_a_weight: f64, position_immediate_weight: f64) -> Self {
        Self {
            copy_a_weight: copy_a_weight.clamp(0.0, 1.0),
            position_immediate_weight: position_immediate_weight.clamp(0.0, 1.0),
        }
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> Variant {
        let copy = if rng.gen::<f64>() < self.copy_a_weight {
            CopyVariant::A
        } else {
            CopyVariant::B
        };
        let position = if rng.gen::<f64>() < self.position_immediate_weight {
            PositionVariant::Immediate
        } else {
            PositionVariant::Delay10
        };
        Variant { copy, position }
    }
}
