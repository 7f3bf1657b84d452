//! Per-operation-kind cost model.
//!
//! Pure functions from an operation plus captured shapes to multiply-add
//! counts, floating-point operation counts, parameter counts and byte sizes.
//! Unknown operation kinds cost zero and are logged, never fatal.

pub mod flops;
pub mod madd;
pub mod memory;

use crate::model::Op;

/// Cost-model configuration. `element_bytes` is the byte width of one
/// tensor element (4 for f32).
#[derive(Debug, Clone, Copy)]
pub struct CostConfig {
    pub element_bytes: usize,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self { element_bytes: 4 }
    }
}

/// Metrics for one leaf unit at one captured shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitCost {
    pub madd: u64,
    pub flops: u64,
    pub parameter_quantity: u64,
    pub parameter_bytes: u64,
    pub activation_bytes: u64,
}

/// Compute the full cost of one unit for one forward pass at the captured
/// input/output shapes.
pub fn compute(op: &Op, input_shape: &[usize], output_shape: &[usize], config: CostConfig) -> UnitCost {
    if let Op::Custom(kind) = op {
        log::warn!(
            "unknown operation kind '{}': metrics default to zero",
            kind
        );
        return UnitCost::default();
    }
    let (parameter_bytes, activation_bytes) = memory::compute_memory(op, output_shape, config);
    UnitCost {
        madd: madd::compute_madd(op, input_shape, output_shape),
        flops: flops::compute_flops(op, input_shape, output_shape),
        parameter_quantity: op.parameter_count(),
        parameter_bytes,
        activation_bytes,
    }
}

/// Product of the output dimensions excluding the batch dimension
pub(crate) fn out_elements(output_shape: &[usize]) -> u64 {
    if output_shape.is_empty() {
        return 0;
    }
    output_shape[1..].iter().map(|&d| d as u64).product()
}

/// Product of the input dimensions excluding the last (feature) dimension
pub(crate) fn leading_elements(input_shape: &[usize]) -> u64 {
    if input_shape.is_empty() {
        return 0;
    }
    input_shape[..input_shape.len() - 1]
        .iter()
        .map(|&d| d as u64)
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Op {
        Op::Conv2d {
            in_channels: 3,
            out_channels: 16,
            kernel_size: (3, 3),
            stride: (1, 1),
            padding: (1, 1),
            groups: 1,
            bias: true,
        }
    }

    #[test]
    fn conv_cost_matches_formulas() {
        let input = [1, 3, 8, 8];
        let output = [1, 16, 8, 8];
        let cost = compute(&conv(), &input, &output, CostConfig::default());

        let out_elems = 16 * 8 * 8u64;
        let kernel_ops = 3 * 3 * 3u64;
        assert_eq!(cost.madd, out_elems * kernel_ops);
        assert_eq!(cost.flops, out_elems * (2 * kernel_ops - 1) + out_elems);
        assert_eq!(cost.parameter_quantity, 16 * 3 * 3 * 3 + 16);
        assert_eq!(cost.parameter_bytes, cost.parameter_quantity * 4);
        assert_eq!(cost.activation_bytes, out_elems * 4);
    }

    #[test]
    fn unknown_kind_costs_zero() {
        let op = Op::Custom("Mystery".to_string());
        let cost = compute(&op, &[1, 3, 8, 8], &[1, 3, 8, 8], CostConfig::default());
        assert_eq!(cost, UnitCost::default());
    }

    #[test]
    fn zero_sized_dimension_zeroes_metrics() {
        let cost = compute(&conv(), &[1, 3, 8, 8], &[1, 16, 0, 8], CostConfig::default());
        assert_eq!(cost.madd, 0);
        assert_eq!(cost.flops, 0);
        assert_eq!(cost.activation_bytes, 0);
        // Parameter storage is static and unaffected by the dead shape
        assert_eq!(cost.parameter_quantity, 16 * 3 * 3 * 3 + 16);
    }

    #[test]
    fn cost_is_deterministic() {
        let input = [1, 3, 8, 8];
        let output = [1, 16, 8, 8];
        let a = compute(&conv(), &input, &output, CostConfig::default());
        let b = compute(&conv(), &input, &output, CostConfig::default());
        assert_eq!(a, b);
    }
}
