//! Byte-size accounting: parameter storage and inference-time activations.

use crate::model::Op;

use super::CostConfig;

/// Returns `(parameter_bytes, activation_bytes)` for one unit. Parameter
/// storage is static; activation storage is the full element count of the
/// captured output tensor.
pub fn compute_memory(op: &Op, output_shape: &[usize], config: CostConfig) -> (u64, u64) {
    let parameter_bytes = op.parameter_count() * config.element_bytes as u64;
    let activation_elems: u64 = if output_shape.is_empty() {
        0
    } else {
        output_shape.iter().map(|&d| d as u64).product()
    };
    (parameter_bytes, activation_elems * config.element_bytes as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_memory_split() {
        let op = Op::Linear {
            in_features: 4,
            out_features: 2,
            bias: true,
        };
        let (params, activations) = compute_memory(&op, &[1, 2], CostConfig::default());
        assert_eq!(params, (4 * 2 + 2) * 4);
        assert_eq!(activations, 2 * 4);
    }

    #[test]
    fn element_width_is_configurable() {
        let op = Op::ReLU;
        let (params, activations) =
            compute_memory(&op, &[1, 8], CostConfig { element_bytes: 2 });
        assert_eq!(params, 0);
        assert_eq!(activations, 16);
    }
}
