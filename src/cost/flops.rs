//! Floating-point operation counts per operation kind.
//!
//! FLOPs count multiplies and adds separately: an N-term dot product is
//! N multiplies plus N-1 adds, plus one more add when a bias is present.

use crate::model::Op;

use super::{leading_elements, madd::spatial_extent, out_elements};

pub fn compute_flops(op: &Op, input_shape: &[usize], output_shape: &[usize]) -> u64 {
    let out_elems = out_elements(output_shape);
    match op {
        Op::Conv2d {
            in_channels,
            kernel_size,
            groups,
            bias,
            ..
        } => {
            let kernel_ops = (kernel_size.0 * kernel_size.1 * (in_channels / groups)) as u64;
            let per_elem = (2 * kernel_ops).saturating_sub(1) + u64::from(*bias);
            out_elems * per_elem
        }
        Op::Linear {
            in_features,
            out_features,
            bias,
        } => {
            let lead = leading_elements(input_shape);
            let per_out = (2 * *in_features as u64).saturating_sub(1) + u64::from(*bias);
            lead * (*out_features as u64) * per_out
        }
        // Scale and shift: one multiply, one add per element
        Op::BatchNorm2d { .. } => 2 * out_elems,
        Op::ReLU | Op::LeakyReLU | Op::Sigmoid | Op::Tanh => out_elems,
        Op::MaxPool2d { kernel_size, .. } => {
            ((kernel_size.0 * kernel_size.1) as u64).saturating_sub(1) * out_elems
        }
        // Window sum plus the divide
        Op::AvgPool2d { kernel_size, .. } => (kernel_size.0 * kernel_size.1) as u64 * out_elems,
        Op::GlobalAvgPool2d => spatial_extent(input_shape) as u64 * out_elems,
        Op::Container | Op::Flatten | Op::Dropout | Op::Custom(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_flops_without_bias() {
        let op = Op::Linear {
            in_features: 4,
            out_features: 2,
            bias: false,
        };
        // 2 outputs, each 4 multiplies + 3 adds
        assert_eq!(compute_flops(&op, &[1, 1, 1, 4], &[1, 1, 1, 2]), 14);
    }

    #[test]
    fn linear_bias_adds_one_per_output() {
        let op = Op::Linear {
            in_features: 4,
            out_features: 2,
            bias: true,
        };
        assert_eq!(compute_flops(&op, &[1, 1, 1, 4], &[1, 1, 1, 2]), 16);
    }

    #[test]
    fn avg_pool_pays_for_divide() {
        let op = Op::AvgPool2d {
            kernel_size: (2, 2),
            stride: (2, 2),
            padding: (0, 0),
        };
        assert_eq!(compute_flops(&op, &[1, 8, 8, 8], &[1, 8, 4, 4]), 4 * 8 * 4 * 4);
    }

    #[test]
    fn batch_norm_is_two_ops_per_element() {
        let op = Op::BatchNorm2d {
            num_features: 8,
            affine: true,
        };
        assert_eq!(compute_flops(&op, &[1, 8, 4, 4], &[1, 8, 4, 4]), 2 * 8 * 4 * 4);
    }
}
