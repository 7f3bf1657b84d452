//! Multiply-add counts per operation kind.
//!
//! MAdd is the multiply-accumulate count: one fused multiply-and-add is one
//! MAdd. Comparison-based operations (max pooling, ReLU) count one MAdd per
//! elementary comparison.

use crate::model::Op;

use super::{leading_elements, out_elements};

pub fn compute_madd(op: &Op, input_shape: &[usize], output_shape: &[usize]) -> u64 {
    let out_elems = out_elements(output_shape);
    match op {
        Op::Conv2d {
            in_channels,
            kernel_size,
            groups,
            ..
        } => {
            let kernel_ops = (kernel_size.0 * kernel_size.1 * (in_channels / groups)) as u64;
            out_elems * kernel_ops
        }
        Op::Linear {
            in_features,
            out_features,
            ..
        } => leading_elements(input_shape) * (*in_features as u64) * (*out_features as u64),
        // Inference-time batch norm folds to one scale-and-shift per element
        Op::BatchNorm2d { .. } => out_elems,
        Op::ReLU | Op::LeakyReLU | Op::Sigmoid | Op::Tanh => out_elems,
        Op::MaxPool2d { kernel_size, .. } | Op::AvgPool2d { kernel_size, .. } => {
            window_madd(kernel_size.0 * kernel_size.1, out_elems)
        }
        Op::GlobalAvgPool2d => {
            let window = spatial_extent(input_shape);
            window_madd(window, out_elems)
        }
        Op::Container | Op::Flatten | Op::Dropout | Op::Custom(_) => 0,
    }
}

/// `window - 1` combining steps per output element
fn window_madd(window: usize, out_elems: u64) -> u64 {
    (window as u64).saturating_sub(1) * out_elems
}

pub(super) fn spatial_extent(input_shape: &[usize]) -> usize {
    if input_shape.len() < 3 {
        return 0;
    }
    input_shape[2..].iter().product()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_madd_is_in_times_out() {
        let op = Op::Linear {
            in_features: 4,
            out_features: 2,
            bias: false,
        };
        assert_eq!(compute_madd(&op, &[1, 1, 1, 4], &[1, 1, 1, 2]), 8);
    }

    #[test]
    fn max_pool_counts_comparisons_per_window() {
        let op = Op::MaxPool2d {
            kernel_size: (2, 2),
            stride: (2, 2),
            padding: (0, 0),
        };
        // 3 comparisons per 2x2 window, 8*4*4 windows
        assert_eq!(compute_madd(&op, &[1, 8, 8, 8], &[1, 8, 4, 4]), 3 * 8 * 4 * 4);
    }

    #[test]
    fn global_avg_pool_uses_full_spatial_window() {
        assert_eq!(
            compute_madd(&Op::GlobalAvgPool2d, &[1, 8, 7, 7], &[1, 8, 1, 1]),
            48 * 8
        );
    }

    #[test]
    fn passthrough_ops_cost_nothing() {
        assert_eq!(compute_madd(&Op::Flatten, &[1, 8, 4, 4], &[1, 128]), 0);
        assert_eq!(compute_madd(&Op::Dropout, &[1, 128], &[1, 128]), 0);
    }
}
