//! `ModelStat` facade and the aggregate query API.

use std::fmt;

use crate::cost::CostConfig;
use crate::error::{Error, Result};
use crate::hook::ModelHook;
use crate::model::Model;
use crate::reporter;
use crate::stat_tree::{StatNode, StatTree};

/// Scale family for human-readable formatting: decimal steps for operation
/// counts, binary steps for byte counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Decimal,
    Binary,
}

/// A metric total, either raw or scaled to a suffixed string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricValue {
    Raw(u64),
    Scaled(String),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Raw(v) => write!(f, "{}", v),
            MetricValue::Scaled(s) => write!(f, "{}", s),
        }
    }
}

/// Scale a value to a K/M/G-suffixed string. Thresholds are strictly
/// greater-than, and the two decimal places are truncated, not rounded.
pub fn clever_format(value: u64, scale: Scale) -> String {
    let (kilo, mega, giga) = match scale {
        Scale::Decimal => (1_000u64, 1_000_000u64, 1_000_000_000u64),
        Scale::Binary => (1u64 << 10, 1u64 << 20, 1u64 << 30),
    };
    let (unit, suffix) = if value > giga {
        (giga, "G")
    } else if value > mega {
        (mega, "M")
    } else if value > kilo {
        (kilo, "K")
    } else {
        return value.to_string();
    };
    let truncated = (value as f64 / unit as f64 * 100.0).floor() / 100.0;
    format!("{:.2}{}", truncated, suffix)
}

fn format_total(value: u64, scale: Scale, clever: bool) -> MetricValue {
    if clever {
        MetricValue::Scaled(clever_format(value, scale))
    } else {
        MetricValue::Raw(value)
    }
}

/// Single entry point tying instrumentation, tree construction and
/// aggregation together for one `(model, input_size)` pair.
pub struct ModelStat<'a> {
    model: &'a Model,
    input_size: Vec<usize>,
    query_granularity: usize,
    debug: bool,
    config: CostConfig,
}

impl<'a> ModelStat<'a> {
    /// `input_size` must be `(channels, height, width)`; the batch dimension
    /// is fixed at 1.
    pub fn new(model: &'a Model, input_size: &[usize]) -> Result<Self> {
        if input_size.len() != 3 {
            return Err(Error::InvalidInputShape(input_size.to_vec()));
        }
        Ok(Self {
            model,
            input_size: input_size.to_vec(),
            query_granularity: 1,
            debug: false,
            config: CostConfig::default(),
        })
    }

    pub fn query_granularity(mut self, granularity: usize) -> Self {
        self.query_granularity = granularity;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn element_bytes(mut self, bytes: usize) -> Self {
        self.config.element_bytes = bytes;
        self
    }

    /// Run one instrumented forward pass and return the collected nodes at
    /// the configured granularity. Each call builds a fresh tree.
    pub fn analyze(&self) -> Result<Vec<StatNode>> {
        let hook = ModelHook::new(self.model, &self.input_size, self.config, self.debug)?;
        let records = hook.retrieve_leaf_records()?;
        let tree = StatTree::from_leaf_records(&records);
        Ok(tree.collected_nodes(self.query_granularity))
    }

    /// Analyze and print the formatted report
    pub fn show_report(&self) -> Result<()> {
        let nodes = self.analyze()?;
        println!("{}", reporter::report_format(&nodes));
        Ok(())
    }

    /// Total multiply-adds across the collected nodes
    pub fn total_madd(&self) -> Result<u64> {
        Ok(self.analyze()?.iter().map(|n| n.madd).sum())
    }

    /// Total FLOPs across the collected nodes
    pub fn total_flops(&self) -> Result<u64> {
        Ok(self.analyze()?.iter().map(|n| n.flops).sum())
    }

    /// Total memory across the collected nodes, parameter and activation
    /// bytes summed to one scalar
    pub fn total_memory(&self) -> Result<u64> {
        Ok(self
            .analyze()?
            .iter()
            .map(|n| n.memory[0] + n.memory[1])
            .sum())
    }
}

/// Collected stat nodes for `model` at `input_size`
pub fn get_stat(
    model: &Model,
    input_size: &[usize],
    query_granularity: usize,
    debug: bool,
) -> Result<Vec<StatNode>> {
    ModelStat::new(model, input_size)?
        .query_granularity(query_granularity)
        .debug(debug)
        .analyze()
}

/// Analyze and print the per-module report
pub fn show_stat(
    model: &Model,
    input_size: &[usize],
    query_granularity: usize,
    debug: bool,
) -> Result<()> {
    ModelStat::new(model, input_size)?
        .query_granularity(query_granularity)
        .debug(debug)
        .show_report()
}

/// Total FLOPs for one forward pass
pub fn cal_flops(model: &Model, input_size: &[usize], clever: bool) -> Result<MetricValue> {
    let total = ModelStat::new(model, input_size)?.total_flops()?;
    Ok(format_total(total, Scale::Decimal, clever))
}

/// Total multiply-adds for one forward pass
pub fn cal_madd(model: &Model, input_size: &[usize], clever: bool) -> Result<MetricValue> {
    let total = ModelStat::new(model, input_size)?.total_madd()?;
    Ok(format_total(total, Scale::Decimal, clever))
}

/// Total memory (parameter plus activation bytes) for one forward pass
pub fn cal_memory(model: &Model, input_size: &[usize], clever: bool) -> Result<MetricValue> {
    let total = ModelStat::new(model, input_size)?.total_memory()?;
    Ok(format_total(total, Scale::Binary, clever))
}

/// Total learnable parameter count. Computed from the model's static
/// parameter tensors; no forward pass is run.
pub fn cal_params(model: &Model, clever: bool) -> MetricValue {
    format_total(model.num_params(), Scale::Decimal, clever)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_threshold_is_strictly_greater_than() {
        assert_eq!(clever_format(1000, Scale::Decimal), "1000");
        assert_eq!(clever_format(1001, Scale::Decimal), "1.00K");
        assert_eq!(clever_format(1_000_000, Scale::Decimal), "1000.00K");
        assert_eq!(clever_format(1_000_001, Scale::Decimal), "1.00M");
    }

    #[test]
    fn binary_threshold_is_strictly_greater_than() {
        assert_eq!(clever_format(1024, Scale::Binary), "1024");
        assert_eq!(clever_format(1025, Scale::Binary), "1.00K");
        assert_eq!(clever_format(3 * (1 << 20), Scale::Binary), "3.00M");
    }

    #[test]
    fn scaling_truncates_instead_of_rounding() {
        // 1999/1000 = 1.999 renders as 1.99K, not 2.00K
        assert_eq!(clever_format(1999, Scale::Decimal), "1.99K");
        assert_eq!(clever_format(1_999_999, Scale::Decimal), "1.99M");
    }

    #[test]
    fn metric_value_displays_both_forms() {
        assert_eq!(MetricValue::Raw(42).to_string(), "42");
        assert_eq!(MetricValue::Scaled("1.50K".to_string()).to_string(), "1.50K");
    }
}
