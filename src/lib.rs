pub mod cost;
pub mod error;
pub mod hook;
pub mod model;
pub mod reporter;
pub mod stat_tree;
pub mod statistics;

// Re-export commonly used types
pub use cost::{CostConfig, UnitCost};
pub use error::{Error, Result};
pub use hook::{LeafUnitRecord, ModelHook};
pub use model::{ForwardObserver, HookToken, Model, Op, OpKind, Tensor, Unit, UnitId};
pub use reporter::{report_format, to_json, write_csv};
pub use stat_tree::{StatNode, StatTree};
pub use statistics::{
    cal_flops, cal_madd, cal_memory, cal_params, clever_format, get_stat, show_stat, MetricValue,
    ModelStat, Scale,
};
