//! Query disciplines and result aggregation.

mod result_set;
mod threshold;

pub use result_set::{ResultEntry, ResultSet, ResultTuple};
pub use threshold::RunningThreshold;
