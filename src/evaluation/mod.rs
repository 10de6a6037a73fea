/// Hit-rate / NDCG evaluation on logged test sessions
pub mod evaluator;
pub mod metrics;
pub mod report;

pub use evaluator::{Evaluator, SESSIONS_PER_BATCH};
pub use metrics::{HitAccumulator, TOPK};
pub use report::{CutoffMetrics, EvalReport, MetricsLog, ScalarSeries};
