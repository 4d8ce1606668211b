mod criteria;
mod flatten;
mod like;
mod manual;
mod order;
mod projection;
#[allow(clippy::module_inception)]
mod query;

pub use criteria::{restrict, Criterion, Junction, PropertyCriterion};
pub use flatten::flatten;
pub use like::{eval_like, LikePattern};
pub use manual::apply_projections;
pub use order::{apply_order, apply_pagination};
pub use projection::{Direction, Order, Projection};
pub use query::{resolve_id_shortcut, Query, QueryResult};

pub(crate) use order::compare_for_sort;
