pub mod aggregation;
pub mod point;
pub mod retention;
pub mod series;

pub use aggregation::AggregationMethod;
pub use point::Point;
pub use retention::{Retention, validate_archive_list};
pub use series::{FetchedSeries, SeriesInfo};
