pub mod csv_sink;
pub mod schema;

pub use csv_sink::{CsvSink, RecordSink};
pub use schema::{Metric, MetricKind, RecordSchema};
