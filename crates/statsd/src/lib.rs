//! StatsD text wire model: line splitting, value group parsing and counter
//! value formatting.
mod fmt;
mod line;

pub use fmt::format_counter;
pub use line::{Groups, Line, MetricKind, ParseError, ValueGroup, split_lines};
