pub mod aggregator;
pub mod model;
pub mod schedule;
