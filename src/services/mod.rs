// Service modules for the aggregation pipeline

pub mod expander;
pub mod shuffle;
pub mod snapshot;
pub mod trakt;
