pub mod query;
pub mod settings;
pub mod tracing_utils;
pub mod workload;
