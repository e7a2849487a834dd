pub mod bulkload;
pub mod core;
pub mod harmonize;
pub mod reports;
