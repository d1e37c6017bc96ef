//! HTML parsers for job search result pages.

pub mod job_card;

pub use job_card::{CompiledRules, ExtractionRules, JobCardParser};
