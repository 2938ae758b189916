//! Usage Accounting

pub mod recorder;

pub use recorder::{KeySummary, ModelSummary, UsageEvent, UsageRecord, UsageRecorder};
