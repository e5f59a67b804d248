//! Data models for hfx-importer
//!
//! - Import job state machine and validated requests
//! - Audit log records
//! - Metric list and runtime settings

pub mod import_job;
pub mod import_request;
pub mod import_run;
pub mod metric_spec;
pub mod settings;

pub use import_job::ImportJob;
pub use import_request::ImportRequest;
pub use import_run::{AuditStatus, ImportRunRecord, RunClosure};
pub use metric_spec::{default_metrics, MetricSpec};
pub use settings::{ImportSettings, ProbePolicy};
