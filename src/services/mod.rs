//! Business logic services.

pub mod config_prep;
pub mod driver;
pub mod process;
pub mod report;
pub mod retention;
pub mod verdict;

pub use config_prep::{ConfigPreparer, FsConfigPreparer};
pub use driver::JobDriver;
pub use report::{HtmlReportReconciler, NullReconciler, ReportReconciler};
pub use retention::{RetentionConfig, start_retention_task};
