//! Read-side analytics: issue detection, composite analysis, and the
//! fluent query builder.

pub mod analysis;
pub mod builder;
pub mod detector;
pub mod models;

pub use analysis::AnalysisEngine;
pub use builder::QueryBuilder;
pub use detector::IssueDetector;
pub use models::{
    ErrorTrendReport, HealthReport, HealthStatus, Issue, IssueClass, IssueDetail, SecurityPosture,
    SecurityReport, SeverityBand, Trend, TrendDirection, TrendReport, Window,
};
