//! Applicant CV tagging: retrieve candidates from the tracking service, extract and classify
//! their CVs, export a report, and push the derived tags back once a reviewer confirms.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
