//! Gateway API Conformance Harness
//!
//! Drives registered conformance tests against a live implementation and
//! compiles their outcomes into a conformance report.

pub mod cases;
pub mod client;
pub mod conditions;
pub mod config;
pub mod error;
pub mod manifests;
pub mod metrics;
pub mod polling;
pub mod registry;
pub mod roundtripper;
pub mod suite;

pub use error::{SuiteError, TestError, TestResult};
pub use registry::{ConformanceTest, TestContext, TestRegistry};
pub use suite::{ConformanceSuite, SuiteOptions, TestOutcome, TestResultKind};
