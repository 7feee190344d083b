use crate::registry::ConformanceTest;
use common::FeatureName;
use std::fmt;
use std::time::Duration;

/// Result of one test in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestResultKind {
    Succeeded,
    Failed,
    Skipped,
    NotSupported,
    /// Excluded from reporting entirely
    ProvisionalSkipped,
}

impl TestResultKind {
    /// Whether the test body ran
    pub fn executed(&self) -> bool {
        matches!(self, TestResultKind::Succeeded | TestResultKind::Failed)
    }
}

impl fmt::Display for TestResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestResultKind::Succeeded => "Succeeded",
            TestResultKind::Failed => "Failed",
            TestResultKind::Skipped => "Skipped",
            TestResultKind::NotSupported => "NotSupported",
            TestResultKind::ProvisionalSkipped => "ProvisionalSkipped",
        };
        f.write_str(s)
    }
}

/// Outcome of one test, recorded in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub short_name: String,
    pub features: Vec<FeatureName>,
    pub provisional: bool,
    pub result: TestResultKind,
    /// Failure message, when the body failed
    pub message: Option<String>,
    pub duration: Option<Duration>,
}

impl TestOutcome {
    pub fn new(test: &ConformanceTest, result: TestResultKind) -> Self {
        Self {
            short_name: test.short_name.clone(),
            features: test.features.clone(),
            provisional: test.provisional,
            result,
            message: None,
            duration: None,
        }
    }
}
