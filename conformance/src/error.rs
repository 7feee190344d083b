use crate::client::ClientError;
use crate::manifests::ManifestError;
use crate::polling::PollError;
use crate::roundtripper::RoundTripError;
use common::profiles::ProfileError;
use common::report::ReportError;
use thiserror::Error;

/// Suite-level errors
#[derive(Error, Debug)]
pub enum SuiteError {
    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error("failed to get GatewayClass {name}: {source}")]
    GatewayClassFetch {
        name: String,
        #[source]
        source: ClientError,
    },

    #[error("no supported features were determined for test suite")]
    NoSupportedFeatures,

    #[error("mesh features should not be populated in GatewayClass")]
    MeshFeaturesInGatewayClass,

    #[error("test suite is already running")]
    AlreadyRunning,

    #[error("can not produce a report while tests are running")]
    ReportWhileRunning,

    #[error("no test results: the suite has not been run")]
    NoResults,

    #[error("test does not exist: {0}")]
    TestNotFound(String),

    #[error("duplicate test short name: {0}")]
    DuplicateTest(String),

    #[error("CRD check failed: {0}")]
    Crds(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("invalid implementation details: {0}")]
    Implementation(#[from] ReportError),
}

/// Why a single conformance test failed
#[derive(Error, Debug)]
pub enum TestError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    RoundTrip(#[from] RoundTripError),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("test panicked: {0}")]
    Panic(String),

    #[error("test did not finish within {0:?}")]
    Timeout(std::time::Duration),
}

pub type TestResult = Result<(), TestError>;

/// Fail the current test unless `cond` holds
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::TestError::Assertion(format!($($arg)+)));
        }
    };
}
