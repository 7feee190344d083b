//! Gateway Conformance Common Types
//!
//! Feature catalog, conformance profiles and the report model shared by the
//! harness and anything that consumes its reports.

pub mod features;
pub mod profiles;
pub mod report;

pub use features::{Feature, FeatureChannel, FeatureName, FeatureRegistry, FeatureResource, FeatureSet};
pub use profiles::{ConformanceProfile, ProfileError, ProfileName, ProfileRegistry, Tier};
pub use report::{
    ConformanceReport, ExtendedStatus, Implementation, ProfileReport, ResultKind, Statistics,
    Status,
};
