//! facegate-core: offline classical face matching.
//!
//! A face locator finds the most prominent face, a feature extractor turns
//! it into intensity and local-binary-pattern histograms plus patch
//! samples, a directory-backed store keeps one record per identity, and
//! the matcher scores a query against every stored identity.

pub mod detector;
pub mod features;
pub mod matcher;
pub mod raster;
pub mod scoring;
pub mod store;
pub mod types;

pub use detector::{
    DetectionPass, DetectorError, DetectorKind, FaceDetector, FaceLocator, LocatePolicy, LocatorConfig,
    RustfaceDetector,
};
pub use features::{ExtractorConfig, FeatureExtractor};
pub use matcher::{FaceMatcher, LocalFaceMatcher, MatchError, MatcherConfig, DEFAULT_THRESHOLD};
pub use scoring::ScoreWeights;
pub use store::{FeatureStore, RecordInfo, StoreError};
pub use types::{FaceRegion, FeatureRecord, MatchResult, Recognition, Rect, Registration};
