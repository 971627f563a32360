//! Matcher and decision engine.
//!
//! Pipeline: locate → extract → (store | compare against every cached
//! record) → decide. The cache is an explicit copy of the store that is
//! only refreshed by [`LocalFaceMatcher::reload`] or by this matcher's own
//! mutations.

use crate::detector::{DetectorError, DetectorKind, FaceDetector, FaceLocator, LocateError, LocatePolicy, LocatorConfig};
use crate::features::{ExtractError, ExtractorConfig, FeatureExtractor};
use crate::scoring::{self, ScoreError, ScoreWeights};
use crate::store::{self, FeatureStore, RecordInfo, StoreError};
use crate::types::{FeatureRecord, MatchResult, Recognition, Rect, Registration};
use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Default acceptance threshold on the [0, 1] confidence scale.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("multiple faces detected ({count}); provide an image with exactly one face")]
    MultipleFacesDetected { count: usize },
    #[error("feature extraction failed: {0}")]
    ExtractionFailed(#[from] ExtractError),
    #[error("identity already exists: {0}")]
    IdentityAlreadyExists(String),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("no registered identities")]
    NoRegisteredIdentities,
    #[error("face not recognized: best score {best_score:.3} is below threshold {threshold:.3}")]
    NotRecognized {
        best_identity: Option<String>,
        best_score: f32,
        threshold: f32,
    },
    #[error("invalid identity name: {0:?}")]
    InvalidIdentity(String),
    #[error("threshold must be a finite value in [0, 1], got {0}")]
    InvalidThreshold(f32),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<LocateError> for MatchError {
    fn from(e: LocateError) -> Self {
        match e {
            LocateError::NoFaceDetected => MatchError::NoFaceDetected,
            LocateError::MultipleFacesDetected { count } => MatchError::MultipleFacesDetected { count },
            LocateError::Detector(e) => MatchError::Detector(e),
        }
    }
}

impl From<StoreError> for MatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) => MatchError::IdentityNotFound(name),
            StoreError::AlreadyExists(name) => MatchError::IdentityAlreadyExists(name),
            StoreError::InvalidIdentity(name) => MatchError::InvalidIdentity(name),
            other => MatchError::Store(other),
        }
    }
}

impl From<ScoreError> for MatchError {
    fn from(e: ScoreError) -> Self {
        MatchError::InvalidConfig(e.to_string())
    }
}

/// Capability interface for face identification backends.
///
/// The local classical matcher is one implementation; a remote service
/// client would be another, chosen by configuration.
pub trait FaceMatcher: Send + Sync {
    /// Enroll a new identity. Fails if the name is already registered.
    fn register_identity(&self, identity: &str, image: &DynamicImage) -> Result<Registration, MatchError>;

    /// Replace the record of an existing identity.
    fn update_identity(&self, identity: &str, image: &DynamicImage) -> Result<Registration, MatchError>;

    /// Identify the most prominent face in `image`.
    fn recognize_identity(&self, image: &DynamicImage, threshold: f32) -> Result<Recognition, MatchError>;

    fn list_identities(&self) -> Result<BTreeSet<String>, MatchError>;

    fn delete_identity(&self, identity: &str) -> Result<(), MatchError>;

    /// Refresh in-memory state from durable storage; returns the identity count.
    fn reload(&self) -> Result<usize, MatchError>;
}

/// Matcher tuning. The weight set and extraction layout must not change
/// between registration and recognition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub detector: DetectorKind,
    /// SeetaFace model file for the cascade detector.
    pub model_path: Option<PathBuf>,
    pub locator: LocatorConfig,
    pub extractor: ExtractorConfig,
    pub weights: ScoreWeights,
    /// Score candidates on the rayon pool.
    pub parallel: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            model_path: None,
            locator: LocatorConfig::default(),
            extractor: ExtractorConfig::default(),
            weights: ScoreWeights::default(),
            parallel: true,
        }
    }
}

/// Local, offline matcher over histogram + LBP + patch features.
pub struct LocalFaceMatcher {
    locator: FaceLocator,
    extractor: FeatureExtractor,
    weights: ScoreWeights,
    parallel: bool,
    store: FeatureStore,
    cache: RwLock<BTreeMap<String, FeatureRecord>>,
}

impl LocalFaceMatcher {
    /// Build a matcher over `store` using the configured built-in detector.
    ///
    /// The cache starts empty; call [`reload`](FaceMatcher::reload) before
    /// the first recognition.
    pub fn new(store: FeatureStore, config: MatcherConfig) -> Result<Self, MatchError> {
        let detector = config.detector.build(config.model_path.as_deref())?;
        Self::with_detector(store, detector, config)
    }

    /// Build a matcher with a caller-supplied detector.
    pub fn with_detector(
        store: FeatureStore,
        detector: Box<dyn FaceDetector>,
        config: MatcherConfig,
    ) -> Result<Self, MatchError> {
        config.weights.validate()?;
        if config.locator.passes.is_empty() {
            return Err(MatchError::InvalidConfig("at least one detection pass is required".into()));
        }
        let extractor = FeatureExtractor::new(config.extractor)
            .map_err(|e| MatchError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            locator: FaceLocator::new(detector, config.locator),
            extractor,
            weights: config.weights,
            parallel: config.parallel,
            store,
            cache: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn detector_name(&self) -> &'static str {
        self.locator.detector_name()
    }

    pub fn store_dir(&self) -> &Path {
        self.store.dir()
    }

    /// Number of identities currently cached.
    pub fn cached_count(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Locate and extract, returning the record and the face rectangle.
    pub fn extract(&self, image: &DynamicImage, policy: LocatePolicy) -> Result<(FeatureRecord, Rect), MatchError> {
        let region = self.locator.locate(image, policy)?;
        let record = self.extractor.extract(&region)?;
        Ok((record, region.rect))
    }

    /// Compare the most prominent faces of two images.
    pub fn compare_images(&self, a: &DynamicImage, b: &DynamicImage) -> Result<MatchResult, MatchError> {
        let (ra, _) = self.extract(a, LocatePolicy::Largest)?;
        let (rb, _) = self.extract(b, LocatePolicy::Largest)?;
        Ok(scoring::compare(&ra, &rb, &self.weights)?)
    }

    /// Score the query image against every cached identity, in scan order.
    pub fn score_all(&self, image: &DynamicImage) -> Result<Vec<(String, MatchResult)>, MatchError> {
        let (query, _) = self.extract(image, LocatePolicy::Largest)?;
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Ok(self.score_candidates(&query, &cache))
    }

    /// Stored record and metadata for one identity.
    pub fn inspect(&self, identity: &str) -> Result<RecordInfo, MatchError> {
        Ok(self.store.inspect(identity)?)
    }

    fn score_candidates(
        &self,
        query: &FeatureRecord,
        cache: &BTreeMap<String, FeatureRecord>,
    ) -> Vec<(String, MatchResult)> {
        let entries: Vec<(&String, &FeatureRecord)> = cache.iter().collect();
        let score = |(name, record): &(&String, &FeatureRecord)| -> Option<(String, MatchResult)> {
            match scoring::compare(query, record, &self.weights) {
                Ok(result) => Some(((*name).clone(), result)),
                Err(e) => {
                    tracing::warn!(identity = %name, error = %e, "skipping candidate");
                    None
                }
            }
        };

        let scored: Vec<Option<(String, MatchResult)>> = if self.parallel {
            entries.par_iter().map(score).collect()
        } else {
            entries.iter().map(score).collect()
        };
        scored.into_iter().flatten().collect()
    }

    fn enroll(&self, identity: &str, image: &DynamicImage, replace: bool) -> Result<Registration, MatchError> {
        store::validate_identity(identity)?;
        if !replace && self.store.contains(identity) {
            return Err(MatchError::IdentityAlreadyExists(identity.to_string()));
        }
        if replace && !self.store.contains(identity) {
            return Err(MatchError::IdentityNotFound(identity.to_string()));
        }

        let (record, region) = self.extract(image, LocatePolicy::ExactlyOne)?;
        let digest = record.digest().to_string();

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if replace {
            self.store.replace(identity, &record)?;
        } else {
            self.store.create(identity, &record)?;
        }
        cache.insert(identity.to_string(), record);

        tracing::info!(identity, replace, x = region.x, y = region.y, "identity enrolled");
        Ok(Registration {
            identity: identity.to_string(),
            region,
            digest,
        })
    }
}

fn validate_threshold(threshold: f32) -> Result<(), MatchError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(MatchError::InvalidThreshold(threshold))
    }
}

impl FaceMatcher for LocalFaceMatcher {
    fn register_identity(&self, identity: &str, image: &DynamicImage) -> Result<Registration, MatchError> {
        self.enroll(identity, image, false)
    }

    fn update_identity(&self, identity: &str, image: &DynamicImage) -> Result<Registration, MatchError> {
        self.enroll(identity, image, true)
    }

    fn recognize_identity(&self, image: &DynamicImage, threshold: f32) -> Result<Recognition, MatchError> {
        validate_threshold(threshold)?;
        if self.cached_count() == 0 {
            return Err(MatchError::NoRegisteredIdentities);
        }
        let (query, region) = self.extract(image, LocatePolicy::Largest)?;

        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        if cache.is_empty() {
            return Err(MatchError::NoRegisteredIdentities);
        }

        let scores = self.score_candidates(&query, &cache);
        drop(cache);

        let mut best: Option<(String, f32)> = None;
        for (identity, result) in scores {
            tracing::debug!(identity = %identity, score = result.score, "candidate scored");
            let better = match &best {
                None => true,
                Some((_, best_score)) => result.score > *best_score,
            };
            if better {
                best = Some((identity, result.score));
            }
        }

        match best {
            Some((identity, score)) if score >= threshold => {
                tracing::info!(identity = %identity, score, threshold, "face recognized");
                Ok(Recognition {
                    identity,
                    confidence: score,
                    region,
                })
            }
            best => {
                let (best_identity, best_score) = match best {
                    Some((identity, score)) => (Some(identity), score),
                    None => (None, 0.0),
                };
                tracing::info!(best = ?best_identity, best_score, threshold, "face not recognized");
                Err(MatchError::NotRecognized {
                    best_identity,
                    best_score,
                    threshold,
                })
            }
        }
    }

    fn list_identities(&self) -> Result<BTreeSet<String>, MatchError> {
        Ok(self.store.list()?)
    }

    fn delete_identity(&self, identity: &str) -> Result<(), MatchError> {
        store::validate_identity(identity)?;
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        self.store.delete(identity)?;
        cache.remove(identity);
        Ok(())
    }

    fn reload(&self) -> Result<usize, MatchError> {
        let layout = self.extractor.config();
        let mut records = self.store.load_all()?;
        records.retain(|identity, record| {
            let compatible = record.canonical_size() == layout.canonical_size
                && record.intensity_histogram().len() == layout.histogram_bins;
            if !compatible {
                tracing::warn!(
                    identity = %identity,
                    canonical_size = record.canonical_size(),
                    bins = record.intensity_histogram().len(),
                    "record extracted with a different layout; ignoring"
                );
            }
            compatible
        });

        let count = records.len();
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = records;
        tracing::info!(count, "identities reloaded");
        Ok(count)
    }
}
