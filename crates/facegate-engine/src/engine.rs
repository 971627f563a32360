use crate::config::Config;
use facegate_core::{
    FaceMatcher, FeatureStore, LocalFaceMatcher, MatchError, MatchResult, Recognition,
    RecordInfo, Registration, ScoreWeights, StoreError,
};
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("feature store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Engine summary reported by [`EngineHandle::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub identities: usize,
    pub threshold: f32,
    pub detector: &'static str,
    pub store_dir: PathBuf,
    pub weights: ScoreWeights,
}

type Reply<T> = oneshot::Sender<Result<T, MatchError>>;

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Register {
        identity: String,
        image: DynamicImage,
        reply: Reply<Registration>,
    },
    Update {
        identity: String,
        image: DynamicImage,
        reply: Reply<Registration>,
    },
    Recognize {
        image: DynamicImage,
        threshold: Option<f32>,
        reply: Reply<Recognition>,
    },
    List {
        reply: Reply<BTreeSet<String>>,
    },
    Delete {
        identity: String,
        reply: Reply<()>,
    },
    Reload {
        reply: Reply<usize>,
    },
    Inspect {
        identity: String,
        reply: Reply<RecordInfo>,
    },
    ScoreAll {
        image: DynamicImage,
        reply: Reply<Vec<(String, MatchResult)>>,
    },
    Compare {
        a: DynamicImage,
        b: DynamicImage,
        reply: Reply<MatchResult>,
    },
    Status {
        reply: Reply<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }

    /// Register a new identity from an image containing exactly one face.
    pub async fn register(
        &self,
        identity: &str,
        image: DynamicImage,
    ) -> Result<Registration, EngineError> {
        let identity = identity.to_string();
        self.call(|reply| EngineRequest::Register {
            identity,
            image,
            reply,
        })
        .await
    }

    /// Replace the record of an existing identity.
    pub async fn update(
        &self,
        identity: &str,
        image: DynamicImage,
    ) -> Result<Registration, EngineError> {
        let identity = identity.to_string();
        self.call(|reply| EngineRequest::Update {
            identity,
            image,
            reply,
        })
        .await
    }

    /// Recognize the largest face in `image`. `None` uses the configured threshold.
    pub async fn recognize(
        &self,
        image: DynamicImage,
        threshold: Option<f32>,
    ) -> Result<Recognition, EngineError> {
        self.call(|reply| EngineRequest::Recognize {
            image,
            threshold,
            reply,
        })
        .await
    }

    pub async fn list(&self) -> Result<BTreeSet<String>, EngineError> {
        self.call(|reply| EngineRequest::List { reply }).await
    }

    pub async fn delete(&self, identity: &str) -> Result<(), EngineError> {
        let identity = identity.to_string();
        self.call(|reply| EngineRequest::Delete { identity, reply })
            .await
    }

    /// Rebuild the in-memory cache from the store. Returns the cached count.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::Reload { reply }).await
    }

    pub async fn inspect(&self, identity: &str) -> Result<RecordInfo, EngineError> {
        let identity = identity.to_string();
        self.call(|reply| EngineRequest::Inspect { identity, reply })
            .await
    }

    /// Score the query face against every registered identity, in name order.
    pub async fn score_all(
        &self,
        image: DynamicImage,
    ) -> Result<Vec<(String, MatchResult)>, EngineError> {
        self.call(|reply| EngineRequest::ScoreAll { image, reply })
            .await
    }

    /// Compare the largest faces of two images without touching the store.
    pub async fn compare(
        &self,
        a: DynamicImage,
        b: DynamicImage,
    ) -> Result<MatchResult, EngineError> {
        self.call(|reply| EngineRequest::Compare { a, b, reply })
            .await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the feature store and loads every record into the matcher cache
/// before the request loop starts. Fails fast if the store directory is
/// unusable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let store = FeatureStore::open(&config.store_dir)?;
    let matcher = LocalFaceMatcher::new(store, config.matcher.clone())?;
    let loaded = matcher.reload()?;
    tracing::info!(
        store = %config.store_dir.display(),
        identities = loaded,
        detector = matcher.detector_name(),
        threshold = config.threshold,
        "matcher ready"
    );

    let threshold = config.threshold;
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&matcher, threshold, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle_request(matcher: &LocalFaceMatcher, default_threshold: f32, req: EngineRequest) {
    // A dropped receiver means the caller gave up; nothing to do.
    match req {
        EngineRequest::Register {
            identity,
            image,
            reply,
        } => {
            let _ = reply.send(matcher.register_identity(&identity, &image));
        }
        EngineRequest::Update {
            identity,
            image,
            reply,
        } => {
            let _ = reply.send(matcher.update_identity(&identity, &image));
        }
        EngineRequest::Recognize {
            image,
            threshold,
            reply,
        } => {
            let threshold = threshold.unwrap_or(default_threshold);
            let _ = reply.send(matcher.recognize_identity(&image, threshold));
        }
        EngineRequest::List { reply } => {
            let _ = reply.send(matcher.list_identities());
        }
        EngineRequest::Delete { identity, reply } => {
            let _ = reply.send(matcher.delete_identity(&identity));
        }
        EngineRequest::Reload { reply } => {
            let _ = reply.send(matcher.reload());
        }
        EngineRequest::Inspect { identity, reply } => {
            let _ = reply.send(matcher.inspect(&identity));
        }
        EngineRequest::ScoreAll { image, reply } => {
            let _ = reply.send(matcher.score_all(&image));
        }
        EngineRequest::Compare { a, b, reply } => {
            let _ = reply.send(matcher.compare_images(&a, &b));
        }
        EngineRequest::Status { reply } => {
            let status = matcher.list_identities().map(|ids| EngineStatus {
                version: env!("CARGO_PKG_VERSION"),
                identities: ids.len(),
                threshold: default_threshold,
                detector: matcher.detector_name(),
                store_dir: matcher.store_dir().to_path_buf(),
                weights: *matcher.weights(),
            });
            let _ = reply.send(status);
        }
    }
}
