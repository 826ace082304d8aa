use rollcall_core::enrollment::validate_field;
use rollcall_core::{
    identify, AttendanceError, AttendanceLog, AttendanceRecord, CatalogError, CatalogStore, Config,
    EncoderError, EncodingCatalog, EnrollError, EnrollmentRecord, EnrollmentStore, EuclideanMatcher,
    FaceEncoder, MatchOutcome, OnnxFaceEncoder,
};
use rollcall_hw::{CameraError, CameraSession};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("enrollment error: {0}")]
    Enroll(#[from] EnrollError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("attendance log error: {0}")]
    Attendance(#[from] AttendanceError),
    #[error("captured frame has an unexpected size")]
    BadFrame,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an attendance check.
#[derive(Debug, Clone, Serialize)]
pub struct MarkResult {
    #[serde(flatten)]
    pub outcome: MatchOutcome,
    /// Present when the outcome was a match and a row was written.
    pub record: Option<AttendanceRecord>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        user_id: String,
        display_name: String,
        reply: oneshot::Sender<Result<EnrollmentRecord, EngineError>>,
    },
    Train {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Mark {
        reply: oneshot::Sender<Result<MarkResult, EngineError>>,
    },
    Catalog {
        reply: oneshot::Sender<Vec<String>>,
    },
    History {
        limit: usize,
        reply: oneshot::Sender<Result<Vec<AttendanceRecord>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Capture one frame from the camera and store it for `user_id`.
    pub async fn enroll(
        &self,
        user_id: String,
        display_name: String,
    ) -> Result<EnrollmentRecord, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            user_id,
            display_name,
            reply,
        })
        .await?
    }

    /// Rebuild the catalog from stored images; returns the number of faces trained.
    pub async fn train(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Train { reply }).await?
    }

    pub async fn mark(&self) -> Result<MarkResult, EngineError> {
        self.request(|reply| EngineRequest::Mark { reply }).await?
    }

    /// Names in the loaded catalog.
    pub async fn catalog(&self) -> Result<Vec<String>, EngineError> {
        self.request(|reply| EngineRequest::Catalog { reply }).await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.request(|reply| EngineRequest::History { limit, reply }).await?
    }
}

/// Everything the engine thread owns.
struct Engine<E> {
    encoder: E,
    enrollment: EnrollmentStore,
    catalog_store: CatalogStore,
    catalog: EncodingCatalog,
    log: AttendanceLog,
    matcher: EuclideanMatcher,
    camera_device: String,
    camera_width: u32,
    camera_height: u32,
    warmup_frames: usize,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the models, the persisted catalog and the attendance log up front
/// and fails fast if any is unavailable. The camera is opened per request.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let encoder = OnnxFaceEncoder::load(&config.model_dir)?;
    tracing::info!(dir = %config.model_dir.display(), "face models loaded");

    let catalog_store = CatalogStore::new(config.catalog_path());
    let catalog = load_catalog(&catalog_store);

    let engine = Engine {
        encoder,
        enrollment: EnrollmentStore::new(config.training_dir()),
        catalog_store,
        catalog,
        log: AttendanceLog::open(&config.attendance_db_path())?,
        matcher: EuclideanMatcher::default(),
        camera_device: config.camera_device.clone(),
        camera_width: config.camera_width,
        camera_height: config.camera_height,
        warmup_frames: config.warmup_frames,
    };

    engine.spawn()
}

/// Load the persisted catalog, starting empty if it cannot be read.
///
/// A later `train` rewrites the file, so an unreadable catalog never keeps
/// the daemon from serving.
fn load_catalog(store: &CatalogStore) -> EncodingCatalog {
    match store.load() {
        Ok(catalog) => {
            tracing::info!(faces = catalog.len(), "catalog loaded");
            catalog
        }
        Err(e) => {
            tracing::error!(
                path = %store.path().display(),
                error = %e,
                "failed to load catalog, starting empty"
            );
            EncodingCatalog::default()
        }
    }
}

impl<E: FaceEncoder + Send + 'static> Engine<E> {
    fn spawn(self) -> Result<EngineHandle, EngineError> {
        let (tx, rx) = mpsc::channel::<EngineRequest>(4);

        std::thread::Builder::new()
            .name("rollcall-engine".into())
            .spawn(move || self.run(rx))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn engine thread");
                EngineError::ChannelClosed
            })?;

        Ok(EngineHandle { tx })
    }

    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine thread started");
        while let Some(req) = rx.blocking_recv() {
            match req {
                EngineRequest::Enroll {
                    user_id,
                    display_name,
                    reply,
                } => {
                    let _ = reply.send(self.enroll(&user_id, &display_name));
                }
                EngineRequest::Train { reply } => {
                    let _ = reply.send(self.train());
                }
                EngineRequest::Mark { reply } => {
                    let _ = reply.send(self.mark());
                }
                EngineRequest::Catalog { reply } => {
                    let names = self.catalog.names().into_iter().map(String::from).collect();
                    let _ = reply.send(names);
                }
                EngineRequest::History { limit, reply } => {
                    let _ = reply.send(self.log.recent(limit).map_err(EngineError::from));
                }
            }
        }
        tracing::info!("engine thread exiting");
    }

    /// Open the camera for one capture; the session drops on return.
    fn grab_frame(&self) -> Result<image::RgbImage, EngineError> {
        let camera =
            CameraSession::open(&self.camera_device, self.camera_width, self.camera_height)?;
        camera.warmup(self.warmup_frames)?;
        let frame = camera.capture_frame()?;
        if frame.is_dark {
            tracing::warn!(device = %self.camera_device, "captured frame is dark");
        }
        frame.into_image().ok_or(EngineError::BadFrame)
    }

    fn enroll(
        &mut self,
        user_id: &str,
        display_name: &str,
    ) -> Result<EnrollmentRecord, EngineError> {
        // Reject bad input before touching the camera.
        validate_field("user id", user_id)?;
        validate_field("display name", display_name)?;
        let frame = self.grab_frame()?;
        Ok(self.enrollment.capture(user_id, display_name, &frame)?)
    }

    fn train(&mut self) -> Result<usize, EngineError> {
        let catalog = self.catalog_store.rebuild(self.enrollment.root(), &mut self.encoder)?;
        let count = catalog.len();
        self.catalog = catalog;
        Ok(count)
    }

    fn mark(&mut self) -> Result<MarkResult, EngineError> {
        let frame = self.grab_frame()?;
        let outcome = identify(&mut self.encoder, &frame, &self.catalog, &self.matcher)?;

        let record = match &outcome {
            MatchOutcome::Matched { name, distance } => Some(self.log.record(name, *distance)?),
            _ => None,
        };
        Ok(MarkResult { outcome, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rollcall_core::Encoding;

    /// Reports every non-black image as the same face.
    struct FixedEncoder;

    impl FaceEncoder for FixedEncoder {
        fn encode(&mut self, image: &RgbImage) -> Result<Vec<Encoding>, EncoderError> {
            if image.pixels().all(|p| p.0 == [0, 0, 0]) {
                return Ok(Vec::new());
            }
            Ok(vec![Encoding::new(vec![0.6, 0.8])])
        }
    }

    fn test_engine(dir: &std::path::Path) -> Engine<FixedEncoder> {
        Engine {
            encoder: FixedEncoder,
            enrollment: EnrollmentStore::new(dir.join("TrainingImage")),
            catalog_store: CatalogStore::new(dir.join("trained_faces.bin")),
            catalog: EncodingCatalog::default(),
            log: AttendanceLog::open_in_memory().unwrap(),
            matcher: EuclideanMatcher::default(),
            camera_device: "/dev/nonexistent-video".into(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 0,
        }
    }

    #[tokio::test]
    async fn test_train_swaps_loaded_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = test_engine(tmp.path());
        engine
            .enrollment
            .capture("42", "Ada", &RgbImage::from_pixel(16, 16, Rgb([120, 80, 60])))
            .unwrap();

        let handle = engine.spawn().unwrap();
        assert!(handle.catalog().await.unwrap().is_empty());

        assert_eq!(handle.train().await.unwrap(), 1);
        assert_eq!(handle.catalog().await.unwrap(), vec!["42".to_string()]);
        assert!(tmp.path().join("trained_faces.bin").is_file());
    }

    #[tokio::test]
    async fn test_corrupt_catalog_starts_empty_and_train_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = test_engine(tmp.path());
        std::fs::write(engine.catalog_store.path(), b"not a catalog").unwrap();
        assert!(engine.catalog_store.load().is_err());

        engine.catalog = load_catalog(&engine.catalog_store);
        assert!(engine.catalog.is_empty());
        engine
            .enrollment
            .capture("42", "Ada", &RgbImage::from_pixel(16, 16, Rgb([120, 80, 60])))
            .unwrap();

        let store = CatalogStore::new(engine.catalog_store.path());
        let handle = engine.spawn().unwrap();
        assert!(handle.catalog().await.unwrap().is_empty());

        assert_eq!(handle.train().await.unwrap(), 1);
        assert_eq!(store.load().unwrap().names(), vec!["42"]);
    }

    #[tokio::test]
    async fn test_enroll_validates_before_camera() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = test_engine(tmp.path()).spawn().unwrap();

        let err = handle.enroll(String::new(), "Ada".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Enroll(EnrollError::Validation(_))));

        let err = handle.enroll("../x".into(), "Ada".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Enroll(EnrollError::Validation(_))));

        let err = handle.enroll("42".into(), "..".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Enroll(EnrollError::Validation(_))));

        let err = handle.enroll("42".into(), "Ada".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Camera(CameraError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_without_camera_keeps_engine_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let handle = test_engine(tmp.path()).spawn().unwrap();

        assert!(matches!(handle.mark().await, Err(EngineError::Camera(_))));
        assert!(handle.history(10).await.unwrap().is_empty());
    }

    #[test]
    fn test_mark_result_json() {
        let result = MarkResult {
            outcome: MatchOutcome::Unknown { distance: Some(1.5) },
            record: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "unknown");
        assert_eq!(json["distance"], 1.5);
        assert!(json["record"].is_null());
    }
}
