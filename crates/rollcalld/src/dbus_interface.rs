use crate::engine::{EngineError, EngineHandle};
use rollcall_core::EnrollError;
use zbus::interface;

pub const BUS_NAME: &str = "org.freedesktop.RollCall1";
pub const OBJECT_PATH: &str = "/org/freedesktop/RollCall1";

/// D-Bus interface for the attendance kiosk, consumed by the GUI shell.
///
/// Bus name: org.freedesktop.RollCall1
/// Object path: /org/freedesktop/RollCall1
pub struct RollCallService {
    engine: EngineHandle,
}

impl RollCallService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    match err {
        EngineError::Enroll(EnrollError::Validation(msg)) => zbus::fdo::Error::InvalidArgs(msg),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.RollCall1")]
impl RollCallService {
    /// Capture a face for the given user. Returns the stored image path.
    async fn enroll(&self, user_id: &str, display_name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, display_name, "enroll requested");
        let record = self
            .engine
            .enroll(user_id.to_string(), display_name.to_string())
            .await
            .map_err(to_fdo)?;
        Ok(record.image_path.display().to_string())
    }

    /// Rebuild the catalog from all stored captures. Returns the face count.
    async fn train(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("train requested");
        let count = self.engine.train().await.map_err(to_fdo)?;
        Ok(count as u32)
    }

    /// Capture a live frame and match it. Returns the outcome as JSON.
    async fn mark(&self) -> zbus::fdo::Result<String> {
        tracing::info!("mark requested");
        let result = self.engine.mark().await.map_err(to_fdo)?;
        to_json(&result)
    }

    /// Names in the loaded catalog, as a JSON array.
    async fn list_catalog(&self) -> zbus::fdo::Result<String> {
        let names = self.engine.catalog().await.map_err(to_fdo)?;
        to_json(&names)
    }

    /// Most recent attendance marks, newest first, as JSON.
    async fn history(&self, limit: u32) -> zbus::fdo::Result<String> {
        let records = self.engine.history(limit as usize).await.map_err(to_fdo)?;
        to_json(&records)
    }

    async fn status(&self) -> zbus::fdo::Result<String> {
        let faces = self.engine.catalog().await.map_err(to_fdo)?.len();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "models_loaded": true,
            "catalog_faces": faces,
        })
        .to_string())
    }
}
