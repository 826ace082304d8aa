use anyhow::Result;
use rollcall_core::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config_path = std::env::var("ROLLCALL_CONFIG").map(PathBuf::from).ok();
    let config = Config::load(config_path.as_deref())?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        camera = %config.camera_device,
        "configuration resolved"
    );

    let engine = engine::spawn_engine(&config)?;
    let service = dbus_interface::RollCallService::new(engine);

    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = dbus_interface::BUS_NAME, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
