use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use rollcall_core::{
    identify, AttendanceLog, CatalogStore, Config, EnrollmentStore, EuclideanMatcher, MatchOutcome,
    OnnxFaceEncoder,
};
use rollcall_hw::CameraSession;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "RollCall attendance kiosk CLI")]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long, global = true, env = "ROLLCALL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a user's face
    Enroll {
        #[arg(short, long)]
        user_id: String,
        /// Display name shown to the operator
        #[arg(short, long)]
        name: String,
        /// Use an image file instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Rebuild the encoding catalog from all enrolled images
    Train,
    /// List enrolled users and trained faces
    List,
    /// Match a live face and record attendance
    Mark {
        /// Use an image file instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show recent attendance marks
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show daemon status
    Status,
    /// Run camera diagnostics
    Test,
}

#[zbus::proxy(
    interface = "org.freedesktop.RollCall1",
    default_service = "org.freedesktop.RollCall1",
    default_path = "/org/freedesktop/RollCall1"
)]
trait RollCall {
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll { user_id, name, image } => {
            let frame = acquire_frame(&config, image.as_deref())?;
            let store = EnrollmentStore::new(config.training_dir());
            let record = store.capture(&user_id, &name, &frame)?;
            println!(
                "Face captured for {} ({}): {}",
                record.display_name,
                record.user_id,
                record.image_path.display()
            );
        }
        Commands::Train => {
            let mut encoder = OnnxFaceEncoder::load(&config.model_dir)?;
            let store = CatalogStore::new(config.catalog_path());
            let catalog = store.rebuild(&config.training_dir(), &mut encoder)?;
            println!("Trained {} face(s)", catalog.len());
            for name in catalog.names() {
                println!("  {name}");
            }
        }
        Commands::List => {
            let records = EnrollmentStore::new(config.training_dir()).records()?;
            println!("Enrolled users: {}", records.len());
            for r in &records {
                println!("  {:<12} {}", r.user_id, r.display_name);
            }

            let catalog = CatalogStore::new(config.catalog_path()).load()?;
            println!("Trained faces: {}", catalog.len());
            for name in catalog.names() {
                println!("  {name}");
            }
        }
        Commands::Mark { image } => {
            let catalog = CatalogStore::new(config.catalog_path()).load()?;
            if catalog.is_empty() {
                bail!("no faces have been trained yet; run `rollcall train` first");
            }

            let mut encoder = OnnxFaceEncoder::load(&config.model_dir)?;
            let frame = acquire_frame(&config, image.as_deref())?;
            let outcome = identify(&mut encoder, &frame, &catalog, &EuclideanMatcher::default())?;

            match outcome {
                MatchOutcome::Matched { name, distance } => {
                    let log = AttendanceLog::open(&config.attendance_db_path())?;
                    let record = log.record(&name, distance)?;
                    println!(
                        "Attendance marked: {name} (distance {distance:.3}) at {}",
                        record.marked_at
                    );
                }
                MatchOutcome::Unknown { distance } => match distance {
                    Some(d) => println!("Unknown face (closest distance {d:.3})"),
                    None => println!("Unknown face"),
                },
                MatchOutcome::NoFaceDetected => println!("No face detected; try again"),
            }
        }
        Commands::History { limit } => {
            let log = AttendanceLog::open(&config.attendance_db_path())?;
            let records = log.recent(limit)?;
            if records.is_empty() {
                println!("No attendance recorded");
            }
            for r in records {
                println!("{}  {:<12} {:.3}", r.marked_at, r.name, r.distance);
            }
        }
        Commands::Status => {
            let conn = zbus::Connection::session().await?;
            let proxy = RollCallProxy::new(&conn).await?;
            match proxy.status().await {
                Ok(json) => {
                    let value: serde_json::Value = serde_json::from_str(&json)?;
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                Err(e) => println!("rollcalld: not reachable ({e})"),
            }
        }
        Commands::Test => camera_diagnostics(&config)?,
    }

    Ok(())
}

/// Load `image` if given, otherwise grab one frame from the configured camera.
fn acquire_frame(config: &Config, image: Option<&Path>) -> Result<RgbImage> {
    if let Some(path) = image {
        let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        return Ok(img.to_rgb8());
    }

    let camera = open_camera(config)?;
    camera.warmup(config.warmup_frames)?;
    let frame = camera.capture_frame()?;
    if frame.is_dark {
        tracing::warn!(device = %config.camera_device, "captured frame is dark");
    }
    frame.into_image().context("camera returned a frame of unexpected size")
}

fn camera_diagnostics(config: &Config) -> Result<()> {
    let devices = CameraSession::list_devices();
    println!("Capture devices: {}", devices.len());
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    println!("Opening {} ...", config.camera_device);
    let camera = open_camera(config)?;
    println!("  {}x{} {:?}", camera.width, camera.height, camera.pixel_format);

    let frames = camera.capture_frames(config.warmup_frames.max(1) + 3)?;
    for f in &frames {
        println!(
            "  frame {:>4}  brightness {:>6.1}  {}",
            f.sequence,
            f.avg_brightness(),
            if f.is_dark { "dark" } else { "ok" }
        );
    }
    Ok(())
}

fn open_camera(config: &Config) -> Result<CameraSession> {
    let session =
        CameraSession::open(&config.camera_device, config.camera_width, config.camera_height)?;
    Ok(session)
}
