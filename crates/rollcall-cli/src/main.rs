use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

// `#[zbus::proxy]` generates `AttendanceProxy` (async) and a blocking variant;
// only the async one is used.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn recognize(&self, image_path: &str) -> zbus::Result<String>;

    async fn record_attendance(
        &self,
        frame_paths: Vec<String>,
        user_id: &str,
        user_name: &str,
        confidence: f64,
        quality_score: f64,
        blink_count: u32,
        device_info: &str,
        location: &str,
    ) -> zbus::Result<String>;

    async fn mark_attendance(
        &self,
        frame_paths: Vec<String>,
        blink_count: u32,
        device_info: &str,
        location: &str,
    ) -> zbus::Result<String>;

    async fn class_attendance(&self, photo_path: &str, device_info: &str, location: &str) -> zbus::Result<String>;

    async fn enroll(&self, user_id: &str, name: &str, image_path: &str) -> zbus::Result<String>;

    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct RecordContext {
    /// Device label stored with the record
    #[arg(long)]
    device: Option<String>,
    /// Location stored with the record
    #[arg(long)]
    location: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recognize, blink-check and mark attendance from a frame sequence
    Mark {
        /// Challenge frames; the first is also used for recognition
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        /// Blinks counted by the capturing client, if any
        #[arg(long)]
        blinks: Option<u32>,
        #[command(flatten)]
        context: RecordContext,
    },
    /// Recognize the subject in one image and check eligibility
    Recognize { image: PathBuf },
    /// Blink-check an already recognized subject and save the record
    Record {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        user_name: String,
        #[arg(long)]
        confidence: f64,
        #[arg(long, default_value_t = 0.0)]
        quality: f64,
        #[arg(long)]
        blinks: Option<u32>,
        #[arg(required = true)]
        frames: Vec<PathBuf>,
        #[command(flatten)]
        context: RecordContext,
    },
    /// Mark every recognized face in a class photo
    Class {
        photo: PathBuf,
        #[command(flatten)]
        context: RecordContext,
    },
    /// Enroll a user from a single face image
    Enroll {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        name: String,
        image: PathBuf,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    let response = match cli.command {
        Commands::Mark { frames, blinks, context } => {
            proxy
                .mark_attendance(
                    absolute_all(&frames)?,
                    blinks.unwrap_or(0),
                    field(&context.device),
                    field(&context.location),
                )
                .await?
        }
        Commands::Recognize { image } => proxy.recognize(&absolute(&image)?).await?,
        Commands::Record {
            user_id,
            user_name,
            confidence,
            quality,
            blinks,
            frames,
            context,
        } => {
            proxy
                .record_attendance(
                    absolute_all(&frames)?,
                    &user_id,
                    &user_name,
                    confidence,
                    quality,
                    blinks.unwrap_or(0),
                    field(&context.device),
                    field(&context.location),
                )
                .await?
        }
        Commands::Class { photo, context } => {
            proxy
                .class_attendance(&absolute(&photo)?, field(&context.device), field(&context.location))
                .await?
        }
        Commands::Enroll { user_id, name, image } => proxy.enroll(&user_id, &name, &absolute(&image)?).await?,
        Commands::Status => proxy.status().await?,
    };

    let value: serde_json::Value = serde_json::from_str(&response).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);

    if let Some(failure) = failure_summary(&value) {
        bail!(failure);
    }
    Ok(())
}

/// The daemon resolves paths relative to its own working directory, so send
/// absolute ones.
fn absolute(path: &Path) -> Result<String> {
    let full = path
        .canonicalize()
        .with_context(|| format!("cannot access {}", path.display()))?;
    Ok(full.to_string_lossy().into_owned())
}

fn absolute_all(paths: &[PathBuf]) -> Result<Vec<String>> {
    paths.iter().map(|p| absolute(p)).collect()
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// `reason: error` for a failed pipeline envelope; `None` for anything else.
fn failure_summary(value: &serde_json::Value) -> Option<String> {
    if value.get("success")?.as_bool()? {
        return None;
    }
    let reason = value["reason"].as_str().unwrap_or("failed");
    let error = value["error"].as_str().unwrap_or("no details");
    Some(format!("{reason}: {error}"))
}
