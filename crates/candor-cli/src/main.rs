use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Questions asked by `candor interview` unless overridden.
const DEFAULT_QUESTIONS: [&str; 3] = [
    "Tell me about your previous professional experience",
    "Why do you want to work at our company?",
    "What was your biggest professional challenge?",
];

// D-Bus proxy; `#[zbus::proxy]` generates the async `AnalyzerProxy`.
#[zbus::proxy(
    interface = "org.candor.Analyzer1",
    default_service = "org.candor.Analyzer1",
    default_path = "/org/candor/Analyzer1"
)]
trait Analyzer {
    async fn start_session(&self, question: &str) -> zbus::Result<String>;
    async fn analyze_frame(&self, image: &[u8], session_id: &str) -> zbus::Result<String>;
    async fn detect_faces(&self, image: &[u8]) -> zbus::Result<String>;
    async fn analyze_video(&self, session_id: &str, path: &str) -> zbus::Result<String>;
    async fn capture(&self, session_id: &str, seconds: u32) -> zbus::Result<String>;
    async fn stop_capture(&self) -> zbus::Result<bool>;
    async fn session_summary(&self, session_id: &str) -> zbus::Result<String>;
    async fn generate_insights(&self, session_id: &str) -> zbus::Result<String>;
    async fn list_sessions(&self) -> zbus::Result<String>;
    async fn delete_session(&self, session_id: &str) -> zbus::Result<bool>;
    async fn export_report(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "candor", about = "Candor interview emotion analysis CLI")]
struct Cli {
    /// Connect to this D-Bus address instead of a standard bus
    #[arg(long, global = true, env = "CANDOR_DBUS_ADDRESS")]
    address: Option<String>,

    /// Use the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Per-call timeout in seconds
    #[arg(long, global = true, default_value_t = 900)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session for an interview question
    Start {
        /// The question being answered
        question: String,
    },
    /// Analyse the emotions in one image
    Analyze {
        image: PathBuf,
        /// Record the result into this session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Locate faces in one image
    Faces { image: PathBuf },
    /// Show emotion statistics for a session
    Summary { session: String },
    /// Generate narrative insights for a session
    Insights { session: String },
    /// List sessions
    List,
    /// Delete a session
    Delete { session: String },
    /// Export the report for all sessions with samples
    Export,
    /// Show daemon status
    Status,
    /// Sample a recording or the daemon's camera into a session
    Record {
        #[arg(short, long)]
        session: String,
        #[command(flatten)]
        media: MediaArgs,
    },
    /// Stop the recording in progress
    Stop,
    /// Run the default interview: one session per question, then a report
    Interview {
        /// One recording (video file or image directory) per question, in order
        media: Vec<PathBuf>,
        /// Capture each answer from the daemon's camera for this many seconds
        #[arg(long, conflicts_with = "media")]
        camera_seconds: Option<u32>,
        /// Replace the default questions (repeatable)
        #[arg(short, long = "question")]
        questions: Vec<String>,
        /// Skip insight generation
        #[arg(long)]
        no_insights: bool,
    },
    /// List local V4L2 capture devices
    Devices,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MediaArgs {
    /// Video file or image directory, read by the daemon
    #[arg(long)]
    video: Option<PathBuf>,
    /// Capture from the daemon's camera for this many seconds (0 = daemon default)
    #[arg(long)]
    seconds: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        command => {
            let connection = connect(cli.address.as_deref(), cli.system, cli.timeout).await?;
            let proxy = AnalyzerProxy::new(&connection)
                .await
                .context("failed to create proxy for candord")?;
            run(command, &proxy).await
        }
    }
}

async fn run(command: Commands, proxy: &AnalyzerProxy<'_>) -> Result<()> {
    match command {
        Commands::Start { question } => print_json(&proxy.start_session(&question).await?)?,
        Commands::Analyze { image, session } => {
            let bytes = read_image(&image)?;
            let session = session.unwrap_or_default();
            print_json(&proxy.analyze_frame(&bytes, &session).await?)?;
        }
        Commands::Faces { image } => {
            let bytes = read_image(&image)?;
            print_json(&proxy.detect_faces(&bytes).await?)?;
        }
        Commands::Summary { session } => print_json(&proxy.session_summary(&session).await?)?,
        Commands::Insights { session } => print_json(&proxy.generate_insights(&session).await?)?,
        Commands::List => print_json(&proxy.list_sessions().await?)?,
        Commands::Delete { session } => {
            proxy.delete_session(&session).await?;
            println!("Deleted {session}");
        }
        Commands::Export => {
            let report: Value = serde_json::from_str(&proxy.export_report().await?)?;
            println!(
                "Exported {} session(s) at {}",
                report["total_sessions"],
                report["generated_at"].as_str().unwrap_or("?")
            );
        }
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Record { session, media } => {
            let stats = match (media.video, media.seconds) {
                (Some(path), _) => {
                    let path = daemon_path(&path)?;
                    proxy.analyze_video(&session, &path).await?
                }
                (None, Some(seconds)) => proxy.capture(&session, seconds).await?,
                (None, None) => bail!("either --video or --seconds is required"),
            };
            print_json(&stats)?;
        }
        Commands::Stop => {
            if proxy.stop_capture().await? {
                println!("Stop requested");
            } else {
                println!("No recording in progress");
            }
        }
        Commands::Interview {
            media,
            camera_seconds,
            questions,
            no_insights,
        } => {
            let questions: Vec<String> = if questions.is_empty() {
                DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
            } else {
                questions
            };
            if camera_seconds.is_none() && media.len() != questions.len() {
                bail!(
                    "expected {} recording(s), one per question, got {}",
                    questions.len(),
                    media.len()
                );
            }
            run_interview(proxy, &questions, &media, camera_seconds, !no_insights).await?;
        }
        Commands::Devices => list_devices()?,
    }

    Ok(())
}

async fn connect(address: Option<&str>, system: bool, timeout_secs: u64) -> Result<zbus::Connection> {
    let builder = match address {
        Some(address) => zbus::connection::Builder::address(address)?,
        None if system => zbus::connection::Builder::system()?,
        None => zbus::connection::Builder::session()?,
    };
    builder
        .method_timeout(Duration::from_secs(timeout_secs))
        .build()
        .await
        .context("failed to connect to D-Bus; is candord running?")
}

async fn run_interview(
    proxy: &AnalyzerProxy<'_>,
    questions: &[String],
    media: &[PathBuf],
    camera_seconds: Option<u32>,
    insights: bool,
) -> Result<()> {
    for (i, question) in questions.iter().enumerate() {
        println!("\nQuestion {}/{}: {question}", i + 1, questions.len());

        let started: Value = serde_json::from_str(&proxy.start_session(question).await?)?;
        let session_id = started["session_id"]
            .as_str()
            .context("daemon returned no session_id")?
            .to_string();

        let stats: Value = match camera_seconds {
            Some(seconds) => {
                println!("Recording from camera... (candor stop to end early)");
                serde_json::from_str(&proxy.capture(&session_id, seconds).await?)?
            }
            None => {
                let path = daemon_path(&media[i])?;
                serde_json::from_str(&proxy.analyze_video(&session_id, &path).await?)?
            }
        };
        println!(
            "  analysed {} of {} frames, {} sample(s) recorded",
            stats["frames_sampled"], stats["frames_read"], stats["samples_recorded"]
        );

        let summary: Value = serde_json::from_str(&proxy.session_summary(&session_id).await?)?;
        print_top_emotions(&summary["summary"]);

        if insights && stats["samples_recorded"].as_u64().unwrap_or(0) > 0 {
            let result: Value = serde_json::from_str(&proxy.generate_insights(&session_id).await?)?;
            match result["insights"].as_str() {
                Some(text) => println!("\n{text}"),
                None => println!(
                    "  insights unavailable: {}",
                    result["error"].as_str().unwrap_or("unknown error")
                ),
            }
        }
    }

    let report: Value = serde_json::from_str(&proxy.export_report().await?)?;
    println!("\nReport exported: {} session(s)", report["total_sessions"]);
    Ok(())
}

/// Print the three emotions with the highest mean score.
fn print_top_emotions(summary: &Value) {
    let Some(stats) = summary.as_object() else {
        return;
    };
    let mut ranked: Vec<(&String, f64, f64)> = stats
        .iter()
        .filter_map(|(name, s)| Some((name, s["mean"].as_f64()?, s["max"].as_f64()?)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    if ranked.is_empty() {
        println!("  no emotions detected");
        return;
    }
    for (rank, (name, mean, max)) in ranked.iter().take(3).enumerate() {
        println!("  {}. {:<12} mean {mean:5.1}%  peak {max:5.1}%", rank + 1, name);
    }
}

/// Media paths are opened by the daemon, so send them absolute.
fn daemon_path(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    absolute
        .to_str()
        .map(str::to_string)
        .with_context(|| format!("path is not valid UTF-8: {}", absolute.display()))
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json(raw: &str) -> Result<()> {
    let value: Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn list_devices() -> Result<()> {
    let devices = candor_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return Ok(());
    }
    for d in devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}
