use anyhow::{Context, Result};
use candor_core::insight::{GeminiClient, InsightGenerator};
use candor_core::{OnnxAnalyzer, SessionStore};
use candor_hw::Camera;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config};
use dbus_interface::{CandorService, ServiceSettings, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("candord starting");

    let config = Config::load().context("failed to load configuration")?;

    // Models are required; fail fast if they are missing.
    let analyzer = OnnxAnalyzer::load(
        &config.detector_model_path(),
        &config.classifier_model_path(),
        config.emotion_labels.clone(),
    )
    .context("failed to load analysis models")?;

    // The camera is optional: uploads and recorded media work without it.
    let camera = match Camera::open(&config.camera_device) {
        Ok(camera) => {
            tracing::info!(
                device = %camera.device_path,
                width = camera.width,
                height = camera.height,
                "camera ready"
            );
            Some(camera)
        }
        Err(e) => {
            tracing::warn!(device = %config.camera_device, error = %e, "camera unavailable; capture disabled");
            None
        }
    };
    let camera_label = camera.as_ref().map(|c| c.device_path.clone());

    let store = Arc::new(SessionStore::new());
    let engine = engine::spawn_engine(
        Box::new(analyzer),
        camera,
        Arc::clone(&store),
        config.stride,
        config.warmup_frames,
    )?;

    let insights = build_insights(&config).await?;
    tracing::info!(configured = insights.is_configured(), "text generation");

    let service = CandorService::new(
        engine,
        store,
        Arc::new(insights),
        ServiceSettings {
            report_path: config.report_path.clone(),
            analysis_timeout: config.analysis_timeout(),
            insight_timeout: config.insight_timeout(),
            capture_seconds: config.capture_seconds,
            stride: config.stride.get(),
            camera: camera_label,
        },
    );

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "candord ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("candord shutting down");

    Ok(())
}

/// Build the text-generation backend.
///
/// The blocking HTTP client owns its own runtime and must be created off
/// the async executor.
async fn build_insights(config: &Config) -> Result<InsightGenerator> {
    let Some(api_key) = config.gemini_api_key.clone() else {
        tracing::warn!("GEMINI_API_KEY not set; insights will report not_configured");
        return Ok(InsightGenerator::disabled());
    };
    let model = config.gemini_model.clone();
    let timeout = config.insight_timeout();

    let client = tokio::task::spawn_blocking(move || GeminiClient::new(api_key, model, timeout))
        .await?
        .context("failed to build text-generation client")?;
    Ok(InsightGenerator::new(Box::new(client)))
}
