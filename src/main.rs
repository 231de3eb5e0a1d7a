//! Face Inference CLI
//!
//! Detects faces and predicts age bracket and gender with OpenVINO models
//! staged from a local asset bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use faceinfer::config::Config;
use faceinfer::engine::{FaceRecord, ModelCache, OpenVinoEngine};
use faceinfer::service::{DetectedFace, PredictionPipeline};
use faceinfer::staging::{AssetStager, DirAssetSource};
use faceinfer::utils::image::{draw_faces, load_image};

#[derive(Parser)]
#[command(name = "faceinfer", version, about = "Face detection and age/gender inference")]
struct Cli {
    /// Configuration file (TOML); defaults to config.toml when present
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect faces and print their boxes and landmarks
    Detect {
        image: PathBuf,
        /// Save a square crop around each face into this directory
        #[arg(long)]
        crops_dir: Option<PathBuf>,
        /// Save a copy of the image with every face outlined
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Predict age bracket and gender for the whole image
    Classify { image: PathBuf },
    /// Detect faces, then predict age bracket and gender for each one
    Analyze { image: PathBuf },
}

type Pipeline = PredictionPipeline<OpenVinoEngine, OpenVinoEngine>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(Config::default_path())?,
    };

    info!("Configuration loaded:");
    info!("  Asset root: {}", config.staging.asset_root.display());
    info!("  Cache root: {}", config.staging.cache_root.display());
    info!("  Device: {}", config.inference.device);

    let pipeline = Arc::new(build_pipeline(&config)?);

    match cli.command {
        Command::Detect {
            image,
            crops_dir,
            annotate,
        } => {
            let image = Arc::new(load_image(&image)?);
            let crop_faces = crops_dir.is_some();
            let faces = tokio::task::spawn_blocking({
                let pipeline = pipeline.clone();
                let image = image.clone();
                move || pipeline.detect_faces(&image, crop_faces)
            })
            .await??;

            let summary: Vec<DetectedFace> = faces.iter().map(DetectedFace::from).collect();
            println!("{}", serde_json::to_string_pretty(&summary)?);

            if let Some(dir) = crops_dir {
                save_crops(&dir, &faces)?;
            }
            if let Some(path) = annotate {
                draw_faces(&image, &faces)
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("Annotated image written to {}", path.display());
            }
        }
        Command::Classify { image } => {
            let image = Arc::new(load_image(&image)?);
            let prediction = pipeline.classify_age_and_gender_async(image).await?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
        Command::Analyze { image } => {
            let image = Arc::new(load_image(&image)?);
            let analyses = pipeline.analyze_faces_async(image).await?;
            println!("{}", serde_json::to_string_pretty(&analyses)?);
        }
    }

    Ok(())
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let staging = &config.staging;
    let stager = AssetStager::new(
        Box::new(DirAssetSource::new(&staging.asset_root)),
        staging.bundle_dir.as_str(),
        &staging.cache_root,
        &staging.cache_dir,
    );

    // One OpenVINO core serves every role.
    let engine = Arc::new(
        OpenVinoEngine::new(&config.inference).context("failed to initialize OpenVINO")?,
    );
    let cache = ModelCache::new(
        stager,
        config.models.clone(),
        config.inference.detector_input,
        engine.clone(),
        engine,
    );

    Ok(PredictionPipeline::new(
        Arc::new(cache),
        config.inference.classifier_input,
    ))
}

fn save_crops(dir: &Path, faces: &[FaceRecord]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut saved = 0;
    for (i, face) in faces.iter().enumerate() {
        let Some(crop) = &face.crop else {
            continue;
        };
        let path = dir.join(format!("face_{i}.png"));
        crop.save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        saved += 1;
    }
    info!("Saved {} face crops to {}", saved, dir.display());
    Ok(())
}
