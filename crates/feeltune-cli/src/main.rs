mod config;
mod diagnostics;
mod pipeline;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use feeltune_catalog::{search_phrase, CatalogClient, CatalogEngine, SpotifyClient};
use feeltune_core::{DecisionEngine, EmotionLabel};
use pipeline::{FileSource, Pipeline, RenderSink};
use render::{JsonSink, TerminalSink};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "feeltune", version, about = "Detect the mood in a photo and recommend matching music")]
struct Cli {
    /// TOML config file (also read from FEELTUNE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a photo and recommend music for the detected emotion
    Analyze {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show per-face scores for a photo
    Detect {
        /// Image file (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// Recommend music for an emotion name
    Recommend {
        /// Emotion, e.g. "happy"
        emotion: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the offline songs for an emotion
    Fallback {
        emotion: EmotionLabel,
    },
    /// List supported emotions
    Emotions,
    /// Check connectivity to the music catalog
    CheckNetwork,
    /// Show configuration and model status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("FEELTUNE_CONFIG").map(PathBuf::from));
    let config = Config::load(config_path.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    let stdout = std::io::stdout();

    match cli.command {
        Commands::Analyze { image, json } => {
            let pipeline = Pipeline::new(load_decision_engine(&config)?, catalog_engine(&config));
            let mut source = FileSource::new(&image);
            let result = if json {
                pipeline.run_once(&mut source, &mut JsonSink::new(stdout.lock()))?
            } else {
                pipeline.run_once(&mut source, &mut TerminalSink::new(stdout.lock()))?
            };
            tracing::debug!(
                label = %result.decision.label,
                tracks = result.recommendations.tracks.len(),
                fallback = result.recommendations.is_fallback(),
                "analysis complete"
            );
        }
        Commands::Detect { image } => {
            let engine = load_decision_engine(&config)?;
            let decoded = image::open(&image)
                .with_context(|| format!("cannot open image {}", image.display()))?;
            let decision = engine.evaluate(&feeltune_core::Image::from_dynamic(&decoded)?);

            let mut sink = TerminalSink::new(stdout.lock());
            if decision.faces.is_empty() {
                sink.advise("No face detected")?;
            }
            sink.emotion(&decision)?;
            println!("outcome: {}", serde_json::to_string(&decision.outcome)?);
        }
        Commands::Recommend { emotion, json } => {
            let set = catalog_engine(&config).recommend_named(&emotion);
            if json {
                serde_json::to_writer_pretty(stdout.lock(), &set)?;
                println!();
            } else {
                let mut sink = TerminalSink::new(stdout.lock());
                println!("{} {}", emotion, feeltune_core::emoji_for(&emotion));
                if let Some(note) = set.advisory() {
                    sink.advise(&note)?;
                }
                sink.recommendations(&set)?;
            }
        }
        Commands::Fallback { emotion } => {
            let tracks = CatalogEngine::offline().fallback(emotion);
            println!("Offline songs for {} {}", emotion, emotion.emoji());
            TerminalSink::new(stdout.lock()).tracks(&tracks)?;
        }
        Commands::Emotions => {
            for label in EmotionLabel::ALL {
                println!("{} {:<10} \"{}\"", label.emoji(), label.as_str(), search_phrase(Some(label)));
            }
        }
        Commands::CheckNetwork => {
            println!("Checking network connectivity...");
            let ok = diagnostics::report_network(
                &mut stdout.lock(),
                &diagnostics::PROBE_HOSTS,
                |host, port| diagnostics::check_connection(host, port, diagnostics::CONNECT_TIMEOUT),
            )?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            diagnostics::report_status(&mut stdout.lock(), &config)?;
        }
    }

    Ok(())
}

fn load_decision_engine(config: &Config) -> Result<DecisionEngine> {
    let params = config.detection_params();
    params.validate().context("invalid detection parameters")?;
    DecisionEngine::load(&config.detector_model_path(), &config.classifier_files(), params)
        .context("cannot analyze photos until the models are installed (see `feeltune status`)")
}

/// Live catalog when credentials are configured, offline otherwise.
fn catalog_engine(config: &Config) -> CatalogEngine {
    let client: Option<Box<dyn CatalogClient>> = match config.credentials() {
        Some(credentials) => match SpotifyClient::new(credentials, config.http_timeout()) {
            Ok(client) => Some(Box::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "cannot create catalog client, using offline songs");
                None
            }
        },
        None => {
            tracing::info!("catalog credentials not set, using offline songs");
            None
        }
    };
    CatalogEngine::new(client).with_retry(config.retry_policy())
}
