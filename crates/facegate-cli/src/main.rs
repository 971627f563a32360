use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::MatchResult;
use facegate_engine::{spawn_engine, Config, EngineHandle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod input;

#[derive(Parser)]
#[command(name = "facegate", version, about = "Offline face registration and recognition")]
struct Cli {
    /// Store directory (overrides FACEGATE_STORE_DIR)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity from an image with exactly one face
    Register {
        identity: String,
        /// Image file or data:image/...;base64 URL
        image: String,
    },
    /// Replace the stored face of an existing identity
    Update { identity: String, image: String },
    /// Identify the largest face in an image
    Recognize {
        image: String,
        /// Minimum confidence in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Also print every identity's score
        #[arg(long)]
        all: bool,
    },
    /// Score two images against each other without touching the store
    Compare { a: String, b: String },
    /// List registered identities
    List,
    /// Delete a registered identity
    Delete { identity: String },
    /// Reload records from the store directory
    Reload,
    /// Show a stored record's metadata
    Inspect { identity: String },
    /// Show engine status
    Status,
}

fn percent(score: f32) -> String {
    format!("{:.1}%", score * 100.0)
}

fn print_terms(result: &MatchResult) {
    let terms = [
        ("intensity", result.intensity),
        ("texture", result.texture),
        ("corner", result.corner),
        ("center", result.center),
        ("stats", result.stats),
        ("area", result.area),
    ];
    for (name, value) in terms {
        if let Some(v) = value {
            println!("  {name:<10} {}", percent(v));
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn deleted_json(identity: &str) -> serde_json::Value {
    serde_json::json!({ "deleted": identity })
}

fn reloaded_json(count: usize) -> serde_json::Value {
    serde_json::json!({ "identities": count })
}

async fn run(engine: EngineHandle, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Register { identity, image } => {
            let image = input::load_image(&image)?;
            let reg = engine.register(&identity, image).await?;
            if json {
                return print_json(&reg);
            }
            let r = reg.region;
            println!(
                "Registered {} (face {}x{} at {},{})",
                reg.identity, r.width, r.height, r.x, r.y
            );
        }
        Commands::Update { identity, image } => {
            let image = input::load_image(&image)?;
            let reg = engine.update(&identity, image).await?;
            if json {
                return print_json(&reg);
            }
            println!("Updated {}", reg.identity);
        }
        Commands::Recognize {
            image,
            threshold,
            all,
        } => {
            let image = input::load_image(&image)?;
            if all {
                let ranking = engine.score_all(image.clone()).await?;
                if json {
                    print_json(&ranking)?;
                } else {
                    for (identity, result) in &ranking {
                        println!("{identity:<24} {}", percent(result.score));
                    }
                }
            }
            let hit = engine.recognize(image, threshold).await?;
            if json {
                return print_json(&hit);
            }
            println!("{} ({} confidence)", hit.identity, percent(hit.confidence));
        }
        Commands::Compare { a, b } => {
            let a = input::load_image(&a)?;
            let b = input::load_image(&b)?;
            let result = engine.compare(a, b).await?;
            if json {
                return print_json(&result);
            }
            println!("Similarity: {}", percent(result.score));
            print_terms(&result);
        }
        Commands::List => {
            let ids = engine.list().await?;
            if json {
                return print_json(&ids);
            }
            if ids.is_empty() {
                println!("No identities registered");
            }
            for id in ids {
                println!("{id}");
            }
        }
        Commands::Delete { identity } => {
            engine.delete(&identity).await?;
            if json {
                return print_json(&deleted_json(&identity));
            }
            println!("Deleted {identity}");
        }
        Commands::Reload => {
            let count = engine.reload().await?;
            if json {
                return print_json(&reloaded_json(count));
            }
            println!("Loaded {count} identities");
        }
        Commands::Inspect { identity } => {
            let info = engine.inspect(&identity).await?;
            if json {
                return print_json(&info);
            }
            let record = &info.record;
            let (w, h) = record.dimensions();
            println!("Identity:   {}", info.identity);
            println!("Saved at:   {}", info.saved_at.to_rfc3339());
            println!("Face size:  {w}x{h}");
            println!("Mean/std:   {:.1} / {:.1}", record.mean_intensity(), record.std_intensity());
            println!(
                "Layout:     {} bins, {}px canonical",
                record.intensity_histogram().len(),
                record.canonical_size()
            );
            println!("Digest:     {}", record.digest());
        }
        Commands::Status => {
            print_json(&engine.status().await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(store) = cli.store {
        config.store_dir = store;
    }
    tracing::debug!(
        store = %config.store_dir.display(),
        detector = %config.matcher.detector,
        threshold = config.threshold,
        "configuration loaded"
    );

    let engine = spawn_engine(&config)
        .with_context(|| format!("failed to start engine on {}", config.store_dir.display()))?;

    run(engine, cli.command, cli.json).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_flag_applies_to_delete_and_reload() {
        let cli = Cli::try_parse_from(["facegate", "delete", "ann", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Delete { ref identity } if identity == "ann"));

        let cli = Cli::try_parse_from(["facegate", "--json", "reload"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Reload));
    }

    #[test]
    fn test_delete_and_reload_json() {
        let deleted = deleted_json("ann");
        assert_eq!(deleted["deleted"], "ann");
        assert_eq!(deleted.as_object().map(|o| o.len()), Some(1));

        let reloaded = reloaded_json(3);
        assert_eq!(reloaded["identities"], 3);
        assert_eq!(serde_json::to_string(&reloaded).unwrap(), r#"{"identities":3}"#);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0.5), "50.0%");
        assert_eq!(percent(1.0), "100.0%");
    }
}
