//! CLI interface for tripweaver

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tripweaver::{
    parse_trip_date, BudgetTier, CacheStore, EngineConfig, PipelineUpdate, TripPipeline,
    TripRequest,
};

#[derive(Parser)]
#[command(name = "tripweaver")]
#[command(about = "A progressive trip planner in Rust")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan a trip end to end
    Plan {
        /// Origin city or airport code
        #[arg(short, long)]
        from: String,
        /// Destination city or airport code
        #[arg(short, long)]
        to: String,
        /// Departure date (YYYY-MM-DD)
        #[arg(short, long)]
        depart: String,
        /// Return date (YYYY-MM-DD)
        #[arg(short, long)]
        return_date: String,
        /// Number of travelers
        #[arg(long, default_value = "1")]
        travelers: u32,
        /// Budget tier (budget, comfort, luxury)
        #[arg(long, default_value = "comfort")]
        budget: String,
        /// Output file for JSON results
        #[arg(short, long)]
        output: Option<String>,
        /// Serve a stored session bundle for this request if one exists
        #[arg(long)]
        cached: bool,
    },
    /// Inspect or maintain the lookup caches
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show entry counts, ages and sizes
    Stats,
    /// Remove expired entries
    Cleanup,
    /// Remove all entries
    Clear,
}

/// Initialize logging to a daily-rolling file so stdout stays clean for
/// results.
fn init_logging() -> anyhow::Result<()> {
    let log_dir = PathBuf::from("logs");
    fs::create_dir_all(&log_dir)?;

    // Blocking writer for simplicity.
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tripweaver.log");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .json(),
        )
        .init();

    Ok(())
}

fn cache_dir() -> PathBuf {
    std::env::var("TRIPWEAVER_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".tripweaver-cache"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            from,
            to,
            depart,
            return_date,
            travelers,
            budget,
            output,
            cached,
        } => {
            let request = TripRequest {
                travelers,
                depart_from: from,
                arrive_at: to,
                depart_date: parse_trip_date(&depart)?,
                return_date: parse_trip_date(&return_date)?,
                budget: budget.parse::<BudgetTier>()?,
            };

            let config = EngineConfig::from_env()?;
            let mut pipeline = TripPipeline::from_config(&config)?;

            if cached {
                if let Some(results) = pipeline.sessions().load(&request) {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                    return Ok(());
                }
                eprintln!("No stored session for this trip, planning from scratch");
            }

            let (tx, mut rx) = mpsc::channel(64);
            let printer = tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    match update {
                        PipelineUpdate::StageStarted(stage) => {
                            println!("-> {}", stage.as_str());
                        }
                        PipelineUpdate::StageCompleted(stage) => {
                            println!("   {} done", stage.as_str());
                        }
                        PipelineUpdate::Partial(partial) => {
                            if partial.days_completed > 0 {
                                println!("   itinerary: {} day(s) drafted", partial.days_completed);
                            }
                        }
                        PipelineUpdate::Failed { stage, message } => {
                            eprintln!("!! {} failed: {}", stage.as_str(), message);
                        }
                        PipelineUpdate::Completed => {
                            println!("   complete");
                        }
                    }
                }
            });

            let state = pipeline.plan(request, Some(tx)).await;
            printer.await?;

            let json = serde_json::to_string_pretty(&state)?;
            if let Some(output_file) = output {
                fs::write(&output_file, &json)?;
                println!("Results saved to {}", output_file);
            } else {
                println!("{}", json);
            }

            if let Some(error) = state.error {
                eprintln!("Trip planning halted: {}", error);
                std::process::exit(1);
            }

            // Print summary
            if let Some(plan) = &state.results.plan {
                println!("\nSummary:");
                println!("Destination: {}", plan.destination);
                println!("Days planned: {}", plan.daily_itinerary.len());
                if let Some(flight) = &plan.selected_flight {
                    println!("Flight pick: {} - {}", flight.airline, flight.price);
                }
            }
        }
        Commands::Cache { command } => {
            let store = CacheStore::open(cache_dir())?;
            let codes = store.codes();
            let coords = store.coords();
            match command {
                CacheCommands::Stats => {
                    println!("iata_codes: {}", serde_json::to_string_pretty(&codes.stats())?);
                    println!("coordinates: {}", serde_json::to_string_pretty(&coords.stats())?);
                }
                CacheCommands::Cleanup => {
                    println!("iata_codes: removed {} expired entries", codes.cleanup());
                    println!("coordinates: removed {} expired entries", coords.cleanup());
                    store.flush();
                }
                CacheCommands::Clear => {
                    codes.clear();
                    coords.clear();
                    println!("All lookup caches cleared");
                    store.flush();
                }
            }
        }
    }

    Ok(())
}
