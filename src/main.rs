use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use log::{info, warn, error, debug};

use mps_common::{NeighborSearchConfig, NeighborSnapshot};
use mps_neighbor_search::NeighborSearch;

/// Command-line arguments for the search driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the number of steps from the configuration
    #[arg(long)]
    steps: Option<u32>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting MPS neighbor search...");

    // --- Load Configuration ---
    let mut config = NeighborSearchConfig::load(&args.config)?;
    if let Some(steps) = args.steps {
        config.search.steps = steps;
    }

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize (places particles and runs the step-0 search) ---
    let mut search = NeighborSearch::new(config)?;
    debug!("Search Parameters: {:#?}", search.params());

    let total_steps = search.config().search.steps;
    let mut record_interval_steps = search.config().search.record_interval_steps;
    if record_interval_steps == 0 {
        warn!("record_interval_steps is 0. Recording every step.");
        record_interval_steps = 1;
    }

    if let Err(e) = search.record_snapshot() {
        error!("Error recording initial snapshot: {}", e);
        anyhow::bail!("Failed to record initial snapshot.");
    }

    info!("Starting search loop for {} steps...", total_steps);
    let start_time = Instant::now();

    for step in 1..=total_steps {
        if let Err(e) = search.step() {
            error!("Error during step {}: {}", step, e);
            return Err(e);
        }

        if step % record_interval_steps == 0 || step == total_steps {
            let (build_ms, query_ms) = search.last_timings_ms();
            info!(
                "Step [{}/{}] | Build: {:6.2} ms | Queries: {:6.2} ms | Elapsed: {:.2} s",
                step,
                total_steps,
                build_ms,
                query_ms,
                start_time.elapsed().as_secs_f64()
            );
            if let Err(e) = search.record_snapshot() {
                error!("Error recording snapshot at step {}: {}", step, e);
                anyhow::bail!("Failed to record snapshot.");
            }
        }
    }

    info!("Search finished in {:.3} seconds.", start_time.elapsed().as_secs_f64());

    // --- Save Recorded Data ---
    let base_filename = search.config().output.base_filename.clone();
    let output_format = search.config().output.format.as_deref().unwrap_or("json");
    save_snapshots(search.get_recorded_snapshots(), &base_filename, output_format)?;

    if search.config().output.save_neighbor_counts {
        let filename = format!("{}_neighbor_counts.csv", base_filename);
        let mut writer = csv::Writer::from_path(&filename)?;
        writer.write_record(["particle", "ghost", "neighbors"])?;
        for (index, count) in search.neighbor_counts().iter().enumerate() {
            writer.write_record(&[
                index.to_string(),
                search.state.is_ghost(index).to_string(),
                count.to_string(),
            ])?;
        }
        writer.flush()?;
        info!("Final neighbor counts saved to {}", filename);
    } else {
        info!("Skipping saving neighbor counts as per config.");
    }

    info!("Search Complete.");
    Ok(())
}

fn save_snapshots(snapshots: &[NeighborSnapshot], base_filename: &str, output_format: &str) -> Result<()> {
    match output_format {
        "bincode" => {
            // Binary format (much more compact)
            let filename = format!("{}_snapshots.bin", base_filename);
            let file = File::create(&filename)?;
            bincode::serialize_into(file, snapshots)?;
            info!("All snapshots saved to {} (binary format)", filename);
        }
        "messagepack" => {
            // MessagePack format (compact and cross-platform)
            let filename = format!("{}_snapshots.msgpack", base_filename);
            let mut file = File::create(&filename)?;
            rmp_serde::encode::write(&mut file, snapshots)?;
            info!("All snapshots saved to {} (MessagePack format)", filename);
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", base_filename);
            let json_string = serde_json::to_string(snapshots)?;
            File::create(&filename)?.write_all(json_string.as_bytes())?;
            info!("All snapshots saved to {}", filename);
        }
    }
    Ok(())
}
