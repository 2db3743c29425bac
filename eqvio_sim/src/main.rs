// eqvio_sim/src/main.rs

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eqvio_sim::cli::Cli;
use eqvio_sim::{run, RunMode, ScenarioConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("eqvio_core=info".parse()?)
                .add_directive("eqvio_sim=info".parse()?),
        )
        .init();

    let args = Cli::parse();
    info!("Loading scenario from {:?}", args.scenario);
    let mut config = ScenarioConfig::load(&args.scenario)?;
    if let Some(seed) = args.seed {
        config.simulation.seed = Some(seed);
    }
    if let Some(duration) = args.duration {
        config.simulation.duration_seconds = duration;
    }
    config.validate()?;

    let mode = if args.sequential {
        RunMode::Sequential
    } else {
        RunMode::Threaded
    };
    let summary = run(&config, mode)?;

    println!("seed                 {}", summary.seed);
    match summary.initialized_at {
        Some(t) => println!("initialized at       {t:.3} s"),
        None => println!("initialized at       never"),
    }
    println!("frames processed     {}", summary.frames_processed);
    println!("residuals accepted   {}", summary.accepted);
    println!("residuals rejected   {}", summary.rejected);
    println!(
        "landmarks            +{} / -{} ({} refused)",
        summary.landmarks_added, summary.landmarks_removed, summary.landmarks_refused
    );
    if let Some(rmse) = summary.position_rmse {
        println!("position rmse        {rmse:.3} m");
    }
    if let (Some(p), Some(r)) = (summary.final_position_error, summary.final_attitude_error_deg) {
        println!("final error          {p:.3} m, {r:.2} deg");
    }
    if let Some(estimate) = &summary.final_estimate {
        println!("final gyro bias      {:?}", estimate.gyro_bias.as_slice());
        println!("final accel bias     {:?}", estimate.accel_bias.as_slice());
    }
    if summary.imu_evicted + summary.frames_evicted > 0 {
        println!(
            "evicted              {} imu samples, {} frames",
            summary.imu_evicted, summary.frames_evicted
        );
    }
    Ok(())
}
