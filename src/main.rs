use std::time::Duration;

use clap::Parser;
use resource_layer::cli::{run_simulation, Args, Command, SimulationOptions};
use resource_layer::infrastructure::{setup_logging, ResourceConfig};
use resource_layer::memory::MemoryMonitor;
use tracing::info;

async fn handle_memory_report(config: &ResourceConfig, samples: usize, interval_ms: u64) -> anyhow::Result<()> {
    let monitor = MemoryMonitor::for_current_process(config.memory.clone())?;
    for index in 0..samples.max(1) {
        if index > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        monitor.take_sample();
    }

    let report = monitor.generate_memory_report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    monitor.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = ResourceConfig::load(args.config.as_deref())?;

    // 命令行参数优先于配置文件和环境变量
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
        config.validate()?;
    }
    setup_logging(config.logging.clone())?;

    match args.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
        }
        Command::MemoryReport { samples, interval_ms } => {
            handle_memory_report(&config, samples, interval_ms).await?;
        }
        Command::Simulate {
            requests,
            repositories,
            latency_ms,
            mutation_every,
        } => {
            let options = SimulationOptions {
                requests,
                repositories,
                latency: Duration::from_millis(latency_ms),
                mutation_every,
            };
            let metrics = run_simulation(config, options).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    info!("done");
    Ok(())
}
