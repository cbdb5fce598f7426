//! Probe a URL a few times and publish every result to Kafka.
use envconfig::Envconfig;
use eyre::WrapErr;
use tracing::info;

use monitor_common::setup_tracing;
use monitor_probe::config::Config;
use monitor_probe::probe::{Prober, Target};
use monitor_probe::publisher::{run, Publisher, Schedule};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    setup_tracing();

    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    let target = Target::new(
        config.probe_url.as_str(),
        config.probe_method.as_str(),
        config.pattern(),
    )?;
    let prober = Prober::with_timeout(config.request_timeout_ms.0)?;
    let publisher = Publisher::new(&config.kafka)?;

    let schedule = Schedule {
        times: config.probe_times,
        wait: config.probe_wait_ms.0,
    };
    let published = run(&prober, &target, &publisher, schedule).await?;

    info!("published {} results for {}", published, target.url());

    Ok(())
}
