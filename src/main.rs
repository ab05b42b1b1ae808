use anyhow::{bail, Context};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use vigil::{AlarmEngine, AlarmRegistry, Config, RegistryEvent, TelemetryStore, VigilError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vigil::init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("--version") {
        vigil::print_system_info();
        return Ok(());
    }
    let (config_path, telemetry_path) = match (args.get(1), args.get(2)) {
        (Some(config), Some(telemetry)) => (config, telemetry),
        _ => bail!("Usage: {} <config.yaml> <telemetry.json>", args.first().map_or("vigil", String::as_str)),
    };

    info!("Vigil v{} starting", vigil::VERSION);

    let config = Config::from_file(config_path).with_context(|| format!("loading {}", config_path))?;
    info!("Loaded {} alarm base(s) for '{}'", config.alarms.len(), config.device);

    let store = TelemetryStore::with_config(&config);
    store
        .load_snapshot(telemetry_path)
        .with_context(|| format!("loading telemetry from {}", telemetry_path))?;

    let registry = AlarmRegistry::start(config.registry.clone());
    let watched = Arc::downgrade(&registry);
    registry.add_watcher(move || {
        if let Some(registry) = watched.upgrade() {
            info!(
                "{} active alarm(s), {} unacknowledged",
                registry.len(),
                registry.unacknowledged_count()
            );
        }
    });

    let mut events = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let RegistryEvent::Reclassified { id, from, to } = event {
                info!("Alarm {} moved from {} to {}", id, from, to);
            }
        }
    });

    let engine = AlarmEngine::new(Arc::clone(&registry));
    match engine.check_new_telemetry(&store) {
        Ok(added) => info!("Raised {} alarm(s)", added.len()),
        Err(VigilError::Evaluation { failures }) => {
            for failure in &failures {
                warn!("Alarm base {} could not be evaluated", failure);
            }
        }
        Err(e) => {
            error!("Alarm evaluation failed: {}", e);
            return Err(e.into());
        }
    }

    for (priority, alarms) in registry.get_snapshot().iter().rev() {
        for alarm in alarms {
            info!(
                "[{}] {} {} (confirmed {})",
                priority,
                alarm.id(),
                alarm.event.description,
                alarm.event.confirm_time.to_rfc3339()
            );
        }
    }

    info!("Escalating alarms, press Ctrl-C to stop");
    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Received shutdown signal, {} alarm(s) active", registry.len());

    Ok(())
}
