//! hottubd CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use std::sync::Arc;

#[derive(Parser)]
#[command(name = "hottubd", version)]
#[command(about = "Scheduling and heating-control daemon for a home hot tub")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand is given)
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Restart the daemon (stop + start)
    Restart {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Show status of the running daemon
    Status,
    /// Install the monthly log-rotation crontab entry and its liveness
    /// check, without starting the daemon (safe to run on every deploy).
    MaintenanceSetup,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Start { foreground: false });

    match command {
        Command::Start { foreground } => cmd_start(foreground),
        Command::Stop => cmd_stop(),
        Command::Restart { foreground } => {
            cmd_stop_if_running();
            cmd_start(foreground)
        }
        Command::Status => cmd_status(),
        Command::MaintenanceSetup => cmd_maintenance_setup(),
    }
}

fn cmd_start(foreground: bool) -> anyhow::Result<()> {
    let config = hottub::config::Config::load().context("failed to load configuration")?;
    let paths = hottub::daemon::DaemonPaths::new(&config);

    if let Some(pid) = hottub::daemon::is_running(&paths) {
        eprintln!("hottubd is already running (pid {pid})");
        std::process::exit(1);
    }

    if !foreground {
        // Fork before creating any Tokio runtime: daemonize() replaces the
        // process image via fork, and Tokio's I/O driver and thread pool
        // don't survive that, so tracing init and the runtime must happen
        // after this call returns in the child.
        hottub::daemon::daemonize(&paths)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        if foreground {
            hottub::daemon::init_foreground_tracing();
        } else {
            hottub::daemon::init_background_tracing(&paths);
        }
        run(config, &paths, foreground).await
    })
}

#[tokio::main]
async fn cmd_stop() -> anyhow::Result<()> {
    let config = hottub::config::Config::load().context("failed to load configuration")?;
    let paths = hottub::daemon::DaemonPaths::new(&config);

    let Some(pid) = hottub::daemon::is_running(&paths) else {
        eprintln!("hottubd is not running");
        std::process::exit(1);
    };

    match hottub::daemon::send_command(&paths, hottub::daemon::IpcCommand::Shutdown).await {
        Ok(hottub::daemon::IpcResponse::Ok) => {
            eprintln!("stopping hottubd (pid {pid})...");
        }
        Ok(hottub::daemon::IpcResponse::Error { message }) => {
            eprintln!("shutdown failed: {message}");
            std::process::exit(1);
        }
        Ok(_) => {
            eprintln!("unexpected response from daemon");
            std::process::exit(1);
        }
        Err(error) => {
            eprintln!("failed to send shutdown command: {error}");
            std::process::exit(1);
        }
    }

    if hottub::daemon::wait_for_exit(pid) {
        eprintln!("hottubd stopped");
    } else {
        eprintln!("hottubd did not stop within 10 seconds (pid {pid})");
        std::process::exit(1);
    }

    Ok(())
}

/// Stop if running, don't error if not — used by `restart`.
fn cmd_stop_if_running() {
    let Ok(config) = hottub::config::Config::load() else { return };
    let paths = hottub::daemon::DaemonPaths::new(&config);

    let Some(pid) = hottub::daemon::is_running(&paths) else {
        return;
    };

    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return;
    };

    runtime.block_on(async {
        if let Ok(hottub::daemon::IpcResponse::Ok) =
            hottub::daemon::send_command(&paths, hottub::daemon::IpcCommand::Shutdown).await
        {
            eprintln!("stopping hottubd (pid {pid})...");
            hottub::daemon::wait_for_exit(pid);
        }
    });
}

fn cmd_status() -> anyhow::Result<()> {
    let config = hottub::config::Config::load().context("failed to load configuration")?;
    let paths = hottub::daemon::DaemonPaths::new(&config);

    let Some(_pid) = hottub::daemon::is_running(&paths) else {
        eprintln!("hottubd is not running");
        std::process::exit(1);
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        match hottub::daemon::send_command(&paths, hottub::daemon::IpcCommand::Status).await {
            Ok(hottub::daemon::IpcResponse::Status { pid, uptime_seconds }) => {
                let hours = uptime_seconds / 3600;
                let minutes = (uptime_seconds % 3600) / 60;
                let seconds = uptime_seconds % 60;
                eprintln!("hottubd is running");
                eprintln!("  pid:    {pid}");
                eprintln!("  uptime: {hours}h {minutes}m {seconds}s");
            }
            Ok(hottub::daemon::IpcResponse::Error { message }) => {
                eprintln!("status query failed: {message}");
                std::process::exit(1);
            }
            Ok(_) => {
                eprintln!("unexpected response from daemon");
                std::process::exit(1);
            }
            Err(error) => {
                eprintln!("failed to query daemon status: {error}");
                std::process::exit(1);
            }
        }
    });

    Ok(())
}

fn cmd_maintenance_setup() -> anyhow::Result<()> {
    let config = hottub::config::Config::load().context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        let components = build_components(config)?;
        let result = components.maintenance.run().await.context("maintenance setup failed")?;
        eprintln!(
            "maintenance setup: cron {}, liveness check {}",
            if result.cron_created { "installed" } else { "already present" },
            if result.healthcheck_created { "installed" } else { "already present" },
        );
        Ok(())
    })
}

/// Every Arc'd subsystem the HTTP router and cron-invoked handlers share.
struct Components {
    scheduler: Arc<hottub::scheduler::Scheduler>,
    equipment: Arc<hottub::equipment::EquipmentController>,
    target_temp: Arc<hottub::target_temp::TargetTempService>,
    maintenance: Arc<hottub::maintenance::MaintenanceSetup>,
}

fn build_components(config: hottub::config::Config) -> anyhow::Result<Components> {
    let crontab: Arc<dyn hottub::crontab::CrontabAdapter> =
        Arc::new(hottub::crontab::SystemCrontab::new(config.crontab_lock_path()));

    let liveness: Arc<dyn hottub::liveness::LivenessClient> = match &config.liveness_api_key {
        Some(key) => Arc::new(hottub::liveness::HttpLivenessClient::new(config.liveness_api_base.clone(), key.clone())),
        None => Arc::new(hottub::liveness::NullLivenessClient),
    };

    let job_store = Arc::new(hottub::store::jobs::JobStore::new(config.jobs_dir())?);
    let scheduler = Arc::new(hottub::scheduler::Scheduler::new(
        config.clone(),
        job_store.clone(),
        crontab.clone(),
        liveness.clone(),
    ));

    let webhook: Arc<dyn hottub::equipment::EquipmentWebhookClient> = Arc::new(
        hottub::equipment::HttpEquipmentWebhook::new(config.equipment_webhook_url.clone(), config.equipment_webhook_key.clone()),
    );
    let sensor_config = Arc::new(hottub::store::sensors::SensorConfigStore::new(config.sensors_path()));
    let sensors = Arc::new(hottub::target_temp::StaticSensorSource::new(sensor_config));
    let equipment_status = Arc::new(hottub::store::equipment::EquipmentStatusStore::new(config.equipment_status_path()));
    let heating_events = Arc::new(hottub::store::heating_event::HeatingEventLog::new(config.heating_events_path()));
    let equipment = Arc::new(hottub::equipment::EquipmentController::new(
        equipment_status,
        heating_events,
        webhook,
        Some(sensors.clone()),
    ));

    let target_temp_state = Arc::new(hottub::store::target_temp::TargetTempStateStore::new(config.target_temp_state_path()));
    let target_temp = Arc::new(hottub::target_temp::TargetTempService::new(
        config.clone(),
        target_temp_state,
        equipment.clone(),
        crontab.clone(),
        sensors,
    ));

    // Break the Equipment Controller / Target-Temperature Service
    // construction-order cycle by injecting the cancel hook last.
    equipment.set_heater_off_hook(target_temp.clone());

    let healthcheck_state =
        Arc::new(hottub::store::healthcheck_state::HealthcheckStateStore::new(config.maintenance_healthcheck_path()));
    let maintenance = Arc::new(hottub::maintenance::MaintenanceSetup::new(
        config,
        crontab,
        liveness,
        healthcheck_state,
        job_store,
    ));

    Ok(Components { scheduler, equipment, target_temp, maintenance })
}

async fn run(config: hottub::config::Config, paths: &hottub::daemon::DaemonPaths, foreground: bool) -> anyhow::Result<()> {
    tracing::info!("starting hottubd");
    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    let (mut shutdown_rx, _ipc_handle) =
        hottub::daemon::start_ipc_server(paths).await.context("failed to start IPC server")?;

    let bind = config.bind;
    let config_snapshot = config.clone();
    let components = build_components(config)?;

    components
        .maintenance
        .run()
        .await
        .context("failed to run maintenance setup at startup")?;

    let state = hottub::api::ApiState {
        config: config_snapshot,
        scheduler: components.scheduler,
        equipment: components.equipment,
        target_temp: components.target_temp,
        maintenance: components.maintenance,
        started_at: chrono::Utc::now(),
    };

    #[cfg(feature = "metrics")]
    let metrics_bind = state.config.metrics_bind;

    let http_shutdown = shutdown_rx.clone();
    let _http_handle = hottub::api::start_http_server(bind, state, http_shutdown)
        .await
        .context("failed to start HTTP server")?;

    #[cfg(feature = "metrics")]
    let _metrics_handle = match metrics_bind {
        Some(metrics_bind) => {
            let metrics_shutdown = shutdown_rx.clone();
            Some(
                hottub::telemetry::start_metrics_server(metrics_bind, metrics_shutdown)
                    .await
                    .context("failed to start metrics server")?,
            )
        }
        None => None,
    };

    if foreground {
        eprintln!("hottubd running in foreground (pid {})", std::process::id());
    } else {
        tracing::info!(pid = std::process::id(), "hottubd daemon started");
    }

    tokio::select! {
        _ = shutdown_rx.wait_for(|shutdown| *shutdown) => {
            tracing::info!("shutdown signal received via IPC");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    tracing::info!("hottubd stopped");
    hottub::daemon::cleanup(paths);
    Ok(())
}
