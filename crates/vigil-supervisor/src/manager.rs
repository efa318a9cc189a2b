use crate::control::{InstanceId, InstanceStatus, ProcessControl};
use crate::instance::{InstanceContext, ManagedInstance};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use vigil_common::{ProcessError, ProcessResult, Result, SupervisorError};
use vigil_descriptor::{EcosystemConfig, ProcessDescriptor, SupervisorSettings};
use vigil_log_collection::{LogCollector, LogEntry, LogWriterRegistry};
use vigil_process_file::{ProcessFile, ProcessFileManager};
use vigil_resource_limits::ResourceMonitor;

/// Runtime options derived from the ecosystem file and the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    /// Holds `logs/` and `pids/`.
    pub home: PathBuf,
    pub memory_check_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl SupervisorOptions {
    /// An explicit home wins over the one in the file, which wins over
    /// `~/.vigil`.
    pub fn from_settings(settings: &SupervisorSettings, home: Option<PathBuf>) -> Self {
        let home = home
            .or_else(|| settings.home.as_ref().map(PathBuf::from))
            .unwrap_or_else(Self::default_home);

        Self {
            home,
            memory_check_interval: settings.memory_check_interval,
            shutdown_timeout: settings.shutdown_timeout,
        }
    }

    pub fn default_home() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
            .join(".vigil")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    pub fn pid_dir(&self) -> PathBuf {
        self.home.join("pids")
    }
}

/// Supervisor overall state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Initializing,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// How a process left behind by an earlier run relates to the current
/// ecosystem file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDrift {
    Unchanged,
    /// Launch fields differ from the ones it was started with.
    Changed,
    /// Its app or instance is no longer configured.
    Removed,
}

/// A live PID file found when the supervisor was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousProcess {
    pub file: ProcessFile,
    pub drift: ConfigDrift,
}

/// All instances of one descriptor.
pub struct ManagedApp {
    pub descriptor: Arc<ProcessDescriptor>,
    pub instances: Vec<Box<dyn ProcessControl>>,
}

/// Runs every app of an ecosystem file.
///
/// The descriptor set is fixed at construction; picking up edits means
/// building a new supervisor.
pub struct Supervisor {
    config: Arc<EcosystemConfig>,
    options: SupervisorOptions,
    apps: Arc<RwLock<HashMap<String, ManagedApp>>>,
    state: Arc<Mutex<SupervisorState>>,
    pid_files: ProcessFileManager,
    collector: LogCollector,
    previous_run: Vec<PreviousProcess>,
}

impl Supervisor {
    pub async fn new(config: EcosystemConfig, options: SupervisorOptions) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating supervisor with {} apps (home: {})",
            config.apps.len(),
            options.home.display()
        );

        let pid_files = ProcessFileManager::new(options.pid_dir());
        let collector = LogCollector::new();
        let resource_monitor = Arc::new(ResourceMonitor::new());
        let log_writers = Arc::new(LogWriterRegistry::new());

        let mut apps = HashMap::new();
        for app in &config.apps {
            let descriptor = Arc::new(app.clone());
            let context = Arc::new(InstanceContext {
                descriptor: Arc::clone(&descriptor),
                log_dir: options.log_dir(),
                memory_check_interval: options.memory_check_interval,
                resource_monitor: Arc::clone(&resource_monitor),
                pid_files: pid_files.clone(),
                log_writers: Arc::clone(&log_writers),
                collector: collector.clone(),
            });

            let instances = (0..app.instances)
                .map(|instance| {
                    let id = InstanceId::new(&app.name, instance);
                    Box::new(ManagedInstance::new(id, Arc::clone(&context))) as Box<dyn ProcessControl>
                })
                .collect();

            if apps
                .insert(app.name.clone(), ManagedApp { descriptor, instances })
                .is_some()
            {
                return Err(ProcessError::already_exists(app.name.clone()).into());
            }
            debug!("Initialized app: {} ({} instances)", app.name, app.instances);
        }

        let previous_run = scan_previous_run(&pid_files, &config).await;

        Ok(Self {
            config: Arc::new(config),
            options,
            apps: Arc::new(RwLock::new(apps)),
            state: Arc::new(Mutex::new(SupervisorState::Initializing)),
            pid_files,
            collector,
            previous_run,
        })
    }

    /// Processes still alive from an earlier supervisor run. They are
    /// reported, never adopted.
    pub fn previous_run(&self) -> &[PreviousProcess] {
        &self.previous_run
    }

    pub fn config(&self) -> &EcosystemConfig {
        &self.config
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Launch every app with `autostart` set.
    pub async fn start(&self) -> Result<()> {
        info!("Starting supervisor");
        self.set_state(SupervisorState::Starting).await;

        for app in self.config.autostart_apps() {
            if let Err(e) = self.start_app(&app.name).await {
                error!("Failed to start app {}: {}", app.name, e);
            }
        }

        self.set_state(SupervisorState::Running).await;
        info!("Supervisor started");
        Ok(())
    }

    pub async fn start_app(&self, name: &str) -> ProcessResult<()> {
        let mut apps = self.apps.write().await;
        let app = apps.get_mut(name).ok_or_else(|| ProcessError::not_found(name))?;

        for instance in app.instances.iter_mut() {
            instance.start().await?;
        }
        Ok(())
    }

    pub async fn stop_app(&self, name: &str) -> ProcessResult<()> {
        let mut apps = self.apps.write().await;
        let app = apps.get_mut(name).ok_or_else(|| ProcessError::not_found(name))?;

        for instance in app.instances.iter_mut() {
            instance.stop().await?;
        }
        info!("App stopped: {}", name);
        Ok(())
    }

    pub async fn restart_app(&self, name: &str) -> ProcessResult<()> {
        let mut apps = self.apps.write().await;
        let app = apps.get_mut(name).ok_or_else(|| ProcessError::not_found(name))?;

        for instance in app.instances.iter_mut() {
            instance.restart().await?;
        }
        Ok(())
    }

    /// Stop everything, giving up after `shutdown_timeout`.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down supervisor");
        self.set_state(SupervisorState::Stopping).await;

        let names: Vec<String> = self.config.apps.iter().map(|app| app.name.clone()).collect();
        let stop_all = async {
            for name in &names {
                if let Err(e) = self.stop_app(name).await {
                    error!("Failed to stop app {} during shutdown: {}", name, e);
                }
            }
        };

        let result = match tokio::time::timeout(self.options.shutdown_timeout, stop_all).await {
            Ok(()) => Ok(()),
            Err(_) => Err(SupervisorError::Shutdown(format!(
                "apps still running after {:?}",
                self.options.shutdown_timeout
            ))),
        };

        self.set_state(SupervisorState::Stopped).await;
        info!("Supervisor shut down");
        result
    }

    pub async fn app_info(&self, name: &str) -> ProcessResult<Vec<InstanceStatus>> {
        let apps = self.apps.read().await;
        let app = apps.get(name).ok_or_else(|| ProcessError::not_found(name))?;

        let mut statuses = Vec::with_capacity(app.instances.len());
        for instance in &app.instances {
            statuses.push(instance.status().await);
        }
        Ok(statuses)
    }

    /// Every instance, in ecosystem file order.
    pub async fn all_info(&self) -> Vec<InstanceStatus> {
        let mut statuses = Vec::new();
        for app in &self.config.apps {
            if let Ok(app_statuses) = self.app_info(&app.name).await {
                statuses.extend(app_statuses);
            }
        }
        statuses
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.lock().await
    }

    /// Captured output of every instance, as it is written.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEntry> {
        self.collector.subscribe()
    }

    async fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.lock().await;
        debug!("Supervisor: {:?} -> {:?}", *state, next);
        *state = next;
    }
}

/// Clear PID files of dead processes from an earlier run and classify the
/// ones still alive against the current descriptors.
async fn scan_previous_run(pid_files: &ProcessFileManager, config: &EcosystemConfig) -> Vec<PreviousProcess> {
    let survivors = match pid_files.clean_stale().await {
        Ok(survivors) => survivors,
        Err(e) => {
            warn!("Failed to scan PID files: {}", e);
            return Vec::new();
        }
    };

    survivors
        .into_iter()
        .map(|file| {
            let drift = config_drift(config, &file);
            match drift {
                ConfigDrift::Unchanged => warn!(
                    "{}-{} (PID: {}) is still running from a previous supervisor and will not be adopted",
                    file.name, file.instance, file.pid
                ),
                ConfigDrift::Changed => warn!(
                    "{}-{} (PID: {}) is still running from a previous supervisor with an outdated configuration ({} != {})",
                    file.name,
                    file.instance,
                    file.pid,
                    file.config_hash,
                    config.app(&file.name).map(|app| app.config_hash()).unwrap_or_default()
                ),
                ConfigDrift::Removed => warn!(
                    "{}-{} (PID: {}) is still running from a previous supervisor but is no longer configured",
                    file.name, file.instance, file.pid
                ),
            }
            PreviousProcess { file, drift }
        })
        .collect()
}

fn config_drift(config: &EcosystemConfig, file: &ProcessFile) -> ConfigDrift {
    match config.app(&file.name) {
        Some(app) if file.instance < app.instances => {
            if app.config_hash() == file.config_hash {
                ConfigDrift::Unchanged
            } else {
                ConfigDrift::Changed
            }
        }
        _ => ConfigDrift::Removed,
    }
}
