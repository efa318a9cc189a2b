//! One supervised instance: the spawn / wait / restart loop behind
//! [`ProcessControl`].

use crate::control::{InstanceId, InstanceStatus, ProcessControl};
use crate::lifecycle::{ExitReason, RestartDecision, RestartPolicy, RestartTracker};
use crate::state::{ProcessState, ProcessStateMachine};
use crate::watch::{AppWatcher, WatchFilter};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vigil_common::{ProcessError, ProcessResult};
use vigil_descriptor::{LaunchSpec, ProcessDescriptor};
use vigil_log_collection::{
    spawn_capture, CaptureContext, LogCollector, LogDateFormat, LogPaths, LogSource, LogWriter,
    LogWriterRegistry,
};
use vigil_process_file::{ProcessFile, ProcessFileManager};
use vigil_resource_limits::{check_memory_ceiling, MemoryViolation, ResourceMonitor};

/// How long to wait for output pipes to close after the child exits.
/// Grandchildren can hold them open indefinitely.
const CAPTURE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything an instance shares with the rest of the supervisor.
pub(crate) struct InstanceContext {
    pub descriptor: Arc<ProcessDescriptor>,
    pub log_dir: PathBuf,
    pub memory_check_interval: Duration,
    pub resource_monitor: Arc<ResourceMonitor>,
    pub pid_files: ProcessFileManager,
    pub log_writers: Arc<LogWriterRegistry>,
    pub collector: LogCollector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlMessage {
    Stop,
    Restart,
}

/// [`ProcessControl`] backed by a tokio task per supervision run.
pub struct ManagedInstance {
    id: InstanceId,
    context: Arc<InstanceContext>,
    status: Arc<RwLock<InstanceStatus>>,
    commands: Option<mpsc::UnboundedSender<ControlMessage>>,
    task: Option<JoinHandle<()>>,
}

impl ManagedInstance {
    pub(crate) fn new(id: InstanceId, context: Arc<InstanceContext>) -> Self {
        let status = InstanceStatus::new(&id);
        Self {
            id,
            context,
            status: Arc::new(RwLock::new(status)),
            commands: None,
            task: None,
        }
    }

    fn is_supervising(&self) -> bool {
        self.task.as_ref().map(|task| !task.is_finished()).unwrap_or(false)
    }

    async fn spawn_runner(&mut self) {
        // Visible before the runner task gets scheduled
        {
            let mut status = self.status.write().await;
            status.state = ProcessState::Launching;
            status.last_error = None;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let runner = InstanceRunner::new(
            self.id.clone(),
            Arc::clone(&self.context),
            Arc::clone(&self.status),
            receiver,
        );

        self.commands = Some(sender);
        self.task = Some(tokio::spawn(runner.run()));
    }
}

#[async_trait]
impl ProcessControl for ManagedInstance {
    fn id(&self) -> &InstanceId {
        &self.id
    }

    async fn start(&mut self) -> ProcessResult<()> {
        if self.is_supervising() {
            debug!("Process {} is already supervised", self.id);
            return Ok(());
        }

        info!("Starting process: {}", self.id);
        self.spawn_runner().await;
        Ok(())
    }

    async fn stop(&mut self) -> ProcessResult<()> {
        info!("Stopping process: {}", self.id);

        if let Some(commands) = self.commands.take() {
            // The runner may already be gone
            let _ = commands.send(ControlMessage::Stop);
        }

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| ProcessError::stop_failed(self.id.to_string(), e.to_string()))?;
        }

        // An explicit stop also clears a permanent failure
        let mut status = self.status.write().await;
        if status.state == ProcessState::FailedPermanently {
            status.state = ProcessState::Stopped;
        }
        Ok(())
    }

    async fn restart(&mut self) -> ProcessResult<()> {
        if self.is_supervising() {
            if let Some(ref commands) = self.commands {
                if commands.send(ControlMessage::Restart).is_ok() {
                    info!("Restarting process: {}", self.id);
                    return Ok(());
                }
            }
        }

        info!("Relaunching process: {}", self.id);
        self.spawn_runner().await;
        Ok(())
    }

    async fn status(&self) -> InstanceStatus {
        self.status.read().await.clone()
    }
}

/// Owns the child process for one supervision run.
struct InstanceRunner {
    id: InstanceId,
    context: Arc<InstanceContext>,
    status: Arc<RwLock<InstanceStatus>>,
    commands: mpsc::UnboundedReceiver<ControlMessage>,
    machine: ProcessStateMachine,
    tracker: RestartTracker,
    log_paths: LogPaths,
    date_format: Option<LogDateFormat>,
    config_hash: String,
    watcher: Option<AppWatcher>,
}

impl InstanceRunner {
    fn new(
        id: InstanceId,
        context: Arc<InstanceContext>,
        status: Arc<RwLock<InstanceStatus>>,
        commands: mpsc::UnboundedReceiver<ControlMessage>,
    ) -> Self {
        let descriptor = &context.descriptor;
        let log_paths = LogPaths::resolve(descriptor, id.instance, &context.log_dir);
        let date_format = descriptor.log_date_format.as_deref().map(LogDateFormat::parse);
        let config_hash = descriptor.config_hash();
        let tracker = RestartTracker::new(id.to_string(), RestartPolicy::from(descriptor.as_ref()));

        Self {
            machine: ProcessStateMachine::new(id.to_string()),
            id,
            status,
            commands,
            tracker,
            log_paths,
            date_format,
            config_hash,
            watcher: None,
            context,
        }
    }

    async fn run(mut self) {
        let previous_restarts = self.status.read().await.restart_stats.restarts;
        self.tracker = self.tracker.clone().with_restarts(previous_restarts);

        self.advance(ProcessStateMachine::transition_to_launching).await;

        let launch = match LaunchSpec::resolve(&self.context.descriptor) {
            Ok(launch) => launch,
            Err(e) => return self.fail(ProcessError::launch(self.id.to_string(), e)).await,
        };

        let (out, err) = match self.open_logs().await {
            Ok(writers) => writers,
            Err(e) => return self.fail(e).await,
        };

        self.watcher = self.start_watcher(&launch);

        loop {
            let mut child = match self.spawn(&launch) {
                Ok(child) => child,
                Err(e) => return self.fail(e).await,
            };

            let pid = child.id();
            let started = Instant::now();
            self.advance(ProcessStateMachine::transition_to_running).await;
            self.on_launched(pid).await;

            let captures = self.attach_logs(&mut child, &out, &err);
            let (reason, exit_code) = self.supervise(&mut child, pid).await;
            let uptime = started.elapsed();

            drain_captures(captures).await;
            self.on_exited(exit_code).await;

            let decision = self.tracker.on_exit(reason, uptime);
            let stats = self.tracker.stats();
            let published = stats.clone();
            self.update(|status| status.restart_stats = published).await;

            match decision {
                RestartDecision::Stop => {
                    self.advance(ProcessStateMachine::transition_to_stopped).await;
                    info!("Process {} stopped", self.id);
                    return;
                }
                RestartDecision::GiveUp => {
                    self.advance(ProcessStateMachine::transition_to_restarting).await;
                    self.advance(ProcessStateMachine::transition_to_failed).await;

                    let message = format!(
                        "exited {} times in a row before min_uptime ({:?})",
                        stats.unstable_restarts + 1,
                        self.tracker.policy().min_uptime
                    );
                    error!("Process {} failed permanently: {}", self.id, message);
                    self.update(|status| status.last_error = Some(message)).await;
                    return;
                }
                RestartDecision::Restart { delay } => {
                    self.advance(ProcessStateMachine::transition_to_restarting).await;
                    info!(
                        "Restarting process {} in {:?} (restart #{})",
                        self.id, delay, stats.restarts
                    );

                    if !self.wait_restart_delay(delay).await {
                        self.advance(ProcessStateMachine::transition_to_stopped).await;
                        info!("Process {} stopped during restart delay", self.id);
                        return;
                    }
                    self.advance(ProcessStateMachine::transition_to_launching).await;
                }
            }
        }
    }

    /// Wait on the child until something ends this launch.
    async fn supervise(&mut self, child: &mut Child, pid: Option<u32>) -> (ExitReason, Option<i32>) {
        let descriptor = Arc::clone(&self.context.descriptor);
        let ceiling = descriptor.memory_ceiling();

        let period = self.context.memory_check_interval;
        let mut memory_check = interval_at(Instant::now() + period, period);
        memory_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stable_timer = sleep(descriptor.min_uptime);
        tokio::pin!(stable_timer);
        let mut stable = false;

        loop {
            tokio::select! {
                result = child.wait() => {
                    let code = match result {
                        Ok(status) => {
                            info!("Process {} exited: {}", self.id, status);
                            status.code()
                        }
                        Err(e) => {
                            warn!("Failed to wait for process {}: {}", self.id, e);
                            None
                        }
                    };
                    return (ExitReason::Exited { code }, code);
                }
                _ = &mut stable_timer, if !stable => {
                    stable = true;
                    debug!("Process {} reached min_uptime", self.id);
                    self.update(|status| status.stable = true).await;
                }
                _ = memory_check.tick(), if pid.is_some() => {
                    if let Some(violation) = self.sample_memory(pid, ceiling).await {
                        warn!("Process {}: {}, restarting", self.id, violation);
                        let code = self.terminate(child).await;
                        return (ExitReason::MemoryCeiling, code);
                    }
                }
                Some(path) = next_change(&mut self.watcher) => {
                    info!("Process {}: {} changed, restarting", self.id, path.display());
                    let code = self.terminate(child).await;
                    return (ExitReason::WatchTriggered, code);
                }
                command = self.commands.recv() => {
                    let reason = match command {
                        Some(ControlMessage::Restart) => ExitReason::RestartRequested,
                        Some(ControlMessage::Stop) | None => ExitReason::StopRequested,
                    };
                    let code = self.terminate(child).await;
                    return (reason, code);
                }
            }
        }
    }

    /// SIGTERM, then SIGKILL once `kill_timeout` has passed.
    async fn terminate(&self, child: &mut Child) -> Option<i32> {
        let kill_timeout = self.context.descriptor.kill_timeout;

        if let Some(pid) = child.id() {
            if let Err(e) = vigil_process::terminate_gracefully(pid) {
                debug!("Graceful termination of {} failed: {}", self.id, e);
            }
        }

        match timeout(kill_timeout, child.wait()).await {
            Ok(Ok(status)) => return status.code(),
            Ok(Err(e)) => {
                warn!("Failed to wait for process {}: {}", self.id, e);
                return None;
            }
            Err(_) => warn!(
                "Process {} did not exit within {:?}, killing",
                self.id, kill_timeout
            ),
        }

        let killed = match child.id() {
            Some(pid) => vigil_process::force_kill(pid),
            None => Ok(()),
        };
        if let Err(e) = killed {
            warn!("{}", e);
            let _ = child.start_kill();
        }

        match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                error!("Failed to reap process {}: {}", self.id, e);
                None
            }
        }
    }

    async fn sample_memory(&self, pid: Option<u32>, ceiling: Option<u64>) -> Option<MemoryViolation> {
        let pid = pid?;
        match self.context.resource_monitor.usage(pid) {
            Ok(usage) => {
                self.update(|status| status.memory_bytes = Some(usage.memory_bytes))
                    .await;
                ceiling.and_then(|ceiling| check_memory_ceiling(&usage, ceiling))
            }
            Err(e) => {
                debug!("Memory sample for {} failed: {}", self.id, e);
                None
            }
        }
    }

    fn spawn(&self, launch: &LaunchSpec) -> ProcessResult<Child> {
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(&launch.working_directory)
            .envs(&launch.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command.spawn().map_err(|e| {
            ProcessError::spawn_failed(
                self.id.to_string(),
                format!("{}: {}", launch.program.display(), e),
            )
        })
    }

    async fn open_logs(&self) -> ProcessResult<(LogWriter, LogWriter)> {
        let out = self.open_log(&self.log_paths.out).await?;
        let err = self.open_log(&self.log_paths.error).await?;
        Ok((out, err))
    }

    async fn open_log(&self, path: &Path) -> ProcessResult<LogWriter> {
        self.context
            .log_writers
            .writer(path)
            .await
            .map_err(|e| ProcessError::Logging {
                id: self.id.to_string(),
                reason: format!("cannot open {}: {}", path.display(), e),
            })
    }

    fn attach_logs(&self, child: &mut Child, out: &LogWriter, err: &LogWriter) -> Vec<JoinHandle<()>> {
        let mut captures = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            captures.push(spawn_capture(
                stdout,
                self.capture_context(LogSource::Stdout, out.clone()),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            captures.push(spawn_capture(
                stderr,
                self.capture_context(LogSource::Stderr, err.clone()),
            ));
        }

        captures
    }

    fn capture_context(&self, source: LogSource, writer: LogWriter) -> CaptureContext {
        CaptureContext {
            name: self.id.name.clone(),
            instance: self.id.instance,
            source,
            writer,
            date_format: self.date_format.clone(),
            collector: Some(self.context.collector.clone()),
        }
    }

    fn start_watcher(&self, launch: &LaunchSpec) -> Option<AppWatcher> {
        let descriptor = &self.context.descriptor;
        if !descriptor.watch {
            return None;
        }

        let excluded = watch_exclusions(descriptor, &self.context.log_dir);
        let filter = WatchFilter::new(&launch.working_directory, &descriptor.ignore_watch, excluded);
        match AppWatcher::start(&self.id.to_string(), filter) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("{}; continuing without file watching", e);
                None
            }
        }
    }

    async fn on_launched(&self, pid: Option<u32>) {
        if let Some(pid) = pid {
            let file = ProcessFile::new(&self.id.name, self.id.instance, pid, &self.config_hash);
            if let Err(e) = self.context.pid_files.write(&file).await {
                warn!("{}", e);
            }
        }

        let started_at = Utc::now();
        self.update(|status| {
            status.pid = pid;
            status.started_at = Some(started_at);
            status.stable = false;
            status.memory_bytes = None;
            status.last_error = None;
        })
        .await;

        info!("Process {} running (PID: {:?})", self.id, pid);
    }

    async fn on_exited(&self, exit_code: Option<i32>) {
        if let Err(e) = self.context.pid_files.delete(&self.id.name, self.id.instance).await {
            warn!("{}", e);
        }

        self.update(|status| {
            status.pid = None;
            status.stable = false;
            status.memory_bytes = None;
            status.last_exit_code = exit_code;
        })
        .await;
    }

    /// `false` when a stop arrived while waiting.
    async fn wait_restart_delay(&mut self, delay: Duration) -> bool {
        if delay.is_zero() {
            return true;
        }

        tokio::select! {
            _ = sleep(delay) => true,
            command = self.commands.recv() => match command {
                Some(ControlMessage::Restart) => {
                    self.tracker.reset();
                    true
                }
                Some(ControlMessage::Stop) | None => false,
            },
        }
    }

    async fn fail(&mut self, error: ProcessError) {
        error!("Process {} failed to launch: {}", self.id, error);
        self.advance(ProcessStateMachine::transition_to_failed).await;

        let message = error.to_string();
        self.update(|status| status.last_error = Some(message)).await;
    }

    async fn advance(&mut self, step: fn(&mut ProcessStateMachine) -> ProcessResult<()>) {
        if let Err(e) = step(&mut self.machine) {
            warn!("{}", e);
        }

        let state = self.machine.current_state();
        self.update(|status| status.state = state).await;
    }

    async fn update(&self, apply: impl FnOnce(&mut InstanceStatus)) {
        let mut status = self.status.write().await;
        apply(&mut status);
    }
}

/// Log files of every instance of the app, so no instance's output
/// restarts itself or a sibling.
fn watch_exclusions(descriptor: &ProcessDescriptor, log_dir: &Path) -> Vec<PathBuf> {
    let mut excluded: Vec<PathBuf> = Vec::new();
    for instance in 0..descriptor.instances {
        for path in LogPaths::resolve(descriptor, instance, log_dir).all() {
            let path = canonical_log_path(path);
            if !excluded.contains(&path) {
                excluded.push(path);
            }
        }
    }
    excluded
}

/// Siblings may not have created their files yet; their directory is
/// resolved instead.
fn canonical_log_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(file_name)) => std::fs::canonicalize(parent)
            .map(|parent| parent.join(file_name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

async fn next_change(watcher: &mut Option<AppWatcher>) -> Option<PathBuf> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}

async fn drain_captures(captures: Vec<JoinHandle<()>>) {
    for capture in captures {
        if timeout(CAPTURE_DRAIN_TIMEOUT, capture).await.is_err() {
            debug!("Output pipe still open after exit, leaving capture detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_descriptor::{ConfigFormat, EcosystemConfig};

    fn descriptor(yaml: &str) -> ProcessDescriptor {
        EcosystemConfig::load_from_str(yaml, ConfigFormat::Yaml)
            .unwrap()
            .apps
            .remove(0)
    }

    #[test]
    fn test_watch_excludes_sibling_logs() {
        let cwd = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(cwd.path()).unwrap();
        std::fs::create_dir(root.join("logs")).unwrap();

        let app = descriptor(&format!(
            "apps:\n  - name: pool\n    script: /bin/sh\n    cwd: {}\n    instances: 3\n    watch: true\n    out_file: logs/out.log\n    error_file: logs/err.log\n",
            root.display()
        ));

        let excluded = watch_exclusions(&app, Path::new("/unused"));
        assert_eq!(excluded.len(), 6);
        for name in ["out-0.log", "out-1.log", "out-2.log", "err-0.log", "err-2.log"] {
            assert!(excluded.contains(&root.join("logs").join(name)), "{}", name);
        }
    }

    #[test]
    fn test_watch_excludes_merged_logs_once() {
        let cwd = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(cwd.path()).unwrap();

        let app = descriptor(&format!(
            "apps:\n  - name: pool\n    script: /bin/sh\n    cwd: {}\n    instances: 2\n    merge_logs: true\n    out_file: out.log\n    error_file: err.log\n",
            root.display()
        ));

        assert_eq!(
            watch_exclusions(&app, Path::new("/unused")),
            vec![root.join("out.log"), root.join("err.log")]
        );
    }
}
