//! Shell-script resetter.
//!
//! All lifecycle phases of a campaign run inside one persistent bash
//! dispatcher, so variables a phase exports (a server PID, a temp directory)
//! are visible to the phases that follow:
//! - `policy`: which phases a reset request runs;
//! - `script`: phase script rendering and the control-line protocol;
//! - `dispatcher`: the bash child process and its output demultiplexing.

pub mod dispatcher;
pub mod policy;
pub mod script;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::caller::BoxFuture;
use crate::models::campaign::{EnvSnapshot, ResetterDescriptor};
use crate::reset::Resetter;
use crate::sink::ProgressSink;
use crate::{AppError, Result};

use self::dispatcher::Dispatcher;
use self::policy::{Phase, ShellScripts};
use self::script::{ControlMarkers, ScriptSet};

/// Default timeout of a single lifecycle phase.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(120);

/// [`Resetter`] running user scripts in a single persistent shell.
///
/// The dispatcher is spawned lazily on the first phase and respawned lazily
/// after a timeout or a crash; exports made before the crash are lost.
pub struct ShellSingleton {
    scripts: ShellScripts,
    sink: Arc<dyn ProgressSink>,
    phase_timeout: Duration,
    markers: ControlMarkers,
    files: Option<(ScriptSet, EnvSnapshot)>,
    dispatcher: Option<Dispatcher>,
    first_reset: bool,
    started: bool,
}

impl ShellSingleton {
    /// Create a resetter for `scripts`. Nothing is spawned until the first
    /// phase runs.
    #[must_use]
    pub fn new(scripts: ShellScripts, sink: Arc<dyn ProgressSink>, phase_timeout: Duration) -> Self {
        Self {
            scripts,
            sink,
            phase_timeout,
            markers: ControlMarkers::new(),
            files: None,
            dispatcher: None,
            first_reset: true,
            started: false,
        }
    }

    /// Whether a start phase succeeded and no stop phase followed.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether the next reset is the first one of the attempt. Cleared as
    /// soon as a start phase succeeds, even if a later phase of the same
    /// request fails.
    #[must_use]
    pub fn is_first_reset(&self) -> bool {
        self.first_reset
    }

    async fn run_phases(
        &mut self,
        phases: &[Phase],
        env: &EnvSnapshot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for &phase in phases {
            self.run_phase(phase, env, cancel)
                .instrument(info_span!("phase", %phase))
                .await?;
            match phase {
                Phase::Start => {
                    self.started = true;
                    self.first_reset = false;
                }
                Phase::Stop => self.started = false,
                Phase::Reset => {}
            }
        }
        Ok(())
    }

    async fn run_phase(
        &mut self,
        phase: Phase,
        env: &EnvSnapshot,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.scripts.has(phase) {
            return Err(AppError::Config(format!("no {phase} script is defined")));
        }
        self.ensure_files(env)?;
        let Some((files, _)) = self.files.as_ref() else {
            return Err(AppError::reset(phase.as_str(), "lifecycle scripts missing"));
        };
        let script = files
            .phase(phase)
            .ok_or_else(|| AppError::Config(format!("no {phase} script is defined")))?
            .to_path_buf();

        let mut dispatcher = match self.dispatcher.take() {
            Some(mut existing) => {
                if existing.is_alive() {
                    existing
                } else {
                    info!("respawning lifecycle dispatcher");
                    Dispatcher::spawn(files, self.markers.clone(), Arc::clone(&self.sink))?
                }
            }
            None => Dispatcher::spawn(files, self.markers.clone(), Arc::clone(&self.sink))?,
        };

        let result = dispatcher
            .run_phase(phase, &script, self.phase_timeout, cancel)
            .await;
        if dispatcher.is_alive() {
            self.dispatcher = Some(dispatcher);
        } else {
            warn!("lifecycle dispatcher lost; it will be respawned on the next phase");
        }
        result
    }

    fn ensure_files(&mut self, env: &EnvSnapshot) -> Result<()> {
        if let Some((_, current)) = &self.files {
            if current == env {
                return Ok(());
            }
            warn!("environment snapshot changed, rewriting lifecycle scripts");
            self.dispatcher = None;
        }
        let files = ScriptSet::materialize(&self.scripts, env, &self.markers).map_err(|err| {
            match err {
                AppError::Io(msg) => AppError::reset("materialize", msg),
                other => other,
            }
        })?;
        self.files = Some((files, env.clone()));
        Ok(())
    }

    async fn shutdown(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut first_err = None;

        if self.started && self.scripts.has(Phase::Stop) {
            if let Some(env) = self.files.as_ref().map(|(_, env)| env.clone()) {
                if let Err(err) = self.run_phases(&[Phase::Stop], &env, cancel).await {
                    warn!(%err, "stop phase failed during terminate");
                    first_err = Some(err);
                }
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.shutdown().await {
                warn!(%err, "dispatcher shutdown failed");
                first_err.get_or_insert(err);
            }
        }

        self.files = None;
        self.started = false;
        self.first_reset = true;
        debug!("shell resetter terminated");
        first_err.map_or(Ok(()), Err)
    }
}

impl Resetter for ShellSingleton {
    fn descriptor(&self) -> ResetterDescriptor {
        ResetterDescriptor::Shell {
            start: self.scripts.start.clone(),
            reset: self.scripts.reset.clone(),
            stop: self.scripts.stop.clone(),
        }
    }

    fn exec_start<'a>(
        &'a mut self,
        env: &'a EnvSnapshot,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.run_phases(&[Phase::Start], env, cancel).await })
    }

    fn exec_reset<'a>(
        &'a mut self,
        env: &'a EnvSnapshot,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let plan = self.scripts.plan_reset(self.first_reset)?;
            debug!(first = self.first_reset, ?plan, "reset plan");
            self.run_phases(&plan, env, cancel).await?;
            self.first_reset = false;
            Ok(())
        })
    }

    fn exec_stop<'a>(
        &'a mut self,
        env: &'a EnvSnapshot,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.run_phases(&[Phase::Stop], env, cancel).await })
    }

    fn terminate<'a>(&'a mut self, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.shutdown(cancel))
    }
}
