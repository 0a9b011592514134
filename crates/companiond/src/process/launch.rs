//! Supervises companion launch sequencing and runtime orchestration.

use std::sync::Arc;

use tokio::io::AsyncWrite;
use tracing::{info, warn};

use companion_config::Config;

use crate::builtin::{BuiltinExecutor, HostTarget};
use crate::events::{EventReporter, StructuredEventReporter};
use crate::executor::CommandExecutor;
use crate::ports::PortSet;
use crate::scratch::TemporaryDirectory;
use crate::server::{CompanionServer, ServerOptions, TerminationCause};
use crate::target::Target;
use crate::telemetry;

use super::errors::LaunchError;
use super::report::write_port_report;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};
use super::PROCESS_TARGET;

/// Collaborators required to run a companion process.
pub(crate) struct LaunchPlan<S, W> {
    pub(crate) config: Config,
    pub(crate) target: Arc<dyn Target>,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) reporter: Arc<dyn EventReporter>,
    pub(crate) shutdown: S,
    pub(crate) report: W,
}

/// Runs the companion using the production collaborators.
///
/// Returns the termination cause once the server has fully shut down.
///
/// # Errors
///
/// Returns [`LaunchError`] when telemetry, validation or startup fails.
pub async fn run_companion(config: Config) -> Result<TerminationCause, LaunchError> {
    telemetry::initialise(&config)?;
    let plan = LaunchPlan {
        target: Arc::new(HostTarget::new(config.udid())),
        executor: Arc::new(BuiltinExecutor::new()),
        reporter: Arc::new(StructuredEventReporter::new()),
        shutdown: SystemShutdownSignal::new(),
        report: tokio::io::stdout(),
        config,
    };
    run_companion_with(plan).await
}

/// Runs the companion with injected collaborators.
pub(crate) async fn run_companion_with<S, W>(
    plan: LaunchPlan<S, W>,
) -> Result<TerminationCause, LaunchError>
where
    S: ShutdownSignal,
    W: AsyncWrite + Unpin,
{
    let LaunchPlan {
        config,
        target,
        executor,
        reporter,
        shutdown,
        mut report,
    } = plan;

    info!(
        target: PROCESS_TARGET,
        udid = config.udid(),
        "starting companion"
    );
    let ports = PortSet::from_config(&config)?;
    let scratch = match config.temp_root() {
        Some(root) => TemporaryDirectory::create_in(root.as_std_path()),
        None => TemporaryDirectory::create(),
    }
    .map_err(|source| LaunchError::Scratch { source })?;
    let server = CompanionServer::builder(target)
        .ports(ports)
        .executor(executor)
        .reporter(reporter)
        .temporary_directory(scratch)
        .options(ServerOptions::from_config(&config))
        .build()?;

    let handle = server.start().await?;
    if let Err(error) = write_port_report(&mut report, handle.addresses()).await {
        server.terminate();
        server.termination_signal().wait().await;
        return Err(error);
    }

    let signal = server.termination_signal();
    let cause = tokio::select! {
        cause = signal.clone().wait() => cause,
        waited = shutdown.wait() => {
            if let Err(error) = &waited {
                warn!(target: PROCESS_TARGET, %error, "shutdown listener failed; terminating");
            }
            server.terminate();
            let cause = signal.wait().await;
            waited?;
            cause
        }
    };
    info!(
        target: PROCESS_TARGET,
        %cause,
        "shutdown sequence completed"
    );
    Ok(cause)
}
