use gridbroker_chain::ChainAdapter;
use gridbroker_config::AgentConfig;
use gridbroker_persistence::AgreementStore;
use gridbroker_registry::AgreementRegistry;
use gridbroker_types::{
    CancellationReason, InboundEvent, OutboundEvent, PolicyManager,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cancel::cancel_agreement;
use crate::commands::Command;
use crate::context::GovernanceContext;
use crate::{finalize, maintain, GovernanceError, COMMAND_QUEUE_CAPACITY};

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

/// The agreement governance worker.
///
/// The event sink runs on the caller of [`GovernanceWorker::handle_event`];
/// everything else happens on the worker's own tasks: one serial command
/// processor fed by a bounded queue, and the two periodic scan loops, which
/// start only after the blockchain account is funded.
pub struct GovernanceWorker {
    ctx: Arc<GovernanceContext>,
    commands: mpsc::Sender<Command>,
}

impl GovernanceWorker {
    /// Build the worker and start its background tasks. Returns the worker
    /// handle together with the stream of outbound events peer subsystems
    /// consume.
    pub async fn spawn(
        config: Arc<AgentConfig>,
        store: Arc<dyn AgreementStore>,
        registry: Arc<dyn AgreementRegistry>,
        chain: Arc<dyn ChainAdapter>,
        policy_manager: Arc<PolicyManager>,
    ) -> Result<(Self, mpsc::Receiver<OutboundEvent>), GovernanceError> {
        let device = store.exchange_device().await?;

        let device_id = config
            .edge
            .device_id
            .clone()
            .or_else(|| device.as_ref().map(|d| d.id.clone()))
            .unwrap_or_else(|| format!("edge-{}", uuid::Uuid::new_v4()));
        let device_token = device.map(|d| d.token).unwrap_or_default();

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let ctx = Arc::new(GovernanceContext::new(
            config,
            store,
            registry,
            chain,
            policy_manager,
            outbound_tx,
            device_id,
            device_token,
        ));

        tokio::spawn(run(ctx.clone(), command_rx));

        Ok((
            Self {
                ctx,
                commands: command_tx,
            },
            outbound_rx,
        ))
    }

    pub fn device_id(&self) -> &str {
        &self.ctx.device_id
    }

    /// Event sink: classify an inbound event and enqueue the matching
    /// command. Runs on the caller's task and blocks only when the command
    /// queue is full. Events the governor does not consume are dropped.
    pub async fn handle_event(&self, event: InboundEvent) {
        match event {
            InboundEvent::EdgeRegistered { token } => {
                self.enqueue(Command::DeviceRegistered { token }).await;
            }
            InboundEvent::ExecutionBegun {
                protocol,
                agreement_id,
                deployment,
            } => {
                info!(
                    agreement_id = %agreement_id,
                    "containers begun execution under agreement"
                );
                self.enqueue(Command::StartGovernExecution {
                    protocol,
                    agreement_id,
                    deployment,
                })
                .await;
            }
            InboundEvent::ExecutionFailed {
                protocol,
                agreement_id,
                deployment,
            } => {
                self.enqueue(Command::CleanupExecution {
                    protocol,
                    agreement_id,
                    reason: CancellationReason::ContainerFailure,
                    deployment,
                })
                .await;
            }
            InboundEvent::FetchFailed {
                protocol,
                agreement_id,
            } => {
                self.enqueue(Command::CleanupExecution {
                    protocol,
                    agreement_id,
                    reason: CancellationReason::TorrentFailure,
                    deployment: None,
                })
                .await;
            }
            InboundEvent::CancellationRequested {
                source: _,
                protocol,
                agreement_id,
                deployment,
            } => {
                self.enqueue(Command::CleanupExecution {
                    protocol,
                    agreement_id,
                    reason: CancellationReason::UserRequested,
                    deployment,
                })
                .await;
            }
            InboundEvent::AccountFunded { account } => {
                info!(account = %account, "blockchain account funded, enabling writes");
                self.ctx.bc_writes_enabled.store(true, Ordering::SeqCst);
            }
            // peer chatter that is not ours to govern
            InboundEvent::AgreementReached { .. } | InboundEvent::PolicyUpdated { .. } => {}
        }
    }

    async fn enqueue(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            warn!("command processor is gone, dropping command");
        }
    }
}

/// Command processor task. Holds at the funding barrier, then starts the
/// scan loops and drains commands strictly in order.
async fn run(ctx: Arc<GovernanceContext>, mut commands: mpsc::Receiver<Command>) {
    let poll = Duration::from_millis(ctx.config.governance.barrier_poll_ms);

    // Commands arriving in the meantime queue up on the channel; the event
    // dispatcher is not blocked by this wait.
    while !ctx.bc_writes_enabled.load(Ordering::SeqCst) {
        debug!("command processor waiting for blockchain funding");
        tokio::time::sleep(poll).await;
    }

    tokio::spawn(finalize::run(ctx.clone()));
    tokio::spawn(maintain::run(ctx.clone()));

    while let Some(command) = commands.recv().await {
        debug!(command = ?command, "processing command");
        handle_command(&ctx, command).await;
        tokio::task::yield_now().await;
    }

    debug!("command channel closed, processor stopping");
}

async fn handle_command(ctx: &GovernanceContext, command: Command) {
    match command {
        Command::DeviceRegistered { token } => {
            *ctx.device_token.write().await = token;
        }
        Command::StartGovernExecution {
            protocol,
            agreement_id,
            deployment,
        } => {
            info!(agreement_id = %agreement_id, "starting governance on agreement resources");
            if let Err(e) = ctx
                .store
                .execution_started(&agreement_id, &protocol, &deployment)
                .await
            {
                error!(
                    agreement_id = %agreement_id,
                    error = %e,
                    "failed to mark agreement execution started"
                );
            }
        }
        Command::CleanupExecution {
            protocol,
            agreement_id,
            reason,
            deployment,
        } => {
            info!(agreement_id = %agreement_id, "ending agreement");
            cancel_agreement(ctx, &agreement_id, &protocol, reason).await;

            // tell the runtime to tear down whatever it started
            ctx.emit(OutboundEvent::Cancellation {
                protocol,
                agreement_id,
                deployment,
            })
            .await;
        }
    }
}
