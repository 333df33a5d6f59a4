use gridbroker_chain::BaseContracts;
use gridbroker_persistence::{unarchived_filter, AgreementFilter, EstablishedAgreement};
use gridbroker_types::{CancellationReason, OutboundEvent, Policy, Proposal, PROTOCOL_NAME};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, trace, warn};

use crate::backoff::retry_delay;
use crate::cancel::cancel_agreement;
use crate::context::GovernanceContext;
use crate::{current_timestamp, MAX_PRELAUNCH_M};

/// Registry label for an agreement verified on chain.
const FINALIZED_AGREEMENT_STATE: &str = "Finalized Agreement";

/// Agreement-finalization loop: reconciles every governable agreement
/// against the blockchain on a fixed cadence, finalizing recorded ones and
/// cancelling the timed out, never launched, or externally cancelled ones.
pub(crate) async fn run(ctx: Arc<GovernanceContext>) {
    let interval = Duration::from_millis(ctx.config.governance.finalization_interval_ms);
    let mut init_attempt: u32 = 0;

    loop {
        // Contract bindings resolve lazily; an unreachable node at startup
        // only delays governance instead of disabling it.
        let contracts = match ctx.contracts().await {
            Ok(contracts) => contracts.clone(),
            Err(e) => {
                let delay = retry_delay(init_attempt);
                init_attempt = init_attempt.saturating_add(1);
                error!(
                    error = %e,
                    retry_in_s = delay.as_secs(),
                    "unable to initialize platform contracts"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        govern_tick(&ctx, &contracts).await;
        tokio::time::sleep(interval).await;
    }
}

/// Agreements the producer has committed to that are still live.
fn governable_filter() -> AgreementFilter {
    Box::new(|a| {
        a.creation_time != 0
            && a.accepted_time != 0
            && a.terminated_time == 0
            && !a.counterparty_address.is_empty()
    })
}

async fn govern_tick(ctx: &GovernanceContext, contracts: &BaseContracts) {
    trace!("governing pending agreements");

    let filters = [unarchived_filter(), governable_filter()];
    let agreements = match ctx.store.find_agreements(PROTOCOL_NAME, &filters).await {
        Ok(agreements) => agreements,
        Err(e) => {
            error!(error = %e, "unable to retrieve governable agreements from store");
            return;
        }
    };

    for agreement in agreements {
        if agreement.finalized_time == 0 {
            check_finalization(ctx, contracts, &agreement).await;
        } else {
            check_established(ctx, contracts, &agreement).await;
        }
    }
}

/// Branch A: the agreement is accepted but not yet observed on chain.
async fn check_finalization(
    ctx: &GovernanceContext,
    contracts: &BaseContracts,
    agreement: &EstablishedAgreement,
) {
    trace!(agreement_id = %agreement.agreement_id, "checking agreement for finalization");

    let recorded = match ctx
        .chain
        .verify_agreement_recorded(
            &agreement.agreement_id,
            &agreement.counterparty_address,
            &agreement.proposal_sig,
            contracts,
        )
        .await
    {
        Ok(recorded) => recorded,
        Err(e) => {
            warn!(
                agreement_id = %agreement.agreement_id,
                error = %e,
                "unable to verify agreement on chain"
            );
            return;
        }
    };

    if recorded {
        if let Err(e) = ctx
            .store
            .finalized(&agreement.agreement_id, &agreement.agreement_protocol)
            .await
        {
            error!(
                agreement_id = %agreement.agreement_id,
                error = %e,
                "error persisting agreement finalized"
            );
        }

        record_finalized_state(ctx, agreement).await;
    } else {
        trace!(agreement_id = %agreement.agreement_id, "agreement not yet final");

        let now = current_timestamp();
        if agreement.creation_time + ctx.config.edge.agreement_timeout_s < now {
            info!(
                agreement_id = %agreement.agreement_id,
                "agreement timed out waiting for finalization"
            );
            cancel_agreement(
                ctx,
                &agreement.agreement_id,
                &agreement.agreement_protocol,
                CancellationReason::NotFinalizedTimeout,
            )
            .await;
            emit_cancellation(ctx, agreement).await;
        }
    }
}

/// Branch B: the agreement finalized earlier; watch for on-chain
/// cancellation and for workloads that never launch.
async fn check_established(
    ctx: &GovernanceContext,
    contracts: &BaseContracts,
    agreement: &EstablishedAgreement,
) {
    match ctx
        .chain
        .verify_agreement_recorded(
            &agreement.agreement_id,
            &agreement.counterparty_address,
            &agreement.proposal_sig,
            contracts,
        )
        .await
    {
        Err(e) => {
            warn!(
                agreement_id = %agreement.agreement_id,
                error = %e,
                "unable to verify agreement on chain"
            );
        }
        Ok(false) => {
            info!(
                agreement_id = %agreement.agreement_id,
                "agreement was cancelled on the blockchain, terminating"
            );
            cancel_agreement(
                ctx,
                &agreement.agreement_id,
                &agreement.agreement_protocol,
                CancellationReason::Discovered,
            )
            .await;
            emit_cancellation(ctx, agreement).await;
        }
        Ok(true) => {}
    }

    if agreement.execution_start_time == 0 {
        let now = current_timestamp();
        if agreement.accepted_time + MAX_PRELAUNCH_M * 60 < now {
            info!(
                agreement_id = %agreement.agreement_id,
                "workload never launched in the allowed window, terminating"
            );
            cancel_agreement(
                ctx,
                &agreement.agreement_id,
                &agreement.agreement_protocol,
                CancellationReason::NotExecutedTimeout,
            )
            .await;
            emit_cancellation(ctx, agreement).await;
        }
    }
}

/// Push the finalized state label to the registry, naming the first service
/// specification the agreed terms declare.
async fn record_finalized_state(ctx: &GovernanceContext, agreement: &EstablishedAgreement) {
    let proposal = match Proposal::demarshal(&agreement.proposal) {
        Ok(proposal) => proposal,
        Err(e) => {
            error!(
                agreement_id = %agreement.agreement_id,
                error = %e,
                "could not hydrate proposal"
            );
            return;
        }
    };

    let terms = match Policy::demarshal(&proposal.ts_and_cs) {
        Ok(terms) => terms,
        Err(e) => {
            error!(
                agreement_id = %agreement.agreement_id,
                error = %e,
                "error hydrating terms policy"
            );
            return;
        }
    };

    let spec_ref = match terms.first_spec_ref() {
        Some(spec_ref) => spec_ref.to_string(),
        None => {
            error!(
                agreement_id = %agreement.agreement_id,
                "terms policy declares no service specification"
            );
            return;
        }
    };

    let token = ctx.registry_token().await;
    if let Err(e) = ctx
        .registry
        .put_agreement_state(
            &ctx.device_id,
            &token,
            &agreement.agreement_id,
            &spec_ref,
            FINALIZED_AGREEMENT_STATE,
        )
        .await
    {
        error!(
            agreement_id = %agreement.agreement_id,
            error = %e,
            "error setting agreement finalized state in registry"
        );
    }
}

async fn emit_cancellation(ctx: &GovernanceContext, agreement: &EstablishedAgreement) {
    let deployment = if agreement.current_deployment.is_empty() {
        None
    } else {
        Some(agreement.current_deployment.clone())
    };

    ctx.emit(OutboundEvent::Cancellation {
        protocol: agreement.agreement_protocol.clone(),
        agreement_id: agreement.agreement_id.clone(),
        deployment,
    })
    .await;
}
