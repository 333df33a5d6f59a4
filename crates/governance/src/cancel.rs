use gridbroker_persistence::EstablishedAgreement;
use gridbroker_types::{CancellationReason, Policy, Proposal};
use tracing::{debug, error, info, warn};

use crate::context::GovernanceContext;

/// Cancel an agreement across every sink: local record, remote registry,
/// blockchain, archive.
///
/// The system is very asynchronous; cancellations for the same agreement can
/// arrive from the timeout scanner and the command processor in the same
/// instant, so every step tolerates running more than once. The local
/// terminate is a compare-and-set and goes first so that concurrent scanners
/// stop picking the record up; the registry delete treats an absent record
/// as success; the on-chain termination, the most expensive and least
/// reversible sink, runs only for the caller that won the compare-and-set.
pub(crate) async fn cancel_agreement(
    ctx: &GovernanceContext,
    agreement_id: &str,
    protocol: &str,
    reason: CancellationReason,
) {
    info!(agreement_id = %agreement_id, reason = %reason, "cancelling agreement");

    let outcome = match ctx.store.terminated(agreement_id, protocol).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(
                agreement_id = %agreement_id,
                error = %e,
                "error marking agreement terminated"
            );
            None
        }
    };

    let token = ctx.registry_token().await;
    if let Err(e) = ctx
        .registry
        .delete_agreement(&ctx.device_id, &token, agreement_id)
        .await
    {
        error!(
            agreement_id = %agreement_id,
            error = %e,
            "error deleting agreement from registry"
        );
    }

    match &outcome {
        Some(outcome) if outcome.newly_terminated => {
            terminate_on_chain(ctx, &outcome.record, reason).await;
        }
        Some(_) => {
            debug!(
                agreement_id = %agreement_id,
                "agreement already terminated locally, skipping on-chain termination"
            );
        }
        None => {}
    }

    debug!(agreement_id = %agreement_id, "archiving agreement");
    if let Err(e) = ctx.store.archive(agreement_id, protocol).await {
        error!(
            agreement_id = %agreement_id,
            error = %e,
            "error archiving terminated agreement"
        );
    }
}

async fn terminate_on_chain(
    ctx: &GovernanceContext,
    record: &EstablishedAgreement,
    reason: CancellationReason,
) {
    let contracts = match ctx.contracts().await {
        Ok(contracts) => contracts.clone(),
        Err(e) => {
            warn!(
                agreement_id = %record.agreement_id,
                error = %e,
                "platform contracts unavailable, skipping on-chain termination"
            );
            return;
        }
    };

    let proposal = match Proposal::demarshal(&record.proposal) {
        Ok(proposal) => proposal,
        Err(e) => {
            error!(
                agreement_id = %record.agreement_id,
                error = %e,
                "error hydrating agreement proposal"
            );
            return;
        }
    };

    let policy = match Policy::demarshal(&proposal.producer_policy) {
        Ok(policy) => policy,
        Err(e) => {
            error!(
                agreement_id = %record.agreement_id,
                error = %e,
                "error hydrating producer policy"
            );
            return;
        }
    };

    if let Err(e) = ctx
        .chain
        .terminate_agreement(
            &policy,
            &record.counterparty_address,
            &record.agreement_id,
            reason,
            &contracts,
        )
        .await
    {
        error!(
            agreement_id = %record.agreement_id,
            error = %e,
            "error terminating agreement on chain"
        );
    }
}
