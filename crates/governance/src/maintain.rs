use gridbroker_persistence::{unarchived_filter, AgreementFilter};
use gridbroker_types::{OutboundEvent, PROTOCOL_NAME};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

use crate::context::GovernanceContext;

/// Container-health loop: asks the runtime to confirm the workloads of every
/// running agreement are still up. Failures come back through the event
/// sink; this loop owns no cancellation logic.
pub(crate) async fn run(ctx: Arc<GovernanceContext>) {
    let interval = Duration::from_millis(ctx.config.governance.maintenance_interval_ms);

    loop {
        trace!("governing containers");

        let filters = [unarchived_filter(), running_filter()];
        match ctx.store.find_agreements(PROTOCOL_NAME, &filters).await {
            Err(e) => {
                error!(error = %e, "unable to retrieve running agreements from store");
            }
            Ok(agreements) => {
                for agreement in agreements {
                    debug!(
                        agreement_id = %agreement.agreement_id,
                        "requesting container maintenance"
                    );
                    ctx.emit(OutboundEvent::Maintenance {
                        protocol: agreement.agreement_protocol.clone(),
                        agreement_id: agreement.agreement_id.clone(),
                        deployment: agreement.current_deployment.clone(),
                    })
                    .await;
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Agreements whose workloads are running and uncancelled.
fn running_filter() -> AgreementFilter {
    Box::new(|a| {
        a.execution_start_time != 0
            && a.terminated_time == 0
            && !a.counterparty_address.is_empty()
    })
}
