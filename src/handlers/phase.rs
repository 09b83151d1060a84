//! Waiting for a managed instance to reach a lifecycle phase.
//!
//! Agents only accept commands once their instance has reached a given phase,
//! and clients may only be pointed at a provider that is READY. Both the
//! middleware and the client controller handlers poll the agent's `ping`
//! through this.

use std::sync::Arc;
use tracing::debug;

use crate::clients::{ClientError, ClientErrorKind, MiddlewareAgentClient};
use crate::core::config::PhaseWait;
use crate::core::errors::HandlerError;
use crate::plan::{InstancePhase, InstanceRef};

#[derive(Clone)]
pub struct PhaseWaiter {
    agent: Arc<dyn MiddlewareAgentClient>,
    phase_wait: PhaseWait,
}

impl PhaseWaiter {
    pub fn new(agent: Arc<dyn MiddlewareAgentClient>, phase_wait: PhaseWait) -> Self {
        Self { agent, phase_wait }
    }

    /// Poll the instance's agent until it reports at least `required`.
    ///
    /// Transient ping failures count as "not there yet"; permanent ones fail
    /// the task straight away.
    pub async fn wait_for(
        &self,
        instance: &InstanceRef,
        required: InstancePhase,
    ) -> Result<InstancePhase, HandlerError> {
        let max_polls = self.phase_wait.max_polls.max(1);
        let mut last_seen = None;

        for poll in 1..=max_polls {
            match self.agent.ping(instance).await {
                Ok(phase) if phase >= required => {
                    debug!(instance = %instance, ?phase, poll, "Instance phase reached");
                    return Ok(phase);
                }
                Ok(phase) => last_seen = Some(phase),
                Err(err) if err.is_transient() => {
                    debug!(instance = %instance, error = %err, poll, "Ping failed, will poll again");
                }
                Err(err) => return Err(err.into()),
            }

            if poll < max_polls {
                tokio::time::sleep(self.phase_wait.poll_interval()).await;
            }
        }

        let seen = last_seen
            .map(|phase| format!("{:?}", phase))
            .unwrap_or_else(|| "no answer".to_string());
        Err(ClientError::new(
            ClientErrorKind::Timeout,
            "ping",
            format!(
                "instance {} did not reach phase {:?} after {} polls (last seen: {})",
                instance, required, max_polls, seen
            ),
        )
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::DryRunCollaborators;

    #[tokio::test]
    async fn test_permanent_ping_error_fails_at_once() {
        let dry = Arc::new(DryRunCollaborators::new());
        let db = InstanceRef::new("shop", "db", "1");
        dry.fail("ping", &db.to_string(), ClientError::rejected("ping", "unknown instance"));
        let waiter = PhaseWaiter::new(
            dry.clone(),
            PhaseWait {
                poll_interval_ms: 1,
                max_polls: 5,
            },
        );

        let err = waiter.wait_for(&db, InstancePhase::Ready).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(dry.calls_to("ping").len(), 1);
    }
}
