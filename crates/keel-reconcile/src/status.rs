//! Status events published back onto the bus
//!
//! A deploy reports `running` once, then exactly one terminal state. The
//! report object enforces that ordering even when a pass fails before it
//! got as far as issuing upserts. Expose commands report a single
//! terminal state.

use keel_core::{DeployPayload, Event, EventSink, ExposePayload, Result, State};
use tracing::info;

/// Status publisher for one deploy command
pub struct DeployReport<'a> {
    sink: &'a EventSink,
    command: &'a Event,
    running_sent: bool,
}

impl<'a> DeployReport<'a> {
    /// Reporter for `command`
    #[must_use]
    pub fn new(sink: &'a EventSink, command: &'a Event) -> Self {
        Self {
            sink,
            command,
            running_sent: false,
        }
    }

    /// Publish the in-progress status, once
    pub async fn running(&mut self, deploy: &DeployPayload) -> Result<()> {
        if self.running_sent {
            return Ok(());
        }
        self.running_sent = true;
        self.sink
            .publish(self.command.child(deploy.status(State::Running, "")))
            .await
    }

    /// Publish the terminal status, preceded by `running` if it was not
    /// sent yet
    pub async fn finish(
        mut self,
        deploy: &DeployPayload,
        state: State,
        message: impl Into<String>,
    ) -> Result<()> {
        self.running(deploy).await?;
        let message = message.into();
        info!(
            project = %deploy.project.slug,
            environment = %deploy.environment,
            state = %state,
            message = %message,
            "Deploy finished"
        );
        let mut event = self.command.child(deploy.status(state, message.clone()));
        if state == State::Failed {
            event = event.with_error(message);
        }
        self.sink.publish(event).await
    }
}

/// Publish the single terminal status of an expose command
pub async fn report_expose(
    sink: &EventSink,
    command: &Event,
    expose: &ExposePayload,
    state: State,
    dns: &str,
    message: impl Into<String>,
) -> Result<()> {
    let message = message.into();
    info!(
        name = %expose.name,
        kind = %expose.kind.as_str(),
        state = %state,
        dns = %dns,
        message = %message,
        "Expose finished"
    );
    let mut event = command.child(expose.status(state, dns, message.clone()));
    if state == State::Failed {
        event = event.with_error(message);
    }
    sink.publish(event).await
}
