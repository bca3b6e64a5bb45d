//! A notebook session wired to the in-process back ends.

use std::sync::Arc;

use anyhow::Context;
use slate_core::{
    AgentEvent, EngineConfig, EvaluateOutcome, ExecutionAgent, NotebookSession, SessionEvent,
};
use slate_sim::{RecordingHost, SimAgent, SimWorkspace};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Driver {
    pub session: NotebookSession,
    pub agent: Arc<SimAgent>,
    pub host: Arc<RecordingHost>,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    cancel: CancellationToken,
}

impl Driver {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let agent = Arc::new(SimAgent::new());
        let host = Arc::new(RecordingHost::new());
        let session = NotebookSession::new(config, agent.clone(), host.clone());
        session.handle_session_event(SessionEvent::CompilationWorkspaceAvailable(Arc::new(
            SimWorkspace::new(),
        )));

        // Results are routed synchronously after each request, so output
        // prints in evaluation order.
        let events = agent
            .take_event_stream()
            .context("agent event stream unavailable")?;

        Ok(Self {
            session,
            agent,
            host,
            events,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancel in-flight evaluation on Ctrl-C.
    pub fn cancel_on_interrupt(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted");
                cancel.cancel();
            }
        })
    }

    pub async fn evaluate_all(&mut self) -> anyhow::Result<EvaluateOutcome> {
        let outcome = self.session.evaluate_all(&self.cancel).await?;
        self.route();
        Ok(outcome)
    }

    pub async fn submit(&mut self, input: &str) -> anyhow::Result<EvaluateOutcome> {
        let outcome = self.session.evaluate_input(input, &self.cancel).await?;
        self.route();
        Ok(outcome)
    }

    /// Bring a terminated agent back with a clean state.
    pub async fn restart_agent(&self) -> anyhow::Result<()> {
        self.agent.connect();
        self.agent.reset_state().await?;
        Ok(())
    }

    fn route(&mut self) {
        let routed = self.session.result_router().drain(&mut self.events);
        tracing::debug!("routed {} agent events", routed);
    }
}
