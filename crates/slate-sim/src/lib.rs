//! In-process back ends for slate.
//!
//! [`SimWorkspace`] and [`SimAgent`] implement the compilation workspace and
//! execution agent contracts for a small integer language (see [`lang`]).
//! [`RecordingHost`] is a front end that records every view call. Together
//! they drive a [`NotebookSession`](slate_core::NotebookSession) without any
//! external process:
//!
//! ```no_run
//! use std::sync::Arc;
//! use slate_core::{EngineConfig, ExecutionAgent, NotebookSession, SessionEvent};
//! use slate_sim::{RecordingHost, SimAgent, SimWorkspace};
//!
//! # async fn demo() -> slate_core::Result<()> {
//! let agent = Arc::new(SimAgent::new());
//! let host = Arc::new(RecordingHost::new());
//! let session = NotebookSession::new(EngineConfig::default(), agent.clone(), host.clone());
//! session.handle_session_event(SessionEvent::CompilationWorkspaceAvailable(Arc::new(
//!     SimWorkspace::new(),
//! )));
//!
//! let mut events = agent.take_event_stream().expect("fresh agent");
//! let cell = session.start_new_code_cell()?;
//! session.set_cell_buffer(cell, "6 * 7")?;
//! session.evaluate_cell(cell, &Default::default()).await?;
//! session.result_router().drain(&mut events);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod lang;
pub mod recording;
pub mod workspace;

pub use agent::SimAgent;
pub use recording::{RecordingHost, RecordingView, ViewRecord};
pub use workspace::SimWorkspace;
