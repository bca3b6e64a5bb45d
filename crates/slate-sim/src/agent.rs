//! In-process execution agent.
//!
//! Runs [`Program`](crate::lang::Program) payloads against a global integer
//! environment. Captured output and the final result are pushed on the event
//! stream before `evaluate` returns, so a caller that drains the stream after
//! each evaluation sees every event of that cell.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use slate_core::{
    AgentError, AgentEvent, AssemblyReference, CapturedOutputSegment, CompiledUnit,
    EvaluationContextId, EvaluationEvent, ExecutionAgent, RemoteException, ResultHandling,
    ResultValue, StackFrame, WorkspaceCellId,
};
use tokio::sync::{mpsc, watch};

use crate::lang::{Expr, Program, Statement};

#[derive(Default)]
struct AgentState {
    globals: FxHashMap<String, i64>,
    loaded: Vec<String>,
}

/// Simulated agent process.
pub struct SimAgent {
    connected: AtomicBool,
    state: Mutex<AgentState>,
    events: mpsc::UnboundedSender<AgentEvent>,
    stream: Mutex<Option<mpsc::UnboundedReceiver<AgentEvent>>>,
    /// `true` while evaluations are held back.
    paused: watch::Sender<bool>,
    culture: Mutex<Option<String>>,
    evaluations: AtomicUsize,
    resets: AtomicUsize,
    aborts: AtomicUsize,
}

impl Default for SimAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAgent {
    /// A connected agent.
    pub fn new() -> Self {
        let (events, stream) = mpsc::unbounded_channel();
        let (paused, _) = watch::channel(false);
        Self {
            connected: AtomicBool::new(true),
            state: Mutex::new(AgentState::default()),
            events,
            stream: Mutex::new(Some(stream)),
            paused,
            culture: Mutex::new(None),
            evaluations: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Hold every evaluation at its start until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    /// Culture tag attached to results.
    pub fn set_culture(&self, culture: Option<&str>) {
        *self.culture.lock().unwrap_or_else(PoisonError::into_inner) = culture.map(str::to_string);
    }

    pub fn global(&self, name: &str) -> Option<i64> {
        self.state().globals.get(name).copied()
    }

    pub fn loaded_assemblies(&self) -> Vec<String> {
        self.state().loaded.clone()
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn emit(&self, event: AgentEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("agent event dropped: stream closed");
        }
    }

    fn output(&self, cell_id: WorkspaceCellId, text: String) {
        self.emit(AgentEvent::CapturedOutput(CapturedOutputSegment {
            cell_id,
            bytes: text.into_bytes(),
        }));
    }

    fn result(&self, cell_id: WorkspaceCellId, result: Option<ResultValue>, started: Instant) {
        let culture = self
            .culture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.emit(AgentEvent::Evaluation(EvaluationEvent {
            cell_id,
            result,
            exception: None,
            interrupted: false,
            culture,
            duration: started.elapsed(),
            handling: ResultHandling::Replace,
        }));
    }

    fn ensure_connected(&self) -> Result<(), AgentError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AgentError::NotConnected)
        }
    }

    async fn wait_until_resumed(&self) {
        let mut paused = self.paused.subscribe();
        // The sender lives as long as the agent.
        let _ = paused.wait_for(|paused| !*paused).await;
    }

    fn run(&self, unit: &CompiledUnit, program: &Program) -> Result<(), AgentError> {
        let started = Instant::now();
        let mut last = None;

        for statement in &program.statements {
            match statement {
                Statement::Reference(_) => {}
                Statement::Assign { name, value } => {
                    let value = self.eval(value)?;
                    self.state().globals.insert(name.clone(), value);
                }
                Statement::Print(expr) => {
                    let value = self.eval(expr)?;
                    self.output(unit.cell_id, format!("{value}\n"));
                }
                Statement::Throw(message) => {
                    return Err(AgentError::Remote(exception("UserException", message)));
                }
                Statement::Crash => {
                    tracing::warn!("simulated agent crashed");
                    self.disconnect();
                    return Err(AgentError::Terminated("agent process exited".to_string()));
                }
                Statement::Clear => self.result(unit.cell_id, Some(ResultValue::Clear), started),
                Statement::Expr(expr) => last = Some(self.eval(expr)?),
            }
        }

        let value = last.map(|value| ResultValue::Value(serde_json::json!(value)));
        self.result(unit.cell_id, value, started);
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> Result<i64, AgentError> {
        expr.eval(&self.state().globals)
            .map_err(|err| AgentError::Remote(exception(err.type_name(), &err.to_string())))
    }
}

fn exception(type_name: &str, message: &str) -> RemoteException {
    let mut exception = RemoteException::new(type_name, message);
    exception.stack_trace = vec![
        StackFrame {
            method: "<cell>".to_string(),
            file: None,
            line: None,
            is_host_frame: false,
        },
        StackFrame {
            method: "slate_sim::agent::SimAgent::run".to_string(),
            file: Some(file!().to_string()),
            line: None,
            is_host_frame: true,
        },
    ];
    exception
}

#[async_trait]
impl ExecutionAgent for SimAgent {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<AgentEvent>> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn reset_state(&self) -> Result<(), AgentError> {
        self.ensure_connected()?;
        self.state().globals.clear();
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_assemblies(
        &self,
        _context: EvaluationContextId,
        assemblies: &[AssemblyReference],
    ) -> Result<(), AgentError> {
        self.ensure_connected()?;
        let mut state = self.state();
        for assembly in assemblies {
            if !state.loaded.contains(&assembly.name) {
                tracing::debug!("loading {}", assembly.name);
                state.loaded.push(assembly.name.clone());
            }
        }
        Ok(())
    }

    async fn evaluate(&self, unit: &CompiledUnit) -> Result<(), AgentError> {
        self.ensure_connected()?;
        self.wait_until_resumed().await;
        self.ensure_connected()?;

        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let program: Program = serde_json::from_slice(&unit.payload).map_err(|err| {
            AgentError::Remote(exception("InvalidProgram", &err.to_string()))
        })?;
        self.run(unit, &program)
    }

    async fn abort_evaluation(&self, _context: EvaluationContextId) -> Result<(), AgentError> {
        self.ensure_connected()?;
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
