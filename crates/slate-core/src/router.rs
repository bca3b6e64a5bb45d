//! Routing of asynchronous agent events back to cell views.
//!
//! Events are resolved through the evaluation registry by workspace identity
//! and applied in arrival order. An event for a cell that no longer exists is
//! dropped; that is the normal outcome of deleting a cell while it runs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentEvent, CapturedOutputSegment, EvaluationEvent, ResultValue};
use crate::config::SessionKind;
use crate::document::{self, SharedDocument};
use crate::view::RenderedResult;
use crate::workspace::Diagnostic;

/// Message rendered when a workbook receives the clear sentinel.
pub const CLEAR_UNSUPPORTED: &str = "'clear' is not supported for Workbooks";

/// What happened to a routed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Forwarded to the cell's view.
    Delivered,
    /// No live cell with that identity.
    Dropped,
    /// Clear sentinel in a console session: every view was reset.
    ClearedOutputs,
    /// Clear sentinel in a workbook session: a diagnostic was rendered instead.
    Rejected,
}

/// Routes agent events to the views of the cells that produced them.
#[derive(Clone)]
pub struct ResultRouter {
    document: SharedDocument,
    session_kind: SessionKind,
    default_culture: Arc<str>,
}

impl ResultRouter {
    pub(crate) fn new(
        document: SharedDocument,
        session_kind: SessionKind,
        default_culture: &str,
    ) -> Self {
        Self {
            document,
            session_kind,
            default_culture: Arc::from(default_culture),
        }
    }

    pub fn route(&self, event: &AgentEvent) -> RouteOutcome {
        match event {
            AgentEvent::Evaluation(event) => self.route_result(event),
            AgentEvent::CapturedOutput(segment) => self.route_output(segment),
        }
    }

    pub fn route_result(&self, event: &EvaluationEvent) -> RouteOutcome {
        let doc = document::lock(&self.document);
        let Some(state) = doc.registry.find_by_workspace_id(event.cell_id) else {
            tracing::debug!("dropping result for unknown cell {}", event.cell_id);
            return RouteOutcome::Dropped;
        };

        if event.result.as_ref().is_some_and(ResultValue::is_clear) {
            if self.session_kind.is_workbook() {
                tracing::warn!("clear requested in a workbook session");
                state.view().render_diagnostic(&Diagnostic::error(CLEAR_UNSUPPORTED));
                return RouteOutcome::Rejected;
            }
            for (_, state) in doc.registry.iter() {
                state.view().reset();
            }
            return RouteOutcome::ClearedOutputs;
        }

        let view = state.view();
        view.set_evaluation_duration(event.duration);
        let culture = resolve_culture(event.culture.as_deref(), &self.default_culture);

        if let Some(exception) = &event.exception {
            let rendered = RenderedResult::Exception {
                exception: exception.filtered(),
            };
            view.render_result(culture, &rendered, event.handling);
        } else if (!event.interrupted && event.result.is_some()) || state.is_result_an_expression()
        {
            let value = match &event.result {
                Some(ResultValue::Value(value)) => Some(value.clone()),
                _ => None,
            };
            view.render_result(culture, &RenderedResult::Value { value }, event.handling);
        }

        RouteOutcome::Delivered
    }

    pub fn route_output(&self, segment: &CapturedOutputSegment) -> RouteOutcome {
        let doc = document::lock(&self.document);
        match doc.registry.find_by_workspace_id(segment.cell_id) {
            Some(state) => {
                state.view().render_captured_output(segment);
                RouteOutcome::Delivered
            }
            None => {
                tracing::debug!("dropping output for unknown cell {}", segment.cell_id);
                RouteOutcome::Dropped
            }
        }
    }

    /// Route every event already queued on `events`. Returns how many were routed.
    pub fn drain(&self, events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> usize {
        let mut routed = 0;
        while let Ok(event) = events.try_recv() {
            self.route(&event);
            routed += 1;
        }
        routed
    }

    /// Route events until the stream closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<AgentEvent>, cancel: CancellationToken) {
        tracing::debug!("result router started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.route(&event);
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("result router stopped");
    }
}

/// Validate a culture tag, falling back to `default` when missing or malformed.
pub fn resolve_culture<'a>(culture: Option<&'a str>, default: &'a str) -> &'a str {
    match culture {
        None | Some("") => default,
        Some(tag) if is_valid_culture(tag) => tag,
        Some(tag) => {
            tracing::error!("invalid culture tag {:?}, using {}", tag, default);
            default
        }
    }
}

/// `language[-subtag]*`: a 2-8 letter language followed by 1-8 character
/// alphanumeric subtags.
fn is_valid_culture(tag: &str) -> bool {
    let mut parts = tag.split('-');
    let language_ok = parts
        .next()
        .is_some_and(|lang| (2..=8).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_alphabetic()));
    language_ok
        && parts.all(|part| (1..=8).contains(&part.len()) && part.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::agent::{RemoteException, StackFrame};
    use crate::cell::{CellId, CodeCell};
    use crate::document::Document;
    use crate::testing::{NullWorkspace, SpyHost, SpyView};
    use crate::workspace::WorkspaceCellId;

    struct Fixture {
        document: SharedDocument,
        host: SpyHost,
        cells: Vec<CellId>,
    }

    impl Fixture {
        fn new(cells: usize) -> Self {
            let mut doc = Document::new();
            doc.install_workspace(Arc::new(NullWorkspace::default()));
            let host = SpyHost::default();
            let mut ids = Vec::new();
            for _ in 0..cells {
                let after = doc.cells.last();
                ids.push(doc.insert_code_cell(CodeCell::new("slate"), after, &host).unwrap());
            }
            Self {
                document: Arc::new(Mutex::new(doc)),
                host,
                cells: ids,
            }
        }

        fn router(&self, kind: SessionKind) -> ResultRouter {
            ResultRouter::new(self.document.clone(), kind, "en-US")
        }

        fn workspace_id(&self, index: usize) -> WorkspaceCellId {
            document::lock(&self.document)
                .workspace_id_of(self.cells[index])
                .unwrap()
        }

        fn view(&self, index: usize) -> Arc<SpyView> {
            self.host.view(self.cells[index])
        }
    }

    #[test]
    fn test_value_reaches_view() {
        let fx = Fixture::new(2);
        let router = fx.router(SessionKind::Workbook);
        let mut event = EvaluationEvent::value(fx.workspace_id(1), serde_json::json!(3));
        event.culture = Some("fr-FR".to_string());
        event.duration = Duration::from_millis(5);

        assert_eq!(router.route_result(&event), RouteOutcome::Delivered);
        let results = fx.view(1).results.lock().unwrap().clone();
        assert_eq!(
            results,
            vec![(
                "fr-FR".to_string(),
                RenderedResult::Value {
                    value: Some(serde_json::json!(3))
                }
            )]
        );
        assert!(fx.view(0).results.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_cell_dropped() {
        let fx = Fixture::new(1);
        let router = fx.router(SessionKind::Workbook);
        let event = EvaluationEvent::value(WorkspaceCellId::new_v4(), serde_json::json!(1));
        assert_eq!(router.route_result(&event), RouteOutcome::Dropped);

        let segment = CapturedOutputSegment {
            cell_id: WorkspaceCellId::new_v4(),
            bytes: b"x".to_vec(),
        };
        assert_eq!(router.route_output(&segment), RouteOutcome::Dropped);
    }

    #[test]
    fn test_interrupted_without_expression_renders_nothing() {
        let fx = Fixture::new(1);
        let router = fx.router(SessionKind::Workbook);
        let mut event = EvaluationEvent::value(fx.workspace_id(0), serde_json::json!(1));
        event.interrupted = true;

        assert_eq!(router.route_result(&event), RouteOutcome::Delivered);
        assert!(fx.view(0).results.lock().unwrap().is_empty());
    }

    #[test]
    fn test_expression_without_value_renders_empty_result() {
        let fx = Fixture::new(1);
        document::lock(&fx.document)
            .state_for_cell_mut(fx.cells[0])
            .unwrap()
            .set_result_is_expression(true);
        let router = fx.router(SessionKind::Workbook);
        let mut event = EvaluationEvent::value(fx.workspace_id(0), serde_json::json!(1));
        event.result = None;

        router.route_result(&event);
        let results = fx.view(0).results.lock().unwrap().clone();
        assert_eq!(results[0].1, RenderedResult::Value { value: None });
    }

    #[test]
    fn test_exception_is_filtered() {
        let fx = Fixture::new(1);
        let router = fx.router(SessionKind::Workbook);
        let mut exception = RemoteException::new("Failure", "boom");
        exception.stack_trace = vec![StackFrame {
            method: "agent::run".to_string(),
            file: None,
            line: None,
            is_host_frame: true,
        }];
        let mut event = EvaluationEvent::value(fx.workspace_id(0), serde_json::json!(null));
        event.result = None;
        event.exception = Some(exception);

        router.route_result(&event);
        let results = fx.view(0).results.lock().unwrap().clone();
        match &results[0].1 {
            RenderedResult::Exception { exception } => assert!(exception.stack_trace.is_empty()),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_clear_in_console_resets_every_view() {
        let fx = Fixture::new(3);
        let router = fx.router(SessionKind::Console);
        let mut event = EvaluationEvent::value(fx.workspace_id(2), serde_json::json!(null));
        event.result = Some(ResultValue::Clear);

        assert_eq!(router.route_result(&event), RouteOutcome::ClearedOutputs);
        for index in 0..3 {
            assert_eq!(*fx.view(index).resets.lock().unwrap(), 1);
        }
    }

    #[test]
    fn test_clear_in_workbook_is_rejected() {
        let fx = Fixture::new(2);
        let router = fx.router(SessionKind::Workbook);
        let mut event = EvaluationEvent::value(fx.workspace_id(1), serde_json::json!(null));
        event.result = Some(ResultValue::Clear);

        assert_eq!(router.route_result(&event), RouteOutcome::Rejected);
        let diagnostics = fx.view(1).diagnostics.lock().unwrap().clone();
        assert_eq!(diagnostics, vec![Diagnostic::error(CLEAR_UNSUPPORTED)]);
        assert_eq!(*fx.view(0).resets.lock().unwrap(), 0);
    }

    #[test]
    fn test_resolve_culture() {
        assert_eq!(resolve_culture(None, "en-US"), "en-US");
        assert_eq!(resolve_culture(Some(""), "en-US"), "en-US");
        assert_eq!(resolve_culture(Some("de"), "en-US"), "de");
        assert_eq!(resolve_culture(Some("zh-Hant-TW"), "en-US"), "zh-Hant-TW");
        assert_eq!(resolve_culture(Some("not a culture"), "en-US"), "en-US");
        assert_eq!(resolve_culture(Some("x"), "en-US"), "en-US");
    }

    #[tokio::test]
    async fn test_run_routes_in_arrival_order() {
        let fx = Fixture::new(1);
        let router = fx.router(SessionKind::Workbook);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = fx.workspace_id(0);

        tx.send(AgentEvent::CapturedOutput(CapturedOutputSegment {
            cell_id: id,
            bytes: b"first\n".to_vec(),
        }))
        .unwrap();
        tx.send(AgentEvent::CapturedOutput(CapturedOutputSegment {
            cell_id: id,
            bytes: b"second\n".to_vec(),
        }))
        .unwrap();
        drop(tx);

        router.run(rx, CancellationToken::new()).await;
        let outputs = fx.view(0).outputs.lock().unwrap().clone();
        assert_eq!(outputs, vec!["first\n".to_string(), "second\n".to_string()]);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fx = Fixture::new(1);
        let router = fx.router(SessionKind::Workbook);
        let (_tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        router.run(rx, cancel).await;
    }

    #[test]
    fn test_drain_counts_events() {
        let fx = Fixture::new(1);
        let router = fx.router(SessionKind::Workbook);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let event = EvaluationEvent::value(fx.workspace_id(0), serde_json::json!(1));
        tx.send(AgentEvent::Evaluation(event.clone())).unwrap();
        tx.send(AgentEvent::Evaluation(event)).unwrap();

        assert_eq!(router.drain(&mut rx), 2);
        assert_eq!(fx.view(0).results.lock().unwrap().len(), 2);
    }
}
