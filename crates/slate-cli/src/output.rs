//! Text rendering of recorded cell views.

use std::fmt::Write;

use slate_core::{Diagnostic, RemoteException, RenderedResult, Severity};
use slate_sim::{RecordingView, ViewRecord};

use crate::colors::{self, Palette};

/// Everything rendered into `view` since its last reset.
pub fn render(view: &RecordingView, palette: &Palette) -> String {
    let mut out = String::new();
    for record in view.current() {
        match record {
            ViewRecord::Output(text) => out.push_str(&text),
            ViewRecord::Diagnostic(diagnostic) => {
                let _ = writeln!(out, "{}", format_diagnostic(&diagnostic, palette));
            }
            ViewRecord::Result { result, .. } => match result {
                RenderedResult::Value { value: Some(value) } => {
                    let _ = writeln!(out, "{} {}", palette.paint(colors::CYAN, "=>"), value);
                }
                RenderedResult::Value { value: None } => {}
                RenderedResult::Exception { exception } => {
                    format_exception(&mut out, &exception, palette);
                }
            },
            ViewRecord::Reset | ViewRecord::Duration(_) => {}
        }
    }
    out
}

fn format_diagnostic(diagnostic: &Diagnostic, palette: &Palette) -> String {
    let (label, color) = match diagnostic.severity {
        Severity::Error => ("error", colors::RED),
        Severity::Warning => ("warning", colors::YELLOW),
        Severity::Info | Severity::Hidden => ("info", colors::DIM),
    };
    let label = palette.paint(color, label);
    match diagnostic.location {
        Some(location) => format!(
            "{label}[{}:{}]: {}",
            location.line, location.column, diagnostic.message
        ),
        None => format!("{label}: {}", diagnostic.message),
    }
}

fn format_exception(out: &mut String, exception: &RemoteException, palette: &Palette) {
    let _ = writeln!(out, "{}", palette.paint(colors::RED, &exception.to_string()));
    for frame in &exception.stack_trace {
        let _ = writeln!(out, "    at {}", frame.method);
    }
    if let Some(inner) = &exception.inner {
        let _ = writeln!(out, "caused by:");
        format_exception(out, inner, palette);
    }
}
