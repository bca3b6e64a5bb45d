//! Notebook file format.
//!
//! A line consisting of `%%` starts a code cell and `%% md` starts a prose
//! cell. Text before the first marker forms a code cell when it is not blank.

use slate_core::{Cell, CodeCell, ProseCell};

const MARKER: &str = "%%";

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Code,
    Prose,
}

/// Split a notebook file into cells.
pub fn parse(source: &str, language: &str) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut kind = Kind::Code;
    let mut body: Vec<&str> = Vec::new();
    let mut explicit = false;

    for line in source.lines() {
        match marker_kind(line) {
            Some(next) => {
                push_cell(&mut cells, kind, &body, explicit, language);
                kind = next;
                body.clear();
                explicit = true;
            }
            None => body.push(line),
        }
    }
    push_cell(&mut cells, kind, &body, explicit, language);

    cells
}

fn marker_kind(line: &str) -> Option<Kind> {
    let rest = line.trim_end().strip_prefix(MARKER)?;
    match rest.trim() {
        "" => Some(Kind::Code),
        "md" => Some(Kind::Prose),
        _ => None,
    }
}

fn push_cell(cells: &mut Vec<Cell>, kind: Kind, body: &[&str], explicit: bool, language: &str) {
    let text = body.join("\n");
    let text = text.trim_matches('\n');
    if !explicit && text.trim().is_empty() {
        return;
    }

    cells.push(match kind {
        Kind::Code => Cell::Code(CodeCell::new(language).with_source(text)),
        Kind::Prose => Cell::Prose(ProseCell::new(text)),
    });
}
