//! Run command: evaluate every cell of a notebook file.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use slate_core::{CellKind, EngineConfig, EvaluateOutcome, EvaluationStatus};

use crate::colors::{self, Palette};
use crate::driver::Driver;
use crate::notebook;
use crate::output;

pub async fn execute(path: &Path, config: EngineConfig, references: &[String]) -> anyhow::Result<()> {
    let start = Instant::now();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read notebook {}", path.display()))?;
    let cells = notebook::parse(&source, &config.language);
    let palette = Palette::detect();

    println!("{} {}", palette.paint(colors::BOLD, "Running"), path.display());
    if !cells.iter().any(|cell| cell.is_kind(CellKind::Code)) {
        println!("{}", palette.paint(colors::YELLOW, "No code cells found."));
        return Ok(());
    }

    let mut driver = Driver::new(config)?;
    driver.session.load(cells)?;
    if driver.session.add_top_level_references(references)? {
        tracing::debug!("added {} references", references.len());
    }

    let interrupt = driver.cancel_on_interrupt();
    let outcome = driver.evaluate_all().await;
    interrupt.abort();

    let (status, evaluated) = match outcome? {
        EvaluateOutcome::Completed { status, evaluated } => (status, evaluated),
        EvaluateOutcome::Skipped(reason) => anyhow::bail!("evaluation skipped: {reason:?}"),
    };

    // Number visible code cells in document order; hidden cells have no view.
    let visible = driver
        .session
        .code_cells()
        .into_iter()
        .filter_map(|cell| driver.host.view(cell).map(|view| (cell, view)));
    for (number, (cell, view)) in visible.enumerate() {
        if !evaluated.contains(&cell) {
            continue;
        }
        println!("{}", palette.paint(colors::DIM, &format!("[{}]", number + 1)));
        print!("{}", output::render(&view, &palette));
    }

    let elapsed = start.elapsed().as_secs_f64();
    match status {
        EvaluationStatus::Success => println!(
            "{} {} cells in {:.2}s",
            palette.paint(colors::GREEN, "Completed"),
            evaluated.len(),
            elapsed
        ),
        EvaluationStatus::EvaluationException => println!(
            "{} {} cells in {:.2}s with exceptions",
            palette.paint(colors::YELLOW, "Completed"),
            evaluated.len(),
            elapsed
        ),
        EvaluationStatus::ErrorDiagnostic => {
            anyhow::bail!("evaluation stopped: a cell has compile errors")
        }
        EvaluationStatus::Disconnected => {
            anyhow::bail!("evaluation stopped: the agent is not connected")
        }
    }

    Ok(())
}
