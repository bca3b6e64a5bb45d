//! Console session over stdin.

use std::io::{IsTerminal, Write};

use slate_core::{EngineConfig, EvaluationStatus};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::colors::{self, Palette};
use crate::driver::Driver;
use crate::output;

const QUIT: &str = ":quit";

pub async fn execute(config: EngineConfig) -> anyhow::Result<()> {
    let mut driver = Driver::new(config)?;
    driver.session.load(Vec::new())?;

    let palette = Palette::detect();
    let interactive = std::io::stdin().is_terminal();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if interactive {
            print!("{} ", palette.paint(colors::BOLD, ">"));
            std::io::stdout().flush()?;
        }

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input == QUIT {
            break;
        }

        let outcome = driver.submit(input).await?;
        let Some(&cell) = outcome.evaluated().last() else {
            continue;
        };
        if let Some(view) = driver.host.view(cell) {
            print!("{}", output::render(&view, &palette));
        }

        if outcome.status() == Some(EvaluationStatus::Disconnected) {
            eprintln!("{}", palette.paint(colors::YELLOW, "agent terminated, restarting"));
            driver.restart_agent().await?;
        }
    }

    Ok(())
}
