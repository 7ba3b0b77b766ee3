use std::io::Write;

use color_print::cformat;
use eyre::Result;

use crate::cli::chat::conversation_state::{Snapshot, TurnKind};
use crate::cli::chat::results_table::ResultTable;

const TABLE_TITLE: &str = "Recommended Items";
const COLUMN_GAP: &str = "  ";

pub fn render_pending(output: &mut dyn Write, snapshot: &Snapshot) -> Result<()> {
    if snapshot.pending {
        writeln!(output, "{}", cformat!("<dim>Searching...</dim>"))?;
        output.flush()?;
    }
    Ok(())
}

/// Draw the error line, the assistant's latest turn and, once a
/// recommendation is in, the results table.
pub fn render(output: &mut dyn Write, snapshot: &Snapshot) -> Result<()> {
    if let Some(error) = &snapshot.last_error {
        writeln!(output, "{}", cformat!("<red>{}</red>", error))?;
    }

    if let Some(turn) = snapshot.assistant_turn() {
        writeln!(output)?;
        match turn.kind {
            Some(TurnKind::FollowUp) => {
                writeln!(output, "{}", cformat!("<cyan>{}</cyan>", turn.content))?
            }
            _ => writeln!(output, "{}", turn.content)?,
        }

        if snapshot.ready_for_recommendation {
            let table = ResultTable::build(&snapshot.results);
            if !table.is_empty() {
                render_table(output, &table)?;
            }
        }
    }

    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub fn render_table(output: &mut dyn Write, table: &ResultTable) -> Result<()> {
    let headers = table.headers();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in table.rows() {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    writeln!(output)?;
    writeln!(output, "{}", cformat!("<bold>{}</bold>", TABLE_TITLE))?;

    let header_line = pad_row(&headers, &widths);
    writeln!(output, "{}", cformat!("<bold>{}</bold>", header_line))?;

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(output, "{}", rule.join(COLUMN_GAP))?;

    for row in table.rows() {
        writeln!(output, "{}", pad_row(row, &widths))?;
    }

    Ok(())
}

fn pad_row(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<String>>()
        .join(COLUMN_GAP)
        .trim_end()
        .to_string()
}
