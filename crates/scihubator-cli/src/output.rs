use std::io::Write;

use owo_colors::OwoColorize;
use scihubator_core::{BatchReport, RunError, Unit};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

pub fn print_duplicate_notice(w: &mut dyn Write, color: ColorMode) -> std::io::Result<()> {
    let msg = "Duplicate DOI(s) found and deleted.";
    if color.enabled() {
        writeln!(w, "{}", msg.yellow())
    } else {
        writeln!(w, "{}", msg)
    }
}

/// Print every unit of the result with its label and annotations.
pub fn print_units(w: &mut dyn Write, report: &BatchReport, color: ColorMode) -> std::io::Result<()> {
    if let Some(label) = report.result.label() {
        if color.enabled() {
            writeln!(w, "{}", label.bold().cyan())?;
        } else {
            writeln!(w, "{}", label)?;
        }
        writeln!(w)?;
    }

    for (i, unit) in report.result.units().iter().enumerate() {
        let header = unit_header(i, unit);
        if color.enabled() {
            writeln!(w, "{}", header.bold().yellow())?;
        } else {
            writeln!(w, "{}", header)?;
        }
        for (key, value) in &unit.annotations {
            if color.enabled() {
                writeln!(w, "  {} {}", format!("{key}:").dimmed(), value)?;
            } else {
                writeln!(w, "  {key}: {value}")?;
            }
        }
        writeln!(w)?;
        writeln!(w, "{}", unit.text.trim_end())?;
        writeln!(w)?;
    }
    Ok(())
}

fn unit_header(index: usize, unit: &Unit) -> String {
    match &unit.label {
        Some(label) => format!("[{}] {}", index + 1, label),
        None => format!("[{}]", index + 1),
    }
}

/// Final status line, plus the missing-bibliography notice when relevant.
pub fn print_summary(w: &mut dyn Write, report: &BatchReport, color: ColorMode) -> std::io::Result<()> {
    let n = report.result.len();
    let line = format!("{n} segment{} sent to output", plural(n));
    if color.enabled() {
        writeln!(w, "{}", line.green())?;
    } else {
        writeln!(w, "{}", line)?;
    }

    let missing = report.missing_count();
    if missing > 0 {
        let notice = format!(
            "Not all sections were segmented: no bibliography found in {missing} document{}",
            plural(missing)
        );
        let ids = report
            .missing_bibliographies
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if color.enabled() {
            writeln!(w, "{}", notice.yellow())?;
            writeln!(w, "  {}", ids.dimmed())?;
        } else {
            writeln!(w, "{}", notice)?;
            writeln!(w, "  {}", ids)?;
        }
    }
    Ok(())
}

/// User-facing sentence for a failed run.
pub fn failure_message(err: &RunError) -> String {
    match err {
        RunError::EmptyInput => "Please enter one or many valid DOIs.".to_string(),
        RunError::ServiceUnreachable => {
            "Sci-Hub inaccessible - verify your connection or mirror URL".to_string()
        }
        RunError::DownloadFailed { identifier, detail } => {
            format!("Download failed for {identifier} ({detail}). Please verify the DOI or your connection")
        }
        RunError::MissingArtifact { identifier } => {
            format!("Download failed for {identifier}: no document was retrieved")
        }
        RunError::ExtractionFailed { identifier, detail } => {
            format!("Error occurred when reading PDF for {identifier}: {detail}")
        }
        other => other.to_string(),
    }
}
