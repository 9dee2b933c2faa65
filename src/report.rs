use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::types::ScanSummary;

/// Human-readable report printed by the CLI.
pub struct TextReport<'a>(pub &'a ScanSummary);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;
        writeln!(f, "\nScan Results for {}:", summary.target)?;
        writeln!(
            f,
            "Scanned ports {}-{} in {:.2} seconds",
            summary.start_port,
            summary.end_port,
            summary.elapsed.as_secs_f64()
        )?;
        writeln!(
            f,
            "Found {} open ports out of {} total ports\n",
            summary.open_ports.len(),
            summary.total_ports
        )?;

        if summary.open_ports.is_empty() {
            return writeln!(f, "No open ports found.");
        }

        let port_w = "PORT".len().max(5);
        let service_w = summary
            .open_ports
            .iter()
            .map(|r| r.service.len())
            .fold("SERVICE".len(), usize::max);

        writeln!(f, "Open ports:")?;
        writeln!(f, "{:<port_w$}  {:<service_w$}  STATE", "PORT", "SERVICE")?;
        writeln!(f, "{:-<port_w$}  {:-<service_w$}  {:-<5}", "", "", "")?;
        for r in &summary.open_ports {
            writeln!(f, "{:<port_w$}  {:<service_w$}  open", r.port, r.service)?;
        }
        Ok(())
    }
}

pub fn render_text(summary: &ScanSummary) -> String {
    TextReport(summary).to_string()
}

pub fn render_json(summary: &ScanSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize scan summary")
}

/// Write the summary as pretty JSON to `path`, replacing any existing file.
pub fn write_json(path: &Path, summary: &ScanSummary) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create output file: {}", path.display()))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut w, summary)
        .with_context(|| format!("failed to write JSON to {}", path.display()))?;
    w.flush()
        .with_context(|| format!("failed to write JSON to {}", path.display()))?;
    Ok(())
}
