//! JSON report written to stdout.

use std::io::Write;

use anyhow::{Context, Result};
use rankfetch_core::{BatchResult, ErrorMetrics};
use serde::Serialize;
use serde_json::Value;

/// Process exit status derived from a run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Every requested page arrived.
    Complete,
    /// Some pages failed, the batch aborted, the run was cancelled, or the
    /// success rate fell below the threshold.
    Partial,
}

impl Outcome {
    pub(crate) fn of(result: &BatchResult<Value>) -> Self {
        if result.success && !result.is_partial() {
            Self::Complete
        } else {
            Self::Partial
        }
    }

    pub(crate) fn exit_code(self) -> u8 {
        match self {
            Self::Complete => 0,
            Self::Partial => 2,
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    result: &'a BatchResult<Value>,
    metrics: &'a ErrorMetrics,
}

/// Writes the result and metrics as one pretty-printed JSON document.
pub(crate) fn write_report(
    out: &mut impl Write,
    result: &BatchResult<Value>,
    metrics: &ErrorMetrics,
) -> Result<()> {
    let report = Report { result, metrics };
    serde_json::to_writer_pretty(&mut *out, &report).context("Failed to serialize report")?;
    writeln!(out).context("Failed to write report")?;
    Ok(())
}
