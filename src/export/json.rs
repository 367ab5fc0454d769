use std::io::Write;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::state::HopReport;
use crate::trace::Tracer;

/// Full snapshot document: one entry per discovered TTL, ordered by TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    pub destination: String,
    pub source: String,
    pub hops: Vec<HopReport>,
}

impl TraceReport {
    pub fn new(tracer: &Tracer) -> Self {
        Self {
            destination: tracer.destination().to_string(),
            source: tracer.source().to_string(),
            hops: tracer.reports(),
        }
    }
}

/// Export the current snapshot as pretty-printed JSON
pub fn export_json<W: Write>(tracer: &Tracer, mut writer: W) -> Result<()> {
    let report = TraceReport::new(tracer);
    serde_json::to_writer_pretty(&mut writer, &report)?;
    writeln!(writer)?;
    Ok(())
}
