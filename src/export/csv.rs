use std::io::Write;

use anyhow::Result;

use crate::trace::Tracer;

/// Export the current snapshot in CSV format
pub fn export_csv<W: Write>(tracer: &Tracer, mut writer: W) -> Result<()> {
    writeln!(
        writer,
        "ttl,target,loss_pct,sent,last_ms,avg_ms,best_ms,worst_ms,stdev_ms"
    )?;

    for hop in tracer.reports() {
        writeln!(
            writer,
            "{},\"{}\",{:.2},{},{:.2},{:.2},{:.2},{:.2},{:.2}",
            hop.ttl,
            hop.target,
            hop.loss_percent,
            hop.sent,
            hop.last_ms,
            hop.avg_ms,
            hop.best_ms,
            hop.worst_ms,
            hop.stdev_ms
        )?;
    }

    Ok(())
}
