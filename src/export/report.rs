use std::io::Write;

use anyhow::Result;

use crate::lookup::ReverseResolver;
use crate::trace::Tracer;

/// Generate a text report similar to mtr --report
pub fn generate_report<W: Write>(
    tracer: &Tracer,
    resolver: &dyn ReverseResolver,
    mut writer: W,
) -> Result<()> {
    writeln!(
        writer,
        "hopstat report for {} ({})",
        tracer.config().destination,
        tracer.destination()
    )?;
    writeln!(
        writer,
        "Started: {}",
        tracer.started_at().format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(writer)?;

    // Header
    writeln!(
        writer,
        "{:>3}  {:<40} {:>6} {:>5} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "#", "Host", "Loss%", "Snt", "Last", "Avg", "Best", "Wrst", "StDev"
    )?;
    writeln!(writer, "{}", "-".repeat(110))?;

    for hop in tracer.reports() {
        let hosts = tracer.resolve_names(hop.ttl, resolver);
        let host = if hosts.is_empty() {
            "???".to_string()
        } else {
            hosts.join(", ")
        };

        writeln!(
            writer,
            "{:>3}  {:<40} {:>5.1}% {:>5} {:>7.1}ms {:>7.1}ms {:>7.1}ms {:>7.1}ms {:>7.1}ms",
            hop.ttl,
            host,
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
