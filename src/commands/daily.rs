use crate::error::Result;
use crate::store::{AggregateStore, DailyStat};
use std::io::Write;

pub async fn run<S: AggregateStore>(store: &S, days: usize, json: bool) -> Result<()> {
    let stats = store.daily_stats(days).await?;
    let mut out = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &stats)?;
        writeln!(out)?;
        return Ok(());
    }
    write_table(&mut out, &stats)
}

fn write_table(out: &mut impl Write, stats: &[DailyStat]) -> Result<()> {
    if stats.is_empty() {
        writeln!(out, "No daily statistics yet.")?;
        return Ok(());
    }

    writeln!(
        out,
        "{:<10}  {:<14} {:>8} {:>12} {:>10} {:>11}",
        "DAY", "PLATFORM", "QUERIES", "ENERGY (Wh)", "CO2 (g)", "WATER (ml)"
    )?;
    writeln!(out, "{}", "-".repeat(70))?;

    let mut current_day: Option<&str> = None;
    for s in stats {
        // Print each day once
        let day = if current_day == Some(s.day.as_str()) {
            ""
        } else {
            current_day = Some(&s.day);
            s.day.as_str()
        };
        writeln!(
            out,
            "{:<10}  {:<14} {:>8} {:>12.3} {:>10.3} {:>11.3}",
            day,
            s.platform,
            s.query_count,
            s.energy_kwh * 1000.0,
            s.co2_grams,
            s.water_ml
        )?;
    }
    Ok(())
}
