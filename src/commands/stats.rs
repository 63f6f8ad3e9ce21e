use super::{format_seconds, format_timestamp};
use crate::error::Result;
use crate::metrics::Equivalents;
use crate::platform::PlatformId;
use crate::store::{AggregateStore, PlatformAggregate, Snapshot, Totals};
use comfy_table::{CellAlignment, Table, presets};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct StatsReport<'a> {
    last_update: Option<i64>,
    platforms: Vec<PlatformRow<'a>>,
    totals: &'a Totals,
    equivalents: Equivalents,
}

#[derive(Serialize)]
struct PlatformRow<'a> {
    platform: &'a PlatformId,
    #[serde(flatten)]
    aggregate: &'a PlatformAggregate,
}

pub async fn run<S: AggregateStore>(store: &S, json: bool, csv: bool) -> Result<()> {
    let snapshot = store.snapshot().await?;
    let mut out = std::io::stdout().lock();
    if json {
        write_json(&mut out, &snapshot)
    } else if csv {
        write_csv(&mut out, &snapshot)
    } else {
        write_table(&mut out, &snapshot)
    }
}

/// Platforms by descending CO2, then id.
fn ranked(snapshot: &Snapshot) -> Vec<(&PlatformId, &PlatformAggregate)> {
    let mut rows: Vec<_> = snapshot.aggregates.iter().collect();
    rows.sort_by(|a, b| {
        b.1.cumulative_co2_grams
            .total_cmp(&a.1.cumulative_co2_grams)
            .then_with(|| a.0.cmp(b.0))
    });
    rows
}

fn write_table(out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
    if snapshot.aggregates.is_empty() {
        writeln!(out, "No AI queries recorded yet.")?;
        return Ok(());
    }

    if let Some(ts) = snapshot.last_update {
        writeln!(out, "# Last update: {}", format_timestamp(ts))?;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_HORIZONTAL_ONLY)
        .set_header(vec!["PLATFORM", "QUERIES", "TIME", "ENERGY (Wh)", "CO2 (g)", "WATER (ml)"]);

    for (_, agg) in ranked(snapshot) {
        table.add_row(vec![
            agg.display_name.clone(),
            agg.query_count.to_string(),
            format_seconds(agg.cumulative_seconds),
            format!("{:.3}", agg.cumulative_energy_kwh * 1000.0),
            format!("{:.3}", agg.cumulative_co2_grams),
            format!("{:.3}", agg.cumulative_water_ml),
        ]);
    }

    let t = &snapshot.totals;
    table.add_row(vec![
        "TOTAL".to_string(),
        t.query_count.to_string(),
        format_seconds(t.seconds),
        format!("{:.3}", t.energy_kwh * 1000.0),
        format!("{:.3}", t.co2_grams),
        format!("{:.3}", t.water_ml),
    ]);

    for i in 1..6 {
        if let Some(col) = table.column_mut(i) {
            col.set_cell_alignment(CellAlignment::Right);
        }
    }
    writeln!(out, "{table}")?;

    let eq = Equivalents::from_totals(t.energy_kwh, t.co2_grams);
    writeln!(
        out,
        "\n≈ {:.2} phone charges │ {:.3} km by car │ {:.4} tree-years to offset",
        eq.phones_charged, eq.km_driven, eq.tree_years
    )?;
    Ok(())
}

fn write_json(out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
    let report = StatsReport {
        last_update: snapshot.last_update,
        platforms: ranked(snapshot)
            .into_iter()
            .map(|(platform, aggregate)| PlatformRow { platform, aggregate })
            .collect(),
        totals: &snapshot.totals,
        equivalents: Equivalents::from_totals(snapshot.totals.energy_kwh, snapshot.totals.co2_grams),
    };
    serde_json::to_writer_pretty(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

fn write_csv(out: &mut impl Write, snapshot: &Snapshot) -> Result<()> {
    writeln!(
        out,
        "platform,display_name,query_count,seconds,energy_kwh,co2_grams,water_ml"
    )?;
    for (id, agg) in ranked(snapshot) {
        writeln!(
            out,
            "{},\"{}\",{},{:.3},{:.9},{:.6},{:.6}",
            id,
            agg.display_name.replace('"', "\"\""),
            agg.query_count,
            agg.cumulative_seconds,
            agg.cumulative_energy_kwh,
            agg.cumulative_co2_grams,
            agg.cumulative_water_ml
        )?;
    }
    Ok(())
}
