use super::format_timestamp;
use crate::error::Result;
use crate::store::AggregateStore;

pub async fn run<S: AggregateStore>(store: &S, limit: Option<usize>) -> Result<()> {
    let history = store.history().await?;
    if history.is_empty() {
        println!("No requests recorded yet.");
        return Ok(());
    }

    let skip = limit.map_or(0, |n| history.len().saturating_sub(n));

    println!(
        "{:<19}  {:<12} {:>9} {:>10} {:>9} {:>9}  {}",
        "TIME", "PLATFORM", "DURATION", "ENERGY(Wh)", "CO2(g)", "WATER(ml)", "URL"
    );
    println!("{}", "-".repeat(100));
    for h in history.iter().skip(skip) {
        println!(
            "{:<19}  {:<12} {:>8.1}s {:>10.4} {:>9.4} {:>9.4}  {}",
            format_timestamp(h.timestamp),
            h.platform,
            h.duration_ms as f64 / 1000.0,
            h.energy_kwh * 1000.0,
            h.co2_grams,
            h.water_ml,
            h.url
        );
    }
    Ok(())
}
