use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::store::AggregateStore;
use std::io::{BufRead, Write};

/// Ask on stderr, read the answer from stdin.
pub fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub async fn run<S: AggregateStore>(aggregator: &MetricsAggregator<S>) -> Result<()> {
    aggregator.reset().await?;
    println!("All statistics cleared.");
    Ok(())
}
