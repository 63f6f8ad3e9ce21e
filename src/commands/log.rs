use super::format_timestamp;
use crate::error::Result;
use crate::store::AggregateStore;

pub async fn run<S: AggregateStore>(store: &S) -> Result<()> {
    let entries = store.diagnostic_log().await?;
    if entries.is_empty() {
        println!("Diagnostic log is empty.");
        return Ok(());
    }
    for entry in entries {
        println!("{}  {}", format_timestamp(entry.timestamp), entry.message);
    }
    Ok(())
}
