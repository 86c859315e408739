use anyhow::Result;
use console::style;

use convoy::config::Config;
use convoy::modes::machine::HistoryLog;

/// Print the recorded mode transition history.
pub fn execute(config: &Config) -> Result<()> {
    let log = HistoryLog::new(config.history_file.clone());
    let entries = log.entries()?;

    if entries.is_empty() {
        println!("No mode transitions recorded yet.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {} → {}  {}",
            style(entry.at.format("%Y-%m-%d %H:%M:%S").to_string()).dim(),
            entry.from,
            style(entry.to.to_string()).bold(),
            style(entry.reason).dim()
        );
    }
    Ok(())
}
