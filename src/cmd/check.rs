use anyhow::Result;
use console::style;

use convoy::config::Config;
use convoy::session::{SessionManager, TROUBLESHOOTING_CHECKLIST};

/// Preflight: verify the external tool is installed and authenticated.
pub async fn execute(config: &Config) -> Result<()> {
    let manager = SessionManager::new(config.session_config());

    print!("Checking tool availability... ");
    match manager.check_availability().await {
        Ok(version) => println!("{} ({})", style("ok").green(), version),
        Err(err) => {
            println!("{}", style("failed").red());
            print_remediation(&err.to_string());
            return Err(err.into());
        }
    }

    print!("Checking authentication... ");
    match manager.check_authentication().await {
        Ok(()) => println!("{}", style("ok").green()),
        Err(err) => {
            println!("{}", style("failed").red());
            print_remediation(&err.to_string());
            return Err(err.into());
        }
    }

    println!("{} The tool is ready for orchestrated runs.", style("✓").green());
    Ok(())
}

fn print_remediation(error: &str) {
    eprintln!("\n{} {}", style("Error:").red().bold(), error);
    eprintln!("\nTroubleshooting:");
    for (i, step) in TROUBLESHOOTING_CHECKLIST.iter().enumerate() {
        eprintln!("  {}. {}", i + 1, step);
    }
}
