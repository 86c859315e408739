use anyhow::Result;
use console::style;

use convoy::assess::ProjectAssessor;
use convoy::config::Config;

/// Assess the project tree and print the recommended workflow mode.
pub fn execute(config: &Config, json: bool) -> Result<()> {
    let recommendation = ProjectAssessor::with_defaults().assess(&config.project_dir);

    if json {
        println!("{}", serde_json::to_string_pretty(&recommendation)?);
        return Ok(());
    }

    let profile = recommendation.mode.profile();

    println!(
        "{} Recommended mode: {} {} ({}% confidence)",
        style("»").cyan(),
        profile.icon,
        style(profile.name).bold(),
        recommendation.confidence
    );
    println!("  {}", style(profile.summary).dim());

    println!("\n{}", style("Reasoning:").bold());
    for line in &recommendation.reasoning {
        println!("  - {}", line);
    }

    if !recommendation.alternatives.is_empty() {
        let alternatives: Vec<&str> = recommendation
            .alternatives
            .iter()
            .map(|m| m.profile().name)
            .collect();
        println!(
            "\n{} {}",
            style("Alternatives:").bold(),
            alternatives.join(", ")
        );
    }

    println!(
        "\nRun {} to start, or {} to pick another mode.",
        style(format!("convoy run --mode {}", profile.name.to_lowercase())).green(),
        style("convoy modes").green()
    );
    Ok(())
}
