use anyhow::Result;
use console::style;

use convoy::modes::Mode;

/// Print every workflow mode with its policy bundle.
pub fn execute() -> Result<()> {
    for mode in Mode::ALL {
        let profile = mode.profile();
        println!(
            "{} {} — {}",
            profile.icon,
            style(profile.name).bold(),
            style(profile.summary).dim()
        );
        println!("  {}", style("self-checks:").underlined());
        for question in profile.guard_questions {
            println!("    - {}", question);
        }
        println!("  {}", style("allowed:").underlined());
        for action in profile.allowed_actions {
            println!("    - {}", action);
        }
        println!("  {}", style("forbidden:").underlined());
        for action in profile.forbidden_actions {
            println!("    - {}", action);
        }
        let next: Vec<&str> = profile
            .recommended_next
            .iter()
            .map(|m| m.profile().name)
            .collect();
        println!("  {} {}", style("next:").underlined(), next.join(", "));
        println!();
    }
    Ok(())
}
