//! Shared utility functions for the convoy crate.

/// Truncate text to at most `max` characters for log and report excerpts,
/// collapsing newlines so the excerpt stays on one line.
pub fn truncate_excerpt(text: &str, max: usize) -> String {
    let flat = text.trim().replace(['\n', '\r'], " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{}…", cut.trim_end())
}

/// Render a duration as a short human-readable string (e.g. "2m 05s").
pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{}s", secs, d.subsec_millis() / 100)
    } else {
        format!("{}ms", d.as_millis())
    }
}
