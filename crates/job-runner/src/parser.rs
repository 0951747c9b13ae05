//! Progress parsing for worker output

/// Extract a progress fraction from one line of worker stdout.
///
/// Recognized forms:
/// - `progress: 0.42` / `PROGRESS 0.42` (fraction)
/// - DataX summaries containing `Percentage 42.00%`
pub fn parse_progress(line: &str) -> Option<f64> {
    let line = line.trim();

    if let Some(idx) = line.find("Percentage") {
        let rest = line[idx + "Percentage".len()..].trim_start();
        let number = rest.split('%').next()?.trim();
        return number.parse::<f64>().ok().map(|p| p / 100.0);
    }

    let lower = line.to_ascii_lowercase();
    let rest = lower.strip_prefix("progress")?;
    let rest = rest.trim_start_matches([':', '=', ' ', '\t']);
    let value = rest.split_whitespace().next()?;
    value.parse::<f64>().ok()
}
