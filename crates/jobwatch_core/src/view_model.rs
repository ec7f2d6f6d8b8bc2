#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BarStyle {
    #[default]
    Active,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressView {
    pub stage: Option<String>,
    pub pct: f64,
    pub highlight_index: Option<usize>,
    /// `done/total · throughput · ETA`, whichever parts are known.
    pub detail: Option<String>,
    pub tip: Option<String>,
    pub repo: Option<String>,
    pub style: BarStyle,
}

/// Formats seconds as `42s`, `3m 05s` or `1h 02m`.
pub fn format_eta(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::format_eta;

    #[test]
    fn eta_picks_the_two_largest_units() {
        assert_eq!(format_eta(42.4), "42s");
        assert_eq!(format_eta(185.0), "3m 05s");
        assert_eq!(format_eta(3720.0), "1h 02m");
        assert_eq!(format_eta(f64::NAN), "0s");
    }
}
