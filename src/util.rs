use bytesize::ByteSize;

/// Formats a byte count for display, e.g. `1.5 MiB`
pub fn human_size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}

/// Formats an ETA as `1h 2m 3s`, `2m 3s` or `3s`; `-` when unknown or
/// nothing is left
pub fn format_eta(seconds: Option<f64>) -> String {
    let total = match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => s.round() as u64,
        _ => 0,
    };
    if total == 0 {
        return "-".to_string();
    }

    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    match (hours, minutes) {
        (0, 0) => format!("{secs}s"),
        (0, _) => format!("{minutes}m {secs}s"),
        _ => format!("{hours}h {minutes}m {secs}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_formats() {
        assert_eq!(format_eta(None), "-");
        assert_eq!(format_eta(Some(f64::INFINITY)), "-");
        assert_eq!(format_eta(Some(0.0)), "-");
        assert_eq!(format_eta(Some(0.4)), "-");
        assert_eq!(format_eta(Some(3.2)), "3s");
        assert_eq!(format_eta(Some(123.0)), "2m 3s");
        assert_eq!(format_eta(Some(3723.0)), "1h 2m 3s");
        assert_eq!(format_eta(Some(3600.0)), "1h 0m 0s");
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(human_size(0), "0 B");
        assert!(human_size(2048).contains("KiB"), "{}", human_size(2048));
    }
}
