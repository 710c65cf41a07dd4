//! Byte-count formatting and parsing for workshop item sizes.

/// Formats a byte count with two decimals, rolling to the next unit at
/// exactly 1024 (1536 -> "1.50 KB").
pub fn format_bytes(size_in_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size_in_bytes as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} {}", UNITS[UNITS.len() - 1])
}

/// Formats an instantaneous throughput, units B/s through GB/s.
pub fn format_speed(bytes_per_sec: u64) -> String {
    let value = bytes_per_sec as f64;
    if bytes_per_sec < 1024 {
        format!("{value:.2} B/s")
    } else if bytes_per_sec < 1024 * 1024 {
        format!("{:.2} KB/s", value / 1024.0)
    } else if bytes_per_sec < 1024 * 1024 * 1024 {
        format!("{:.2} MB/s", value / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB/s", value / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Parses the declared size shown on a workshop page, e.g. "140,704.886 MB".
/// Thousands separators are stripped; the value is megabytes.
pub fn parse_size_text(text: &str) -> Option<u64> {
    let cleaned = text.trim().replace(',', "");
    let megabytes = cleaned.strip_suffix(" MB").or_else(|| cleaned.strip_suffix("MB"))?;
    let megabytes = megabytes.trim().parse::<f64>().ok()?;
    if !megabytes.is_finite() || megabytes < 0.0 {
        return None;
    }
    Some((megabytes * 1024.0 * 1024.0) as u64)
}
