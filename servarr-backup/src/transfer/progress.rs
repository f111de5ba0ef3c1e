//! Human-readable download progress.

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// "1.50 MB of 3.00 MB (50%)", or just the amount when the server sent no length
pub fn describe_progress(downloaded: u64, total: Option<u64>) -> String {
    match total {
        Some(total) if total > 0 => {
            let percent = ((downloaded as f64 / total as f64) * 100.0).min(100.0);
            format!(
                "{} of {} ({:.0}%)",
                format_bytes(downloaded),
                format_bytes(total),
                percent
            )
        }
        _ => format_bytes(downloaded),
    }
}
