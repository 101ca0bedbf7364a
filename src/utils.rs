const BYTE_UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

pub fn pretty_bytes_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, BYTE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_binary_units() {
        assert_eq!(pretty_bytes_size(0), "0 B");
        assert_eq!(pretty_bytes_size(1023), "1023 B");
        assert_eq!(pretty_bytes_size(1024), "1.00 KiB");
        assert_eq!(pretty_bytes_size(1536), "1.50 KiB");
        assert_eq!(pretty_bytes_size(64 * 1024 * 1024), "64.00 MiB");
        assert_eq!(pretty_bytes_size(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }
}
