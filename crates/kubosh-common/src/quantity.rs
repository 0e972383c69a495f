//! Resource quantity parsing
//!
//! BPM limits are free-form strings. A value that is not a valid Kubernetes
//! quantity is treated as unset rather than failing the compilation.

use tracing::debug;

const MEMORY_SUFFIXES: [&str; 12] = [
    "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P", "E",
];

/// Parse a CPU quantity (e.g., "100m", "1", "0.5")
pub fn parse_cpu(qty: &str) -> Option<String> {
    let qty = qty.trim();
    let is_valid = if let Some(stripped) = qty.strip_suffix('m') {
        stripped.parse::<u64>().is_ok()
    } else {
        qty.parse::<f64>().is_ok_and(|v| v.is_finite() && v >= 0.0)
    };
    accept(qty, is_valid, "cpu")
}

/// Parse a memory quantity (e.g., "128Mi", "1G", "1000000")
pub fn parse_memory(qty: &str) -> Option<String> {
    let qty = qty.trim();
    let is_valid = if let Some(suffix) = MEMORY_SUFFIXES.iter().find(|s| qty.ends_with(*s)) {
        let prefix = &qty[..qty.len() - suffix.len()];
        prefix.parse::<u64>().is_ok()
            || prefix.parse::<f64>().is_ok_and(|v| v.is_finite() && v >= 0.0)
    } else {
        qty.parse::<u64>().is_ok()
    };
    accept(qty, is_valid, "memory")
}

fn accept(qty: &str, is_valid: bool, resource: &str) -> Option<String> {
    if is_valid {
        Some(qty.to_string())
    } else {
        debug!(quantity = %qty, resource, "ignoring unparsable quantity");
        None
    }
}
