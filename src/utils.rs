use std::collections::BTreeSet;

/// Build the canonical pool: `1..=size` rendered as zero-padded decimal
/// strings of `width` digits (values wider than `width` are left unpadded).
pub fn canonical_pool(size: u32, width: usize) -> BTreeSet<String> {
    (1..=size).map(|i| format!("{:0width$}", i, width = width)).collect()
}

/// Trim scanner input. Returns `None` when nothing is left to verify.
pub fn normalize_serial(raw: &str) -> Option<&str> {
    let t = raw.trim();
    if t.is_empty() { None } else { Some(t) }
}
