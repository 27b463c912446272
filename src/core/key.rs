//! Fixed-width benchmark keys.

/// Width of every key written or looked up by the harness.
pub const KEY_SIZE: usize = 16;

/// Format `k` as a zero-padded decimal of `KEY_SIZE` digits, so that
/// lexicographic order of keys equals numeric order of `k`.
pub fn format_key(k: u64) -> String {
    format!("{:0width$}", k, width = KEY_SIZE)
}
