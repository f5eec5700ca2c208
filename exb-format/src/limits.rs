//! Decode-side resource limits

/// Limits guarding decode against pathological or adversarial streams.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum cumulative bytes buffered for skipped shared objects
    /// (default: unbounded).
    pub max_shared_buffer_bytes: usize,
    /// Maximum length in bytes of a polymorphic type name (default: 4 KiB).
    pub max_polymorphic_name_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_shared_buffer_bytes: usize::MAX,
            max_polymorphic_name_len: 4 * 1024,
        }
    }
}
