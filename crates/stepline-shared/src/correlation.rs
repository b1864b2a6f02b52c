//! Correlation Ids
//!
//! Opaque ids of the form `tsk_<epoch>_<rand>` that stitch together one
//! task's activity across coordinator passes, executor batches, and event
//! payloads. Every structured log line in the execution path carries one.

/// Generate a fresh correlation id.
pub fn new_correlation_id() -> String {
    format!(
        "tsk_{}_{:08x}",
        chrono::Utc::now().timestamp(),
        fastrand::u32(..)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_have_the_expected_shape() {
        let id = new_correlation_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "tsk");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn correlation_ids_are_unique_enough() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
    }
}
