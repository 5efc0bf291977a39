//! Wall-clock helpers. The engine measures everything in milliseconds
//! since the Unix epoch so timestamps are trivially comparable and
//! serializable, matching the teacher crates' `SystemTime`-based timing
//! (no `chrono` dependency pulled in for this).

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_ish() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
