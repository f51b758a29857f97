use async_trait::async_trait;

use crate::error::ProcessorError;

/// Status string the processor returns for a settled capture. Compared
/// case-insensitively.
pub const CAPTURE_COMPLETED: &str = "COMPLETED";

pub fn is_capture_completed(status: &str) -> bool {
    status.eq_ignore_ascii_case(CAPTURE_COMPLETED)
}

/// The external processor, reduced to the two phases the core needs.
/// Calls are single-shot; retries belong to the caller.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Reserve `amount_cents` and return the processor's payment reference.
    async fn authorize(&self, amount_cents: i64, currency: &str) -> Result<String, ProcessorError>;

    /// Collect a previously authorized payment and return the raw status.
    async fn capture(&self, reference: &str) -> Result<String, ProcessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_status_is_case_insensitive() {
        assert!(is_capture_completed("COMPLETED"));
        assert!(is_capture_completed("completed"));
        assert!(is_capture_completed("Completed"));
        assert!(!is_capture_completed("PENDING"));
        assert!(!is_capture_completed("COMPLETED "));
    }
}
