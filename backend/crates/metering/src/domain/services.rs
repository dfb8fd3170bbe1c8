//! Domain Services
//!
//! The outbound notification seam and the texts sent through it.

use crate::error::MeteringResult;

/// Notification channel for alerts
#[trait_variant::make(Notifier: Send)]
pub trait LocalNotifier {
    /// Send a new message and return its external id
    async fn send(&self, message: &str) -> MeteringResult<String>;

    /// Replace the content of a previously sent message
    async fn update(&self, external_message_id: &str, message: &str) -> MeteringResult<()>;
}

pub fn breach_message(key: &str) -> String {
    format!("🚨 Rate limit exceeded for {key}")
}

pub fn recovery_message(key: &str) -> String {
    format!("✅ Rate limit recovered for {key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_key() {
        assert!(breach_message("account:acme").ends_with("account:acme"));
        assert!(recovery_message("ip:9.9.9.9").contains("recovered"));
    }
}
