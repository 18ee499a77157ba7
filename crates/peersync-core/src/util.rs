//! Shared utility functions used across multiple modules.

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `type/id` label used in log lines and error messages.
pub fn resource_label(resource_type: &str, resource_id: &str) -> String {
    format!("{resource_type}/{resource_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn resource_label_joins_type_and_id() {
        assert_eq!(resource_label("member", "m_1"), "member/m_1");
    }
}
