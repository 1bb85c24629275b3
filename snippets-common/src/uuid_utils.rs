//! UUID utilities

use uuid::Uuid;

/// Fresh correlation token for host requests
///
/// 122 random bits in lowercase hex with no separators, so it survives any
/// transport that round-trips plain strings.
pub fn correlation_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_correlation_id_format() {
        let id = correlation_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_correlation_ids_do_not_repeat() {
        let ids: HashSet<String> = (0..1000).map(|_| correlation_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
