//! Allowlist enforcement for the Slack adapter.
//!
//! Deny-by-default: an empty `allow_users` list means no one is allowed.
//! Wildcard `"*"` allows everyone. Entries are matched against the Slack
//! user ID (e.g. `"U0123ABCD"`) — Slack has no stable username equivalent
//! to Telegram's `@handle`.

/// Returns `true` when the given Slack user is permitted to interact with the bot.
pub fn is_allowed(allow_users: &[String], user_id: &str) -> bool {
    if allow_users.is_empty() {
        return false;
    }
    allow_users.iter().any(|entry| entry == "*" || entry == user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_denies_all() {
        assert!(!is_allowed(&[], "U111"));
    }

    #[test]
    fn wildcard_allows_all() {
        let list = vec!["*".to_string()];
        assert!(is_allowed(&list, "U999"));
    }

    #[test]
    fn match_by_user_id() {
        let list = vec!["U123".to_string()];
        assert!(is_allowed(&list, "U123"));
        assert!(!is_allowed(&list, "U456"));
    }
}
