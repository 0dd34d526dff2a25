//! `/hermes` slash command text mapping — translates Slack's single
//! registered command plus a subcommand word into the normalized `/<verb>
//! [args]` form every adapter feeds to the shared slash handler.

/// Map the text following `/hermes` to a canonical slash command.
///
/// `/hermes new` → `/new`, `/hermes model opus` → `/model opus`, a bare
/// `/hermes <question>` is treated as a regular message, and an empty
/// invocation defaults to `/help`.
pub fn normalize(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "/help".to_string();
    }

    let mut parts = text.splitn(2, char::is_whitespace);
    let first_word = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    let verb = match first_word {
        "new" | "reset" => Some("/reset"),
        "status" => Some("/status"),
        "stop" => Some("/stop"),
        "help" => Some("/help"),
        "model" => Some("/model"),
        "personality" => Some("/personality"),
        "retry" => Some("/retry"),
        "undo" => Some("/undo"),
        _ => None,
    };

    match verb {
        Some(v) if rest.is_empty() => v.to_string(),
        Some(v) => format!("{v} {rest}"),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_defaults_to_help() {
        assert_eq!(normalize(""), "/help");
        assert_eq!(normalize("   "), "/help");
    }

    #[test]
    fn bare_subcommand_maps_without_args() {
        assert_eq!(normalize("new"), "/reset");
        assert_eq!(normalize("reset"), "/reset");
        assert_eq!(normalize("status"), "/status");
    }

    #[test]
    fn subcommand_with_args_preserves_them() {
        assert_eq!(normalize("model opus"), "/model opus");
        assert_eq!(normalize("personality grumpy"), "/personality grumpy");
    }

    #[test]
    fn unrecognized_text_is_treated_as_a_question() {
        assert_eq!(normalize("what time is it?"), "what time is it?");
    }
}
