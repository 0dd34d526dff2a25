//! Channel directory — operator-facing resolver from a human-readable name
//! to a platform chat_id, e.g. `"discord:bot-home"` or `"slack:engineering"`.
//!
//! Entries are registered passively as channel adapters observe chat/guild
//! names (a Discord channel name, a Slack channel name, ...) and are
//! consulted by `/sethome`-style commands and `send_message` calls that take
//! a human name instead of a raw chat_id. Backed by a JSON file under
//! `~/.skynet/`, same idiom as [`crate::home`] — registration is rare and
//! resolution is off the hot path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    platform: String,
    chat_id: String,
    name: String,
    guild: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Directory {
    /// Keyed by `"{platform}:{chat_id}"` — at most one name per chat.
    entries: HashMap<String, Entry>,
}

fn store_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".skynet/channel_directory.json")
}

/// Record (or update) the human-readable name for a `(platform, chat_id)`.
/// `guild` disambiguates same-named channels across Discord guilds.
pub fn register(platform: &str, chat_id: &str, name: &str, guild: Option<&str>) -> Result<()> {
    let path = store_path();
    let mut dir = load(&path);
    dir.entries.insert(
        format!("{platform}:{chat_id}"),
        Entry {
            platform: platform.to_string(),
            chat_id: chat_id.to_string(),
            name: name.to_string(),
            guild: guild.map(str::to_string),
        },
    );
    save(&path, &dir)
}

/// Resolve `"platform:human_name"` to a chat_id.
///
/// Match order: case-insensitive exact name match, then guild-qualified
/// match (`name` prefixed with `guild/`), then unambiguous prefix match.
/// An ambiguous prefix match (more than one candidate) returns `None`.
pub fn resolve(query: &str) -> Option<String> {
    resolve_in(&load(&store_path()), query)
}

fn resolve_in(dir: &Directory, query: &str) -> Option<String> {
    let (platform, human_name) = query.split_once(':')?;
    let candidates: Vec<&Entry> = dir
        .entries
        .values()
        .filter(|e| e.platform.eq_ignore_ascii_case(platform))
        .collect();

    if let Some(e) = candidates
        .iter()
        .find(|e| e.name.eq_ignore_ascii_case(human_name))
    {
        return Some(e.chat_id.clone());
    }

    if let Some((guild, name)) = human_name.split_once('/') {
        if let Some(e) = candidates.iter().find(|e| {
            e.name.eq_ignore_ascii_case(name)
                && e.guild.as_deref().is_some_and(|g| g.eq_ignore_ascii_case(guild))
        }) {
            return Some(e.chat_id.clone());
        }
    }

    let prefix_matches: Vec<&&Entry> = candidates
        .iter()
        .filter(|e| e.name.to_lowercase().starts_with(&human_name.to_lowercase()))
        .collect();
    match prefix_matches.as_slice() {
        [only] => Some(only.chat_id.clone()),
        _ => None,
    }
}

fn load(path: &Path) -> Directory {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn save(path: &Path, dir: &Directory) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(dir)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Directory {
        let mut d = Directory::default();
        d.entries.insert(
            "discord:100".to_string(),
            Entry {
                platform: "discord".to_string(),
                chat_id: "100".to_string(),
                name: "bot-home".to_string(),
                guild: Some("acme".to_string()),
            },
        );
        d.entries.insert(
            "discord:200".to_string(),
            Entry {
                platform: "discord".to_string(),
                chat_id: "200".to_string(),
                name: "bot-standby".to_string(),
                guild: Some("acme".to_string()),
            },
        );
        d.entries.insert(
            "discord:300".to_string(),
            Entry {
                platform: "discord".to_string(),
                chat_id: "300".to_string(),
                name: "bot-home".to_string(),
                guild: Some("other-guild".to_string()),
            },
        );
        d
    }

    #[test]
    fn exact_case_insensitive_match() {
        let resolved = resolve_in(&seeded(), "discord:BOT-STANDBY");
        assert_eq!(resolved, Some("200".to_string()));
    }

    #[test]
    fn guild_qualified_match() {
        let resolved = resolve_in(&seeded(), "discord:other-guild/bot-home");
        assert_eq!(resolved, Some("300".to_string()));
    }

    #[test]
    fn unambiguous_prefix_match() {
        let resolved = resolve_in(&seeded(), "discord:bot-stand");
        assert_eq!(resolved, Some("200".to_string()));
    }

    #[test]
    fn ambiguous_prefix_returns_none() {
        let resolved = resolve_in(&seeded(), "discord:bot-");
        assert_eq!(resolved, None);
    }

    #[test]
    fn unknown_platform_returns_none() {
        let resolved = resolve_in(&seeded(), "slack:bot-home");
        assert_eq!(resolved, None);
    }

    #[test]
    fn register_then_resolve_roundtrips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel_directory.json");
        let mut d = Directory::default();
        d.entries.insert(
            "telegram:42".to_string(),
            Entry {
                platform: "telegram".to_string(),
                chat_id: "42".to_string(),
                name: "ops".to_string(),
                guild: None,
            },
        );
        save(&path, &d).unwrap();
        let reloaded = load(&path);
        assert_eq!(resolve_in(&reloaded, "telegram:ops"), Some("42".to_string()));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");
        assert!(load(&path).entries.is_empty());
    }
}
