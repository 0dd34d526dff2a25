//! Home-channel registry — `/sethome` marks a chat as the fallback delivery
//! target for a platform, used by cron jobs and `send_message` calls that
//! don't specify an explicit chat_id.
//!
//! Backed by a small JSON file under `~/.skynet/`; reads and writes go
//! through disk rather than a cache since `/sethome` is rare and lookups
//! are off the hot path (only consulted when a delivery has no explicit
//! target).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Default, Serialize, Deserialize)]
struct HomeChannels(HashMap<String, String>);

fn store_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".skynet/home_channels.json")
}

/// Mark `chat_id` as the home channel for `platform`.
pub fn set_home(platform: &str, chat_id: &str) -> Result<()> {
    let path = store_path();
    let mut map = load(&path);
    map.0.insert(platform.to_string(), chat_id.to_string());
    save(&path, &map)
}

/// Look up the home channel for `platform`, if one was ever set.
pub fn get_home(platform: &str) -> Option<String> {
    load(&store_path()).0.get(platform).cloned()
}

fn load(path: &Path) -> HomeChannels {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn save(path: &Path, map: &HomeChannels) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(map)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("home_channels.json");

        let mut map = HomeChannels::default();
        map.0.insert("discord".to_string(), "12345".to_string());
        save(&path, &map).unwrap();

        let loaded = load(&path);
        assert_eq!(loaded.0.get("discord"), Some(&"12345".to_string()));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");
        assert!(load(&path).0.is_empty());
    }
}
