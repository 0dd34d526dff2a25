//! Skills system — SKILL.md instruction documents that teach the AI.
//!
//! Skills are directories containing a `SKILL.md` file with YAML frontmatter.
//! They are loaded from two locations (user overrides workspace):
//! 1. `~/.skynet/skills/` — user-level skills
//! 2. `{cwd}/.skynet/skills/` — workspace-level skills
//!
//! Each skill can declare requirements (binaries, env vars, OS) that gate
//! whether it's available. A compact index is injected into the system prompt
//! so the AI knows what skills exist; full detail is progressive disclosure
//! via three tools: `skills_categories`, `skills_list`, `skill_view`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{Tool, ToolResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// YAML frontmatter metadata for a skill.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires: SkillRequirements,
}

/// Optional gating requirements — all must pass for the skill to be available.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SkillRequirements {
    /// Binaries that must be on PATH (e.g. ["docker", "kubectl"]).
    #[serde(default)]
    pub bins: Vec<String>,
    /// Environment variables that must be set (e.g. ["GITHUB_TOKEN"]).
    #[serde(default)]
    pub env: Vec<String>,
    /// Allowed operating systems (e.g. ["macos", "linux"]). Empty = all.
    #[serde(default)]
    pub os: Vec<String>,
}

/// A fully loaded skill entry.
#[derive(Debug, Clone)]
pub struct SkillEntry {
    pub meta: SkillMeta,
    pub body: String,
    pub source: String,
    /// Directory the skill was loaded from — `skill_view`'s `file_path`
    /// resolves relative to this, for skills that link out to extra files.
    pub dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load all available skills from user and workspace directories.
///
/// User skills (`~/.skynet/skills/`) take priority — if the same name appears
/// in both locations, the user version wins.
pub fn load_skills() -> Vec<SkillEntry> {
    let mut seen = HashSet::new();
    let mut skills = Vec::new();

    // 1. User-level skills
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let user_dir = PathBuf::from(&home).join(".skynet/skills");
    load_from_dir(&user_dir, "user", &mut seen, &mut skills);

    // 2. Workspace-level skills (current working directory)
    if let Ok(cwd) = std::env::current_dir() {
        let ws_dir = cwd.join(".skynet/skills");
        if ws_dir != user_dir {
            load_from_dir(&ws_dir, "workspace", &mut seen, &mut skills);
        }
    }

    skills
}

fn load_from_dir(
    dir: &Path,
    source: &str,
    seen: &mut HashSet<String>,
    skills: &mut Vec<SkillEntry>,
) {
    if !dir.is_dir() {
        return;
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let skill_file = path.join("SKILL.md");
        if !skill_file.is_file() {
            continue;
        }

        let raw = match std::fs::read_to_string(&skill_file) {
            Ok(s) => s,
            Err(_) => continue,
        };

        let (meta, body) = match parse_skill_md(&raw) {
            Some(parsed) => parsed,
            None => {
                debug!(path = %skill_file.display(), "skipping skill: invalid frontmatter");
                continue;
            }
        };

        // Deduplicate by name — first wins (user > workspace).
        if seen.contains(&meta.name) {
            continue;
        }

        // Gate: check requirements.
        if !check_requirements(&meta.requires) {
            debug!(name = %meta.name, "skipping skill: requirements not met");
            continue;
        }

        seen.insert(meta.name.clone());
        skills.push(SkillEntry {
            meta,
            body,
            source: source.to_string(),
            dir: path,
        });
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a SKILL.md file: extract YAML frontmatter between `---` delimiters.
///
/// Returns `(SkillMeta, body)` where body is the markdown content after the
/// closing `---`.
pub fn parse_skill_md(content: &str) -> Option<(SkillMeta, String)> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return None;
    }

    // Find the closing `---`
    let after_first = &trimmed[3..];
    let closing_idx = after_first.find("\n---")?;
    let yaml_block = &after_first[..closing_idx];
    let body_start = closing_idx + 4; // skip "\n---"
    let body = if body_start < after_first.len() {
        after_first[body_start..]
            .trim_start_matches('\n')
            .to_string()
    } else {
        String::new()
    };

    let meta: SkillMeta = serde_yaml::from_str(yaml_block).ok()?;
    Some((meta, body))
}

// ---------------------------------------------------------------------------
// Requirement gating
// ---------------------------------------------------------------------------

fn check_requirements(req: &SkillRequirements) -> bool {
    // OS check
    if !req.os.is_empty() {
        let current_os = std::env::consts::OS;
        let matches = req.os.iter().any(|os| {
            let os_lower = os.to_lowercase();
            os_lower == current_os || (os_lower == "macos" && current_os == "macos")
        });
        if !matches {
            return false;
        }
    }

    // Env var check
    for var in &req.env {
        if std::env::var(var).is_err() {
            return false;
        }
    }

    // Binary check (PATH lookup)
    for bin in &req.bins {
        if which(bin).is_none() {
            return false;
        }
    }

    true
}

/// Simple PATH lookup for a binary name.
fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var("PATH").ok()?;
    for dir in path_var.split(':') {
        let candidate = Path::new(dir).join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Index formatting
// ---------------------------------------------------------------------------

/// Format a compact skill index for injection into the system prompt.
///
/// Example output:
/// ```text
/// ## Available skills (skills_list for details, skill_view for full instructions)
/// - gmail-setup: Set up Gmail push notifications [email,gmail,webhook]
/// - launchd-manage: Install/uninstall macOS auto-start [macos,launchd]
/// ```
pub fn format_skill_index(skills: &[SkillEntry]) -> String {
    if skills.is_empty() {
        return String::new();
    }

    let mut out =
        String::from("\n\n## Available skills (skills_list for details, skill_view for full instructions)\n");
    for skill in skills {
        let tags = if skill.meta.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", skill.meta.tags.join(","))
        };
        out.push_str(&format!(
            "- {}: {}{}\n",
            skill.meta.name, skill.meta.description, tags
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Progressive disclosure: skills_categories / skills_list / skill_view
// ---------------------------------------------------------------------------
//
// Three calls instead of the teacher's single compact-index-plus-skill_read:
// `skills_categories` surfaces the tag vocabulary, `skills_list` narrows to
// one category's metadata, `skill_view` returns the full SKILL.md body and,
// given `file_path`, a linked file inside the skill's directory.

/// List the distinct tags across all loaded skills.
pub struct SkillsCategoriesTool {
    skills: Vec<SkillEntry>,
}

impl SkillsCategoriesTool {
    pub fn new(skills: Vec<SkillEntry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SkillsCategoriesTool {
    fn name(&self) -> &str {
        "skills_categories"
    }

    fn description(&self) -> &str {
        "List the tag categories skills are grouped under. Call this first, then \
         `skills_list` with a category to narrow down, or with no category to see everything."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        let mut tags: Vec<&str> = self
            .skills
            .iter()
            .flat_map(|s| s.meta.tags.iter().map(String::as_str))
            .collect();
        tags.sort_unstable();
        tags.dedup();
        if tags.is_empty() {
            ToolResult::success("No tagged categories; use skills_list to see all skills.")
        } else {
            ToolResult::success(tags.join("\n"))
        }
    }
}

/// List skill metadata (name, description, tags), optionally filtered to one tag.
pub struct SkillsListTool {
    skills: Vec<SkillEntry>,
}

impl SkillsListTool {
    pub fn new(skills: Vec<SkillEntry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SkillsListTool {
    fn name(&self) -> &str {
        "skills_list"
    }

    fn description(&self) -> &str {
        "List skills with their description and tags, optionally filtered to one category \
         from `skills_categories`. Use `skill_view` to read a skill's full instructions."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "Restrict to skills tagged with this category. Omit to list all."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let category = input.get("category").and_then(|v| v.as_str());
        let matching: Vec<&SkillEntry> = self
            .skills
            .iter()
            .filter(|s| match category {
                Some(c) => s.meta.tags.iter().any(|t| t == c),
                None => true,
            })
            .collect();

        if matching.is_empty() {
            return ToolResult::success("No skills match.");
        }

        let mut out = String::new();
        for s in matching {
            out.push_str(&format!("- {}: {}", s.meta.name, s.meta.description));
            if !s.meta.tags.is_empty() {
                out.push_str(&format!(" [{}]", s.meta.tags.join(",")));
            }
            out.push('\n');
        }
        ToolResult::success(out.trim_end().to_string())
    }
}

/// Read a skill's full SKILL.md body, or a linked file inside its directory.
pub struct SkillViewTool {
    skills: Vec<SkillEntry>,
}

impl SkillViewTool {
    pub fn new(skills: Vec<SkillEntry>) -> Self {
        Self { skills }
    }
}

#[async_trait]
impl Tool for SkillViewTool {
    fn name(&self) -> &str {
        "skill_view"
    }

    fn description(&self) -> &str {
        "Read the full instructions for a skill by name. Skills are step-by-step \
         instruction documents (SKILL.md) that teach you how to handle specific tasks. \
         Pass `file_path` (relative to the skill's own directory) to read a file the \
         skill links out to instead of its SKILL.md body."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "The skill name to view (e.g. 'gmail-setup')."
                },
                "file_path": {
                    "type": "string",
                    "description": "Optional path, relative to the skill's directory, to a file it links to."
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let name = match input.get("name").and_then(|v| v.as_str()) {
            Some(n) if !n.trim().is_empty() => n.trim(),
            _ => return ToolResult::error("missing required parameter: name"),
        };

        let skill = match self.skills.iter().find(|s| s.meta.name == name) {
            Some(s) => s,
            None => {
                let available: Vec<&str> =
                    self.skills.iter().map(|s| s.meta.name.as_str()).collect();
                return ToolResult::error(format!(
                    "skill '{}' not found. Available: {}",
                    name,
                    available.join(", ")
                ));
            }
        };

        if let Some(rel) = input.get("file_path").and_then(|v| v.as_str()) {
            let candidate = skill.dir.join(rel);
            // Refuse to walk outside the skill's own directory.
            let canonical_dir = skill.dir.canonicalize().ok();
            let canonical_file = candidate.canonicalize().ok();
            match (canonical_dir, canonical_file) {
                (Some(dir), Some(file)) if file.starts_with(&dir) => match std::fs::read_to_string(&file) {
                    Ok(content) => return ToolResult::success(content),
                    Err(e) => return ToolResult::error(format!("failed to read {}: {e}", rel)),
                },
                _ => return ToolResult::error(format!("'{}' is not a file inside this skill", rel)),
            }
        }

        let mut out = format!("# Skill: {}\n", skill.meta.name);
        out.push_str(&format!("> {}\n", skill.meta.description));
        if !skill.meta.tags.is_empty() {
            out.push_str(&format!("> Tags: {}\n", skill.meta.tags.join(", ")));
        }
        out.push_str(&format!("> Source: {}\n\n", skill.source));
        out.push_str(&skill.body);
        ToolResult::success(out)
    }
}
