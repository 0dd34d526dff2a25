//! `patch` tool — surgical file edits in two modes.
//!
//! `mode: "replace"` mirrors the Edit tool used by Claude Code: the caller
//! sends only the exact text to find and its replacement. `mode: "patch"`
//! accepts a V4A-style unified-diff dialect (`*** Begin Patch` / `*** Update
//! File: path` / `@@` hunks of ` `/`-`/`+` prefixed lines / `*** End Patch`),
//! letting one call touch several files and several regions of each in one
//! shot. Both modes write atomically via a temp file + rename.

use async_trait::async_trait;

use super::{Tool, ToolResult};

pub struct PatchFileTool;

#[async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &str {
        "patch"
    }

    fn description(&self) -> &str {
        "Make a surgical edit to one or more files. Two modes: \
         mode='replace' (default) replaces an exact old_string with new_string in one file — \
         prefer this for a single small change, it's cheap and safe. \
         mode='patch' applies a unified-diff-style patch (patch field, V4A dialect: \
         '*** Begin Patch' / '*** Update File: <path>' / '*** Add File: <path>' / \
         '*** Delete File: <path>' sections, '@@' hunk markers, lines prefixed ' '/'-'/'+' \
         for context/removed/added) — use this when a change spans multiple files or \
         multiple disjoint regions of one file."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "mode": {
                    "type": "string",
                    "enum": ["replace", "patch"],
                    "description": "'replace' (default) for a single old/new string swap; 'patch' for a V4A-style multi-file diff."
                },
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to edit. Required for mode='replace'."
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to find. Must appear in the file. Copy it verbatim from read_file output — including indentation and newlines. Required for mode='replace'."
                },
                "new_string": {
                    "type": "string",
                    "description": "Text to replace old_string with. Use an empty string to delete old_string. Required for mode='replace'."
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of just the first. Default false. Only used by mode='replace'."
                },
                "patch": {
                    "type": "string",
                    "description": "V4A-style diff text. Required for mode='patch'."
                }
            }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let mode = input.get("mode").and_then(|v| v.as_str()).unwrap_or("replace");
        match mode {
            "replace" => execute_replace(&input),
            "patch" => execute_v4a(&input),
            other => ToolResult::error(format!(
                "unknown mode '{other}'. Use 'replace' or 'patch'."
            )),
        }
    }
}

fn execute_replace(input: &serde_json::Value) -> ToolResult {
    let path = match input.get("path").and_then(|v| v.as_str()) {
        Some(p) => p.to_string(),
        None => return ToolResult::error("missing required parameter: path"),
    };
    let old = match input.get("old_string").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => return ToolResult::error("missing required parameter: old_string"),
    };
    let new = match input.get("new_string").and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => return ToolResult::error("missing required parameter: new_string"),
    };
    let replace_all = input
        .get("replace_all")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    // Read current content.
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => return ToolResult::error(format!("failed to read '{}': {}", path, e)),
    };

    // Verify old_string exists and is unambiguous when replace_all=false.
    let count = content.matches(old.as_str()).count();
    if count == 0 {
        return ToolResult::error(format!(
            "old_string not found in '{}'. Use read_file first and copy the text verbatim.",
            path
        ));
    }
    if !replace_all && count > 1 {
        return ToolResult::error(format!(
            "old_string matches {} times in '{}'. \
             Add more surrounding context to make it unique, or set replace_all=true.",
            count, path
        ));
    }

    // Apply replacement.
    let updated = if replace_all {
        content.replace(old.as_str(), new.as_str())
    } else {
        content.replacen(old.as_str(), new.as_str(), 1)
    };

    if let Err(e) = write_atomic(&path, &updated) {
        return ToolResult::error(e);
    }

    let occurrences = if replace_all {
        format!("{} occurrence(s)", count)
    } else {
        "1 occurrence".to_string()
    };
    ToolResult::success(format!(
        "Patched '{}': replaced {} of old_string.",
        path, occurrences
    ))
}

/// Write `content` atomically: temp file + rename, so a crash mid-write
/// never corrupts the original.
fn write_atomic(path: &str, content: &str) -> Result<(), String> {
    let tmp_path = format!("{path}.skynet_patch_tmp");
    std::fs::write(&tmp_path, content)
        .map_err(|e| format!("failed to write temp file '{tmp_path}': {e}"))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        format!("failed to rename temp file to '{path}': {e}")
    })
}

/// One file-level section of a V4A patch.
enum V4aSection<'a> {
    Update { path: &'a str, hunks: Vec<Hunk> },
    Add { path: &'a str, lines: Vec<&'a str> },
    Delete { path: &'a str },
}

/// One `@@`-delimited hunk: its context+removed lines (to locate) and its
/// context+added lines (to replace them with).
struct Hunk {
    old_block: String,
    new_block: String,
}

fn execute_v4a(input: &serde_json::Value) -> ToolResult {
    let patch = match input.get("patch").and_then(|v| v.as_str()) {
        Some(p) if !p.trim().is_empty() => p,
        _ => return ToolResult::error("missing required parameter: patch (for mode='patch')"),
    };

    let sections = match parse_v4a(patch) {
        Ok(s) => s,
        Err(e) => return ToolResult::error(e),
    };
    if sections.is_empty() {
        return ToolResult::error("patch contains no file sections");
    }

    let mut touched = Vec::new();
    for section in &sections {
        if let Err(e) = apply_v4a_section(section) {
            return ToolResult::error(e);
        }
        touched.push(match section {
            V4aSection::Update { path, .. } => format!("updated {path}"),
            V4aSection::Add { path, .. } => format!("added {path}"),
            V4aSection::Delete { path } => format!("deleted {path}"),
        });
    }

    ToolResult::success(format!("Applied patch: {}", touched.join(", ")))
}

/// Parse a V4A patch into its file sections without touching the filesystem.
fn parse_v4a(patch: &str) -> Result<Vec<V4aSection<'_>>, String> {
    let lines: Vec<&str> = patch.lines().collect();
    let mut i = 0;

    while i < lines.len() && lines[i].trim().is_empty() {
        i += 1;
    }
    if i >= lines.len() || lines[i].trim() != "*** Begin Patch" {
        return Err("patch must start with '*** Begin Patch'".to_string());
    }
    i += 1;

    let mut sections = Vec::new();
    while i < lines.len() {
        let line = lines[i].trim_end();
        if line.trim() == "*** End Patch" {
            return Ok(sections);
        }
        if let Some(path) = line.strip_prefix("*** Update File: ") {
            i += 1;
            let mut hunks = Vec::new();
            let mut cur: Option<(Vec<&str>, Vec<&str>)> = None;
            while i < lines.len() && !lines[i].starts_with("*** ") {
                let l = lines[i];
                if let Some(stripped) = l.strip_prefix("@@") {
                    let _ = stripped; // optional anchor text, unused for matching
                    if let Some((old, new)) = cur.take() {
                        hunks.push(build_hunk(&old, &new));
                    }
                    cur = Some((Vec::new(), Vec::new()));
                } else if let Some((old, new)) = cur.as_mut() {
                    match l.chars().next() {
                        Some(' ') => {
                            old.push(&l[1..]);
                            new.push(&l[1..]);
                        }
                        Some('-') => old.push(&l[1..]),
                        Some('+') => new.push(&l[1..]),
                        _ => {
                            old.push(l);
                            new.push(l);
                        }
                    }
                }
                i += 1;
            }
            if let Some((old, new)) = cur.take() {
                hunks.push(build_hunk(&old, &new));
            }
            if hunks.is_empty() {
                return Err(format!("Update File: {path} has no '@@' hunks"));
            }
            sections.push(V4aSection::Update { path, hunks });
            continue;
        }
        if let Some(path) = line.strip_prefix("*** Add File: ") {
            i += 1;
            let mut content_lines = Vec::new();
            while i < lines.len() && !lines[i].starts_with("*** ") {
                content_lines.push(lines[i].strip_prefix('+').unwrap_or(lines[i]));
                i += 1;
            }
            sections.push(V4aSection::Add { path, lines: content_lines });
            continue;
        }
        if let Some(path) = line.strip_prefix("*** Delete File: ") {
            sections.push(V4aSection::Delete { path });
            i += 1;
            continue;
        }
        return Err(format!("unrecognized patch line: '{line}'"));
    }

    Err("patch is missing a terminating '*** End Patch'".to_string())
}

fn build_hunk(old: &[&str], new: &[&str]) -> Hunk {
    Hunk {
        old_block: old.join("\n"),
        new_block: new.join("\n"),
    }
}

fn apply_v4a_section(section: &V4aSection<'_>) -> Result<(), String> {
    match section {
        V4aSection::Update { path, hunks } => {
            let path: &str = path;
            let mut content = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read '{path}': {e}"))?;
            for (idx, hunk) in hunks.iter().enumerate() {
                if !content.contains(hunk.old_block.as_str()) {
                    return Err(format!(
                        "hunk {} in Update File: {path} did not match — context/removed \
                         lines must appear verbatim in the current file",
                        idx + 1
                    ));
                }
                content = content.replacen(hunk.old_block.as_str(), hunk.new_block.as_str(), 1);
            }
            write_atomic(path, &content)
        }
        V4aSection::Add { path, lines } => {
            let path: &str = path;
            if std::path::Path::new(path).exists() {
                return Err(format!("Add File: {path} already exists"));
            }
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("failed to create directory for '{path}': {e}"))?;
            }
            write_atomic(path, &lines.join("\n"))
        }
        V4aSection::Delete { path } => {
            let path: &str = path;
            std::fs::remove_file(path).map_err(|e| format!("failed to delete '{path}': {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_mode_rejects_missing_old_string() {
        let r = execute_replace(&serde_json::json!({"path": "/tmp/x", "new_string": "y"}));
        assert!(r.is_error);
    }

    #[test]
    fn v4a_parse_rejects_missing_begin_marker() {
        let err = parse_v4a("*** Update File: a.txt\n@@\n-x\n+y\n*** End Patch").unwrap_err();
        assert!(err.contains("Begin Patch"));
    }

    #[test]
    fn v4a_parse_single_update_hunk() {
        let patch = "*** Begin Patch\n*** Update File: a.txt\n@@\n context\n-old\n+new\n context\n*** End Patch";
        let sections = parse_v4a(patch).unwrap();
        assert_eq!(sections.len(), 1);
        match &sections[0] {
            V4aSection::Update { path, hunks } => {
                assert_eq!(*path, "a.txt");
                assert_eq!(hunks.len(), 1);
                assert_eq!(hunks[0].old_block, "context\nold\ncontext");
                assert_eq!(hunks[0].new_block, "context\nnew\ncontext");
            }
            _ => panic!("expected Update section"),
        }
    }

    #[test]
    fn v4a_parse_add_and_delete_sections() {
        let patch = "*** Begin Patch\n*** Add File: new.txt\n+hello\n+world\n*** Delete File: old.txt\n*** End Patch";
        let sections = parse_v4a(patch).unwrap();
        assert_eq!(sections.len(), 2);
        match &sections[0] {
            V4aSection::Add { path, lines } => {
                assert_eq!(*path, "new.txt");
                assert_eq!(lines, &vec!["hello", "world"]);
            }
            _ => panic!("expected Add section"),
        }
        assert!(matches!(sections[1], V4aSection::Delete { path: "old.txt" }));
    }

    #[test]
    fn v4a_apply_update_roundtrips_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "line1\nold\nline3\n").unwrap();
        let patch = format!(
            "*** Begin Patch\n*** Update File: {}\n@@\n line1\n-old\n+new\n line3\n*** End Patch",
            file.display()
        );
        let sections = parse_v4a(&patch).unwrap();
        for s in &sections {
            apply_v4a_section(s).unwrap();
        }
        let result = std::fs::read_to_string(&file).unwrap();
        assert_eq!(result, "line1\nnew\nline3\n");
    }
}
