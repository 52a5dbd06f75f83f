//! Workspace skill discovery for the system prompt.
//!
//! Skills live as `<skills_dir>/<skill>/SKILL.md` with a `---` delimited
//! front matter carrying `name:` and `description:`. Discovery is best
//! effort: an unreadable directory or file just contributes nothing.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

const SKILL_FILE: &str = "SKILL.md";

/// Cap for a skill's inlined SKILL.md text.
pub const MAX_SKILL_DETAIL_CHARS: usize = 2000;

static SKILLS_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<available_skills>(.*?)</available_skills>")
        .expect("skills block pattern is valid")
});

/// A skill found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    pub location: PathBuf,
}

/// List skills under `dir`, sorted by directory name.
pub fn discover_skills(dir: &Path) -> Vec<SkillInfo> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), "Skills directory unavailable: {e}");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.join(SKILL_FILE).is_file())
        .collect();
    dirs.sort();

    dirs.into_iter().filter_map(|d| load_skill(&d)).collect()
}

fn load_skill(skill_dir: &Path) -> Option<SkillInfo> {
    let location = skill_dir.join(SKILL_FILE);
    let content = match std::fs::read_to_string(&location) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %location.display(), "Skipping unreadable skill: {e}");
            return None;
        }
    };

    let (name, description) = parse_front_matter(&content);
    let name = name.unwrap_or_else(|| {
        skill_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    Some(SkillInfo {
        name,
        description: description.unwrap_or_default(),
        location,
    })
}

/// Read `name:` and `description:` from a leading `---` block.
pub fn parse_front_matter(content: &str) -> (Option<String>, Option<String>) {
    let mut lines = content.lines();
    if lines.next().map(str::trim) != Some("---") {
        return (None, None);
    }

    let mut name = None;
    let mut description = None;
    for line in lines.take_while(|l| l.trim() != "---") {
        if let Some(value) = line.strip_prefix("name:") {
            name = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        } else if let Some(value) = line.strip_prefix("description:") {
            description = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        }
    }
    (name, description)
}

/// Render skills as an `<available_skills>` block; empty input renders nothing.
pub fn render_skills_block(skills: &[SkillInfo]) -> Option<String> {
    if skills.is_empty() {
        return None;
    }
    let mut parts = vec!["<available_skills>".to_string()];
    for skill in skills {
        parts.push("  <skill>".to_string());
        parts.push(format!("    <name>{}</name>", skill.name));
        if !skill.description.is_empty() {
            parts.push(format!("    <description>{}</description>", skill.description));
        }
        parts.push(format!("    <location>{}</location>", skill.location.display()));
        parts.push("  </skill>".to_string());
    }
    parts.push("</available_skills>".to_string());
    Some(parts.join("\n"))
}

/// Reuse a skills block the client already put in its own system prompt.
pub fn extract_skills_block(system_text: &str) -> Option<String> {
    let inner = SKILLS_BLOCK.captures(system_text)?.get(1)?.as_str().trim();
    (!inner.is_empty()).then(|| format!("<available_skills>\n{inner}\n</available_skills>"))
}

/// Full SKILL.md text for the named skills, each capped.
pub fn skill_details(dir: &Path, names: &[String]) -> Option<String> {
    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort();
    sorted.dedup();

    let sections: Vec<String> = sorted
        .into_iter()
        .filter_map(|name| {
            let content = std::fs::read_to_string(dir.join(name).join(SKILL_FILE)).ok()?;
            let content = content.trim();
            if content.is_empty() {
                return None;
            }
            Some(format!("## Skill: {name}\n{}", cap_chars(content, MAX_SKILL_DETAIL_CHARS)))
        })
        .collect();

    if sections.is_empty() {
        return None;
    }
    Some(format!(
        "Skill details (use exec to run scripts as described):\n{}",
        sections.join("\n\n")
    ))
}

fn cap_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, dir: &str, content: &str) {
        let skill_dir = root.join(dir);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join(SKILL_FILE), content).unwrap();
    }

    #[test]
    fn test_discover_sorted_with_fallback_name() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "zeta", "---\nname: posting\ndescription: Post things\n---\nbody");
        write_skill(tmp.path(), "alpha", "no front matter here");
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let skills = discover_skills(tmp.path());
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "alpha");
        assert_eq!(skills[0].description, "");
        assert_eq!(skills[1].name, "posting");
        assert_eq!(skills[1].description, "Post things");
        assert!(skills[1].location.ends_with("zeta/SKILL.md"));
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        assert!(discover_skills(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn test_render_block_omits_empty_description() {
        let block = render_skills_block(&[SkillInfo {
            name: "rag".to_string(),
            description: String::new(),
            location: PathBuf::from("/s/rag/SKILL.md"),
        }])
        .unwrap();
        assert!(block.starts_with("<available_skills>\n  <skill>\n    <name>rag</name>"));
        assert!(!block.contains("<description>"));
        assert!(block.contains("<location>/s/rag/SKILL.md</location>"));
        assert!(render_skills_block(&[]).is_none());
    }

    #[test]
    fn test_extract_client_block() {
        let text = "You are X.\n<available_skills>\n<skill>a</skill>\n</available_skills>\nMore.";
        assert_eq!(
            extract_skills_block(text).unwrap(),
            "<available_skills>\n<skill>a</skill>\n</available_skills>"
        );
        assert!(extract_skills_block("<available_skills> </available_skills>").is_none());
        assert!(extract_skills_block("plain").is_none());
    }

    #[test]
    fn test_skill_details_are_capped() {
        let tmp = tempfile::tempdir().unwrap();
        write_skill(tmp.path(), "molt_tools", &"x".repeat(MAX_SKILL_DETAIL_CHARS + 50));

        let details = skill_details(tmp.path(), &["molt_tools".to_string(), "absent".to_string()])
            .unwrap();
        assert!(details.starts_with("Skill details"));
        assert!(details.contains("## Skill: molt_tools\n"));
        assert!(details.ends_with("\n..."));
        assert!(skill_details(tmp.path(), &["absent".to_string()]).is_none());
    }
}
