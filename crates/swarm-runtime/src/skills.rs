//! Skill discovery and progressive loading.
//!
//! A skill is a directory holding a `SKILL.md` with optional YAML
//! frontmatter. Workspace skills (`<workspace>/skills/<name>/SKILL.md`)
//! override builtin ones. The system prompt carries an XML manifest of
//! available skills; the model loads a skill's full content on demand via
//! the `read_file` tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

/// A discovered skill.
#[derive(Clone, Debug, Serialize)]
pub struct SkillInfo {
    /// Directory name.
    pub name: String,
    /// Path to the `SKILL.md`.
    pub path: PathBuf,
    /// `"workspace"` or `"builtin"`.
    pub source: &'static str,
}

/// Discovers and loads skills from workspace and builtin directories.
pub struct SkillsLoader {
    workspace_skills: PathBuf,
    builtin_skills: Option<PathBuf>,
}

impl SkillsLoader {
    /// Create a loader for a workspace, with an optional builtin dir.
    pub fn new(workspace: impl AsRef<Path>, builtin: Option<PathBuf>) -> Self {
        Self {
            workspace_skills: workspace.as_ref().join("skills"),
            builtin_skills: builtin,
        }
    }

    /// All available skills; workspace entries shadow builtins.
    pub fn list_skills(&self) -> Vec<SkillInfo> {
        let mut skills = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for info in Self::scan(&self.workspace_skills, "workspace") {
            seen.insert(info.name.clone());
            skills.push(info);
        }
        if let Some(builtin) = &self.builtin_skills {
            for info in Self::scan(builtin, "builtin") {
                if !seen.contains(&info.name) {
                    skills.push(info);
                }
            }
        }
        skills
    }

    fn scan(dir: &Path, source: &'static str) -> Vec<SkillInfo> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut found: Vec<SkillInfo> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let skill_file = e.path().join("SKILL.md");
                skill_file.is_file().then(|| SkillInfo {
                    name: e.file_name().to_string_lossy().into_owned(),
                    path: skill_file,
                    source,
                })
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Load a skill's content by name, empty when not found.
    pub fn load_skill(&self, name: &str) -> String {
        let workspace_path = self.workspace_skills.join(name).join("SKILL.md");
        if let Ok(content) = std::fs::read_to_string(workspace_path) {
            return content;
        }
        if let Some(builtin) = &self.builtin_skills {
            if let Ok(content) = std::fs::read_to_string(builtin.join(name).join("SKILL.md")) {
                return content;
            }
        }
        String::new()
    }

    /// Load and format specific skills for inline context.
    pub fn load_skills_for_context(&self, names: &[String]) -> String {
        let parts: Vec<String> = names
            .iter()
            .filter_map(|name| {
                let content = self.load_skill(name);
                (!content.is_empty()).then(|| {
                    format!("### Skill: {name}\n\n{}", strip_frontmatter(&content))
                })
            })
            .collect();
        parts.join("\n\n---\n\n")
    }

    /// XML manifest of all skills for progressive lazy-loading.
    pub fn skills_manifest(&self) -> String {
        let skills = self.list_skills();
        if skills.is_empty() {
            return String::new();
        }
        let mut lines = vec!["<skills>".to_string()];
        for skill in skills {
            let desc = self.skill_description(&skill.name);
            lines.push("  <skill available=\"true\">".into());
            lines.push(format!("    <name>{}</name>", escape_xml(&skill.name)));
            lines.push(format!("    <description>{}</description>", escape_xml(&desc)));
            lines.push(format!("    <location>{}</location>", skill.path.display()));
            lines.push("  </skill>".into());
        }
        lines.push("</skills>".into());
        lines.join("\n")
    }

    /// Parse YAML frontmatter key/value pairs from a skill.
    pub fn skill_metadata(&self, name: &str) -> Option<HashMap<String, String>> {
        let content = self.load_skill(name);
        if content.is_empty() || !content.starts_with("---") {
            return None;
        }
        let re = Regex::new(r"(?s)^---\n(.*?)\n---").expect("static regex");
        let captures = re.captures(&content)?;
        let mut meta = HashMap::new();
        for line in captures[1].lines() {
            if let Some((key, value)) = line.split_once(':') {
                meta.insert(
                    key.trim().to_string(),
                    value.trim().trim_matches(['"', '\'']).to_string(),
                );
            }
        }
        Some(meta)
    }

    fn skill_description(&self, name: &str) -> String {
        self.skill_metadata(name)
            .and_then(|meta| meta.get("description").cloned())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| name.to_string())
    }
}

/// Drop a leading YAML frontmatter block.
pub fn strip_frontmatter(content: &str) -> String {
    if !content.starts_with("---") {
        return content.to_string();
    }
    let re = Regex::new(r"(?s)^---\n.*?\n---\n").expect("static regex");
    re.replace(content, "").trim().to_string()
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, name: &str, content: &str) {
        let dir = root.join("skills").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), content).unwrap();
    }

    #[test]
    fn lists_workspace_skills() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "weather", "# Weather\nFetch forecasts.");
        write_skill(dir.path(), "trading", "# Trading");

        let loader = SkillsLoader::new(dir.path(), None);
        let skills = loader.list_skills();
        let names: Vec<&str> = skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["trading", "weather"]);
        assert!(skills.iter().all(|s| s.source == "workspace"));
    }

    #[test]
    fn workspace_shadows_builtin() {
        let ws = tempfile::tempdir().unwrap();
        let builtin = tempfile::tempdir().unwrap();
        write_skill(ws.path(), "weather", "workspace version");
        // Builtin layout has no extra "skills" segment.
        let bdir = builtin.path().join("weather");
        std::fs::create_dir_all(&bdir).unwrap();
        std::fs::write(bdir.join("SKILL.md"), "builtin version").unwrap();

        let loader = SkillsLoader::new(ws.path(), Some(builtin.path().to_path_buf()));
        let skills = loader.list_skills();
        assert_eq!(skills.len(), 1);
        assert_eq!(loader.load_skill("weather"), "workspace version");
    }

    #[test]
    fn manifest_is_xml_with_description() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "weather",
            "---\ndescription: \"Forecast <lookup>\"\n---\n# Weather",
        );
        let loader = SkillsLoader::new(dir.path(), None);
        let manifest = loader.skills_manifest();
        assert!(manifest.starts_with("<skills>"));
        assert!(manifest.contains("<name>weather</name>"));
        assert!(manifest.contains("Forecast &lt;lookup&gt;"));
    }

    #[test]
    fn empty_workspace_has_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SkillsLoader::new(dir.path(), None);
        assert_eq!(loader.skills_manifest(), "");
    }

    #[test]
    fn metadata_parses_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(
            dir.path(),
            "weather",
            "---\ndescription: Forecasts\nversion: '2'\n---\nbody",
        );
        let loader = SkillsLoader::new(dir.path(), None);
        let meta = loader.skill_metadata("weather").unwrap();
        assert_eq!(meta["description"], "Forecasts");
        assert_eq!(meta["version"], "2");
    }

    #[test]
    fn context_loading_strips_frontmatter() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "weather", "---\ndescription: x\n---\nThe body.");
        let loader = SkillsLoader::new(dir.path(), None);
        let ctx = loader.load_skills_for_context(&["weather".into(), "missing".into()]);
        assert!(ctx.contains("### Skill: weather"));
        assert!(ctx.contains("The body."));
        assert!(!ctx.contains("description:"));
    }
}
