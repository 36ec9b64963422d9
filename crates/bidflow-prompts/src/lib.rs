//! Prompt-version library and bidder profiles.
//!
//! Prompt templates live as markdown files with a commented metadata header;
//! discovered versions are mirrored into the ledger's prompt-version table,
//! which owns the active/approved flags and the success statistics.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use bidflow_core::MilestoneSize;
use bidflow_ledger::Ledger;

pub const CRATE_NAME: &str = "bidflow-prompts";

/// Last-resort template when neither a versioned nor a legacy prompt file
/// exists on disk.
const FALLBACK_PROMPT: &str = r#"You are generating a JSON object with a freelance project proposal.

Project: {PROJECT_TITLE}
Description: {PROJECT_DESCRIPTION}

Write a professional proposal (900-1200 characters) that shows you understood the project.

Output JSON:
{
  "proposal_text": "...",
  "milestone_plan": {"size": "{MILESTONE_SIZE}", "count": {MILESTONE_COUNT}, "milestones": []},
  "free_demo_offered": false,
  "free_demo_reason": ""
}
"#;

/// Metadata parsed from the commented header of a prompt file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptMetadata {
    pub version_key: String,
    pub name: String,
    pub description: String,
    pub status: String,
}

/// A prompt version found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPrompt {
    pub version_key: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub path: PathBuf,
}

impl DiscoveredPrompt {
    pub fn is_approved(&self) -> bool {
        self.status == "approved"
    }
}

/// Extract metadata from the first header lines of a prompt file.
/// Lines look like `# Prompt Version: v2_concise`.
pub fn parse_prompt_metadata(content: &str) -> PromptMetadata {
    let mut metadata = PromptMetadata {
        status: "testing".to_string(),
        ..PromptMetadata::default()
    };

    for line in content.lines().take(20) {
        let line = line.trim();
        let Some(stripped) = line.strip_prefix('#') else {
            continue;
        };
        let stripped = stripped.trim_start_matches('#').trim();

        if let Some(value) = stripped.strip_prefix("Prompt Version:") {
            metadata.version_key = value.trim().to_string();
        } else if let Some(value) = stripped.strip_prefix("Name:") {
            metadata.name = value.trim().to_string();
        } else if let Some(value) = stripped.strip_prefix("Description:") {
            metadata.description = value.trim().to_string();
        } else if let Some(value) = stripped.strip_prefix("Status:") {
            metadata.status = value.trim().to_string();
        }
    }
    metadata
}

/// Directory-backed prompt version library.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    versions_dir: PathBuf,
    legacy_path: PathBuf,
}

impl PromptLibrary {
    /// `root` is the prompts directory; versioned templates live in
    /// `root/bid_versions/*.md`, the pre-versioning template at
    /// `root/bid_prompt.md`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            versions_dir: root.join("bid_versions"),
            legacy_path: root.join("bid_prompt.md"),
        }
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Discover all prompt versions on disk, sorted by filename.
    /// Unreadable files are skipped with a warning rather than failing the
    /// whole scan.
    pub fn discover(&self) -> Result<Vec<DiscoveredPrompt>> {
        if !self.versions_dir.exists() {
            fs::create_dir_all(&self.versions_dir).with_context(|| {
                format!("creating prompts directory {}", self.versions_dir.display())
            })?;
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.versions_dir)
            .with_context(|| format!("reading {}", self.versions_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();

        let mut versions = Vec::new();
        for path in paths {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path.display(), %err, "skipping unreadable prompt file");
                    continue;
                }
            };
            let mut metadata = parse_prompt_metadata(&content);
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            if metadata.version_key.is_empty() {
                metadata.version_key = stem.clone();
            }
            if metadata.name.is_empty() {
                metadata.name = title_case(&stem);
            }
            versions.push(DiscoveredPrompt {
                version_key: metadata.version_key,
                name: metadata.name,
                description: metadata.description,
                status: metadata.status,
                path,
            });
        }
        Ok(versions)
    }

    /// Load the template body for a version key.
    pub fn load(&self, version_key: &str) -> Result<Option<String>> {
        for version in self.discover()? {
            if version.version_key == version_key {
                let content = fs::read_to_string(&version.path)
                    .with_context(|| format!("reading {}", version.path.display()))?;
                return Ok(Some(content));
            }
        }
        Ok(None)
    }

    /// Mirror discovered versions into the ledger. When no version is
    /// active yet, the first approved one (or failing that, the first
    /// discovered one) is activated. Returns the number of synced versions.
    pub fn sync_to_ledger(&self, ledger: &mut Ledger) -> Result<usize> {
        let versions = self.discover()?;
        for version in &versions {
            ledger.register_prompt_version(
                &version.version_key,
                &version.name,
                Some(&version.description).filter(|d| !d.is_empty()).map(|d| d.as_str()),
                false,
                version.is_approved(),
            )?;
        }

        if ledger.active_prompt_version()?.is_none() && !versions.is_empty() {
            let pick = versions
                .iter()
                .find(|v| v.is_approved())
                .unwrap_or(&versions[0]);
            ledger.set_active_prompt_version(&pick.version_key)?;
        }
        Ok(versions.len())
    }

    /// Load the active prompt as `(version_key, content)`, falling back to
    /// the legacy single-template file and finally to a built-in prompt.
    pub fn load_active(&self, ledger: &mut Ledger) -> Result<(String, String)> {
        self.sync_to_ledger(ledger)?;

        if let Some(active_key) = ledger.active_prompt_version()? {
            if let Some(content) = self.load(&active_key)? {
                return Ok((active_key, content));
            }
        }

        if self.legacy_path.exists() {
            let content = fs::read_to_string(&self.legacy_path)
                .with_context(|| format!("reading {}", self.legacy_path.display()))?;
            return Ok(("legacy".to_string(), content));
        }

        Ok(("fallback".to_string(), FALLBACK_PROMPT.to_string()))
    }

    /// Activate a version, refusing keys that have no file on disk.
    pub fn set_active(&self, ledger: &mut Ledger, version_key: &str) -> Result<bool> {
        let known = self
            .discover()?
            .iter()
            .any(|v| v.version_key == version_key);
        if !known {
            return Ok(false);
        }
        Ok(ledger.set_active_prompt_version(version_key)?)
    }

    /// Write a new prompt version file with a metadata header and register
    /// it in the ledger.
    pub fn create_version(
        &self,
        ledger: &mut Ledger,
        version_key: &str,
        name: &str,
        description: &str,
        content: &str,
        status: &str,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.versions_dir).with_context(|| {
            format!("creating prompts directory {}", self.versions_dir.display())
        })?;

        let safe_key: String = version_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let path = self.versions_dir.join(format!("{safe_key}.md"));

        let full = format!(
            "# Prompt Version: {version_key}\n# Name: {name}\n# Description: {description}\n# Status: {status}\n\n{content}"
        );
        fs::write(&path, full).with_context(|| format!("writing {}", path.display()))?;

        ledger.register_prompt_version(
            version_key,
            name,
            Some(description).filter(|d| !d.is_empty()),
            false,
            status == "approved",
        )?;
        Ok(path)
    }
}

fn title_case(stem: &str) -> String {
    stem.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ----- Template rendering -----

/// Substitution context for `{PLACEHOLDER}` variables in a prompt template.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub project_title: String,
    pub project_description: String,
    pub project_url: String,
    pub analysis_summary: String,
    pub rough_score: String,
    pub automation_potential: String,
    pub manual_work_notes: String,
    pub profile_label: String,
    pub profile_general: String,
    pub profile_section: String,
    pub profile_link: String,
    pub extended_profile: String,
    pub milestone_size: MilestoneSize,
    pub milestone_count: u32,
    pub language_override: String,
    pub tone_override: String,
}

impl PromptContext {
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{PROJECT_TITLE}", &self.project_title)
            .replace("{PROJECT_DESCRIPTION}", &self.project_description)
            .replace("{PROJECT_URL}", &self.project_url)
            .replace("{ANALYSIS_SUMMARY}", &self.analysis_summary)
            .replace("{ROUGH_SCORE}", &self.rough_score)
            .replace("{AUTOMATION_POTENTIAL}", &self.automation_potential)
            .replace("{MANUAL_WORK_NOTES}", &self.manual_work_notes)
            .replace("{PROFILE_LABEL}", &self.profile_label)
            .replace("{PROFILE_GENERAL}", &self.profile_general)
            .replace("{PROFILE_SECTION}", &self.profile_section)
            .replace("{PROFILE_LINK}", &self.profile_link)
            .replace("{EXTENDED_PROFILE}", &self.extended_profile)
            .replace("{MILESTONE_SIZE}", self.milestone_size.as_str())
            .replace("{MILESTONE_COUNT}", &self.milestone_count.to_string())
            .replace("{LANGUAGE_OVERRIDE}", &self.language_override)
            .replace("{TONE_OVERRIDE}", &self.tone_override)
    }
}

/// Milestone bucket from the average budget: small projects get two
/// milestones, mid-range three, large four.
pub fn milestone_context(
    budget_min: Option<f64>,
    budget_max: Option<f64>,
) -> (MilestoneSize, u32) {
    let avg = match (budget_min, budget_max) {
        (Some(min), Some(max)) => Some((min + max) / 2.0),
        (Some(min), None) => Some(min),
        (None, Some(max)) => Some(max),
        (None, None) => None,
    };

    match avg {
        None => (MilestoneSize::Unknown, 3),
        Some(avg) if avg < 200.0 => (MilestoneSize::Small, 2),
        Some(avg) if avg < 1000.0 => (MilestoneSize::Medium, 3),
        Some(_) => (MilestoneSize::Large, 4),
    }
}

// ----- Bidder profiles -----

/// Display identity injected into the prompt for a given kind of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub label: String,
    pub link: String,
    pub general: String,
    pub section: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: BTreeMap<String, Profile>,
}

/// Built-in profiles used until the operator customizes them.
pub fn default_profiles() -> BTreeMap<String, Profile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "web".to_string(),
        Profile {
            label: "Full-Stack Web & Product Engineering".to_string(),
            link: "https://your-portfolio.example/web".to_string(),
            general: "Hi, I'm a senior full-stack engineer and product-minded architect.\n\n\
                I design and build web applications end-to-end: from requirements and UX \
                to backend architecture, DevOps, and production monitoring."
                .to_string(),
            section: "Full-Stack Excellence: Building robust web applications from concept to deployment.\n\
                Technical Stack: Rust, Python, Node.js, React, TypeScript.\n\
                Database Expertise: PostgreSQL, SQLite, MongoDB with optimized query design.\n\
                API Development: RESTful APIs, background workers, third-party integrations."
                .to_string(),
        },
    );
    profiles.insert(
        "mobile".to_string(),
        Profile {
            label: "Mobile Apps & Cross-Platform".to_string(),
            link: "https://your-portfolio.example/mobile".to_string(),
            general: "Hi, I'm a full-stack and mobile engineer focused on shipping reliable apps.\n\n\
                I build cross-platform and native mobile applications, connect them to secure \
                backends, and care about performance, UX, and maintainability."
                .to_string(),
            section: "Mobile Development: Native iOS/Android and cross-platform apps.\n\
                Mobile-First Design: Responsive, intuitive UI/UX following platform guidelines.\n\
                Offline & Sync: Robust offline functionality with seamless data sync."
                .to_string(),
        },
    );
    profiles.insert(
        "coding".to_string(),
        Profile {
            label: "Innovation, Automation & Prototyping".to_string(),
            link: "https://your-portfolio.example/labs".to_string(),
            general: "Hi, I'm an engineer who enjoys exploring new ideas, automating workflows, \
                and building proof-of-concept products."
                .to_string(),
            section: "Innovation Prototyping: Rapid MVPs and proof-of-concept projects.\n\
                Emerging Tech: AI/ML integration, automation, experimental features.\n\
                R&D: Exploring new frameworks, APIs, and architectural patterns."
                .to_string(),
        },
    );
    profiles
}

/// Load profiles from a JSON file, merging stored fields over the
/// defaults field-by-field. A missing or broken file yields the defaults.
pub fn load_profiles(path: &Path) -> BTreeMap<String, Profile> {
    let mut merged = default_profiles();
    let Ok(text) = fs::read_to_string(path) else {
        return merged;
    };
    let Ok(file) = serde_json::from_str::<ProfilesFile>(&text) else {
        warn!(path = %path.display(), "ignoring malformed profiles file");
        return merged;
    };

    for (key, stored) in file.profiles {
        let base = merged.entry(key).or_default();
        if !stored.label.is_empty() {
            base.label = stored.label;
        }
        if !stored.link.is_empty() {
            base.link = stored.link;
        }
        if !stored.general.is_empty() {
            base.general = stored.general;
        }
        if !stored.section.is_empty() {
            base.section = stored.section;
        }
    }
    merged
}

pub fn save_profiles(path: &Path, profiles: &BTreeMap<String, Profile>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = ProfilesFile {
        profiles: profiles.clone(),
    };
    let json = serde_json::to_string_pretty(&file).context("serializing profiles")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Fetch one profile with web-profile fallbacks for missing fields.
pub fn get_profile(profiles: &BTreeMap<String, Profile>, key: &str) -> Profile {
    let defaults = default_profiles();
    let fallback = defaults.get("web").cloned().unwrap_or_default();
    let found = profiles.get(key).cloned().unwrap_or_default();
    Profile {
        label: non_empty_or(found.label, fallback.label),
        link: non_empty_or(found.link, fallback.link),
        general: non_empty_or(found.general, fallback.general),
        section: found.section,
    }
}

fn non_empty_or(value: String, fallback: String) -> String {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Pick a profile key from the analysis category plus description keywords.
pub fn select_profile_key(category: &str, description: &str) -> &'static str {
    let category = category.to_lowercase();
    let text = description.to_lowercase();

    const HYBRID_KEYWORDS: &[&str] = &[
        "technology consultant",
        "technical project manager",
        "it project manager",
        "it strategy",
        "digital transformation",
        "business strategy",
        "stakeholder",
        "c-level",
        "executive",
    ];
    if matches!(
        category.as_str(),
        "consulting" | "strategy" | "projectmanagement" | "productmanagement"
    ) || HYBRID_KEYWORDS.iter().any(|kw| text.contains(kw))
    {
        return "hybrid";
    }

    if category == "mobile"
        || ["flutter", "android", "ios", "react native"]
            .iter()
            .any(|kw| text.contains(kw))
    {
        return "mobile";
    }

    if ["odoo", "erp"].iter().any(|kw| text.contains(kw)) {
        return "coding";
    }

    if matches!(category.as_str(), "fullstack" | "webdesign" | "data" | "devops") {
        return "web";
    }

    "coding"
}

/// Map a project category to the profile used when bidding on it.
pub fn profile_key_for_project_type(project_type: &str) -> &'static str {
    match project_type {
        "web_app" | "api_backend" | "ecommerce" | "wordpress" | "shopify" | "bug_fix" => "web",
        "mobile_app" => "mobile",
        "consulting" => "hybrid",
        _ => "coding",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE_PROMPT: &str = "# Prompt Version: v2_concise\n\
        # Name: Concise Opener\n\
        # Description: Short direct proposals\n\
        # Status: approved\n\n\
        Proposal for {PROJECT_TITLE} with {MILESTONE_COUNT} milestones.";

    #[test]
    fn metadata_parses_header_and_defaults_status() {
        let metadata = parse_prompt_metadata(SAMPLE_PROMPT);
        assert_eq!(metadata.version_key, "v2_concise");
        assert_eq!(metadata.name, "Concise Opener");
        assert_eq!(metadata.description, "Short direct proposals");
        assert_eq!(metadata.status, "approved");

        let bare = parse_prompt_metadata("just a template body");
        assert!(bare.version_key.is_empty());
        assert_eq!(bare.status, "testing");
    }

    #[test]
    fn discovery_falls_back_to_filename_metadata() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        fs::create_dir_all(library.versions_dir()).expect("mkdir");
        fs::write(
            library.versions_dir().join("friendly_opener.md"),
            "No header here, just a body with {PROJECT_TITLE}.",
        )
        .expect("write");

        let versions = library.discover().expect("discover");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_key, "friendly_opener");
        assert_eq!(versions[0].name, "Friendly Opener");
        assert!(!versions[0].is_approved());
    }

    #[test]
    fn sync_activates_first_approved_version() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        fs::create_dir_all(library.versions_dir()).expect("mkdir");
        fs::write(
            library.versions_dir().join("a_testing.md"),
            "# Prompt Version: a_testing\n# Status: testing\n\nbody",
        )
        .expect("write");
        fs::write(library.versions_dir().join("b_approved.md"), SAMPLE_PROMPT).expect("write");

        let mut ledger = Ledger::in_memory().expect("ledger");
        let synced = library.sync_to_ledger(&mut ledger).expect("sync");
        assert_eq!(synced, 2);
        assert_eq!(
            ledger.active_prompt_version().expect("active").as_deref(),
            Some("v2_concise")
        );

        // Re-sync keeps the existing active selection.
        library.sync_to_ledger(&mut ledger).expect("sync again");
        assert_eq!(
            ledger.active_prompt_version().expect("active").as_deref(),
            Some("v2_concise")
        );
    }

    #[test]
    fn load_active_falls_back_to_builtin_prompt() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        let mut ledger = Ledger::in_memory().expect("ledger");

        let (key, content) = library.load_active(&mut ledger).expect("load");
        assert_eq!(key, "fallback");
        assert!(content.contains("{PROJECT_TITLE}"));
    }

    #[test]
    fn create_version_sanitizes_filename_and_registers() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        let mut ledger = Ledger::in_memory().expect("ledger");

        let path = library
            .create_version(
                &mut ledger,
                "v3/spicy take",
                "Spicy",
                "Bolder opener",
                "Body {PROJECT_TITLE}",
                "approved",
            )
            .expect("create");
        assert!(path.file_name().is_some_and(|f| f == "v3_spicy_take.md"));

        let versions = library.discover().expect("discover");
        assert_eq!(versions[0].version_key, "v3/spicy take");
        let registered = ledger
            .prompt_version("v3/spicy take")
            .expect("query")
            .expect("registered");
        assert!(registered.is_approved);
    }

    #[test]
    fn set_active_rejects_unknown_keys() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        let mut ledger = Ledger::in_memory().expect("ledger");
        assert!(!library
            .set_active(&mut ledger, "ghost")
            .expect("set_active"));
    }

    #[test]
    fn context_renders_all_placeholders() {
        let context = PromptContext {
            project_title: "Shop relaunch".to_string(),
            milestone_size: MilestoneSize::Medium,
            milestone_count: 3,
            ..PromptContext::default()
        };
        let rendered = context.render(
            "Bid for {PROJECT_TITLE}: {MILESTONE_COUNT} {MILESTONE_SIZE} milestones. {TONE_OVERRIDE}",
        );
        assert_eq!(rendered, "Bid for Shop relaunch: 3 medium milestones. ");
    }

    #[test]
    fn milestone_buckets_follow_budget_thresholds() {
        assert_eq!(milestone_context(None, None), (MilestoneSize::Unknown, 3));
        assert_eq!(
            milestone_context(Some(50.0), Some(150.0)),
            (MilestoneSize::Small, 2)
        );
        assert_eq!(
            milestone_context(Some(400.0), Some(800.0)),
            (MilestoneSize::Medium, 3)
        );
        assert_eq!(milestone_context(Some(2000.0), None), (MilestoneSize::Large, 4));
    }

    #[test]
    fn profiles_merge_stored_fields_over_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        fs::write(
            &path,
            r#"{"profiles":{"web":{"label":"Custom Web","link":"","general":"","section":""}}}"#,
        )
        .expect("write");

        let profiles = load_profiles(&path);
        let web = profiles.get("web").expect("web profile");
        assert_eq!(web.label, "Custom Web");
        // Untouched fields keep their defaults.
        assert!(!web.general.is_empty());

        let missing = load_profiles(&dir.path().join("nope.json"));
        assert!(missing.contains_key("coding"));
    }

    #[test]
    fn profile_selection_rules() {
        assert_eq!(select_profile_key("consulting", ""), "hybrid");
        assert_eq!(select_profile_key("", "Need a Flutter app for iOS"), "mobile");
        assert_eq!(select_profile_key("", "Odoo ERP customization"), "coding");
        assert_eq!(select_profile_key("fullstack", ""), "web");
        assert_eq!(select_profile_key("", "plain automation script"), "coding");

        assert_eq!(profile_key_for_project_type("ecommerce"), "web");
        assert_eq!(profile_key_for_project_type("mobile_app"), "mobile");
        assert_eq!(profile_key_for_project_type("ai_ml"), "coding");
    }

    #[test]
    fn profiles_save_and_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config/profiles.json");
        let mut profiles = default_profiles();
        profiles
            .get_mut("coding")
            .expect("coding profile")
            .link = "https://example.dev/labs".to_string();

        save_profiles(&path, &profiles).expect("save");
        let reloaded = load_profiles(&path);
        assert_eq!(
            reloaded.get("coding").expect("coding").link,
            "https://example.dev/labs"
        );
    }
}
