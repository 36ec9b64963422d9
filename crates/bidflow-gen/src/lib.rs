//! Proposal generation pipeline: prompt assembly, model calls, output
//! parsing, and persistence of the generated bid into the ledger.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

use bidflow_core::{MilestonePlan, NewBid, ProjectInfo};
use bidflow_ledger::Ledger;
use bidflow_prompts::{
    get_profile, load_profiles, milestone_context, profile_key_for_project_type, PromptContext,
    PromptLibrary,
};

pub const CRATE_NAME: &str = "bidflow-gen";

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const GENERATION_SYSTEM_PROMPT: &str =
    "You are an expert freelance bid writer. Follow the prompt instructions exactly and output valid JSON.";
const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a careful assistant that follows the prompt instructions exactly.";

const FALLBACK_ANALYSIS_PROMPT: &str =
    "You are an assistant that summarizes and scores freelance projects. \
     Return JSON with keys: summary, category, rough_score, automation_potential, \
     manual_work_notes, reasons, risks.\nProject JSON: {PROJECT_JSON}";

#[derive(Debug, Error)]
pub enum GenError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("http status {status} from model API")]
    HttpStatus { status: u16 },
    #[error("model response carried no content")]
    EmptyResponse,
}

/// Model API settings, read from the environment.
#[derive(Debug, Clone)]
pub struct GenConfig {
    pub api_key: Option<String>,
    pub cheap_model: String,
    pub expensive_model: String,
    pub base_url: String,
}

impl GenConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|v| !v.is_empty()),
            cheap_model: std::env::var("OPENAI_CHEAP_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            expensive_model: std::env::var("OPENAI_EXPENSIVE_MODEL")
                .unwrap_or_else(|_| "gpt-4.1-mini".to_string()),
            base_url: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| OPENAI_API_BASE.to_string()),
        }
    }
}

/// Chat-completion seam. The production implementation talks to the
/// OpenAI API; tests substitute a canned generator.
#[async_trait]
pub trait ProposalGenerator: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, GenError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(config: &GenConfig, model: impl Into<String>) -> Result<Self, GenError> {
        let api_key = config.api_key.clone().ok_or(GenError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: config.base_url.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl ProposalGenerator for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, GenError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or(GenError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Pull a JSON object out of model output: plain JSON, then JSON wrapped
/// in markdown fences, then the first `{...}` block.
pub fn extract_json_object(content: &str) -> Option<JsonValue> {
    let text = content.trim();

    if let Ok(value @ JsonValue::Object(_)) = serde_json::from_str(text) {
        return Some(value);
    }

    if text.starts_with("```") {
        let mut lines: Vec<&str> = text.lines().collect();
        if lines.first().is_some_and(|l| l.starts_with("```")) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.trim().starts_with("```")) {
            lines.pop();
        }
        let joined = lines.join("\n");
        if let Ok(value @ JsonValue::Object(_)) = serde_json::from_str(joined.trim()) {
            return Some(value);
        }
        return extract_first_object(&joined);
    }

    extract_first_object(text)
}

fn extract_first_object(text: &str) -> Option<JsonValue> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&text[start..=end]) {
        Ok(value @ JsonValue::Object(_)) => Some(value),
        _ => None,
    }
}

/// Cheap-model project triage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub rough_score: f64,
    #[serde(default)]
    pub automation_potential: f64,
    #[serde(default)]
    pub manual_work_notes: String,
    #[serde(default)]
    pub reasons: String,
    #[serde(default)]
    pub risks: String,
}

/// Summarize, categorize, and score a raw project object. Non-JSON model
/// output degrades to an `other` analysis wrapping the raw text.
pub async fn analyze_project(
    generator: &dyn ProposalGenerator,
    project: &JsonValue,
    prompt_template: Option<&str>,
) -> Result<Analysis> {
    let template = prompt_template.unwrap_or(FALLBACK_ANALYSIS_PROMPT);
    let project_json =
        serde_json::to_string_pretty(project).context("serializing project for analysis")?;
    let prompt = template.replace("{PROJECT_JSON}", &project_json);

    let content = generator
        .complete(ANALYSIS_SYSTEM_PROMPT, &prompt, 0.1)
        .await?;

    match extract_json_object(&content).map(serde_json::from_value::<Analysis>) {
        Some(Ok(analysis)) => Ok(analysis),
        _ => Ok(Analysis {
            summary: content.trim().to_string(),
            category: "other".to_string(),
            manual_work_notes: "Model returned non-JSON content.".to_string(),
            reasons: "Model returned non-JSON content.".to_string(),
            risks: "Parsing error.".to_string(),
            ..Analysis::default()
        }),
    }
}

/// Parsed generation output. Unknown or missing fields default rather
/// than failing the whole generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Draft {
    #[serde(default)]
    pub proposal_text: String,
    pub milestone_plan: Option<MilestonePlan>,
    #[serde(default)]
    pub free_demo_offered: bool,
    #[serde(default)]
    pub free_demo_reason: String,
    #[serde(default)]
    pub detected_language: String,
    #[serde(default)]
    pub detected_tone: String,
    #[serde(default)]
    pub identified_pain_point: String,
}

/// Everything needed to generate one proposal.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub project: ProjectInfo,
    pub language: String,
    pub tone: String,
    pub prompt_version: Option<String>,
    pub include_similar_bids: bool,
    pub additional_context: Option<String>,
    pub extended_profile: Option<String>,
    pub profiles_path: Option<std::path::PathBuf>,
    /// Prior triage result; fills the analysis placeholders when present.
    pub analysis: Option<Analysis>,
}

impl GenerateRequest {
    pub fn new(project: ProjectInfo) -> Self {
        Self {
            project,
            language: "auto".to_string(),
            tone: "auto".to_string(),
            prompt_version: None,
            include_similar_bids: true,
            additional_context: None,
            extended_profile: None,
            profiles_path: None,
            analysis: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedBid {
    pub bid_id: i64,
    pub draft: Draft,
    pub prompt_version: String,
    pub model_used: String,
}

fn language_name(code: &str) -> &'static str {
    match code {
        "de" => "German",
        "es" => "Spanish",
        _ => "English",
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

/// Reference block of past bids worth imitating, picked in priority
/// order: uploaded bids of the same type, any uploaded bids, high-rated
/// bids of the same type, high-rated bids overall, then any bid that at
/// least got engagement.
pub fn similar_bids_context(
    ledger: &Ledger,
    project_type: &str,
    limit: usize,
) -> Result<Option<String>> {
    let mut bids: Vec<_> = ledger
        .uploaded(limit)?
        .into_iter()
        .filter(|b| b.project.project_type.as_deref() == Some(project_type))
        .collect();
    if bids.is_empty() {
        bids = ledger.uploaded(limit)?;
    }
    if bids.is_empty() {
        bids = ledger.high_rated_by_type(project_type, 5, limit)?;
    }
    if bids.is_empty() {
        bids = ledger.high_rated(5, limit)?;
    }
    if bids.is_empty() {
        bids = ledger
            .by_project_type(project_type, limit * 2)?
            .into_iter()
            .filter(|b| b.was_engaged || b.was_won)
            .collect();
    }
    if bids.is_empty() {
        return Ok(None);
    }

    let mut parts = vec!["--- HIGH-RATED BIDS FOR REFERENCE ---".to_string()];
    for bid in bids.iter().take(2) {
        let mut status = format!("Rating: {:+}", bid.rating);
        if bid.is_uploaded {
            status.push_str(match bid.upload_source.as_deref() {
                Some("my_win") => " | MY WIN",
                Some("other_freelancer") => " | COMPETITOR WIN",
                _ => " | LIKED",
            });
        } else if bid.was_won {
            status.push_str(" | WON");
        } else if bid.was_engaged {
            status.push_str(" | ENGAGED");
        }

        let text = bid.effective_text();
        if !text.is_empty() {
            parts.push(format!("\n[{status}] {}:", bid.project.title));
            parts.push(truncate_chars(text, 300));
        }
    }
    parts.push("\n--- END REFERENCE ---".to_string());
    Ok(Some(parts.join("\n")))
}

/// Generate a proposal for a project and persist it to the ledger.
///
/// The ledger sits behind a `Mutex` because the web layer shares one
/// connection across handlers.
pub async fn generate_bid(
    generator: &dyn ProposalGenerator,
    ledger: &Mutex<Ledger>,
    library: &PromptLibrary,
    request: &GenerateRequest,
) -> Result<GeneratedBid> {
    // Resolve the prompt template; an unknown requested version falls back
    // to the active one.
    let (prompt_version, template) = {
        let mut guard = ledger.lock().expect("ledger lock poisoned");
        match &request.prompt_version {
            Some(version) => match library.load(version)? {
                Some(content) => (version.clone(), content),
                None => library.load_active(&mut guard)?,
            },
            None => library.load_active(&mut guard)?,
        }
    };

    let project_type = request
        .project
        .project_type
        .clone()
        .unwrap_or_else(|| "other".to_string());
    let profile_key = profile_key_for_project_type(&project_type);
    let profiles = request
        .profiles_path
        .as_deref()
        .map(load_profiles)
        .unwrap_or_else(bidflow_prompts::default_profiles);
    let profile = get_profile(&profiles, profile_key);

    let (milestone_size, milestone_count) =
        milestone_context(request.project.budget_min, request.project.budget_max);

    let language_override = if request.language == "auto" {
        String::new()
    } else {
        format!(
            "Write this proposal in {}.",
            language_name(&request.language)
        )
    };
    let tone_override = if request.tone == "auto" {
        String::new()
    } else {
        format!("Use a {} tone throughout.", request.tone)
    };

    let (analysis_summary, rough_score, automation_potential, manual_work_notes) =
        match &request.analysis {
            Some(analysis) => (
                analysis.summary.clone(),
                format!("{:.1}", analysis.rough_score),
                format!("{:.1}", analysis.automation_potential),
                analysis.manual_work_notes.clone(),
            ),
            None => Default::default(),
        };

    let context = PromptContext {
        project_title: request.project.title.clone(),
        project_description: request.project.description.clone().unwrap_or_default(),
        project_url: request.project.url.clone().unwrap_or_default(),
        analysis_summary,
        rough_score,
        automation_potential,
        manual_work_notes,
        profile_label: profile.label,
        profile_general: profile.general,
        profile_section: profile.section,
        profile_link: profile.link,
        extended_profile: request.extended_profile.clone().unwrap_or_default(),
        milestone_size,
        milestone_count,
        language_override,
        tone_override,
        ..PromptContext::default()
    };
    let mut prompt = context.render(&template);

    if let Some(extra) = request
        .additional_context
        .as_deref()
        .map(str::trim)
        .filter(|extra| !extra.is_empty())
    {
        prompt.push_str(&format!("\n\n## Additional Personal Context\n{extra}\n"));
    }

    if request.include_similar_bids {
        let guard = ledger.lock().expect("ledger lock poisoned");
        if let Some(reference) = similar_bids_context(&guard, &project_type, 2)? {
            prompt.push_str(&format!(
                "\n\n## Reference: Successful past bids for similar projects\n{reference}"
            ));
        }
    }

    debug!(prompt_version, profile_key, "assembled generation prompt");
    let content = generator
        .complete(GENERATION_SYSTEM_PROMPT, &prompt, 0.4)
        .await?;

    let draft = match extract_json_object(&content).map(serde_json::from_value::<Draft>) {
        Some(Ok(draft)) => draft,
        _ => Draft {
            proposal_text: content.trim().to_string(),
            milestone_plan: Some(MilestonePlan {
                size: milestone_size,
                count: milestone_count,
                milestones: Vec::new(),
            }),
            free_demo_reason: "Model returned non-JSON content.".to_string(),
            ..Draft::default()
        },
    };

    let mut project = request.project.clone();
    project.project_type = Some(project_type);
    if project.language.is_none() && !draft.detected_language.is_empty() {
        project.language = Some(draft.detected_language.clone());
    }

    let tone = if !draft.detected_tone.is_empty() {
        draft.detected_tone.clone()
    } else {
        request.tone.clone()
    };
    let new_bid = NewBid {
        project,
        bid_text: draft.proposal_text.clone(),
        milestone_plan: draft.milestone_plan.clone(),
        prompt_version: prompt_version.clone(),
        model_used: Some(generator.model_name().to_string()),
        tone: Some(tone),
    };
    let bid_id = {
        let guard = ledger.lock().expect("ledger lock poisoned");
        guard.create(&new_bid)?
    };
    info!(bid_id, prompt_version, "generated and stored proposal");

    Ok(GeneratedBid {
        bid_id,
        draft,
        prompt_version,
        model_used: generator.model_name().to_string(),
    })
}

/// Generate one proposal per prompt version, collecting per-version
/// failures instead of aborting the batch.
pub async fn generate_versions(
    generator: &dyn ProposalGenerator,
    ledger: &Mutex<Ledger>,
    library: &PromptLibrary,
    request: &GenerateRequest,
    versions: &[String],
) -> Vec<(String, Result<GeneratedBid>)> {
    let mut results = Vec::with_capacity(versions.len());
    for version in versions {
        let versioned = GenerateRequest {
            prompt_version: Some(version.clone()),
            ..request.clone()
        };
        let outcome = generate_bid(generator, ledger, library, &versioned).await;
        results.push((version.clone(), outcome));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidflow_core::UploadSource;
    use bidflow_ledger::UploadedBid;
    use std::fs;
    use tempfile::tempdir;

    struct CannedGenerator {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn last_prompt(&self) -> String {
            self.prompts
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl ProposalGenerator for CannedGenerator {
        async fn complete(
            &self,
            _system: &str,
            user: &str,
            _temperature: f64,
        ) -> Result<String, GenError> {
            self.prompts.lock().expect("lock").push(user.to_string());
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "canned-model"
        }
    }

    fn project(title: &str, project_type: &str) -> ProjectInfo {
        ProjectInfo {
            title: title.to_string(),
            description: Some("Build a data pipeline.".to_string()),
            project_type: Some(project_type.to_string()),
            budget_min: Some(400.0),
            budget_max: Some(800.0),
            ..ProjectInfo::default()
        }
    }

    #[test]
    fn extract_json_handles_plain_fenced_and_embedded() {
        let plain = r#"{"proposal_text": "hi"}"#;
        assert!(extract_json_object(plain).is_some());

        let fenced = "```json\n{\"proposal_text\": \"hi\"}\n```";
        let value = extract_json_object(fenced).expect("fenced");
        assert_eq!(value["proposal_text"], "hi");

        let embedded = "Sure, here you go: {\"proposal_text\": \"hi\"} Hope that helps!";
        assert!(extract_json_object(embedded).is_some());

        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("[1, 2, 3]").is_none());
    }

    #[test]
    fn similar_bids_prefers_uploaded_of_same_type() {
        let ledger = Ledger::in_memory().expect("ledger");
        ledger
            .save_uploaded(&UploadedBid {
                project: project("Scraper win", "scraping"),
                bid_text: "Uploaded scraping bid".to_string(),
                source: UploadSource::OtherFreelancer,
            })
            .expect("upload");
        ledger
            .save_uploaded(&UploadedBid {
                project: project("Web win", "web_app"),
                bid_text: "Uploaded web bid".to_string(),
                source: UploadSource::MyWin,
            })
            .expect("upload");

        let context = similar_bids_context(&ledger, "scraping", 2)
            .expect("query")
            .expect("context");
        assert!(context.contains("COMPETITOR WIN"));
        assert!(context.contains("Scraper win"));
        assert!(!context.contains("Web win"));
    }

    #[test]
    fn similar_bids_falls_back_across_tiers() {
        let ledger = Ledger::in_memory().expect("ledger");
        assert!(similar_bids_context(&ledger, "scraping", 2)
            .expect("query")
            .is_none());

        // Only an unrelated uploaded bid exists; the second tier returns it.
        ledger
            .save_uploaded(&UploadedBid {
                project: project("Web win", "web_app"),
                bid_text: "Uploaded web bid".to_string(),
                source: UploadSource::Liked,
            })
            .expect("upload");
        let context = similar_bids_context(&ledger, "scraping", 2)
            .expect("query")
            .expect("context");
        assert!(context.contains("LIKED"));
    }

    #[test]
    fn reference_text_is_truncated() {
        assert_eq!(truncate_chars("short", 300), "short");
        let long = "x".repeat(400);
        let cut = truncate_chars(&long, 300);
        assert_eq!(cut.chars().count(), 303);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn generate_persists_bid_and_substitutes_placeholders() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        fs::create_dir_all(library.versions_dir()).expect("mkdir");
        fs::write(
            library.versions_dir().join("v1_default.md"),
            "# Prompt Version: v1_default\n# Status: approved\n\n\
             Project: {PROJECT_TITLE}\nPlan: {MILESTONE_COUNT} {MILESTONE_SIZE} milestones\n{TONE_OVERRIDE}",
        )
        .expect("write prompt");

        let generator = CannedGenerator::new(
            r#"{"proposal_text": "I can build this.", "milestone_plan": {"size": "medium", "count": 3, "milestones": []}, "detected_tone": "friendly", "detected_language": "en"}"#,
        );
        let ledger = Mutex::new(Ledger::in_memory().expect("ledger"));
        let mut request = GenerateRequest::new(project("Data pipeline", "data_analysis"));
        request.tone = "formal".to_string();

        let generated = generate_bid(&generator, &ledger, &library, &request)
            .await
            .expect("generate");
        assert_eq!(generated.prompt_version, "v1_default");
        assert_eq!(generated.draft.proposal_text, "I can build this.");

        let prompt = generator.last_prompt();
        assert!(prompt.contains("Project: Data pipeline"));
        assert!(prompt.contains("Plan: 3 medium milestones"));
        assert!(prompt.contains("Use a formal tone throughout."));

        let guard = ledger.lock().expect("lock");
        let stored = guard.get(generated.bid_id).expect("get").expect("stored");
        assert_eq!(stored.bid_text, "I can build this.");
        assert_eq!(stored.prompt_version, "v1_default");
        assert_eq!(stored.tone.as_deref(), Some("friendly"));
        assert_eq!(stored.model_used.as_deref(), Some("canned-model"));
    }

    #[tokio::test]
    async fn analysis_fills_triage_placeholders() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        fs::create_dir_all(library.versions_dir()).expect("mkdir");
        fs::write(
            library.versions_dir().join("v1_triage.md"),
            "# Prompt Version: v1_triage\n# Status: approved\n\n\
             Summary: {ANALYSIS_SUMMARY}\nScore: {ROUGH_SCORE}\nManual: {MANUAL_WORK_NOTES}",
        )
        .expect("write prompt");

        let generator = CannedGenerator::new(r#"{"proposal_text": "ok"}"#);
        let ledger = Mutex::new(Ledger::in_memory().expect("ledger"));
        let mut request = GenerateRequest::new(project("Scrape listings", "scraping"));
        request.analysis = Some(Analysis {
            summary: "Daily scrape of two portals".to_string(),
            rough_score: 8.0,
            manual_work_notes: "Captcha on one portal".to_string(),
            ..Analysis::default()
        });

        generate_bid(&generator, &ledger, &library, &request)
            .await
            .expect("generate");
        let prompt = generator.last_prompt();
        assert!(prompt.contains("Summary: Daily scrape of two portals"));
        assert!(prompt.contains("Score: 8.0"));
        assert!(prompt.contains("Manual: Captcha on one portal"));

        // Without an analysis the placeholders render empty, not literal.
        let request = GenerateRequest::new(project("Scrape listings", "scraping"));
        generate_bid(&generator, &ledger, &library, &request)
            .await
            .expect("generate");
        let prompt = generator.last_prompt();
        assert!(prompt.contains("Summary: \n"));
        assert!(!prompt.contains("{ANALYSIS_SUMMARY}"));
    }

    #[tokio::test]
    async fn generate_versions_stores_one_bid_per_version() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        fs::create_dir_all(library.versions_dir()).expect("mkdir");
        for key in ["v1_short", "v2_story"] {
            fs::write(
                library.versions_dir().join(format!("{key}.md")),
                format!("# Prompt Version: {key}\n# Status: approved\n\n{{PROJECT_TITLE}}"),
            )
            .expect("write prompt");
        }

        let generator = CannedGenerator::new(r#"{"proposal_text": "ok"}"#);
        let ledger = Mutex::new(Ledger::in_memory().expect("ledger"));
        let request = GenerateRequest::new(project("Data pipeline", "data_analysis"));
        let versions = vec!["v1_short".to_string(), "v2_story".to_string()];

        let results = generate_versions(&generator, &ledger, &library, &request, &versions).await;
        assert_eq!(results.len(), 2);
        for (version, outcome) in &results {
            let generated = outcome.as_ref().expect("generated");
            assert_eq!(&generated.prompt_version, version);
        }

        let guard = ledger.lock().expect("lock");
        let stored = guard.recent(10).expect("recent");
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn non_json_output_degrades_to_raw_proposal() {
        let dir = tempdir().expect("tempdir");
        let library = PromptLibrary::new(dir.path());
        let generator = CannedGenerator::new("Dear client, I would love to help.");
        let ledger = Mutex::new(Ledger::in_memory().expect("ledger"));
        let request = GenerateRequest::new(project("Quick fix", "bug_fix"));

        let generated = generate_bid(&generator, &ledger, &library, &request)
            .await
            .expect("generate");
        assert_eq!(
            generated.draft.proposal_text,
            "Dear client, I would love to help."
        );
        let plan = generated.draft.milestone_plan.expect("fallback plan");
        assert_eq!(plan.count, 3);
        assert!(plan.milestones.is_empty());
    }

    #[tokio::test]
    async fn analyze_wraps_non_json_content() {
        let generator = CannedGenerator::new("not json at all");
        let analysis = analyze_project(&generator, &serde_json::json!({"title": "x"}), None)
            .await
            .expect("analyze");
        assert_eq!(analysis.category, "other");
        assert_eq!(analysis.summary, "not json at all");

        let generator = CannedGenerator::new(
            r#"{"summary": "Scrape product data", "category": "scraping", "rough_score": 7}"#,
        );
        let analysis = analyze_project(&generator, &serde_json::json!({"title": "x"}), None)
            .await
            .expect("analyze");
        assert_eq!(analysis.category, "scraping");
        assert_eq!(analysis.rough_score, 7.0);
    }
}
