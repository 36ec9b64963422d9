//! Freelancer.com project search: API client, client-side filters,
//! named presets, and the seen-project store used for deduplication.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "bidflow-search";

pub const API_BASE: &str = "https://www.freelancer.com/api";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(
        "Freelancer credentials are missing. Set FREELANCER_API_KEY or \
         FREELANCER_OAUTH_TOKEN/AccessToken."
    )]
    MissingCredentials,
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("unexpected API response: missing 'projects' list")]
    MalformedResponse,
}

/// Credentials and client settings, read from the environment.
#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    pub api_key: Option<String>,
    pub oauth_token: Option<String>,
    pub timeout_secs: u64,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("FREELANCER_API_KEY").ok().filter(|v| !v.is_empty()),
            oauth_token: std::env::var("FREELANCER_OAUTH_TOKEN")
                .or_else(|_| std::env::var("AccessToken"))
                .ok()
                .filter(|v| !v.is_empty()),
            timeout_secs: std::env::var("BIDFLOW_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}

/// One search request against the active-projects endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub jobs: Vec<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Thin client for the Freelancer projects API.
#[derive(Debug, Clone)]
pub struct FreelancerClient {
    client: reqwest::Client,
    api_key: Option<String>,
    oauth_token: Option<String>,
    base_url: String,
}

impl FreelancerClient {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        Self::with_base_url(config, API_BASE)
    }

    /// Same as [`new`](Self::new) with an overridable base URL, which lets
    /// tests point the client at a local server.
    pub fn with_base_url(
        config: &SearchConfig,
        base_url: impl Into<String>,
    ) -> Result<Self, SearchError> {
        if config.api_key.is_none() && config.oauth_token.is_none() {
            return Err(SearchError::MissingCredentials);
        }
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(std::time::Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            oauth_token: config.oauth_token.clone(),
            base_url: base_url.into(),
        })
    }

    /// Fetch one page of active projects. Returns the raw project objects;
    /// interpretation is left to the filter helpers below.
    pub async fn search_projects(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<JsonValue>, SearchError> {
        let url = format!("{}/projects/0.1/projects/active/", self.base_url);

        let mut params: Vec<(String, String)> = vec![
            ("compact".to_string(), "true".to_string()),
            ("limit".to_string(), query.limit.unwrap_or(50).to_string()),
            ("offset".to_string(), query.offset.unwrap_or(0).to_string()),
        ];
        if let Some(q) = query.query.as_deref().filter(|q| !q.is_empty()) {
            params.push(("query".to_string(), q.to_string()));
        }
        for language in &query.languages {
            params.push(("languages[]".to_string(), language.clone()));
        }
        for country in &query.countries {
            params.push(("countries[]".to_string(), country.clone()));
        }
        for job in &query.jobs {
            params.push(("jobs[]".to_string(), job.to_string()));
        }

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&params);
        if let Some(api_key) = &self.api_key {
            request = request.header("Freelancer-Developer-OAuth-Client-Id", api_key);
        }
        if let Some(token) = &self.oauth_token {
            request = request.header("freelancer-oauth-v1", token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let body: JsonValue = response.json().await?;
        let projects = body
            .get("result")
            .and_then(|r| r.get("projects"))
            .and_then(|p| p.as_array())
            .ok_or(SearchError::MalformedResponse)?;
        debug!(count = projects.len(), "fetched project page");
        Ok(projects.clone())
    }

    /// Fetch up to `pages` consecutive pages, stopping early on an empty
    /// page.
    pub async fn search_pages(
        &self,
        query: &SearchQuery,
        pages: u32,
    ) -> Result<Vec<JsonValue>, SearchError> {
        let per_page = query.limit.unwrap_or(50);
        let mut all = Vec::new();
        let mut offset = query.offset.unwrap_or(0);
        for _ in 0..pages.max(1) {
            let page_query = SearchQuery {
                limit: Some(per_page),
                offset: Some(offset),
                ..query.clone()
            };
            let projects = self.search_projects(&page_query).await?;
            if projects.is_empty() {
                break;
            }
            all.extend(projects);
            offset += per_page;
        }
        Ok(all)
    }
}

// ----- Raw-project field accessors -----

pub fn project_id(project: &JsonValue) -> Option<i64> {
    project.get("id").and_then(|v| v.as_i64())
}

pub fn project_title(project: &JsonValue) -> &str {
    project.get("title").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn project_bid_count(project: &JsonValue) -> Option<i64> {
    project
        .get("bid_stats")
        .and_then(|s| s.get("bid_count"))
        .and_then(|v| v.as_i64())
}

/// Midpoint of the posted budget range; a single bound stands on its own.
pub fn project_avg_budget(project: &JsonValue) -> Option<f64> {
    let budget = project.get("budget")?;
    let minimum = budget.get("minimum").and_then(|v| v.as_f64());
    let maximum = budget.get("maximum").and_then(|v| v.as_f64());
    match (minimum, maximum) {
        (Some(min), Some(max)) => Some((min + max) / 2.0),
        (Some(one), None) | (None, Some(one)) => Some(one),
        (None, None) => None,
    }
}

pub fn project_budget_bounds(project: &JsonValue) -> (Option<f64>, Option<f64>) {
    let budget = project.get("budget");
    (
        budget
            .and_then(|b| b.get("minimum"))
            .and_then(|v| v.as_f64()),
        budget
            .and_then(|b| b.get("maximum"))
            .and_then(|v| v.as_f64()),
    )
}

/// Employer country as ISO code, falling back to the display name.
pub fn project_country(project: &JsonValue) -> Option<&str> {
    let country = project.get("location")?.get("country")?;
    country
        .get("code")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            country
                .get("name")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
        })
}

/// Submission timestamp, checking both field spellings the API uses.
pub fn project_timestamp(project: &JsonValue) -> Option<DateTime<Utc>> {
    let ts = project
        .get("time_submitted")
        .or_else(|| project.get("submitdate"))?
        .as_i64()?;
    Utc.timestamp_opt(ts, 0).single()
}

pub fn project_url(project: &JsonValue) -> Option<String> {
    project
        .get("seo_url")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|seo| format!("https://www.freelancer.com/projects/{seo}"))
}

/// Projects restricted to Preferred Freelancer members cannot be bid on
/// from a regular account.
pub fn is_preferred_only(project: &JsonValue) -> bool {
    let Some(upgrades) = project.get("upgrades") else {
        return false;
    };
    ["pf_only", "preferred_freelancer_only"]
        .iter()
        .any(|flag| upgrades.get(flag).and_then(|v| v.as_bool()).unwrap_or(false))
}

/// Human-readable age relative to `now`.
pub fn format_age(posted: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(posted) = posted else {
        return "unknown".to_string();
    };
    let delta = now - posted;
    if delta < Duration::minutes(1) {
        "just now".to_string()
    } else if delta < Duration::hours(1) {
        format!("{} min ago", delta.num_minutes())
    } else if delta < Duration::days(1) {
        format!("{} h ago", delta.num_hours())
    } else {
        format!("{} d ago", delta.num_days())
    }
}

// ----- Client-side filtering -----

/// Filters applied after the API call. Projects missing the data a rule
/// needs pass that rule rather than getting dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectFilter {
    #[serde(default)]
    pub countries: Vec<String>,
    pub min_budget: Option<f64>,
    pub max_budget: Option<f64>,
    pub posted_within_hours: Option<i64>,
    pub min_bids: Option<i64>,
    pub max_bids: Option<i64>,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &JsonValue, now: DateTime<Utc>) -> bool {
        if let Some(avg) = project_avg_budget(project) {
            if self.min_budget.is_some_and(|min| avg < min) {
                return false;
            }
            if self.max_budget.is_some_and(|max| avg > max) {
                return false;
            }
        }

        if let Some(bids) = project_bid_count(project) {
            if self.min_bids.is_some_and(|min| bids < min) {
                return false;
            }
            if self.max_bids.is_some_and(|max| bids > max) {
                return false;
            }
        }

        if let Some(hours) = self.posted_within_hours.filter(|h| *h > 0) {
            if let Some(posted) = project_timestamp(project) {
                if posted < now - Duration::hours(hours) {
                    return false;
                }
            }
        }

        if is_preferred_only(project) {
            return false;
        }

        if !self.countries.is_empty() {
            if let Some(code) = project_country(project) {
                let code = code.to_uppercase();
                if !self.countries.iter().any(|c| c.to_uppercase() == code) {
                    return false;
                }
            }
        }

        if !self.skills.is_empty() {
            let job_names: Vec<String> = project
                .get("jobs")
                .and_then(|j| j.as_array())
                .map(|jobs| {
                    jobs.iter()
                        .filter_map(|job| {
                            job.get("name")
                                .or_else(|| job.get("seo_url"))
                                .and_then(|v| v.as_str())
                        })
                        .map(|name| name.to_lowercase())
                        .collect()
                })
                .unwrap_or_default();
            if !job_names.is_empty() {
                let matched = self.skills.iter().any(|skill| {
                    let skill = skill.to_lowercase();
                    job_names.iter().any(|name| name.contains(&skill))
                });
                if !matched {
                    return false;
                }
            }
        }

        true
    }

    pub fn apply(&self, projects: Vec<JsonValue>, now: DateTime<Utc>) -> Vec<JsonValue> {
        projects
            .into_iter()
            .filter(|p| self.matches(p, now))
            .collect()
    }
}

// ----- Search presets -----

/// Named query + filter bundle loaded from `config/search_presets.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPreset {
    pub query: Option<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub min_budget: Option<f64>,
    pub max_budget: Option<f64>,
    pub posted_within_hours: Option<i64>,
    pub min_bids: Option<i64>,
    pub max_bids: Option<i64>,
    pub limit: Option<u32>,
    pub pages: Option<u32>,
}

impl SearchPreset {
    pub fn to_query(&self) -> SearchQuery {
        SearchQuery {
            query: self.query.clone(),
            languages: self.languages.clone(),
            countries: self.countries.clone(),
            jobs: Vec::new(),
            limit: self.limit,
            offset: None,
        }
    }

    pub fn to_filter(&self) -> ProjectFilter {
        ProjectFilter {
            countries: self.countries.clone(),
            min_budget: self.min_budget,
            max_budget: self.max_budget,
            posted_within_hours: self.posted_within_hours,
            min_bids: self.min_bids,
            max_bids: self.max_bids,
            skills: self.skills.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PresetsFile {
    #[serde(default)]
    presets: BTreeMap<String, SearchPreset>,
}

/// Load presets from disk; a missing or malformed file yields no presets.
pub fn load_presets(path: &Path) -> BTreeMap<String, SearchPreset> {
    let Ok(text) = fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    match serde_json::from_str::<PresetsFile>(&text) {
        Ok(file) => file.presets,
        Err(err) => {
            debug!(path = %path.display(), %err, "ignoring malformed presets file");
            BTreeMap::new()
        }
    }
}

// ----- Seen-project store -----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub status: String,
    pub last_updated: DateTime<Utc>,
}

/// JSON-file store remembering which project ids earlier searches already
/// surfaced.
#[derive(Debug)]
pub struct SeenStore {
    path: PathBuf,
    entries: BTreeMap<String, SeenEntry>,
}

impl SeenStore {
    /// Load the store; a missing or broken file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        Self { path, entries }
    }

    pub fn contains(&self, project_id: i64) -> bool {
        self.entries.contains_key(&project_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the projects not seen before, marking them `seen_only`.
    pub fn take_new(&mut self, projects: Vec<JsonValue>, now: DateTime<Utc>) -> Vec<JsonValue> {
        let mut fresh = Vec::new();
        for project in projects {
            let Some(id) = project_id(&project) else {
                continue;
            };
            let key = id.to_string();
            if self.entries.contains_key(&key) {
                continue;
            }
            self.entries.insert(
                key,
                SeenEntry {
                    status: "seen_only".to_string(),
                    last_updated: now,
                },
            );
            fresh.push(project);
        }
        fresh
    }

    pub fn status(&self, project_id: i64) -> Option<&str> {
        self.entries
            .get(&project_id.to_string())
            .map(|entry| entry.status.as_str())
    }

    /// Record or promote a project's status, e.g. to `bid` once a
    /// proposal went out.
    pub fn mark(&mut self, project_id: i64, status: &str, now: DateTime<Utc>) {
        self.entries.insert(
            project_id.to_string(),
            SeenEntry {
                status: status.to_string(),
                last_updated: now,
            },
        );
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .context("serializing seen-project store")?;
        fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_project(id: i64, budget_min: f64, budget_max: f64, bids: i64) -> JsonValue {
        json!({
            "id": id,
            "title": format!("Project {id}"),
            "seo_url": format!("sample-{id}"),
            "budget": {"minimum": budget_min, "maximum": budget_max},
            "bid_stats": {"bid_count": bids},
            "time_submitted": Utc::now().timestamp(),
            "location": {"country": {"code": "DE", "name": "Germany"}},
            "jobs": [{"name": "Python"}, {"name": "Web Scraping"}]
        })
    }

    #[test]
    fn missing_credentials_is_an_error() {
        let config = SearchConfig::default();
        assert!(matches!(
            FreelancerClient::new(&config),
            Err(SearchError::MissingCredentials)
        ));
    }

    #[test]
    fn accessors_read_nested_fields() {
        let project = sample_project(42, 100.0, 300.0, 7);
        assert_eq!(project_id(&project), Some(42));
        assert_eq!(project_avg_budget(&project), Some(200.0));
        assert_eq!(project_bid_count(&project), Some(7));
        assert_eq!(project_country(&project), Some("DE"));
        assert_eq!(
            project_url(&project).as_deref(),
            Some("https://www.freelancer.com/projects/sample-42")
        );

        let bare = json!({"id": 1});
        assert_eq!(project_avg_budget(&bare), None);
        assert_eq!(project_country(&bare), None);
        assert!(!is_preferred_only(&bare));
    }

    #[test]
    fn filter_budget_and_bid_bounds() {
        let now = Utc::now();
        let filter = ProjectFilter {
            min_budget: Some(150.0),
            max_bids: Some(10),
            ..ProjectFilter::default()
        };
        assert!(filter.matches(&sample_project(1, 100.0, 300.0, 7), now));
        assert!(!filter.matches(&sample_project(2, 50.0, 100.0, 7), now));
        assert!(!filter.matches(&sample_project(3, 100.0, 300.0, 40), now));
        // Missing budget passes the budget rule.
        assert!(filter.matches(&json!({"id": 4, "bid_stats": {"bid_count": 3}}), now));
    }

    #[test]
    fn filter_drops_preferred_only_and_stale_projects() {
        let now = Utc::now();
        let filter = ProjectFilter {
            posted_within_hours: Some(24),
            ..ProjectFilter::default()
        };

        let mut pf_only = sample_project(1, 100.0, 300.0, 2);
        pf_only["upgrades"] = json!({"pf_only": true});
        assert!(!filter.matches(&pf_only, now));

        let mut stale = sample_project(2, 100.0, 300.0, 2);
        stale["time_submitted"] = json!((now - Duration::hours(48)).timestamp());
        assert!(!filter.matches(&stale, now));

        // No timestamp at all passes the recency rule.
        let mut unknown_age = sample_project(3, 100.0, 300.0, 2);
        unknown_age
            .as_object_mut()
            .expect("object")
            .remove("time_submitted");
        assert!(filter.matches(&unknown_age, now));
    }

    #[test]
    fn filter_country_and_skill_matching() {
        let now = Utc::now();
        let filter = ProjectFilter {
            countries: vec!["de".to_string(), "AT".to_string()],
            skills: vec!["scraping".to_string()],
            ..ProjectFilter::default()
        };
        assert!(filter.matches(&sample_project(1, 100.0, 300.0, 2), now));

        let mut wrong_country = sample_project(2, 100.0, 300.0, 2);
        wrong_country["location"] = json!({"country": {"code": "US"}});
        assert!(!filter.matches(&wrong_country, now));

        let mut wrong_skills = sample_project(3, 100.0, 300.0, 2);
        wrong_skills["jobs"] = json!([{"name": "Logo Design"}]);
        assert!(!filter.matches(&wrong_skills, now));

        // Projects without job tags pass the skill rule.
        let mut untagged = sample_project(4, 100.0, 300.0, 2);
        untagged["jobs"] = json!([]);
        assert!(filter.matches(&untagged, now));
    }

    #[test]
    fn format_age_buckets() {
        let now = Utc::now();
        assert_eq!(format_age(None, now), "unknown");
        assert_eq!(format_age(Some(now - Duration::seconds(20)), now), "just now");
        assert_eq!(format_age(Some(now - Duration::minutes(5)), now), "5 min ago");
        assert_eq!(format_age(Some(now - Duration::hours(3)), now), "3 h ago");
        assert_eq!(format_age(Some(now - Duration::days(2)), now), "2 d ago");
    }

    #[test]
    fn presets_parse_and_convert() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("search_presets.json");
        fs::write(
            &path,
            r#"{
              "presets": {
                "dach_scraping": {
                  "query": "web scraping",
                  "countries": ["DE", "AT", "CH"],
                  "min_budget": 200,
                  "max_bids": 20,
                  "limit": 50,
                  "pages": 2
                }
              }
            }"#,
        )
        .expect("write");

        let presets = load_presets(&path);
        let preset = presets.get("dach_scraping").expect("preset");
        assert_eq!(preset.query.as_deref(), Some("web scraping"));
        assert_eq!(preset.to_filter().max_bids, Some(20));
        assert_eq!(preset.to_query().countries.len(), 3);

        assert!(load_presets(&dir.path().join("missing.json")).is_empty());
        fs::write(&path, "{broken").expect("write");
        assert!(load_presets(&path).is_empty());
    }

    #[test]
    fn seen_store_keeps_only_fresh_projects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data/seen_projects.json");
        let now = Utc::now();

        let mut store = SeenStore::load(&path);
        assert!(store.is_empty());

        let first = store.take_new(
            vec![sample_project(1, 100.0, 300.0, 2), sample_project(2, 100.0, 300.0, 2)],
            now,
        );
        assert_eq!(first.len(), 2);
        store.save().expect("save");

        let mut reloaded = SeenStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(1));
        let second = reloaded.take_new(
            vec![sample_project(2, 100.0, 300.0, 2), sample_project(3, 100.0, 300.0, 2)],
            now,
        );
        assert_eq!(second.len(), 1);
        assert_eq!(project_id(&second[0]), Some(3));
    }

    #[test]
    fn mark_promotes_status_and_survives_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seen_projects.json");
        let now = Utc::now();

        let mut store = SeenStore::load(&path);
        store.take_new(vec![sample_project(7, 100.0, 300.0, 2)], now);
        assert_eq!(store.status(7), Some("seen_only"));

        store.mark(7, "bid", now);
        store.mark(8, "bid", now);
        store.save().expect("save");

        let reloaded = SeenStore::load(&path);
        assert_eq!(reloaded.status(7), Some("bid"));
        assert_eq!(reloaded.status(8), Some("bid"));
        assert_eq!(reloaded.status(9), None);
    }
}
