use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use bidflow_core::{OutcomeUpdate, ProjectInfo, RatingKind, UploadSource};
use bidflow_gen::{analyze_project, Analysis, GenConfig, GenerateRequest, OpenAiClient};
use bidflow_ledger::{Ledger, UploadedBid, DEFAULT_DB_PATH};
use bidflow_prompts::PromptLibrary;
use bidflow_search::{
    format_age, load_presets, project_avg_budget, project_bid_count, project_country, project_id,
    project_timestamp, project_title, project_url, FreelancerClient, ProjectFilter, SearchConfig,
    SearchQuery, SeenStore,
};

#[derive(Debug, Parser)]
#[command(name = "bidflow")]
#[command(about = "Freelance bid assistant: search projects, generate proposals, track outcomes")]
struct Cli {
    /// Ledger database path
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    db: PathBuf,

    /// Prompt templates directory
    #[arg(long, global = true, default_value = "prompts")]
    prompts_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Search for new projects on Freelancer.com
    Search(SearchArgs),
    /// Summarize and score a raw project with the cheap model
    Analyze(AnalyzeArgs),
    /// Generate a proposal for a project and store it in the ledger
    Generate(GenerateArgs),
    /// Rate a stored bid (bad, regular, good, winning)
    Rate { id: i64, rating: String },
    /// Record the outcome of a bid
    Outcome(OutcomeArgs),
    /// Save the final (edited) text that was actually submitted
    FinalText {
        id: i64,
        /// Final text, or @path to read it from a file
        text: String,
        /// Feedback note on why the text was changed
        #[arg(long)]
        notes: Option<String>,
    },
    /// Import an external winning bid as training material
    Import(ImportArgs),
    /// Show aggregate learning statistics
    Stats,
    /// Manage prompt versions
    Prompts {
        #[command(subcommand)]
        command: PromptsCommand,
    },
    /// Serve the review dashboard
    Serve,
}

#[derive(Debug, clap::Args)]
struct SearchArgs {
    /// Named preset from config/search_presets.json
    #[arg(long)]
    preset: Option<String>,
    #[arg(short, long)]
    query: Option<String>,
    /// Comma-separated ISO country codes, e.g. US,CA
    #[arg(long)]
    countries: Option<String>,
    /// Comma-separated language codes, e.g. en,de
    #[arg(long)]
    languages: Option<String>,
    /// Comma-separated skill names matched against project job tags
    #[arg(long)]
    skills: Option<String>,
    #[arg(long)]
    min_budget: Option<f64>,
    #[arg(long)]
    max_budget: Option<f64>,
    #[arg(long)]
    posted_within_hours: Option<i64>,
    #[arg(long)]
    min_bids: Option<i64>,
    #[arg(long)]
    max_bids: Option<i64>,
    /// Projects per API page
    #[arg(long)]
    limit: Option<u32>,
    /// Number of pages to fetch
    #[arg(long)]
    pages: Option<u32>,
    /// Write the shortlisted (new) projects to a JSON file
    #[arg(long)]
    output_json: Option<PathBuf>,
    /// Seen-project store path
    #[arg(long, default_value = "data/seen_projects.json")]
    seen_store: PathBuf,
    /// Presets file path
    #[arg(long, default_value = "config/search_presets.json")]
    presets: PathBuf,
}

#[derive(Debug, clap::Args)]
struct AnalyzeArgs {
    /// Project JSON, or @path to read it from a file (e.g. a search
    /// --output_json entry)
    project: String,
    /// Model override
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, clap::Args)]
struct GenerateArgs {
    #[arg(long)]
    title: String,
    /// Description text, or @path to read it from a file
    #[arg(long)]
    description: String,
    #[arg(long, default_value = "other")]
    project_type: String,
    #[arg(long, default_value = "auto")]
    language: String,
    #[arg(long, default_value = "auto")]
    tone: String,
    /// Specific prompt version (defaults to the active one)
    #[arg(long)]
    prompt_version: Option<String>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    project_id: Option<i64>,
    #[arg(long)]
    budget_min: Option<f64>,
    #[arg(long)]
    budget_max: Option<f64>,
    /// Run the cheap-model triage first and feed it into the prompt
    #[arg(long)]
    analyze: bool,
    /// Comma-separated prompt versions to generate one bid each with
    #[arg(long)]
    versions: Option<String>,
    /// Skip the similar-bids reference block
    #[arg(long)]
    no_similar: bool,
    /// Extra personal context appended to the prompt
    #[arg(long)]
    context: Option<String>,
    /// Profiles file path
    #[arg(long, default_value = "config/profiles.json")]
    profiles: PathBuf,
    /// Model override
    #[arg(long)]
    model: Option<String>,
    /// Seen-project store updated to `bid` status when --project-id is set
    #[arg(long, default_value = "data/seen_projects.json")]
    seen_store: PathBuf,
}

#[derive(Debug, clap::Args)]
struct OutcomeArgs {
    id: i64,
    /// pending, viewed, engaged, won, lost
    outcome: String,
    #[arg(long)]
    viewed: bool,
    #[arg(long)]
    engaged: bool,
    #[arg(long)]
    won: bool,
    #[arg(long)]
    high_rank: bool,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Debug, clap::Args)]
struct ImportArgs {
    #[arg(long)]
    title: String,
    /// Bid text, or @path to read it from a file
    #[arg(long)]
    text: String,
    /// my_win, other_freelancer, or liked
    #[arg(long)]
    source: String,
    #[arg(long)]
    project_type: Option<String>,
    #[arg(long)]
    url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum PromptsCommand {
    /// List known prompt versions with their statistics
    List,
    /// Activate a prompt version
    Activate { key: String },
    /// Mark a prompt version as approved
    Approve { key: String },
}

fn read_text_arg(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))
        }
        None => Ok(value.to_string()),
    }
}

fn parse_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Search(args) => run_search(args).await,
        Commands::Analyze(args) => run_analyze(args).await,
        Commands::Generate(args) => run_generate(&cli.db, &cli.prompts_dir, args).await,
        Commands::Rate { id, rating } => run_rate(&cli.db, id, &rating),
        Commands::Outcome(args) => run_outcome(&cli.db, args),
        Commands::FinalText { id, text, notes } => {
            run_final_text(&cli.db, id, &text, notes.as_deref())
        }
        Commands::Import(args) => run_import(&cli.db, args),
        Commands::Stats => run_stats(&cli.db),
        Commands::Prompts { command } => run_prompts(&cli.db, &cli.prompts_dir, command),
        Commands::Serve => bidflow_web::serve_from_env().await,
    }
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let preset = args
        .preset
        .as_deref()
        .map(|name| {
            load_presets(&args.presets)
                .remove(name)
                .with_context(|| format!("preset '{name}' not found in {}", args.presets.display()))
        })
        .transpose()?
        .unwrap_or_default();

    // Command-line options override preset values.
    let countries = {
        let cli_countries = parse_csv(args.countries.as_deref());
        if cli_countries.is_empty() {
            preset.countries.clone()
        } else {
            cli_countries
        }
    };
    let languages = {
        let cli_languages = parse_csv(args.languages.as_deref());
        if cli_languages.is_empty() {
            preset.languages.clone()
        } else {
            cli_languages
        }
    };
    let skills = {
        let cli_skills = parse_csv(args.skills.as_deref());
        if cli_skills.is_empty() {
            preset.skills.clone()
        } else {
            cli_skills
        }
    };

    let query = SearchQuery {
        query: args.query.clone().or_else(|| preset.query.clone()),
        languages,
        countries: countries.clone(),
        jobs: Vec::new(),
        limit: args.limit.or(preset.limit),
        offset: None,
    };
    let filter = ProjectFilter {
        countries,
        min_budget: args.min_budget.or(preset.min_budget),
        max_budget: args.max_budget.or(preset.max_budget),
        posted_within_hours: args.posted_within_hours.or(preset.posted_within_hours),
        min_bids: args.min_bids.or(preset.min_bids),
        max_bids: args.max_bids.or(preset.max_bids),
        skills,
    };
    let pages = args.pages.or(preset.pages).unwrap_or(1);

    let client = FreelancerClient::new(&SearchConfig::from_env())?;
    let projects = client.search_pages(&query, pages).await?;
    let now = Utc::now();
    let filtered = filter.apply(projects, now);

    let mut seen = SeenStore::load(&args.seen_store);
    let mut fresh = seen.take_new(filtered, now);
    seen.save()?;

    fresh.sort_by_key(|p| std::cmp::Reverse(project_timestamp(p)));

    if let Some(output_path) = &args.output_json {
        if !fresh.is_empty() {
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let payload = serde_json::json!({
                "generated_at": now,
                "preset": args.preset,
                "query": query.query,
                "count": fresh.len(),
                "projects": fresh,
            });
            std::fs::write(output_path, serde_json::to_string_pretty(&payload)?)
                .with_context(|| format!("writing {}", output_path.display()))?;
        }
    }

    for project in &fresh {
        let id = project_id(project).unwrap_or_default();
        println!("[{id}] {}", project_title(project));

        let mut parts = Vec::new();
        if let Some(avg) = project_avg_budget(project) {
            parts.push(format!("~{avg:.0}"));
        }
        if let Some(bids) = project_bid_count(project) {
            parts.push(format!("{bids} bids"));
        }
        let age = format_age(project_timestamp(project), now);
        if age != "unknown" {
            parts.push(age);
        }
        if let Some(country) = project_country(project) {
            parts.push(country.to_string());
        }
        if !parts.is_empty() {
            println!("    {}", parts.join(" | "));
        }
        if let Some(url) = project_url(project) {
            println!("    {url}");
        }
        println!();
    }
    println!("{} new project(s)", fresh.len());
    Ok(())
}

async fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let config = GenConfig::from_env();
    let model = args.model.clone().unwrap_or_else(|| config.cheap_model.clone());
    let generator = OpenAiClient::new(&config, model)?;

    let text = read_text_arg(&args.project)?;
    let project: serde_json::Value =
        serde_json::from_str(&text).context("parsing project JSON")?;

    let analysis = analyze_project(&generator, &project, None).await?;
    print_analysis(&analysis);
    Ok(())
}

fn print_analysis(analysis: &Analysis) {
    println!(
        "[{}] score {:.1} | automation {:.1}",
        analysis.category, analysis.rough_score, analysis.automation_potential
    );
    println!("{}", analysis.summary);
    if !analysis.manual_work_notes.is_empty() {
        println!("manual work: {}", analysis.manual_work_notes);
    }
    if !analysis.reasons.is_empty() {
        println!("reasons: {}", analysis.reasons);
    }
    if !analysis.risks.is_empty() {
        println!("risks: {}", analysis.risks);
    }
}

async fn run_generate(db: &PathBuf, prompts_dir: &PathBuf, args: GenerateArgs) -> Result<()> {
    let config = GenConfig::from_env();
    let model = args.model.clone().unwrap_or_else(|| config.cheap_model.clone());
    let generator = OpenAiClient::new(&config, model)?;

    let ledger = Mutex::new(Ledger::open(db)?);
    let library = PromptLibrary::new(prompts_dir);

    let project = ProjectInfo {
        project_id: args.project_id,
        title: args.title,
        url: args.url,
        description: Some(read_text_arg(&args.description)?),
        project_type: Some(args.project_type),
        language: None,
        budget_min: args.budget_min,
        budget_max: args.budget_max,
    };

    let analysis = if args.analyze {
        let raw = serde_json::to_value(&project).context("serializing project")?;
        let analysis = analyze_project(&generator, &raw, None).await?;
        print_analysis(&analysis);
        println!();
        Some(analysis)
    } else {
        None
    };

    let request = GenerateRequest {
        project,
        language: args.language,
        tone: args.tone,
        prompt_version: args.prompt_version,
        include_similar_bids: !args.no_similar,
        additional_context: args.context,
        extended_profile: None,
        profiles_path: Some(args.profiles),
        analysis,
    };

    let versions = parse_csv(args.versions.as_deref());
    if versions.is_empty() {
        let generated = bidflow_gen::generate_bid(&generator, &ledger, &library, &request).await?;
        print_generated(&generated);
    } else {
        for (version, outcome) in
            bidflow_gen::generate_versions(&generator, &ledger, &library, &request, &versions)
                .await
        {
            match outcome {
                Ok(generated) => print_generated(&generated),
                Err(err) => println!("{version}: generation failed: {err:#}"),
            }
            println!();
        }
    }

    if let Some(project_id) = args.project_id {
        let mut seen = SeenStore::load(&args.seen_store);
        seen.mark(project_id, "bid", Utc::now());
        seen.save()?;
    }
    Ok(())
}

fn print_generated(generated: &bidflow_gen::GeneratedBid) {
    println!(
        "bid #{} (prompt {}, model {})",
        generated.bid_id, generated.prompt_version, generated.model_used
    );
    println!("\n{}", generated.draft.proposal_text);
    if let Some(plan) = &generated.draft.milestone_plan {
        println!("\nMilestones ({}, {}):", plan.size.as_str(), plan.count);
        for milestone in &plan.milestones {
            println!("  - {}: {}", milestone.title, milestone.description);
        }
    }
}

fn run_rate(db: &PathBuf, id: i64, rating: &str) -> Result<()> {
    let Some(kind) = RatingKind::parse(rating) else {
        bail!("unknown rating '{rating}' (expected bad, regular, good, or winning)");
    };
    let ledger = Ledger::open(db)?;
    match ledger.rate(id, kind)? {
        Some(rating) => println!("bid #{id} rated {} -> {rating:+}", kind.as_str()),
        None => bail!("bid #{id} not found"),
    }
    Ok(())
}

fn run_outcome(db: &PathBuf, args: OutcomeArgs) -> Result<()> {
    let ledger = Ledger::open(db)?;
    let update = OutcomeUpdate {
        outcome: args.outcome.clone(),
        was_viewed: args.viewed,
        was_engaged: args.engaged,
        was_won: args.won,
        was_high_rank: args.high_rank,
        notes: args.notes,
    };
    if !ledger.update_outcome(args.id, &update)? {
        bail!("bid #{} not found", args.id);
    }
    println!("bid #{} outcome set to {}", args.id, args.outcome);
    Ok(())
}

fn run_final_text(db: &PathBuf, id: i64, text: &str, notes: Option<&str>) -> Result<()> {
    let ledger = Ledger::open(db)?;
    if !ledger.save_final_text(id, &read_text_arg(text)?, notes)? {
        bail!("bid #{id} not found");
    }
    println!("bid #{id} final text saved");
    Ok(())
}

fn run_import(db: &PathBuf, args: ImportArgs) -> Result<()> {
    let Some(source) = UploadSource::parse(&args.source) else {
        bail!(
            "unknown source '{}' (expected my_win, other_freelancer, or liked)",
            args.source
        );
    };
    let ledger = Ledger::open(db)?;
    let bid_id = ledger.save_uploaded(&UploadedBid {
        project: ProjectInfo {
            title: args.title,
            url: args.url,
            project_type: args.project_type,
            ..ProjectInfo::default()
        },
        bid_text: read_text_arg(&args.text)?,
        source,
    })?;
    println!("imported as bid #{bid_id} (rating {:+})", source.rating());
    Ok(())
}

fn run_stats(db: &PathBuf) -> Result<()> {
    let ledger = Ledger::open(db)?;
    let stats = ledger.learning_stats()?;
    print!("{}", format_stats(&stats));
    Ok(())
}

fn format_stats(stats: &bidflow_ledger::LearningStats) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} bids: {} won, {} engaged, {} viewed, {} pending",
        stats.total_bids, stats.won, stats.engaged, stats.viewed, stats.pending
    );
    // win_rate and engagement_rate are already percentages.
    let _ = writeln!(
        out,
        "win rate {:.1}% | engagement {:.1}% | mean rating {:+.1}",
        stats.win_rate, stats.engagement_rate, stats.mean_rating
    );
    let _ = writeln!(
        out,
        "{} high-rated, {} low-rated",
        stats.high_rated, stats.low_rated
    );
    if !stats.by_type.is_empty() {
        let _ = writeln!(out, "\nby project type:");
        for row in &stats.by_type {
            let _ = writeln!(
                out,
                "  {:<14} {:>4} bids  {:>3} won  {:>3} engaged  mean {:+.1}",
                row.project_type, row.total, row.won, row.engaged, row.mean_rating
            );
        }
    }
    out
}

fn run_prompts(db: &PathBuf, prompts_dir: &PathBuf, command: PromptsCommand) -> Result<()> {
    let mut ledger = Ledger::open(db)?;
    let library = PromptLibrary::new(prompts_dir);
    match command {
        PromptsCommand::List => {
            library.sync_to_ledger(&mut ledger)?;
            for version in ledger.prompt_versions()? {
                let mut flags = Vec::new();
                if version.is_active {
                    flags.push("active");
                }
                if version.is_approved {
                    flags.push("approved");
                }
                println!(
                    "{:<24} {:<28} {:>4} bids  {:>3} won  {:>5.1}%  {}",
                    version.version_key,
                    version.name,
                    version.total_bids,
                    version.won_bids,
                    version.success_rate * 100.0,
                    flags.join(", ")
                );
            }
        }
        PromptsCommand::Activate { key } => {
            if !library.set_active(&mut ledger, &key)? {
                bail!("prompt version '{key}' not found");
            }
            println!("'{key}' is now the active prompt version");
        }
        PromptsCommand::Approve { key } => {
            library.sync_to_ledger(&mut ledger)?;
            if !ledger.approve_prompt_version(&key)? {
                bail!("prompt version '{key}' not found");
            }
            println!("'{key}' approved");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidflow_core::NewBid;

    #[test]
    fn stats_output_keeps_percentages_unscaled() {
        let ledger = Ledger::in_memory().expect("ledger");
        for title in ["one", "two"] {
            ledger
                .create(&NewBid {
                    project: ProjectInfo {
                        title: title.to_string(),
                        project_type: Some("web_app".to_string()),
                        ..ProjectInfo::default()
                    },
                    bid_text: "proposal".to_string(),
                    milestone_plan: None,
                    prompt_version: "v1".to_string(),
                    model_used: None,
                    tone: None,
                })
                .expect("create");
        }
        let won = ledger.recent(1).expect("recent")[0].id;
        ledger
            .update_outcome(
                won,
                &OutcomeUpdate {
                    outcome: "won".to_string(),
                    was_won: true,
                    ..OutcomeUpdate::default()
                },
            )
            .expect("outcome");

        let output = format_stats(&ledger.learning_stats().expect("stats"));
        assert!(output.contains("win rate 50.0%"));
        assert!(!output.contains("5000.0%"));
    }
}
