//! forksync - keep forks in step with upstream and find issues worth fixing
//!
//! ## Commands
//!
//! - `track` / `untrack` / `list`: manage the tracked fleet
//! - `sync`: fetch upstream and fast-forward or merge each fork
//! - `health`: recompute 0-100 health scores from upstream activity
//! - `discover`: rank open upstream issues against a skill profile
//! - `history`: past sync results for one fork
//! - `contributions`: record and summarize what you authored upstream

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn, Level};

use forksync_core::adapters::{AnthropicAnalyzer, GitCli, GitHubClient};
use forksync_core::discovery::AnalysisCache;
use forksync_core::{
    ApiFacade, BatchCoordinator, CancelSignal, Clock, ContributionHistory, DiscoveryEngine,
    EngineConfig, HealthAggregator, HealthSummary, RepositoryStateStore, SkillProfile, SyncEngine,
    SystemClock,
};
use forksync_state::{FsKvStore, KvStore, RepoId, SyncOutcome, TrackedRepository};

#[derive(Parser)]
#[command(name = "forksync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keep forks in sync with upstream and surface contribution opportunities", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON and emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding tracked-repository state and the analysis cache
    #[arg(long, global = true, env = "FORKSYNC_STATE_DIR", default_value = ".forksync")]
    state_dir: PathBuf,

    /// Engine configuration file (JSON); missing keys take defaults
    #[arg(long, global = true, env = "FORKSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Token for the GitHub API
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking a fork
    Track {
        /// Repository id, e.g. "octo/widgets"
        name: String,

        /// Local clone of the fork
        #[arg(short, long)]
        path: PathBuf,

        /// Upstream clone URL
        #[arg(short, long)]
        upstream: String,

        /// URL of the fork itself
        #[arg(long)]
        fork_url: Option<String>,

        /// Branch that tracks upstream
        #[arg(short, long, default_value = "main")]
        branch: String,
    },

    /// Stop tracking a fork (the local clone is left alone)
    Untrack { name: String },

    /// List tracked forks
    List,

    /// Synchronize forks with their upstreams
    Sync {
        /// Forks to sync (default: all tracked)
        names: Vec<String>,

        /// Override the configured concurrency limit
        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Recompute health scores
    Health {
        /// Forks to score (default: all tracked)
        names: Vec<String>,
    },

    /// Rank open upstream issues against a skill profile
    Discover {
        /// Skill weights as name=weight, e.g. --skill documentation=0.9
        #[arg(short, long = "skill", value_parser = parse_skill)]
        skills: Vec<(String, f64)>,

        /// Number of opportunities to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Restrict to these forks (default: all tracked)
        #[arg(long = "repo")]
        repos: Vec<String>,

        /// Anthropic API key
        #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Model used for issue analysis
        #[arg(long, env = "FORKSYNC_MODEL")]
        model: Option<String>,

        /// Raise skill weights with experience from recorded contributions
        #[arg(long)]
        from_history: bool,
    },

    /// Show past sync results for a fork
    History {
        name: String,

        /// Maximum number of results to show, newest last
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Record and summarize issues and pull requests you opened upstream
    Contributions {
        #[command(subcommand)]
        action: ContributionsAction,
    },
}

#[derive(Subcommand)]
enum ContributionsAction {
    /// Fetch everything a GitHub user authored and update the history
    Sync {
        /// GitHub username
        user: String,

        /// Maximum number of result pages to read
        #[arg(long, default_value = "5")]
        max_pages: u32,
    },

    /// Summarize the recorded history
    Stats {
        /// Only count contributions opened in the last N days
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Parse `name=weight`.
fn parse_skill(raw: &str) -> std::result::Result<(String, f64), String> {
    let (name, weight) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=weight, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty skill name in {raw:?}"));
    }
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|e| format!("bad weight in {raw:?}: {e}"))?;
    if !(0.0..=1.0).contains(&weight) {
        return Err(format!("weight must be within 0..=1, got {weight}"));
    }
    Ok((name.to_string(), weight))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Everything a command needs, opened once.
struct App {
    config: EngineConfig,
    kv: Arc<dyn KvStore>,
    store: Arc<RepositoryStateStore>,
    facade: Arc<ApiFacade>,
    github_token: Option<String>,
    json: bool,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = load_config(cli.config.as_deref())?;
        let kv: Arc<dyn KvStore> = Arc::new(
            FsKvStore::new(&cli.state_dir)
                .with_context(|| format!("Failed to open state dir {}", cli.state_dir.display()))?,
        );
        let loaded = RepositoryStateStore::load(Arc::clone(&kv), config.history_limit).await?;
        if let Some(warning) = loaded.warning {
            warn!(error = %warning, "tracked-repository state was unreadable; starting empty");
        }
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let facade = Arc::new(ApiFacade::new(&config, clock));
        Ok(Self {
            config,
            kv,
            store: Arc::new(loaded.store),
            facade,
            github_token: cli.github_token.clone(),
            json: cli.json,
        })
    }

    fn github(&self) -> Arc<GitHubClient> {
        Arc::new(GitHubClient::new(self.github_token.clone()))
    }

    /// Resolve names to ids; empty means the whole fleet.
    fn select(&self, names: &[String]) -> Result<Vec<RepoId>> {
        if names.is_empty() {
            return Ok(self.store.list().into_iter().map(|r| r.id).collect());
        }
        names
            .iter()
            .map(|n| {
                let id = RepoId::new(n.as_str());
                if self.store.contains(&id) {
                    Ok(id)
                } else {
                    bail!("'{}' is not tracked", n)
                }
            })
            .collect()
    }

    async fn contributions(&self) -> Result<ContributionHistory> {
        let loaded = ContributionHistory::load(Arc::clone(&self.kv)).await?;
        if let Some(warning) = loaded.warning {
            warn!(error = %warning, "contribution history was unreadable; starting empty");
        }
        Ok(loaded.history)
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    forksync_core::telemetry::init_tracing(cli.json, level);

    let app = App::open(&cli).await?;

    match cli.command {
        Commands::Track {
            name,
            path,
            upstream,
            fork_url,
            branch,
        } => cmd_track(&app, &name, path, &upstream, fork_url, &branch).await,
        Commands::Untrack { name } => cmd_untrack(&app, &name).await,
        Commands::List => cmd_list(&app),
        Commands::Sync { names, concurrency } => cmd_sync(&app, &names, concurrency).await,
        Commands::Health { names } => cmd_health(&app, &names).await,
        Commands::Discover {
            skills,
            limit,
            repos,
            api_key,
            model,
            from_history,
        } => cmd_discover(&app, skills, limit, &repos, api_key, model, from_history).await,
        Commands::History { name, limit } => cmd_history(&app, &name, limit),
        Commands::Contributions { action } => match action {
            ContributionsAction::Sync { user, max_pages } => {
                cmd_contributions_sync(&app, &user, max_pages).await
            }
            ContributionsAction::Stats { days } => cmd_contributions_stats(&app, days).await,
        },
    }
}

async fn cmd_track(
    app: &App,
    name: &str,
    path: PathBuf,
    upstream: &str,
    fork_url: Option<String>,
    branch: &str,
) -> Result<()> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Local path {} does not exist", path.display()))?;
    let mut repo = TrackedRepository::new(RepoId::new(name), path, upstream, Utc::now())
        .with_branch(branch);
    if let Some(url) = fork_url {
        repo = repo.with_fork_url(url);
    }
    app.store.register(repo.clone()).await?;
    info!(repo = %repo.id, "tracking");

    if app.json {
        return app.print_json(&repo);
    }
    println!("Tracking '{}' ({} -> {})", repo.id, repo.upstream_url, repo.local_path.display());
    Ok(())
}

async fn cmd_untrack(app: &App, name: &str) -> Result<()> {
    let removed = app.store.remove(&RepoId::new(name)).await?;
    if app.json {
        return app.print_json(&removed);
    }
    println!("No longer tracking '{}'", removed.id);
    Ok(())
}

fn cmd_list(app: &App) -> Result<()> {
    let repos = app.store.list();
    if app.json {
        return app.print_json(&repos);
    }
    if repos.is_empty() {
        println!("No tracked forks. Run 'forksync track' first.");
        return Ok(());
    }
    for repo in repos {
        let status = repo
            .sync_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "never synced".to_string());
        let health = repo
            .health_score
            .map(|h| format!("{h:.0}"))
            .unwrap_or_else(|| "-".to_string());
        let last = repo
            .last_sync_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<32} {:<14} health {:>3}  last sync {}",
            repo.id, status, health, last
        );
    }
    Ok(())
}

async fn cmd_sync(app: &App, names: &[String], concurrency: Option<usize>) -> Result<()> {
    let ids = app.select(names)?;
    if ids.is_empty() {
        println!("Nothing to sync.");
        return Ok(());
    }

    let engine = Arc::new(SyncEngine::new(
        Arc::new(GitCli::new()),
        Arc::clone(&app.facade),
        Arc::clone(&app.store),
    ));
    let coordinator = BatchCoordinator::new(engine);

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing in-flight syncs");
            on_interrupt.cancel();
        }
    });

    let limit = concurrency.unwrap_or(app.config.concurrency_limit).max(1);
    let summary = coordinator.sync_all(&ids, limit, &cancel).await;

    if app.json {
        app.print_json(&summary)?;
    } else {
        for result in &summary.results {
            let detail = match result.status {
                SyncOutcome::UpToDate => "up to date".to_string(),
                SyncOutcome::Merged => format!(
                    "merged {} upstream commit(s)",
                    result.commits_behind
                ),
                SyncOutcome::Conflicted => {
                    format!("CONFLICT in {}", result.conflicted_paths.join(", "))
                }
                SyncOutcome::Error => result
                    .error
                    .as_ref()
                    .map(|e| format!("error ({}): {}", e.kind, e.message))
                    .unwrap_or_else(|| "error".to_string()),
            };
            println!("{:<32} {}", result.repo, detail);
        }
        println!();
        println!(
            "{} up to date, {} merged, {} conflicted, {} failed",
            summary.up_to_date, summary.merged, summary.conflicted, summary.errored
        );
    }

    if let Some(fatal) = &summary.fatal {
        bail!("sync aborted: {}", fatal);
    }
    Ok(())
}

async fn cmd_health(app: &App, names: &[String]) -> Result<()> {
    let ids = app.select(names)?;
    let aggregator = HealthAggregator::new(
        Arc::clone(&app.facade),
        app.github(),
        Arc::clone(&app.store),
        app.config.health_weights.clone(),
    );
    let reports = aggregator
        .refresh(&ids, app.config.concurrency_limit)
        .await?;
    let summary = HealthSummary::from_repositories(&app.store.list());

    if app.json {
        return app.print_json(&serde_json::json!({
            "reports": reports,
            "summary": summary,
        }));
    }
    for report in &reports {
        match (report.score, report.status, &report.error) {
            (Some(score), Some(status), _) => {
                println!("{:<32} {:>5.1}  {}", report.repo, score, status)
            }
            (_, _, Some(error)) => println!("{:<32}   n/a  {}", report.repo, error),
            _ => println!("{:<32}   n/a", report.repo),
        }
    }
    println!();
    println!(
        "fleet: {} excellent, {} good, {} fair, {} poor, {} critical, {} unscored",
        summary.excellent, summary.good, summary.fair, summary.poor, summary.critical,
        summary.unscored
    );
    Ok(())
}

async fn cmd_discover(
    app: &App,
    skills: Vec<(String, f64)>,
    limit: usize,
    repos: &[String],
    api_key: Option<String>,
    model: Option<String>,
    from_history: bool,
) -> Result<()> {
    let api_key = api_key.context("ANTHROPIC_API_KEY is required for discover")?;
    let mut analyzer = AnthropicAnalyzer::new(api_key);
    if let Some(model) = model {
        analyzer = analyzer.with_model(model);
    }

    let mut profile = skills
        .into_iter()
        .fold(SkillProfile::new(), |p, (name, weight)| {
            p.with_skill(&name, weight)
        });
    if from_history {
        let history = app.contributions().await?;
        profile = history.enrich_profile(&profile);
        info!(profile = %profile.describe(), "skill profile enriched from contribution history");
    }

    let ids = app.select(repos)?;
    let tracked: Vec<TrackedRepository> = ids.iter().filter_map(|id| app.store.get(id)).collect();

    let cache = Arc::new(AnalysisCache::new(
        Arc::clone(&app.kv),
        Arc::clone(app.facade.clock()),
        app.config.cache_ttl(),
    ));
    let engine = DiscoveryEngine::new(
        Arc::clone(&app.facade),
        app.github(),
        Arc::new(analyzer),
        cache,
        &app.config,
    );
    let report = engine.discover(&tracked, &profile, limit).await?;

    if app.json {
        return app.print_json(&report);
    }
    if report.opportunities.is_empty() {
        println!("No opportunities found.");
    }
    for (rank, opp) in report.opportunities.iter().enumerate() {
        println!(
            "{:>2}. [{:.2}] {} {}",
            rank + 1,
            opp.composite_score,
            opp.issue.identity,
            opp.issue.title
        );
        println!(
            "    {:?}, relevance {:.2}: {}",
            opp.analysis.difficulty, opp.analysis.relevance, opp.analysis.summary
        );
        if let Some(url) = &opp.issue.url {
            println!("    {url}");
        }
    }
    println!();
    println!(
        "{} candidates, {} skipped, {} repositories failed, cache {} hit / {} miss, ${:.4} spent",
        report.candidates_seen,
        report.skipped.len(),
        report.failed_repos.len(),
        report.cache_hits,
        report.cache_misses,
        report.budget.spent_usd
    );
    Ok(())
}

fn cmd_history(app: &App, name: &str, limit: usize) -> Result<()> {
    let history = app.store.history(&RepoId::new(name))?;
    let start = history.len().saturating_sub(limit);
    let recent = &history[start..];

    if app.json {
        return app.print_json(&recent);
    }
    if recent.is_empty() {
        println!("No sync results for '{}'", name);
        return Ok(());
    }
    for result in recent {
        let head = result
            .upstream_head
            .as_deref()
            .map(|h| &h[..8.min(h.len())])
            .unwrap_or("-");
        println!(
            "{}  {:<11} behind {:>3} ahead {:>3}  upstream {}",
            result.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            result.status,
            result.commits_behind,
            result.commits_ahead,
            head
        );
        if let Some(error) = &result.error {
            println!("    {}: {}", error.kind, error.message);
        }
        for path in &result.conflicted_paths {
            println!("    conflict: {path}");
        }
    }
    Ok(())
}

async fn cmd_contributions_sync(app: &App, user: &str, max_pages: u32) -> Result<()> {
    let history = app.contributions().await?;
    let counts = history
        .sync_from(&app.facade, app.github().as_ref(), user, max_pages)
        .await
        .with_context(|| format!("Failed to sync contributions for {user}"))?;

    if app.json {
        return app.print_json(&counts);
    }
    println!(
        "{} fetched, {} new, {} updated ({} recorded)",
        counts.fetched,
        counts.added,
        counts.updated,
        history.len()
    );
    Ok(())
}

async fn cmd_contributions_stats(app: &App, days: Option<u32>) -> Result<()> {
    let history = app.contributions().await?;
    let window = days.map(|d| chrono::Duration::days(i64::from(d)));
    let stats = history.stats(Utc::now(), window);

    if app.json {
        return app.print_json(&stats);
    }
    if stats.total == 0 {
        println!("No contributions recorded. Run 'forksync contributions sync <user>' first.");
        return Ok(());
    }
    println!(
        "{} contributions ({} pull requests, {} issues) across {} repositories",
        stats.total, stats.pull_requests, stats.issues, stats.repositories
    );
    println!(
        "{} open, {} closed, {} merged; average impact {:.2}",
        stats.open, stats.closed, stats.merged, stats.average_impact
    );
    if !stats.skills.is_empty() {
        let skills: Vec<&str> = stats.skills.iter().map(String::as_str).collect();
        println!("skills: {}", skills.join(", "));
    }
    for (month, count) in &stats.timeline {
        println!("  {month}  {count}");
    }
    println!();
    for c in &stats.recent {
        println!(
            "{:<8} {}#{} {} ({:.2})",
            c.state, c.repo, c.number, c.title, c.impact
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skill_parsing() {
        assert_eq!(
            parse_skill("documentation=0.9").unwrap(),
            ("documentation".to_string(), 0.9)
        );
        assert!(parse_skill("rust").is_err());
        assert!(parse_skill("=0.5").is_err());
        assert!(parse_skill("rust=1.5").is_err());
        assert!(parse_skill("rust=lots").is_err());
    }

    #[test]
    fn cli_parses_discover_flags() {
        let cli = Cli::try_parse_from([
            "forksync",
            "--state-dir",
            "/tmp/fs",
            "discover",
            "--skill",
            "docs=0.9",
            "--skill",
            "rust=0.4",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.state_dir, PathBuf::from("/tmp/fs"));
        match cli.command {
            Commands::Discover { skills, limit, .. } => {
                assert_eq!(skills.len(), 2);
                assert_eq!(limit, 5);
            }
            _ => panic!("expected discover"),
        }
    }

    #[test]
    fn cli_parses_contribution_commands() {
        let cli =
            Cli::try_parse_from(["forksync", "contributions", "stats", "--days", "30"]).unwrap();
        match cli.command {
            Commands::Contributions {
                action: ContributionsAction::Stats { days },
            } => assert_eq!(days, Some(30)),
            _ => panic!("expected contributions stats"),
        }

        let cli = Cli::try_parse_from(["forksync", "contributions", "sync", "mona"]).unwrap();
        match cli.command {
            Commands::Contributions {
                action: ContributionsAction::Sync { user, max_pages },
            } => {
                assert_eq!(user, "mona");
                assert_eq!(max_pages, 5);
            }
            _ => panic!("expected contributions sync"),
        }

        let cli = Cli::try_parse_from(["forksync", "discover", "--from-history"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Discover {
                from_history: true,
                ..
            }
        ));
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forksync.json");
        std::fs::write(&path, r#"{"concurrency_limit": 8, "retry": {"max_attempts": 5}}"#)
            .unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.concurrency_limit, 8);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base_ms, 500);
        assert_eq!(config.history_limit, 20);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forksync.json");
        std::fs::write(&path, r#"{"concurrency_limit": 0}"#).unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
