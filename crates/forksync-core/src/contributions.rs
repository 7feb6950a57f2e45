//! Contribution history: issues and pull requests the user already authored
//! upstream.
//!
//! Records are written through to the [`KvStore`] one key per contribution,
//! keyed `owner/name#number`. The history feeds [`ContributionStats`] and
//! [`ContributionHistory::enrich_profile`], which folds past experience into
//! the [`SkillProfile`] handed to discovery.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use forksync_state::{Contribution, ContributionKind, ContributionState, KvStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discovery::{canonical_label, SkillProfile};
use crate::error::{ForkSyncError, Result};
use crate::obs;
use crate::ports::{AuthoredItem, ContributionSource};
use crate::provider::{ApiFacade, Provider};

pub const CONTRIBUTIONS_NAMESPACE: &str = "contributions";

/// Labels that name a skill outright.
const SKILL_LABELS: &[&str] = &[
    "python",
    "javascript",
    "typescript",
    "java",
    "c++",
    "go",
    "rust",
    "react",
    "vue",
    "angular",
    "node",
    "django",
    "flask",
    "fastapi",
    "docker",
    "kubernetes",
    "aws",
    "azure",
    "gcp",
    "database",
    "api",
    "frontend",
    "backend",
    "devops",
    "testing",
    "documentation",
];

/// Whole words in a title or body that imply a skill.
const KEYWORD_SKILLS: &[(&str, &str)] = &[
    ("python", "python"),
    ("py", "python"),
    ("javascript", "javascript"),
    ("js", "javascript"),
    ("node", "javascript"),
    ("typescript", "typescript"),
    ("ts", "typescript"),
    ("java", "java"),
    ("rust", "rust"),
    ("cargo", "rust"),
    ("react", "frontend"),
    ("vue", "frontend"),
    ("angular", "frontend"),
    ("api", "api"),
    ("rest", "api"),
    ("graphql", "api"),
    ("docker", "devops"),
    ("kubernetes", "devops"),
    ("k8s", "devops"),
];

/// Canonical labels that mark work as consequential.
const HIGH_IMPACT_LABELS: &[&str] = &["bug", "feature", "security", "performance"];

/// Ceiling on a weight learned from history alone.
const MAX_EXPERIENCE_WEIGHT: f64 = 0.8;

/// 0-1 estimate of how much a contribution mattered.
///
/// Pull requests start at 0.3, issues at 0.1. Discussion adds up to 0.2
/// (0.02 per comment), reactions up to 0.1 (0.01 each), a high-impact label
/// 0.1 and a resolved item 0.2.
pub fn impact_score(item: &AuthoredItem) -> f64 {
    let mut score = if item.is_pull_request { 0.3 } else { 0.1 };
    score += (f64::from(item.comments) * 0.02).min(0.2);
    score += (f64::from(item.reactions) * 0.01).min(0.1);
    if item
        .labels
        .iter()
        .any(|l| HIGH_IMPACT_LABELS.contains(&canonical_label(l).as_str()))
    {
        score += 0.1;
    }
    if item.closed {
        score += 0.2;
    }
    score.min(1.0)
}

/// Skills evidenced by an item's labels and text, as canonical names.
pub fn extract_skills(item: &AuthoredItem) -> BTreeSet<String> {
    let mut skills: BTreeSet<String> = item
        .labels
        .iter()
        .map(|l| canonical_label(l))
        .filter(|l| SKILL_LABELS.contains(&l.as_str()))
        .collect();

    let text = format!("{} {}", item.title, item.body).to_lowercase();
    let words: BTreeSet<&str> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '+'))
        .filter(|w| !w.is_empty())
        .collect();
    for (word, skill) in KEYWORD_SKILLS {
        if words.contains(word) {
            skills.insert((*skill).to_string());
        }
    }
    skills
}

/// Build the persisted record for one authored item.
pub fn to_contribution(item: AuthoredItem) -> Contribution {
    let impact = impact_score(&item);
    let skills = extract_skills(&item);
    let kind = if item.is_pull_request {
        ContributionKind::PullRequest
    } else {
        ContributionKind::Issue
    };
    let state = match (item.closed, item.merged && item.is_pull_request) {
        (_, true) => ContributionState::Merged,
        (true, false) => ContributionState::Closed,
        (false, false) => ContributionState::Open,
    };
    Contribution {
        repo: item.identity.repo,
        number: item.identity.number,
        title: item.title,
        url: item.url,
        kind,
        state,
        labels: item.labels,
        skills,
        impact,
        comments: item.comments,
        reactions: item.reactions,
        created_at: item.created_at,
        updated_at: item.updated_at,
    }
}

/// Aggregate view over the history, optionally limited to a recent window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributionStats {
    pub total: usize,
    pub issues: usize,
    pub pull_requests: usize,
    pub open: usize,
    pub closed: usize,
    pub merged: usize,
    pub repositories: usize,
    pub skills: BTreeSet<String>,
    pub total_impact: f64,
    pub average_impact: f64,
    /// Contributions opened per `YYYY-MM`.
    pub timeline: BTreeMap<String, usize>,
    /// Up to ten, most recently updated first.
    pub recent: Vec<Contribution>,
}

/// How often a skill shows up in past work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillExperience {
    pub contributions: usize,
    pub total_impact: f64,
}

impl SkillExperience {
    /// Profile weight this experience alone justifies.
    pub fn weight(&self) -> f64 {
        (self.total_impact / 2.0).min(MAX_EXPERIENCE_WEIGHT)
    }
}

/// Counts from one [`ContributionHistory::sync_from`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionSync {
    pub fetched: usize,
    pub added: usize,
    pub updated: usize,
}

/// Result of [`ContributionHistory::load`].
pub struct LoadedHistory {
    pub history: ContributionHistory,
    /// `Some(CorruptState)` when persisted history was unreadable and
    /// the history started empty.
    pub warning: Option<ForkSyncError>,
}

pub struct ContributionHistory {
    kv: Arc<dyn KvStore>,
    records: RwLock<BTreeMap<String, Contribution>>,
    writer: tokio::sync::Mutex<()>,
}

impl ContributionHistory {
    pub fn empty(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            records: RwLock::new(BTreeMap::new()),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Read every persisted contribution. Unreadable history is cleared and
    /// reported as a warning, the same way tracked-repository state is.
    pub async fn load(kv: Arc<dyn KvStore>) -> Result<LoadedHistory> {
        let history = Self::empty(kv);
        match history.read_all().await {
            Ok(records) => {
                debug!(count = records.len(), "loaded contribution history");
                *history.records.write().unwrap_or_else(|e| e.into_inner()) = records;
                Ok(LoadedHistory {
                    history,
                    warning: None,
                })
            }
            Err(detail) => {
                obs::emit_state_reinitialized(&detail);
                history.kv.clear(CONTRIBUTIONS_NAMESPACE).await?;
                Ok(LoadedHistory {
                    history,
                    warning: Some(ForkSyncError::CorruptState { detail }),
                })
            }
        }
    }

    async fn read_all(&self) -> std::result::Result<BTreeMap<String, Contribution>, String> {
        let keys = self
            .kv
            .list_keys(CONTRIBUTIONS_NAMESPACE)
            .await
            .map_err(|e| e.to_string())?;
        let mut records = BTreeMap::new();
        for key in keys {
            let bytes = match self.kv.get(CONTRIBUTIONS_NAMESPACE, &key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => return Err(e.to_string()),
            };
            let record: Contribution = serde_json::from_slice(&bytes)
                .map_err(|e| format!("contribution {key}: {e}"))?;
            if record.key() != key {
                return Err(format!("contribution {key} claims {}", record.key()));
            }
            records.insert(key, record);
        }
        Ok(records)
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every contribution, most recently updated first.
    pub fn list(&self) -> Vec<Contribution> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Contribution> = records.values().cloned().collect();
        all.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.repo.cmp(&b.repo))
                .then_with(|| a.number.cmp(&b.number))
        });
        all
    }

    /// Insert or replace by `(repo, number)`. Returns the previous record.
    ///
    /// Persisted before it becomes visible; an unchanged record is not
    /// rewritten.
    pub async fn record(&self, contribution: Contribution) -> Result<Option<Contribution>> {
        let _guard = self.writer.lock().await;
        let key = contribution.key();
        let previous = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records.get(&key).cloned()
        };
        if previous.as_ref() == Some(&contribution) {
            return Ok(previous);
        }
        let bytes = serde_json::to_vec(&contribution)?;
        self.kv
            .put(CONTRIBUTIONS_NAMESPACE, &key, &bytes, None)
            .await?;
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, contribution);
        Ok(previous)
    }

    /// Pull everything `author` opened from `source` and fold it in.
    ///
    /// Reads up to `max_pages` pages through the facade. Nothing is recorded
    /// unless every page arrived.
    pub async fn sync_from(
        &self,
        facade: &ApiFacade,
        source: &dyn ContributionSource,
        author: &str,
        max_pages: u32,
    ) -> Result<ContributionSync> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        for _ in 0..max_pages.max(1) {
            let page = facade
                .call(Provider::IssueTracker, "authored_by", || {
                    source.authored_by(author, token.as_deref())
                })
                .await?;
            items.extend(page.items);
            match page.next_page {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let mut counts = ContributionSync {
            fetched: items.len(),
            ..ContributionSync::default()
        };
        for item in items {
            let contribution = to_contribution(item);
            match self.record(contribution.clone()).await? {
                None => counts.added += 1,
                Some(previous) if previous != contribution => counts.updated += 1,
                Some(_) => {}
            }
        }
        obs::emit_contributions_synced(author, counts.fetched, counts.added, counts.updated);
        Ok(counts)
    }

    /// Statistics over contributions opened within `window` of `now`, or
    /// over everything when `window` is `None`.
    pub fn stats(&self, now: DateTime<Utc>, window: Option<ChronoDuration>) -> ContributionStats {
        let selected: Vec<Contribution> = self
            .list()
            .into_iter()
            .filter(|c| match window {
                Some(w) => c.created_at >= now - w,
                None => true,
            })
            .collect();

        let mut stats = ContributionStats {
            total: selected.len(),
            ..ContributionStats::default()
        };
        let mut repos = BTreeSet::new();
        for c in &selected {
            match c.kind {
                ContributionKind::Issue => stats.issues += 1,
                ContributionKind::PullRequest => stats.pull_requests += 1,
            }
            match c.state {
                ContributionState::Open => stats.open += 1,
                ContributionState::Closed => stats.closed += 1,
                ContributionState::Merged => stats.merged += 1,
            }
            repos.insert(c.repo.as_str());
            stats.skills.extend(c.skills.iter().cloned());
            stats.total_impact += c.impact;
            *stats
                .timeline
                .entry(c.created_at.format("%Y-%m").to_string())
                .or_default() += 1;
        }
        stats.repositories = repos.len();
        if stats.total > 0 {
            stats.average_impact = stats.total_impact / stats.total as f64;
        }
        stats.recent = selected.into_iter().take(10).collect();
        stats
    }

    /// Per-skill counts and impact across the whole history.
    pub fn skill_experience(&self) -> BTreeMap<String, SkillExperience> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut experience: BTreeMap<String, SkillExperience> = BTreeMap::new();
        for c in records.values() {
            for skill in &c.skills {
                let entry = experience.entry(skill.clone()).or_default();
                entry.contributions += 1;
                entry.total_impact += c.impact;
            }
        }
        experience
    }

    /// `profile` with past experience folded in.
    ///
    /// A skill's weight becomes the larger of its stated weight and what the
    /// history shows ([`SkillExperience::weight`]). Stated weights are never
    /// lowered, and skills only seen in history are added.
    pub fn enrich_profile(&self, profile: &SkillProfile) -> SkillProfile {
        let mut enriched = profile.clone();
        for (skill, experience) in self.skill_experience() {
            let stated = profile.skills().get(&skill).copied().unwrap_or(0.0);
            let learned = experience.weight();
            if learned > stated {
                enriched.set_skill(&skill, learned);
            }
        }
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::IssueIdentity;
    use chrono::TimeZone;
    use forksync_state::fakes::MemoryKvStore;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    fn item(number: u64, title: &str, labels: &[&str]) -> AuthoredItem {
        AuthoredItem {
            identity: IssueIdentity::new("octo/widgets", number),
            title: title.to_string(),
            body: String::new(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            url: None,
            is_pull_request: false,
            closed: false,
            merged: false,
            comments: 0,
            reactions: 0,
            created_at: at(1),
            updated_at: at(1),
        }
    }

    #[test]
    fn impact_rewards_prs_discussion_and_resolution() {
        let bare = item(1, "Question", &[]);
        assert!((impact_score(&bare) - 0.1).abs() < 1e-9);

        let merged_pr = AuthoredItem {
            is_pull_request: true,
            closed: true,
            merged: true,
            comments: 50,
            reactions: 3,
            ..item(2, "Fix crash", &["bug"])
        };
        // 0.3 + 0.2 (capped) + 0.03 + 0.1 + 0.2
        assert!((impact_score(&merged_pr) - 0.83).abs() < 1e-9);

        let everything = AuthoredItem {
            reactions: 500,
            ..merged_pr
        };
        assert!(impact_score(&everything) <= 1.0);
    }

    #[test]
    fn enhancement_counts_as_high_impact() {
        let plain = item(1, "Idea", &[]);
        let labelled = item(1, "Idea", &["enhancement"]);
        assert!(impact_score(&labelled) > impact_score(&plain));
    }

    #[test]
    fn skills_come_from_labels_and_whole_words() {
        let mut i = item(3, "Expose REST endpoint for builds", &["Docs", "help wanted"]);
        i.body = "Needs a small TS client as well.".into();
        let skills = extract_skills(&i);
        assert!(skills.contains("documentation"));
        assert!(skills.contains("api"));
        assert!(skills.contains("typescript"));
        assert!(!skills.contains("help-wanted"));

        // "javascript" must not imply "java"; "pytest" must not imply "python".
        let j = item(4, "Port the javascript pytest helpers", &[]);
        let skills = extract_skills(&j);
        assert!(skills.contains("javascript"));
        assert!(!skills.contains("java"));
        assert!(!skills.contains("python"));
    }

    #[test]
    fn state_reflects_merge_only_for_pull_requests() {
        let issue = AuthoredItem {
            closed: true,
            merged: true,
            ..item(5, "Closed issue", &[])
        };
        assert_eq!(to_contribution(issue).state, ContributionState::Closed);

        let pr = AuthoredItem {
            is_pull_request: true,
            closed: true,
            merged: true,
            ..item(6, "Merged PR", &[])
        };
        let c = to_contribution(pr);
        assert_eq!(c.kind, ContributionKind::PullRequest);
        assert_eq!(c.state, ContributionState::Merged);

        assert_eq!(to_contribution(item(7, "Open", &[])).state, ContributionState::Open);
    }

    #[tokio::test]
    async fn record_upserts_by_repo_and_number() {
        let kv = Arc::new(MemoryKvStore::new());
        let history = ContributionHistory::empty(kv.clone());

        let first = to_contribution(item(8, "Typo", &["docs"]));
        assert!(history.record(first.clone()).await.unwrap().is_none());

        let mut closed = first.clone();
        closed.state = ContributionState::Closed;
        closed.updated_at = at(5);
        let previous = history.record(closed.clone()).await.unwrap();
        assert_eq!(previous, Some(first));
        assert_eq!(history.len(), 1);
        assert_eq!(history.list()[0].state, ContributionState::Closed);

        let reloaded = ContributionHistory::load(kv).await.unwrap();
        assert!(reloaded.warning.is_none());
        assert_eq!(reloaded.history.list(), vec![closed]);
    }

    #[tokio::test]
    async fn enrichment_raises_but_never_lowers_weights() {
        let history = ContributionHistory::empty(Arc::new(MemoryKvStore::new()));
        for n in 0..4 {
            let pr = AuthoredItem {
                is_pull_request: true,
                closed: true,
                merged: true,
                ..item(n, "Improve docs", &["documentation"])
            };
            history.record(to_contribution(pr)).await.unwrap();
        }

        let profile = SkillProfile::new()
            .with_skill("documentation", 0.2)
            .with_skill("rust", 0.9);
        let enriched = history.enrich_profile(&profile);
        assert_eq!(enriched.skills()["documentation"], MAX_EXPERIENCE_WEIGHT);
        assert_eq!(enriched.skills()["rust"], 0.9);

        let strong = SkillProfile::new().with_skill("documentation", 1.0);
        assert_eq!(history.enrich_profile(&strong), strong);
    }
}
