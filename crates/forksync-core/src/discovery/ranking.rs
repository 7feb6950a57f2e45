//! Composite scoring and the total order over opportunities.
//!
//! The score formula is pluggable through [`ScoringPolicy`]. Whatever the
//! policy, [`rank`] orders by score descending, then issue identity, then
//! owning repository, so equal inputs always give an equal ordering.

use chrono::{DateTime, Utc};
use forksync_state::RepoId;
use serde::{Deserialize, Serialize};

use crate::config::RankingWeights;
use crate::ports::{IssueAnalysis, IssueCandidate};

/// Health assumed for a repository that has not been scored yet.
const NEUTRAL_HEALTH: f64 = 50.0;

/// Normalized inputs to a scoring policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    /// LLM relevance in `[0, 1]`.
    pub relevance: f64,
    /// Repository health in `[0, 100]`, if computed.
    pub health: Option<f64>,
    /// Days since the issue was last updated.
    pub age_days: f64,
    /// Best skill weight matching the issue labels, `[0, 1]`.
    pub skill_match: f64,
}

/// Pure scoring function. Implementations must not decrease the score when
/// relevance rises and everything else stays equal.
pub trait ScoringPolicy: Send + Sync {
    fn score(&self, inputs: &ScoreInputs) -> f64;
}

/// Weighted sum of relevance, health, exponential recency decay and label
/// affinity.
#[derive(Debug, Clone)]
pub struct WeightedScoring {
    pub weights: RankingWeights,
    pub recency_half_life_days: f64,
}

impl WeightedScoring {
    pub fn new(weights: RankingWeights, recency_half_life_days: f64) -> Self {
        Self {
            weights,
            recency_half_life_days,
        }
    }

    pub fn recency(&self, age_days: f64) -> f64 {
        if self.recency_half_life_days <= 0.0 {
            return 1.0;
        }
        0.5f64.powf(age_days.max(0.0) / self.recency_half_life_days)
    }
}

fn unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl ScoringPolicy for WeightedScoring {
    fn score(&self, inputs: &ScoreInputs) -> f64 {
        let w = &self.weights;
        let health = unit(inputs.health.unwrap_or(NEUTRAL_HEALTH) / 100.0);
        w.relevance * unit(inputs.relevance)
            + w.health * health
            + w.recency * self.recency(inputs.age_days)
            + w.skill_match * unit(inputs.skill_match)
    }
}

/// A ranked contribution candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// The tracked fork the issue was found through.
    pub repo: RepoId,
    pub issue: IssueCandidate,
    pub analysis: IssueAnalysis,
    pub cache_key: String,
    pub health_score: Option<f64>,
    pub composite_score: f64,
}

impl Opportunity {
    pub fn inputs(&self, skill_match: f64, now: DateTime<Utc>) -> ScoreInputs {
        let age = (now - self.issue.updated_at).num_seconds().max(0) as f64 / 86_400.0;
        ScoreInputs {
            relevance: self.analysis.relevance,
            health: self.health_score,
            age_days: age,
            skill_match,
        }
    }
}

/// Sort best-first with a total order and keep the top `limit`.
pub fn rank(mut opportunities: Vec<Opportunity>, limit: usize) -> Vec<Opportunity> {
    opportunities.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.issue.identity.cmp(&b.issue.identity))
            .then_with(|| a.repo.cmp(&b.repo))
    });
    opportunities.truncate(limit);
    opportunities
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::ports::{Difficulty, IssueIdentity};

    fn policy() -> WeightedScoring {
        WeightedScoring::new(RankingWeights::default(), 30.0)
    }

    fn inputs(relevance: f64) -> ScoreInputs {
        ScoreInputs {
            relevance,
            health: Some(70.0),
            age_days: 10.0,
            skill_match: 0.5,
        }
    }

    fn opp(repo: &str, number: u64, score: f64) -> Opportunity {
        Opportunity {
            repo: RepoId::new(repo),
            issue: IssueCandidate {
                identity: IssueIdentity::new("up/stream", number),
                title: String::new(),
                labels: BTreeSet::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                body: String::new(),
                url: None,
            },
            analysis: IssueAnalysis {
                summary: String::new(),
                difficulty: Difficulty::Beginner,
                relevance: 0.5,
                reasoning: String::new(),
            },
            cache_key: String::new(),
            health_score: None,
            composite_score: score,
        }
    }

    #[test]
    fn relevance_is_monotonic() {
        let p = policy();
        let mut last = f64::MIN;
        for step in 0..=20 {
            let s = p.score(&inputs(step as f64 / 20.0));
            assert!(s >= last, "score dropped at relevance {}", step as f64 / 20.0);
            last = s;
        }
    }

    #[test]
    fn health_and_recency_are_monotonic() {
        let p = policy();
        let base = inputs(0.5);
        let healthier = ScoreInputs {
            health: Some(90.0),
            ..base
        };
        let older = ScoreInputs {
            age_days: 100.0,
            ..base
        };
        assert!(p.score(&healthier) >= p.score(&base));
        assert!(p.score(&older) <= p.score(&base));
    }

    #[test]
    fn recency_halves_at_half_life() {
        assert!((policy().recency(30.0) - 0.5).abs() < 1e-12);
        assert_eq!(policy().recency(-5.0), 1.0);
    }

    #[test]
    fn ties_break_by_identity_then_repo() {
        let ranked = rank(
            vec![
                opp("b", 7, 0.5),
                opp("a", 7, 0.5),
                opp("a", 3, 0.5),
                opp("a", 9, 0.9),
            ],
            10,
        );
        let order: Vec<(String, u64)> = ranked
            .iter()
            .map(|o| (o.repo.to_string(), o.issue.identity.number))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a".into(), 9),
                ("a".into(), 3),
                ("a".into(), 7),
                ("b".into(), 7)
            ]
        );
    }

    #[test]
    fn truncates_to_limit() {
        let ranked = rank(vec![opp("a", 1, 0.1), opp("a", 2, 0.2), opp("a", 3, 0.3)], 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].issue.identity.number, 3);
    }
}
