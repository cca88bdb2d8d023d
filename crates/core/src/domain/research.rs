use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::DomainError;

pub const HIGH_QUALITY_THRESHOLD: f64 = 5.0;
pub const MEDIUM_QUALITY_THRESHOLD: f64 = 2.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Shallow,
    #[default]
    Medium,
    Deep,
}

impl ResearchDepth {
    pub const ALL: [&'static str; 3] = ["shallow", "medium", "deep"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Medium => "medium",
            Self::Deep => "deep",
        }
    }

    pub fn max_sources(&self) -> usize {
        match self {
            Self::Shallow => 2,
            Self::Medium => 3,
            Self::Deep => 5,
        }
    }

    pub fn fetches_pages(&self) -> bool {
        !matches!(self, Self::Shallow)
    }

    pub fn throttles_fetches(&self) -> bool {
        matches!(self, Self::Deep)
    }

    pub fn upsell(&self) -> Option<&'static str> {
        match self {
            Self::Shallow => Some("For deeper analysis, try depth='medium' or 'deep'"),
            Self::Medium => Some("For comprehensive analysis, try depth='deep'"),
            Self::Deep => None,
        }
    }
}

impl fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchDepth {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shallow" => Ok(Self::Shallow),
            "medium" => Ok(Self::Medium),
            "deep" => Ok(Self::Deep),
            other => Err(DomainError::InvariantViolation(format!(
                "unsupported research depth `{other}` (expected shallow|medium|deep)"
            ))),
        }
    }
}

/// Raw hit returned by a search provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// A search hit after validation and scoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchSource {
    pub url: String,
    pub title: String,
    pub raw_content: String,
    pub is_valid_url: bool,
    pub domain: String,
    pub relevance_score: f64,
}

impl ResearchSource {
    pub fn analyze(hit: SearchHit) -> Self {
        let (is_valid_url, domain) = match Url::parse(&hit.url) {
            Ok(parsed) => match parsed.host_str() {
                Some(host) if !host.is_empty() => {
                    let domain = match parsed.port() {
                        Some(port) => format!("{host}:{port}"),
                        None => host.to_string(),
                    };
                    (true, domain)
                }
                _ => (false, String::new()),
            },
            Err(_) => (false, String::new()),
        };

        let relevance_score = hit.content.chars().count() as f64 / 100.0;

        Self {
            url: hit.url,
            title: hit.title,
            raw_content: hit.content,
            is_valid_url,
            domain,
            relevance_score,
        }
    }
}

/// Keeps valid sources only, best score first. Ties keep provider order.
pub fn rank_sources(hits: Vec<SearchHit>) -> Vec<ResearchSource> {
    let mut sources = hits
        .into_iter()
        .map(ResearchSource::analyze)
        .filter(|source| source.is_valid_url)
        .collect::<Vec<_>>();
    sources.sort_by(|left, right| right.relevance_score.total_cmp(&left.relevance_score));
    sources
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityRating {
    High,
    Medium,
    Low,
}

impl QualityRating {
    pub fn from_average(average_relevance: f64) -> Self {
        if average_relevance > HIGH_QUALITY_THRESHOLD {
            Self::High
        } else if average_relevance > MEDIUM_QUALITY_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub unique_domains: Vec<String>,
    pub average_relevance: f64,
    pub quality: QualityRating,
}

impl Synthesis {
    pub fn from_sources(sources: &[ResearchSource]) -> Self {
        let mut unique_domains: Vec<String> = Vec::new();
        for source in sources {
            if !unique_domains.contains(&source.domain) {
                unique_domains.push(source.domain.clone());
            }
        }

        let average_relevance = if sources.is_empty() {
            0.0
        } else {
            sources.iter().map(|source| source.relevance_score).sum::<f64>() / sources.len() as f64
        };

        let quality = QualityRating::from_average(average_relevance);
        Self { unique_domains, average_relevance, quality }
    }
}
