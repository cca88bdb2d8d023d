//! Deep research: search -> validate -> rank -> extract -> synthesize.
//!
//! [`ResearchPipeline::run`] never fails. Provider errors become a user-facing message
//! pointing at the lighter `browse_web` tool, and per-source fetch failures fall back to
//! the search snippet.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use brainstorm_core::config::{ResearchConfig, SearchConfig};
use brainstorm_core::domain::research::{rank_sources, ResearchDepth, ResearchSource, Synthesis};

use crate::web::{PageFetcher, SearchError, SearchProvider};

pub const NO_INFORMATION: &str = "No information found for the query.";
pub const NO_VALID_SOURCES: &str = "No valid sources found for the query.";

const CONTENT_MARKERS: [&str; 5] =
    ["<main", "<article", "<div class=\"content\"", "<div id=\"content\"", "<section"];
const FALLBACK_WINDOW: usize = 1000;
const EXTRACT_CHARS: usize = 500;
const SNIPPET_CHARS: usize = 300;
const SEPARATOR_WIDTH: usize = 60;
const COMPREHENSIVE_SOURCE_COUNT: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResearchSettings {
    pub search_max_results: u32,
    pub fetch_timeout: Duration,
    pub deep_delay: Duration,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            search_max_results: 5,
            fetch_timeout: Duration::from_secs(10),
            deep_delay: Duration::from_millis(500),
        }
    }
}

impl ResearchSettings {
    pub fn from_config(research: &ResearchConfig, search: &SearchConfig) -> Self {
        Self {
            search_max_results: search.max_results.min(5),
            fetch_timeout: Duration::from_secs(research.fetch_timeout_secs),
            deep_delay: Duration::from_millis(research.deep_delay_ms),
        }
    }
}

/// What was shown for one retained source.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceExtract {
    /// Cleaned text from the fetched page's main content region.
    Page(String),
    /// Search snippet; shallow mode, or the page had no recognizable content region.
    Snippet(String),
    /// Search snippet because fetching the page failed.
    Fallback { snippet: String, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedSource {
    pub source: ResearchSource,
    pub extract: SourceExtract,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResearchReport {
    pub query: String,
    pub depth: ResearchDepth,
    pub valid_source_count: usize,
    pub sources: Vec<ExtractedSource>,
    pub synthesis: Synthesis,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResearchOutcome {
    NoInformation,
    NoValidSources,
    Report(ResearchReport),
}

impl ResearchOutcome {
    pub fn render(&self) -> String {
        match self {
            Self::NoInformation => NO_INFORMATION.to_string(),
            Self::NoValidSources => NO_VALID_SOURCES.to_string(),
            Self::Report(report) => report.render(),
        }
    }
}

impl ResearchReport {
    pub fn recommendation(&self) -> &'static str {
        if self.valid_source_count >= COMPREHENSIVE_SOURCE_COUNT {
            "Multiple reliable sources found - information appears comprehensive"
        } else {
            "Limited sources found - consider broadening search terms"
        }
    }

    pub fn render(&self) -> String {
        let separator = "=".repeat(SEPARATOR_WIDTH);
        let mut out: Vec<String> = Vec::new();

        out.push(format!("DEEP RESEARCH RESULTS for: '{}'\n", self.query));
        out.push(format!("Found {} valid sources\n", self.valid_source_count));

        for (index, entry) in self.sources.iter().enumerate() {
            out.push(format!("\n{separator}"));
            out.push(format!("Source {}: {}", index + 1, entry.source.title));
            out.push(format!("URL: {}", entry.source.url));
            out.push(format!("Domain: {}", entry.source.domain));
            out.push(format!("{separator}\n"));

            match &entry.extract {
                SourceExtract::Page(text) => {
                    out.push("EXTRACTED CONTENT:".to_string());
                    out.push(text.clone());
                    out.push("\n".to_string());
                }
                SourceExtract::Snippet(snippet) => {
                    out.push("SUMMARY:".to_string());
                    out.push(snippet.clone());
                }
                SourceExtract::Fallback { snippet, reason } => {
                    out.push("SUMMARY:".to_string());
                    out.push(snippet.clone());
                    out.push(format!("\nContent extraction failed: {reason}"));
                }
            }
        }

        out.push(format!("\n{separator}"));
        out.push("RESEARCH SYNTHESIS".to_string());
        out.push(separator);

        let domains = &self.synthesis.unique_domains;
        let listed: Vec<&str> = domains.iter().take(5).map(String::as_str).collect();
        out.push(format!(
            "Sources from {} unique domains: {}",
            domains.len(),
            listed.join(", ")
        ));
        out.push(format!(
            "Quality Rating: {} (avg relevance: {:.1})",
            self.synthesis.quality.as_str(),
            self.synthesis.average_relevance
        ));

        out.push("\nRECOMMENDATIONS:".to_string());
        out.push(self.recommendation().to_string());
        if let Some(upsell) = self.depth.upsell() {
            out.push(upsell.to_string());
        }

        out.join("\n")
    }
}

pub struct ResearchPipeline {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    settings: ResearchSettings,
}

impl ResearchPipeline {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        settings: ResearchSettings,
    ) -> Self {
        Self { search, fetcher, settings }
    }

    /// Runs the pipeline and renders the result. Never fails.
    pub async fn run(&self, query: &str, depth: ResearchDepth) -> String {
        match self.collect(query, depth).await {
            Ok(outcome) => outcome.render(),
            Err(error) => {
                warn!(
                    event_name = "agent.research.failed",
                    depth = %depth,
                    error = %error,
                    "deep research aborted"
                );
                format!(
                    "Deep research failed: {error}\n\nTry using the basic browse_web tool instead."
                )
            }
        }
    }

    pub async fn collect(
        &self,
        query: &str,
        depth: ResearchDepth,
    ) -> Result<ResearchOutcome, SearchError> {
        info!(event_name = "agent.research.started", depth = %depth, "starting deep research");

        let hits = self.search.search(query, self.settings.search_max_results).await?;
        if hits.is_empty() {
            return Ok(ResearchOutcome::NoInformation);
        }

        let ranked = rank_sources(hits);
        if ranked.is_empty() {
            return Ok(ResearchOutcome::NoValidSources);
        }

        let valid_source_count = ranked.len();
        let retained: Vec<ResearchSource> = ranked.into_iter().take(depth.max_sources()).collect();
        let synthesis = Synthesis::from_sources(&retained);

        let mut sources = Vec::with_capacity(retained.len());
        for source in retained {
            let extract = self.extract(&source, depth).await;
            sources.push(ExtractedSource { source, extract });

            if depth.throttles_fetches() && !self.settings.deep_delay.is_zero() {
                tokio::time::sleep(self.settings.deep_delay).await;
            }
        }

        info!(
            event_name = "agent.research.completed",
            depth = %depth,
            valid_sources = valid_source_count,
            retained_sources = sources.len(),
            quality = synthesis.quality.as_str(),
            "deep research completed"
        );

        Ok(ResearchOutcome::Report(ResearchReport {
            query: query.to_string(),
            depth,
            valid_source_count,
            sources,
            synthesis,
        }))
    }

    async fn extract(&self, source: &ResearchSource, depth: ResearchDepth) -> SourceExtract {
        let snippet = snippet(&source.raw_content);
        if !depth.fetches_pages() {
            return SourceExtract::Snippet(snippet);
        }

        match self.fetcher.fetch(&source.url, self.settings.fetch_timeout).await {
            Ok(markup) => match extract_main_content(&markup) {
                Some(text) => SourceExtract::Page(text),
                None => SourceExtract::Snippet(snippet),
            },
            Err(error) => {
                warn!(
                    event_name = "agent.research.fetch_failed",
                    url = %source.url,
                    error = %error,
                    "falling back to search snippet"
                );
                SourceExtract::Fallback { snippet, reason: error.to_string() }
            }
        }
    }
}

fn tag_pattern() -> Option<&'static Regex> {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]+>").ok()).as_ref()
}

/// Text of the first recognizable content region, cleaned and truncated.
///
/// Returns `None` when no marker is present or the region is empty.
pub fn extract_main_content(markup: &str) -> Option<String> {
    let lowered = markup.to_ascii_lowercase();
    let (start, marker) = CONTENT_MARKERS
        .iter()
        .find_map(|marker| lowered.find(marker).map(|start| (start, *marker)))?;

    let search_from = start + marker.len();
    let end = markup[search_from..]
        .find("</div>")
        .map(|offset| search_from + offset)
        .unwrap_or_else(|| floor_char_boundary(markup, start + FALLBACK_WINDOW));

    let region = &markup[start..end];
    let stripped = match tag_pattern() {
        Some(tags) => tags.replace_all(region, ""),
        None => region.into(),
    };
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(EXTRACT_CHARS).collect();

    if truncated.is_empty() {
        None
    } else {
        Some(truncated)
    }
}

fn snippet(content: &str) -> String {
    let mut snippet: String = content.chars().take(SNIPPET_CHARS).collect();
    snippet.push_str("...");
    snippet
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
