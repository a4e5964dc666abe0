//! Evidence assembly and prompt rendering.
//!
//! Snippets are compressed to their key sentences, grouped into an answer
//! plan and rendered into a prompt that never exceeds the character budget.

use beacon_core::text::{keywords, sentences, tokenize, truncate_chars};
use beacon_core::types::rank_order;
use beacon_core::{Candidate, CandidateKey, Evidence, Warning, WarningKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Key sentences are between these word counts, inclusive.
const MIN_SENTENCE_WORDS: usize = 8;
const MAX_SENTENCE_WORDS: usize = 30;

/// Answer-plan section an evidence entry is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Definition,
    Features,
    Architecture,
    Performance,
    Integrations,
    UseCases,
    Other,
}

impl SectionKind {
    /// Rendering order.
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Definition,
        SectionKind::Features,
        SectionKind::Architecture,
        SectionKind::Performance,
        SectionKind::Integrations,
        SectionKind::UseCases,
        SectionKind::Other,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Self::Definition => "Definition",
            Self::Features => "Features",
            Self::Architecture => "Architecture",
            Self::Performance => "Performance",
            Self::Integrations => "Integrations",
            Self::UseCases => "Use Cases",
            Self::Other => "Other",
        }
    }

    /// Word stems and phrases that file a snippet under this section.
    fn cues(&self) -> &'static [&'static str] {
        match self {
            Self::Definition => &["is a", "is an", "refers to", "defined as", "stands for", "definition", "overview"],
            Self::Features => &["feature", "support", "provides", "allows", "enables", "capabilit"],
            Self::Architecture => &["architecture", "component", "module", "layer", "design", "internal", "structure"],
            Self::Performance => &["performance", "latency", "throughput", "benchmark", "fast", "speed", "memory", "optimi"],
            Self::Integrations => &["integrat", "api", "sdk", "plugin", "client", "connector", "compatib"],
            Self::UseCases => &["use case", "example", "tutorial", "used for", "how to", "install", "guide", "usage", "workflow"],
            Self::Other => &[],
        }
    }

    /// First section, in rendering order, whose cues appear in `text`.
    pub fn classify(text: &str) -> Self {
        let words = tokenize(text);
        let padded = format!(" {} ", words.join(" "));

        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.cues().iter().any(|cue| {
                    if cue.contains(' ') {
                        padded.contains(&format!(" {} ", cue))
                    } else {
                        words.iter().any(|word| word.starts_with(cue))
                    }
                })
            })
            .unwrap_or(Self::Other)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Evidence indexes grouped by section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSection {
    pub kind: SectionKind,
    /// Positions in the evidence list, ascending.
    pub entries: Vec<usize>,
}

/// Evidence organized into sections for the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerPlan {
    /// Non-empty sections in rendering order.
    pub sections: Vec<PlanSection>,
}

impl AnswerPlan {
    pub fn build(evidence: &[Evidence]) -> Self {
        let mut grouped: HashMap<SectionKind, Vec<usize>> = HashMap::new();
        for (index, entry) in evidence.iter().enumerate() {
            grouped
                .entry(SectionKind::classify(&entry.snippet))
                .or_default()
                .push(index);
        }

        let sections = SectionKind::ALL
            .into_iter()
            .filter_map(|kind| grouped.remove(&kind).map(|entries| PlanSection { kind, entries }))
            .collect();
        Self { sections }
    }

    pub fn section(&self, kind: SectionKind) -> Option<&PlanSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// Final evidence list and the prompt rendered from it.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub evidence: Vec<Evidence>,
    pub plan: AnswerPlan,
    pub prompt: String,
    pub warnings: Vec<Warning>,
}

impl Assembled {
    /// Rough token count of the prompt, four characters per token.
    pub fn prompt_tokens_estimate(&self) -> usize {
        self.prompt.chars().count().div_ceil(4)
    }
}

pub struct EvidenceAssembler {
    max_snippet_chars: usize,
    /// 0 disables the cap.
    max_per_doc: usize,
    max_prompt_chars: usize,
    /// Key sentences kept per snippet; 0 leaves snippets whole.
    max_sentences: usize,
    sectioned: bool,
}

impl EvidenceAssembler {
    pub fn new(max_snippet_chars: usize, max_per_doc: usize, max_prompt_chars: usize) -> Self {
        Self {
            max_snippet_chars: max_snippet_chars.max(1),
            max_per_doc,
            max_prompt_chars: max_prompt_chars.max(1),
            max_sentences: 0,
            sectioned: false,
        }
    }

    /// Keep at most `max_sentences` key sentences per snippet.
    pub fn with_compression(mut self, max_sentences: usize) -> Self {
        self.max_sentences = max_sentences;
        self
    }

    /// Render evidence grouped by answer-plan section.
    pub fn with_sections(mut self, sectioned: bool) -> Self {
        self.sectioned = sectioned;
        self
    }

    /// Merge direct and related evidence, order it, cap it and render the
    /// prompt.
    ///
    /// Direct evidence wins over related evidence for the same item. The
    /// result is sorted by descending score with ties broken by item id and
    /// holds at most `max_bullets` entries.
    pub fn assemble(
        &self,
        query: &str,
        direct: &[Candidate],
        related: Vec<Evidence>,
        max_bullets: usize,
    ) -> Assembled {
        let mut seen: HashSet<CandidateKey> = HashSet::new();
        let mut pool: Vec<Evidence> = Vec::with_capacity(direct.len() + related.len());

        for candidate in direct {
            if seen.insert(candidate.key()) {
                pool.push(Evidence::direct(candidate));
            }
        }
        for evidence in related {
            if seen.insert(evidence.key()) {
                pool.push(evidence);
            }
        }

        pool.sort_by(|a, b| {
            rank_order(a.score, &a.item_id, &a.collection, b.score, &b.item_id, &b.collection)
        });

        let query_terms = keywords(query);
        let mut per_doc: HashMap<String, usize> = HashMap::new();
        let mut evidence: Vec<Evidence> = Vec::with_capacity(max_bullets.min(pool.len()));
        for mut entry in pool {
            if evidence.len() >= max_bullets {
                break;
            }
            if self.max_per_doc > 0 {
                let count = per_doc.entry(document_key(&entry)).or_insert(0);
                if *count >= self.max_per_doc {
                    continue;
                }
                *count += 1;
            }
            let snippet = if self.max_sentences > 0 {
                compress_snippet(&entry.snippet, &query_terms, self.max_sentences)
            } else {
                collapse_whitespace(&entry.snippet)
            };
            entry.snippet = truncate_chars(&snippet, self.max_snippet_chars);
            evidence.push(entry);
        }

        let total = evidence.len();
        let (prompt, trimmed) = self.fit_budget(query, &mut evidence);

        let mut warnings = Vec::new();
        if trimmed {
            warnings.push(Warning::new(
                WarningKind::Truncated,
                format!(
                    "prompt budget of {} characters kept {} of {} evidence entries",
                    self.max_prompt_chars,
                    evidence.len(),
                    total
                ),
            ));
        }

        let plan = AnswerPlan::build(&evidence);
        debug!(
            evidence = evidence.len(),
            sections = plan.sections.len(),
            prompt_chars = prompt.len(),
            "Evidence assembled"
        );

        Assembled {
            evidence,
            plan,
            prompt,
            warnings,
        }
    }

    /// Render the prompt, shedding evidence until it fits the budget.
    ///
    /// Entries are dropped from the tail first. A last entry that alone
    /// overflows has its snippet cut; a frame that overflows with no
    /// evidence at all is cut itself. Returns whether anything was shed.
    fn fit_budget(&self, query: &str, evidence: &mut Vec<Evidence>) -> (String, bool) {
        let mut trimmed = false;
        loop {
            let prompt = render_prompt(query, evidence, self.sectioned);
            let chars = prompt.chars().count();
            if chars <= self.max_prompt_chars {
                return (prompt, trimmed);
            }
            trimmed = true;

            if evidence.len() > 1 {
                evidence.pop();
                continue;
            }

            match evidence.first_mut() {
                Some(entry) => {
                    let current = entry.snippet.chars().count();
                    let keep = current.saturating_sub(chars - self.max_prompt_chars);
                    if keep >= 2 {
                        entry.snippet = truncate_chars(&entry.snippet, keep);
                    } else {
                        evidence.clear();
                    }
                }
                None => return (truncate_chars(&prompt, self.max_prompt_chars), trimmed),
            }
        }
    }
}

impl Default for EvidenceAssembler {
    fn default() -> Self {
        Self::new(400, 3, 16_000)
    }
}

/// Source document an entry came from, for the per-document cap.
fn document_key(evidence: &Evidence) -> String {
    ["file_path", "path", "source", "document_id"]
        .iter()
        .find_map(|key| evidence.metadata.get(*key).and_then(|v| v.as_str()))
        .map(|doc| format!("{}/{}", evidence.collection, doc))
        .unwrap_or_else(|| evidence.key().to_string())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key sentences of `text`: those of 8 to 30 words, preferring the ones
/// mentioning query terms, kept in their original order.
///
/// Text without any such sentence is returned whole.
pub fn compress_snippet(text: &str, query_terms: &[String], max_sentences: usize) -> String {
    let mut key: Vec<(usize, usize, String)> = sentences(text)
        .into_iter()
        .enumerate()
        .filter(|(_, sentence)| {
            let words = sentence.split_whitespace().count();
            (MIN_SENTENCE_WORDS..=MAX_SENTENCE_WORDS).contains(&words)
        })
        .map(|(position, sentence)| {
            let words = tokenize(&sentence);
            let hits = query_terms.iter().filter(|t| words.contains(t)).count();
            (position, hits, sentence)
        })
        .collect();

    if key.is_empty() {
        return collapse_whitespace(text);
    }

    key.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    key.truncate(max_sentences.max(1));
    key.sort_by_key(|(position, _, _)| *position);

    key.into_iter()
        .map(|(_, _, sentence)| sentence)
        .collect::<Vec<_>>()
        .join(" ")
}

fn source_line(index: usize, entry: &Evidence) -> String {
    let provenance = match (&entry.via, entry.hop_distance) {
        (Some(via), Some(hops)) => format!(", via {} ({} hop{})", via, hops, if hops == 1 { "" } else { "s" }),
        _ => String::new(),
    };
    format!(
        "[{}] {}/{} ({}, score {:.3}{})",
        index + 1,
        entry.collection,
        entry.item_id,
        entry.relation,
        entry.score,
        provenance
    )
}

fn render_prompt(query: &str, evidence: &[Evidence], sectioned: bool) -> String {
    let mut lines = vec!["# Query".to_string(), query.trim().to_string(), String::new()];

    lines.push("# Evidence".to_string());
    if evidence.is_empty() {
        lines.push("(none)".to_string());
    } else if sectioned {
        for section in AnswerPlan::build(evidence).sections {
            lines.push(format!("## {}", section.kind));
            for index in section.entries {
                lines.push(format!("[{}] {}", index + 1, evidence[index].snippet));
            }
        }
    } else {
        for (i, entry) in evidence.iter().enumerate() {
            lines.push(format!("[{}] {}", i + 1, entry.snippet));
        }
    }

    lines.push(String::new());
    lines.push("# Sources".to_string());
    lines.extend(evidence.iter().enumerate().map(|(i, entry)| source_line(i, entry)));

    lines.push(String::new());
    lines.push("Answer using only the evidence above and cite sources by their [n] markers.".to_string());
    lines.join("\n")
}
