//! Longest-match term corrector built on the term store.
//!
//! Candidates are tried longest first so multi-token terms are never shadowed by their own
//! substrings. Every accepted match must sit on a token boundary and must not overlap a span
//! already claimed by a longer candidate; all substitutions are then applied in one pass.

use crate::error::TermError;
use crate::store::{Term, TermStore, AUTO_LEARN_CONFIDENCE, FEEDBACK_CONFIDENCE};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Characters of source text kept as context when auto-learning.
pub const CONTEXT_PREFIX_CHARS: usize = 50;
/// Characters of a token used to look up prefix suggestions.
const SUGGESTION_PREFIX_CHARS: usize = 3;
const MAX_SUGGESTIONS_PER_WORD: usize = 5;
const SUGGESTION_CONFIDENCE: f64 = 0.8;

/// One substituted surface form and where it occurred (byte ranges into the input text).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub original: String,
    pub correct: String,
    pub positions: Vec<(usize, usize)>,
}

/// Output of one `correct` call.
#[derive(Debug, Default)]
pub struct CorrectionOutcome {
    pub text: String,
    pub corrections: Vec<Correction>,
    /// Surface forms newly written to the store during this call.
    pub learned: Vec<String>,
    /// Store write failures while auto-learning. The corrected text is still valid.
    pub learn_errors: Vec<TermError>,
}

impl CorrectionOutcome {
    pub fn is_changed(&self) -> bool {
        !self.corrections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedTerm {
    pub term: String,
    pub correct: String,
    pub confidence: f64,
}

/// Possible corrections for one whitespace-delimited word; nothing is modified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub word: String,
    pub suggestions: Vec<SuggestedTerm>,
}

struct Candidate {
    surface: String,
    correct: String,
    known: bool,
}

struct Span {
    start: usize,
    end: usize,
    candidate: usize,
}

/// Kana, CJK ideographs and half-width katakana: scripts written without spaces, so any
/// character boundary inside them is a valid token boundary.
fn is_unspaced_script(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF | 0x31F0..=0x31FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0xFF66..=0xFF9F
    )
}

fn is_spaced_word_char(c: char) -> bool {
    (c.is_alphanumeric() || c == '_') && !is_unspaced_script(c)
}

fn joins(a: Option<char>, b: Option<char>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if is_spaced_word_char(a) && is_spaced_word_char(b))
}

/// True when `text[start..end]` does not split a run of space-delimited word characters.
fn on_token_boundary(text: &str, start: usize, end: usize) -> bool {
    let matched = &text[start..end];
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !joins(before, matched.chars().next()) && !joins(matched.chars().next_back(), after)
}

fn context_prefix(text: &str) -> String {
    text.chars().take(CONTEXT_PREFIX_CHARS).collect()
}

/// Applies learned terms to transcript text. Reads the store on every call, so feedback learned
/// by any task is visible to the next segment without a rebuild.
#[derive(Debug, Clone)]
pub struct TermCorrector {
    store: Arc<TermStore>,
}

impl TermCorrector {
    pub fn new(store: Arc<TermStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<TermStore> {
        &self.store
    }

    /// Correct `text` using the terms currently in the store.
    pub fn correct(&self, text: &str) -> CorrectionOutcome {
        self.correct_with_candidates(text, &BTreeMap::new())
    }

    /// Correct `text` using the store plus ad-hoc `surface -> correction` pairs. A matched
    /// ad-hoc surface that the store does not know yet is learned with auto-learn confidence
    /// and the first `CONTEXT_PREFIX_CHARS` characters of `text` as context. Known surfaces
    /// always use the stored correction.
    pub fn correct_with_candidates(
        &self,
        text: &str,
        candidates: &BTreeMap<String, String>,
    ) -> CorrectionOutcome {
        let known = self.store.get_all();
        let mut table: Vec<Candidate> = known
            .iter()
            .map(|(surface, term)| Candidate {
                surface: surface.clone(),
                correct: term.correct.clone(),
                known: true,
            })
            .chain(
                candidates
                    .iter()
                    .filter(|(surface, _)| !known.contains_key(*surface))
                    .map(|(surface, correct)| Candidate {
                        surface: surface.clone(),
                        correct: correct.clone(),
                        known: false,
                    }),
            )
            .filter(|c| !c.surface.is_empty())
            .collect();
        table.sort_by(|a, b| {
            Reverse(a.surface.chars().count())
                .cmp(&Reverse(b.surface.chars().count()))
                .then_with(|| a.surface.cmp(&b.surface))
        });

        let mut spans: Vec<Span> = Vec::new();
        for (idx, candidate) in table.iter().enumerate() {
            let surface = candidate.surface.as_str();
            let mut from = 0;
            while let Some(found) = text[from..].find(surface) {
                let start = from + found;
                let end = start + surface.len();
                let free = !spans.iter().any(|s| start < s.end && end > s.start);
                if free && on_token_boundary(text, start, end) {
                    spans.push(Span {
                        start,
                        end,
                        candidate: idx,
                    });
                    from = end;
                } else {
                    // Rejected hits may hide an overlapping later hit that is valid.
                    from = start + text[start..].chars().next().map_or(1, char::len_utf8);
                }
            }
        }

        let mut outcome = CorrectionOutcome::default();
        if spans.is_empty() {
            outcome.text = text.to_string();
            return outcome;
        }

        let mut positions: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
        for span in &spans {
            positions
                .entry(span.candidate)
                .or_default()
                .push((span.start, span.end));
        }

        spans.sort_by_key(|s| s.start);
        let mut corrected = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in &spans {
            corrected.push_str(&text[cursor..span.start]);
            corrected.push_str(&table[span.candidate].correct);
            cursor = span.end;
        }
        corrected.push_str(&text[cursor..]);
        outcome.text = corrected;

        for (idx, mut pos) in positions {
            pos.sort_unstable();
            let candidate = &table[idx];
            outcome.corrections.push(Correction {
                original: candidate.surface.clone(),
                correct: candidate.correct.clone(),
                positions: pos,
            });
            if !candidate.known {
                let context = context_prefix(text);
                match self.store.learn(
                    &candidate.surface,
                    &candidate.correct,
                    Some(&context),
                    AUTO_LEARN_CONFIDENCE,
                ) {
                    Ok(_) => outcome.learned.push(candidate.surface.clone()),
                    Err(e) => {
                        warn!("Terms: failed to learn {:?}: {}", candidate.surface, e);
                        outcome.learn_errors.push(e);
                    }
                }
            }
        }
        outcome
    }

    /// Correct each text independently.
    pub fn batch_correct<S: AsRef<str>>(&self, texts: &[S]) -> Vec<CorrectionOutcome> {
        texts.iter().map(|t| self.correct(t.as_ref())).collect()
    }

    /// Record explicit user feedback (highest confidence).
    pub fn learn_from_feedback(
        &self,
        original: &str,
        corrected: &str,
        context: Option<&str>,
    ) -> Result<Term, TermError> {
        let term = self
            .store
            .learn(original, corrected, context, FEEDBACK_CONFIDENCE)?;
        info!("Terms: learned from feedback {:?} -> {:?}", original, corrected);
        Ok(term)
    }

    /// Suggest known terms sharing a short prefix with each word of `text`. Read-only.
    pub fn suggest_corrections(&self, text: &str) -> Vec<Suggestion> {
        let terms = self.store.get_all();
        text.split_whitespace()
            .filter_map(|word| {
                let prefix: String = word.chars().take(SUGGESTION_PREFIX_CHARS).collect();
                let suggestions: Vec<SuggestedTerm> = terms
                    .range(prefix.clone()..)
                    .take_while(|(surface, _)| surface.starts_with(&prefix))
                    .take(MAX_SUGGESTIONS_PER_WORD)
                    .map(|(surface, term)| SuggestedTerm {
                        term: surface.clone(),
                        correct: term.correct.clone(),
                        confidence: SUGGESTION_CONFIDENCE,
                    })
                    .collect();
                (!suggestions.is_empty()).then(|| Suggestion {
                    word: word.to_string(),
                    suggestions,
                })
            })
            .collect()
    }
}
