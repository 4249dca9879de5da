//! Term store: surface form → correction, with frequency/confidence bookkeeping.
//!
//! Two JSON documents back the store: the term mapping (keyed by surface form) and an
//! append-only correction log. Both are read once at open and fully rewritten after every
//! `learn`. Each document is replaced via temp file + rename; there is no atomicity across the
//! pair if the process dies between the two writes.

use crate::error::{TermError, TermResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Default term mapping document name (relative to the data dir).
pub const DEFAULT_TERMS_FILE: &str = "terms.json";
/// Default correction log document name (relative to the data dir).
pub const DEFAULT_LOG_FILE: &str = "corrections_log.json";
/// Confidence recorded for explicit user feedback.
pub const FEEDBACK_CONFIDENCE: f64 = 1.0;
/// Confidence recorded when the corrector learns a pair on its own.
pub const AUTO_LEARN_CONFIDENCE: f64 = 0.8;
/// Default `min_frequency` for `get_high_frequency`.
pub const DEFAULT_HIGH_FREQUENCY: u32 = 3;

/// One learned term. The surface form is the key in the term mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// Replacement text for the surface form.
    pub correct: String,
    /// Number of `learn` calls seen for this surface form (>= 1).
    pub frequency: u32,
    /// Distinct contexts in first-seen order.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Highest confidence ever supplied, in [0, 1].
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    /// True until a human confirms the pair with feedback-level confidence.
    #[serde(default)]
    pub auto_learned: bool,
}

/// Append-only log entry; written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub timestamp: DateTime<Utc>,
    pub original: String,
    pub corrected: String,
    pub context: Option<String>,
    pub confidence: f64,
}

/// Surface form → term.
pub type TermMap = BTreeMap<String, Term>;

#[derive(Debug, Clone)]
struct StorePaths {
    terms: PathBuf,
    log: PathBuf,
}

#[derive(Debug, Default)]
struct StoreState {
    terms: TermMap,
    log: Vec<CorrectionRecord>,
}

/// Shared, thread-safe term store. `learn` is a single critical section covering the
/// read-modify-write and both document rewrites, so concurrent tasks never lose updates.
#[derive(Debug)]
pub struct TermStore {
    paths: Option<StorePaths>,
    state: Mutex<StoreState>,
}

fn read_document<T>(path: &Path) -> TermResult<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => {
            return Err(TermError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content).map_err(|e| TermError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_document<T: Serialize>(path: &Path, value: &T) -> TermResult<()> {
    let io_err = |source| TermError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

impl TermStore {
    /// Open the store backed by `terms_path` and `log_path`. Missing files are an empty store;
    /// unreadable or malformed documents are an error.
    pub fn open(terms_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> TermResult<Self> {
        let paths = StorePaths {
            terms: terms_path.into(),
            log: log_path.into(),
        };
        let terms: TermMap = read_document(&paths.terms)?;
        let log: Vec<CorrectionRecord> = read_document(&paths.log)?;
        info!(
            "Terms: loaded {} term(s) and {} log record(s) from {}",
            terms.len(),
            log.len(),
            paths.terms.display()
        );
        Ok(Self {
            paths: Some(paths),
            state: Mutex::new(StoreState { terms, log }),
        })
    }

    /// Open `terms.json` and `corrections_log.json` inside `data_dir`.
    pub fn open_in(data_dir: impl AsRef<Path>) -> TermResult<Self> {
        let dir = data_dir.as_ref();
        Self::open(dir.join(DEFAULT_TERMS_FILE), dir.join(DEFAULT_LOG_FILE))
    }

    /// Store with no backing documents (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            paths: None,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one correction. Creates the term (frequency 1) or bumps frequency, keeps the
    /// maximum confidence and appends an unseen context. The log entry is appended on every
    /// call, repeats included. Returns the term as stored after the update.
    ///
    /// The in-memory update survives a failed rewrite; the error reports the lost durability.
    pub fn learn(
        &self,
        original: &str,
        corrected: &str,
        context: Option<&str>,
        confidence: f64,
    ) -> TermResult<Term> {
        if original.is_empty() {
            return Err(TermError::EmptySurface);
        }
        if corrected.is_empty() {
            return Err(TermError::EmptyCorrection(original.to_string()));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(TermError::InvalidConfidence(confidence));
        }
        let context = context.map(str::trim).filter(|c| !c.is_empty());
        let now = Utc::now();

        let mut state = self.state();
        state.log.push(CorrectionRecord {
            timestamp: now,
            original: original.to_string(),
            corrected: corrected.to_string(),
            context: context.map(str::to_string),
            confidence,
        });

        let term = state
            .terms
            .entry(original.to_string())
            .and_modify(|t| {
                t.frequency += 1;
                t.confidence = t.confidence.max(confidence);
                if confidence >= FEEDBACK_CONFIDENCE {
                    t.auto_learned = false;
                }
                if let Some(c) = context {
                    if !t.contexts.iter().any(|existing| existing == c) {
                        t.contexts.push(c.to_string());
                    }
                }
            })
            .or_insert_with(|| Term {
                correct: corrected.to_string(),
                frequency: 1,
                contexts: context.map(|c| vec![c.to_string()]).unwrap_or_default(),
                confidence,
                created_at: now,
                auto_learned: confidence < FEEDBACK_CONFIDENCE,
            })
            .clone();
        debug!(
            "Terms: learned {:?} -> {:?} (frequency {}, confidence {:.2})",
            original, term.correct, term.frequency, term.confidence
        );

        if let Some(ref paths) = self.paths {
            write_document(&paths.log, &state.log)?;
            write_document(&paths.terms, &state.terms)?;
        }
        Ok(term)
    }

    /// Look up one surface form.
    pub fn get_term(&self, surface: &str) -> Option<Term> {
        self.state().terms.get(surface).cloned()
    }

    /// Snapshot of every term (a copy; later `learn` calls do not show up in it).
    pub fn get_all(&self) -> TermMap {
        self.state().terms.clone()
    }

    /// Terms seen at least `min_frequency` times.
    pub fn get_high_frequency(&self, min_frequency: u32) -> TermMap {
        self.state()
            .terms
            .iter()
            .filter(|(_, t)| t.frequency >= min_frequency)
            .map(|(k, t)| (k.clone(), t.clone()))
            .collect()
    }

    /// High-frequency terms ordered by descending frequency (then surface), at most `limit`.
    pub fn high_frequency_ranked(&self, min_frequency: u32, limit: usize) -> Vec<(String, Term)> {
        let mut ranked: Vec<(String, Term)> =
            self.get_high_frequency(min_frequency).into_iter().collect();
        ranked.sort_by(|a, b| b.1.frequency.cmp(&a.1.frequency).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    /// Copy of the correction log in append order.
    pub fn corrections_log(&self) -> Vec<CorrectionRecord> {
        self.state().log.clone()
    }

    pub fn len(&self) -> usize {
        self.state().terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_learn_merges_frequency_and_confidence() {
        let store = TermStore::in_memory();
        store.learn("AI", "人工知能", Some("会議1"), 0.8).unwrap();
        let term = store.learn("AI", "人工知能", Some("会議2"), 0.9).unwrap();
        assert_eq!(term.frequency, 2);
        assert_eq!(term.confidence, 0.9);
        assert_eq!(term.contexts, vec!["会議1", "会議2"]);
    }

    #[test]
    fn lower_confidence_does_not_reduce() {
        let store = TermStore::in_memory();
        store.learn("ML", "機械学習", None, 1.0).unwrap();
        let term = store.learn("ML", "機械学習", None, 0.3).unwrap();
        assert_eq!(term.confidence, 1.0);
        assert!(!term.auto_learned);
    }

    #[test]
    fn feedback_confirms_auto_learned_term() {
        let store = TermStore::in_memory();
        let term = store.learn("ジーベース", "GBase", None, AUTO_LEARN_CONFIDENCE).unwrap();
        assert!(term.auto_learned);
        let term = store.learn("ジーベース", "GBase", None, FEEDBACK_CONFIDENCE).unwrap();
        assert!(!term.auto_learned);
    }

    #[test]
    fn invalid_input_is_rejected_without_logging() {
        let store = TermStore::in_memory();
        assert!(matches!(store.learn("", "x", None, 1.0), Err(TermError::EmptySurface)));
        assert!(matches!(store.learn("x", "", None, 1.0), Err(TermError::EmptyCorrection(_))));
        assert!(matches!(
            store.learn("x", "y", None, 1.5),
            Err(TermError::InvalidConfidence(_))
        ));
        assert!(matches!(
            store.learn("x", "y", None, f64::NAN),
            Err(TermError::InvalidConfidence(_))
        ));
        assert!(store.corrections_log().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn blank_context_is_not_stored() {
        let store = TermStore::in_memory();
        let term = store.learn("a", "b", Some("   "), 1.0).unwrap();
        assert!(term.contexts.is_empty());
        assert_eq!(store.corrections_log()[0].context, None);
    }

    #[test]
    fn ranked_high_frequency_orders_by_count() {
        let store = TermStore::in_memory();
        for _ in 0..3 {
            store.learn("b", "B", None, 1.0).unwrap();
        }
        for _ in 0..5 {
            store.learn("a", "A", None, 1.0).unwrap();
        }
        store.learn("c", "C", None, 1.0).unwrap();
        let ranked = store.high_frequency_ranked(DEFAULT_HIGH_FREQUENCY, 10);
        let keys: Vec<&str> = ranked.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
