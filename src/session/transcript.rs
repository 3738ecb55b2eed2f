use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{PriorTurn, Speaker};

/// A single line of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Who spoke
    pub speaker: Speaker,

    /// Text accumulated so far
    pub text: String,

    /// Whether this entry is closed; final entries are never amended
    pub is_final: bool,

    /// When the entry was opened
    pub timestamp: DateTime<Utc>,
}

/// Ordered, append-only conversation log
///
/// Incremental (non-final) updates for a speaker are appended to that
/// speaker's open entry; a final update closes it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    /// Entry closed by an interruption whose response may still report text
    #[serde(skip)]
    interrupted: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one transcript update.
    ///
    /// Non-final text is treated as a delta. Final text replaces what was
    /// accumulated when it is non-empty, so a provider that only sends deltas
    /// followed by an empty final still yields the full sentence.
    pub fn apply(&mut self, speaker: Speaker, text: &str, is_final: bool, at: DateTime<Utc>) {
        if let Some(entry) = self.open_entry_mut(speaker) {
            if is_final {
                if !text.is_empty() {
                    entry.text = text.to_string();
                }
                entry.is_final = true;
            } else {
                entry.text.push_str(text);
            }
            return;
        }

        // Late text for a cut-off turn lands in the entry that was closed
        if let Some(entry) = self
            .interrupted
            .and_then(|i| self.entries.get_mut(i))
            .filter(|e| e.speaker == speaker)
        {
            if is_final {
                if !text.is_empty() {
                    entry.text = text.to_string();
                }
                self.interrupted = None;
            } else {
                entry.text.push_str(text);
            }
            return;
        }

        if text.is_empty() {
            return;
        }

        self.entries.push(TranscriptEntry {
            speaker,
            text: text.to_string(),
            is_final,
            timestamp: at,
        });
    }

    /// Close every open entry of `speaker` because the turn was cut off.
    ///
    /// Text still reported for that turn is folded into the closed entry
    /// until [`Transcript::begin_turn`] marks the start of the next one.
    pub fn finalize_open(&mut self, speaker: Speaker) {
        let mut last_open = None;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.speaker == speaker && !entry.is_final {
                entry.is_final = true;
                last_open = Some(i);
            }
        }
        if last_open.is_some() {
            self.interrupted = last_open;
        }
    }

    /// A new turn for `speaker` started; earlier interruptions are settled
    pub fn begin_turn(&mut self, speaker: Speaker) {
        if self
            .interrupted
            .and_then(|i| self.entries.get(i))
            .is_some_and(|e| e.speaker == speaker)
        {
            self.interrupted = None;
        }
    }

    fn open_entry_mut(&mut self, speaker: Speaker) -> Option<&mut TranscriptEntry> {
        self.entries
            .iter_mut()
            .rev()
            .find(|e| e.speaker == speaker && !e.is_final)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finalized turns, in order, for context replay on reconnect
    pub fn prior_turns(&self) -> Vec<PriorTurn> {
        self.entries
            .iter()
            .filter(|e| e.is_final && !e.text.trim().is_empty())
            .map(|e| PriorTurn {
                speaker: e.speaker,
                text: e.text.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_accumulate_until_final() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::Ai, "Tell me ", false, now);
        transcript.apply(Speaker::Ai, "about Rust.", false, now);
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].text, "Tell me about Rust.");
        assert!(!transcript.entries()[0].is_final);

        transcript.apply(Speaker::Ai, "", true, now);
        assert!(transcript.entries()[0].is_final);
        assert_eq!(transcript.entries()[0].text, "Tell me about Rust.");
    }

    #[test]
    fn test_final_entries_are_not_amended() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::User, "I like ownership.", true, now);
        transcript.apply(Speaker::User, "And lifetimes.", false, now);

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].text, "I like ownership.");
        assert_eq!(transcript.entries()[1].text, "And lifetimes.");
    }

    #[test]
    fn test_final_text_replaces_deltas() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::Ai, "Wel", false, now);
        transcript.apply(Speaker::Ai, "Welcome!", true, now);

        assert_eq!(transcript.entries()[0].text, "Welcome!");
    }

    #[test]
    fn test_speakers_interleave() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::Ai, "Why Rust", false, now);
        transcript.apply(Speaker::User, "Because", true, now);
        transcript.apply(Speaker::Ai, "?", true, now);

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].text, "?");
        assert!(transcript.entries().iter().all(|e| e.is_final));
    }

    #[test]
    fn test_late_final_for_interrupted_turn_is_merged() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::Ai, "Tell me about", false, now);
        transcript.finalize_open(Speaker::Ai);
        transcript.apply(Speaker::User, "Sorry, one thing", true, now);
        transcript.apply(Speaker::Ai, " your", false, now);
        transcript.apply(Speaker::Ai, "Tell me about your last project.", true, now);

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].text, "Tell me about your last project.");
        assert!(transcript.entries()[0].is_final);

        transcript.apply(Speaker::Ai, "Go on.", true, now);
        assert_eq!(transcript.len(), 3);
    }

    #[test]
    fn test_next_turn_after_interruption_gets_own_entry() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::Ai, "Tell me", false, now);
        transcript.finalize_open(Speaker::Ai);
        transcript.begin_turn(Speaker::Ai);
        transcript.apply(Speaker::Ai, "Go on.", true, now);

        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.entries()[0].text, "Tell me");
        assert_eq!(transcript.entries()[1].text, "Go on.");
    }

    #[test]
    fn test_prior_turns_only_final() {
        let mut transcript = Transcript::new();
        let now = Utc::now();

        transcript.apply(Speaker::Ai, "Hello.", true, now);
        transcript.apply(Speaker::User, "Hi", false, now);

        let turns = transcript.prior_turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker, Speaker::Ai);
    }
}
