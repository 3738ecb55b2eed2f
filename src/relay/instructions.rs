use std::fmt::Write;

use crate::protocol::{PriorTurn, Speaker};
use crate::session::{CandidateContext, Difficulty, InterviewProfile};

/// Longest resume summary passed to the provider, in characters
const MAX_SUMMARY_CHARS: usize = 500;

/// Build the interviewer instructions injected once at session start
pub fn build_instructions(
    context: &CandidateContext,
    profile: &InterviewProfile,
    prior_turns: &[PriorTurn],
) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "You are a professional interviewer running a spoken interview for the {} role.",
        profile.role
    );
    let _ = writeln!(out, "{}", difficulty_guidance(profile.difficulty));
    out.push_str(
        "Ask one question at a time, keep each turn short, and wait for the candidate \
         to finish before continuing. If the candidate interrupts, stop and listen.\n",
    );

    out.push_str("\nCandidate profile:\n");
    let _ = writeln!(out, "- Name: {}", context.name);
    let _ = writeln!(out, "- Major: {} ({})", context.major, context.year);
    let _ = writeln!(out, "- Education: {}", context.education);
    let _ = writeln!(out, "- Experience: {}", context.experience);
    let skills: Vec<&str> = context
        .skills
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    let _ = writeln!(out, "- Skills: {}", skills.join(", "));
    let _ = writeln!(out, "- Summary: {}", truncate(&context.summary, MAX_SUMMARY_CHARS));

    if prior_turns.is_empty() {
        out.push_str("\nOpen the interview: greet the candidate by name and ask the first question.\n");
    } else {
        out.push_str(
            "\nThe connection was interrupted. The conversation so far is below; \
             continue from where it stopped without repeating questions.\n",
        );
        for turn in prior_turns {
            let who = match turn.speaker {
                Speaker::Ai => "Interviewer",
                Speaker::User => "Candidate",
            };
            let _ = writeln!(out, "{}: {}", who, turn.text);
        }
    }

    out
}

fn difficulty_guidance(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "Keep questions introductory and encouraging.",
        Difficulty::Medium => "Mix fundamentals with practical scenario questions.",
        Difficulty::Hard => "Probe deeply, ask follow-ups on trade-offs and edge cases.",
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
