use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

/// Candidate profile supplied once when the session starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateContext {
    pub name: String,
    pub major: String,
    pub year: String,
    pub skills: Vec<String>,
    pub experience: String,
    pub education: String,
    pub summary: String,
}

impl CandidateContext {
    /// Every field is required; returns the first missing one.
    pub fn validate(&self) -> Result<(), SessionError> {
        let text_fields = [
            ("name", &self.name),
            ("major", &self.major),
            ("year", &self.year),
            ("experience", &self.experience),
            ("education", &self.education),
            ("summary", &self.summary),
        ];

        for (field, value) in text_fields {
            if value.trim().is_empty() {
                return Err(SessionError::InvalidContext(field));
            }
        }

        if !self.skills.iter().any(|s| !s.trim().is_empty()) {
            return Err(SessionError::InvalidContext("skills"));
        }

        Ok(())
    }
}

/// Interview difficulty requested for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{other}' (easy, medium, hard)")),
        }
    }
}

/// What the candidate is interviewing for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewProfile {
    /// Target role, e.g. "backend engineer"
    pub role: String,
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl InterviewProfile {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            difficulty: Difficulty::default(),
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.role.trim().is_empty() {
            return Err(SessionError::InvalidContext("role"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_context() -> CandidateContext {
    CandidateContext {
        name: "Ada Lovelace".to_string(),
        major: "Mathematics".to_string(),
        year: "Senior".to_string(),
        skills: vec!["Rust".to_string(), "Analysis".to_string()],
        experience: "Research assistant on the analytical engine".to_string(),
        education: "Private tutoring".to_string(),
        summary: "Enjoys turning algorithms into machines".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_context_is_valid() {
        assert!(sample_context().validate().is_ok());
    }

    #[test]
    fn test_blank_field_is_rejected() {
        let mut context = sample_context();
        context.education = "   ".to_string();

        assert_eq!(
            context.validate(),
            Err(SessionError::InvalidContext("education"))
        );
    }

    #[test]
    fn test_skills_need_one_entry() {
        let mut context = sample_context();
        context.skills = vec![String::new()];

        assert_eq!(context.validate(), Err(SessionError::InvalidContext("skills")));
    }

    #[test]
    fn test_profile_defaults_to_medium() {
        let profile: InterviewProfile = serde_json::from_str(r#"{"role":"SRE"}"#).unwrap();
        assert_eq!(profile.difficulty, Difficulty::Medium);
        assert!(profile.validate().is_ok());
        assert!(InterviewProfile::new("").validate().is_err());
    }

    #[test]
    fn test_difficulty_parses_case_insensitively() {
        assert_eq!("Hard".parse::<Difficulty>(), Ok(Difficulty::Hard));
        assert!("brutal".parse::<Difficulty>().is_err());
    }
}
