use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const MAX_QUESTION_CHARS: usize = 2_000;
pub const MAX_SESSION_ID_CHARS: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::InvariantViolation("session id must not be empty".to_owned()));
        }
        if trimmed.chars().count() > MAX_SESSION_ID_CHARS {
            return Err(DomainError::InvariantViolation(format!(
                "session id must be at most {MAX_SESSION_ID_CHARS} characters"
            )));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user question bound to the session it was asked in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    text: String,
    session_id: SessionId,
}

impl Question {
    pub fn new(text: &str, session_id: &str) -> Result<Self, DomainError> {
        let session_id = SessionId::parse(session_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DomainError::InvariantViolation("question must not be empty".to_owned()));
        }
        if text.chars().count() > MAX_QUESTION_CHARS {
            return Err(DomainError::InvariantViolation(format!(
                "question must be at most {MAX_QUESTION_CHARS} characters"
            )));
        }
        Ok(Self { text: text.to_owned(), session_id })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::{Question, SessionId, MAX_QUESTION_CHARS, MAX_SESSION_ID_CHARS};
    use crate::errors::DomainError;

    #[test]
    fn question_is_trimmed_and_bound_to_session() {
        let question = Question::new("  average guest count?  ", " s-1 ").expect("valid question");
        assert_eq!(question.text(), "average guest count?");
        assert_eq!(question.session_id().as_str(), "s-1");
    }

    #[test]
    fn blank_question_is_rejected() {
        let error = Question::new("   ", "s-1").expect_err("blank question");
        assert!(matches!(error, DomainError::InvariantViolation(ref message) if message.contains("question")));
    }

    #[test]
    fn oversized_inputs_are_rejected() {
        let long_question = "x".repeat(MAX_QUESTION_CHARS + 1);
        assert!(Question::new(&long_question, "s-1").is_err());

        let long_session = "s".repeat(MAX_SESSION_ID_CHARS + 1);
        assert!(SessionId::parse(&long_session).is_err());
        assert!(SessionId::parse("").is_err());
    }
}
