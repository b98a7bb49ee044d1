use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// SQL text produced by one generation attempt, not yet validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCandidate {
    raw_text: String,
    attempt_number: u32,
}

impl SqlCandidate {
    pub fn new(raw_text: impl Into<String>, attempt_number: u32) -> Result<Self, DomainError> {
        if attempt_number == 0 {
            return Err(DomainError::InvariantViolation(
                "sql candidate attempt number starts at 1".to_owned(),
            ));
        }
        Ok(Self { raw_text: raw_text.into(), attempt_number })
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    /// Identity used to detect a regenerated duplicate. Layout and keyword case are ignored;
    /// quoted literals and identifiers are kept byte for byte.
    pub fn fingerprint(&self) -> String {
        let mut normalized = String::with_capacity(self.raw_text.len());
        let mut quote: Option<char> = None;
        let mut pending_space = false;

        for character in self.raw_text.trim().chars() {
            match quote {
                Some(open) => {
                    normalized.push(character);
                    if character == open {
                        quote = None;
                    }
                }
                None if character.is_whitespace() => pending_space = true,
                None => {
                    if pending_space && !normalized.is_empty() {
                        normalized.push(' ');
                    }
                    pending_space = false;
                    if matches!(character, '\'' | '"' | '`') {
                        quote = Some(character);
                    }
                    normalized.push(character.to_ascii_lowercase());
                }
            }
        }

        if quote.is_none() {
            let kept = normalized.trim_end_matches(';').trim_end().len();
            normalized.truncate(kept);
        }
        normalized
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    is_safe: bool,
    reason: Option<String>,
    matched_rule: Option<String>,
}

impl ValidationResult {
    pub fn new(
        is_safe: bool,
        reason: Option<String>,
        matched_rule: Option<String>,
    ) -> Result<Self, DomainError> {
        match (is_safe, &matched_rule) {
            (true, Some(rule)) => Err(DomainError::InvariantViolation(format!(
                "a safe validation result cannot carry matched rule `{rule}`"
            ))),
            (false, None) => Err(DomainError::InvariantViolation(
                "an unsafe validation result must name the rule that matched".to_owned(),
            )),
            _ => Ok(Self { is_safe, reason, matched_rule }),
        }
    }

    pub fn safe() -> Self {
        Self { is_safe: true, reason: None, matched_rule: None }
    }

    pub fn rejected(matched_rule: &str, reason: &str) -> Self {
        Self {
            is_safe: false,
            reason: Some(reason.to_owned()),
            matched_rule: Some(matched_rule.to_owned()),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.is_safe
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn matched_rule(&self) -> Option<&str> {
        self.matched_rule.as_deref()
    }
}

/// Generic failure classes that may be shown to the model on retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    NoStatement,
    InvalidOperation,
    SyntaxError,
    ExecutionError,
}

impl FailureCategory {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NoStatement => "no SQL statement found",
            Self::InvalidOperation => "invalid operation",
            Self::SyntaxError => "syntax error",
            Self::ExecutionError => "execution error",
        }
    }
}
