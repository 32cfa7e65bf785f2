//! Subject validation and wildcard matching.
//!
//! Subjects are dot-delimited token sequences (`relay.agent.alpha`).
//! Patterns may additionally contain:
//! - `*` -- matches exactly one token
//! - `>` -- as the final token only, matches one or more remaining tokens
//!
//! Wildcards are whole tokens; `rel*` is an ordinary (invalid) token, not a
//! prefix match. Matching walks the tokenized pattern, no regex involved.

use thiserror::Error;

/// Token delimiter.
pub const DELIMITER: char = '.';

/// Single-token wildcard.
pub const WILDCARD_SINGLE: &str = "*";

/// Multi-token suffix wildcard.
pub const WILDCARD_TAIL: &str = ">";

/// Maximum number of tokens in a subject or pattern.
pub const MAX_TOKENS: usize = 16;

/// Maximum subject length in bytes.
pub const MAX_SUBJECT_LEN: usize = 256;

/// Reasons a subject or pattern is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubjectError {
    #[error("subject is empty")]
    Empty,

    #[error("subject exceeds {MAX_SUBJECT_LEN} bytes")]
    TooLong,

    #[error("subject has more than {MAX_TOKENS} tokens")]
    TooManyTokens,

    #[error("empty token at position {0}")]
    EmptyToken(usize),

    #[error("invalid character in token '{0}'")]
    InvalidToken(String),

    #[error("wildcards are not allowed in a concrete subject")]
    WildcardInSubject,

    #[error("'>' is only allowed as the last token")]
    TailNotLast,
}

/// One token of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    Literal(String),
    /// `*`
    Single,
    /// `>`
    Tail,
}

/// A validated, tokenized subject pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPattern {
    tokens: Vec<PatternToken>,
}

impl SubjectPattern {
    /// Parse and validate a pattern.
    pub fn parse(pattern: &str) -> Result<Self, SubjectError> {
        let raw = split_checked(pattern)?;
        let last = raw.len() - 1;
        let mut tokens = Vec::with_capacity(raw.len());
        for (i, token) in raw.into_iter().enumerate() {
            let parsed = match token {
                WILDCARD_SINGLE => PatternToken::Single,
                WILDCARD_TAIL if i == last => PatternToken::Tail,
                WILDCARD_TAIL => return Err(SubjectError::TailNotLast),
                literal => {
                    check_literal(literal)?;
                    PatternToken::Literal(literal.to_string())
                }
            };
            tokens.push(parsed);
        }
        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[PatternToken] {
        &self.tokens
    }

    /// True when the pattern contains no wildcard tokens.
    pub fn is_literal(&self) -> bool {
        self.tokens
            .iter()
            .all(|t| matches!(t, PatternToken::Literal(_)))
    }

    /// Match a concrete subject against this pattern.
    pub fn matches(&self, subject: &str) -> bool {
        let subject_tokens: Vec<&str> = subject.split(DELIMITER).collect();
        let mut si = 0;

        for token in &self.tokens {
            match token {
                PatternToken::Tail => return si < subject_tokens.len(),
                PatternToken::Single => {
                    if si >= subject_tokens.len() || subject_tokens[si].is_empty() {
                        return false;
                    }
                }
                PatternToken::Literal(lit) => {
                    if subject_tokens.get(si) != Some(&lit.as_str()) {
                        return false;
                    }
                }
            }
            si += 1;
        }

        si == subject_tokens.len()
    }
}

/// Validate a concrete subject (no wildcards).
pub fn validate_subject(subject: &str) -> Result<(), SubjectError> {
    for token in split_checked(subject)? {
        if token == WILDCARD_SINGLE || token == WILDCARD_TAIL {
            return Err(SubjectError::WildcardInSubject);
        }
        check_literal(token)?;
    }
    Ok(())
}

/// Validate a pattern (wildcards allowed).
pub fn validate_pattern(pattern: &str) -> Result<(), SubjectError> {
    SubjectPattern::parse(pattern).map(|_| ())
}

/// Does `subject` match `pattern`? Malformed patterns match nothing.
pub fn matches(pattern: &str, subject: &str) -> bool {
    SubjectPattern::parse(pattern)
        .map(|p| p.matches(subject))
        .unwrap_or(false)
}

fn split_checked(input: &str) -> Result<Vec<&str>, SubjectError> {
    if input.is_empty() {
        return Err(SubjectError::Empty);
    }
    if input.len() > MAX_SUBJECT_LEN {
        return Err(SubjectError::TooLong);
    }
    let tokens: Vec<&str> = input.split(DELIMITER).collect();
    if tokens.len() > MAX_TOKENS {
        return Err(SubjectError::TooManyTokens);
    }
    if let Some(pos) = tokens.iter().position(|t| t.is_empty()) {
        return Err(SubjectError::EmptyToken(pos));
    }
    Ok(tokens)
}

fn check_literal(token: &str) -> Result<(), SubjectError> {
    let valid = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
    if valid {
        Ok(())
    } else {
        Err(SubjectError::InvalidToken(token.to_string()))
    }
}
