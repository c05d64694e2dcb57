//! generateContent response types and answer parsing.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::EndpointError;

/// Confidence assumed when the reply does not state one.
pub const DEFAULT_CONFIDENCE: u8 = 80;

static CONFIDENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*confidence\s*[:=]\s*(\d{1,3})\s*%?\s*$").unwrap());

/// Raw response from a generateContent call.
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate's parts.
    pub fn into_text(self) -> Result<String, EndpointError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| EndpointError::Parse("response has no candidates".to_string()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        Ok(text)
    }
}

/// An answer with its stated (or default) confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedAnswer {
    pub text: String,
    pub confidence: u8,
}

/// Split the reply into answer text and confidence.
///
/// The last `Confidence: NN` line wins and is removed from the text. Values
/// above 100 clamp to 100.
pub fn parse_answer(reply: &str) -> Result<ParsedAnswer, EndpointError> {
    let mut confidence = DEFAULT_CONFIDENCE;
    let mut span = None;

    if let Some(caps) = CONFIDENCE_LINE.captures_iter(reply).last()
        && let (Some(whole), Some(value)) = (caps.get(0), caps.get(1))
    {
        let parsed: u32 = value.as_str().parse().unwrap_or(u32::from(DEFAULT_CONFIDENCE));
        confidence = parsed.min(100) as u8;
        span = Some(whole.range());
    }

    let text = match span {
        Some(range) => format!("{}{}", &reply[..range.start], &reply[range.end..]),
        None => reply.to_string(),
    };
    let text = text.trim().to_string();

    if text.is_empty() {
        return Err(EndpointError::Parse("endpoint returned an empty answer".to_string()));
    }

    Ok(ParsedAnswer { text, confidence })
}
