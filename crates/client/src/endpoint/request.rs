//! Prompt construction and the generateContent request body.

use serde::Serialize;

use super::EndpointError;

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 4000;

/// A question plus optional surrounding context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnswerPrompt {
    pub question: String,
    pub context: Option<String>,
}

impl AnswerPrompt {
    pub fn new(question: impl Into<String>, context: Option<String>) -> Self {
        Self { question: question.into(), context }
    }

    /// Validate the prompt parameters.
    ///
    /// Returns an error for an empty (or whitespace-only) or oversized question.
    pub fn validate(&self) -> Result<(), EndpointError> {
        if self.question.trim().is_empty() {
            return Err(EndpointError::InvalidPrompt("question cannot be empty".to_string()));
        }

        let chars = self.question.chars().count();
        if chars > MAX_QUESTION_CHARS {
            return Err(EndpointError::InvalidPrompt(format!(
                "question too long: {} chars (max {})",
                chars, MAX_QUESTION_CHARS
            )));
        }

        Ok(())
    }

    /// Render the single prompt string sent to the endpoint.
    pub fn render(&self) -> String {
        let mut prompt = String::with_capacity(self.question.len() + 256);
        prompt.push_str("Answer the question below concisely and accurately.\n");

        if let Some(context) = self.context.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            prompt.push_str("\nContext:\n");
            prompt.push_str(context);
            prompt.push('\n');
        }

        prompt.push_str("\nQuestion:\n");
        prompt.push_str(self.question.trim());
        prompt.push_str(
            "\n\nEnd your reply with a final line of the form `Confidence: NN`, \
             where NN is your confidence from 0 to 100.",
        );
        prompt
    }
}

/// Body of a generateContent call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<RequestContent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestContent {
    pub parts: Vec<RequestPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestPart {
    pub text: String,
}

impl GenerateRequest {
    /// Wrap a prompt as a single-part, single-content request.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self { contents: vec![RequestContent { parts: vec![RequestPart { text: prompt.into() }] }] }
    }
}
