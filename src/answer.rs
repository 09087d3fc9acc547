//! Final answer synthesis from aggregated context.
//!
//! The model is instructed to answer only from the supplied context and is
//! explicitly allowed to say the context is insufficient. Overlong input is
//! cut to a fixed character ceiling with a visible marker — silent dropping
//! would make "the context doesn't say" indistinguishable from "we never
//! sent it".

use tokio_util::sync::CancellationToken;

use crate::controller::cancellable;
use crate::error::Result;
use crate::llm::ChatSession;

/// System instruction for the whole question session.
pub const SYSTEM_INSTRUCTION: &str = "You are a document analysis expert. When given context \
    from a document and a question, provide a clear and focused answer based ONLY on the \
    provided context. If the context doesn't contain enough information to answer the \
    question, say so. Keep your answers concise and directly related to the question asked.";

/// Appended where input was cut to the model's input budget.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Produces the final answer for a question given aggregated context.
pub struct AnswerSynthesizer {
    /// Character ceiling applied to the context before sending.
    char_limit: usize,
}

impl AnswerSynthesizer {
    pub fn new(char_limit: usize) -> Self {
        Self { char_limit }
    }

    /// Ask the model to answer `question` from `context`.
    pub async fn answer(
        &self,
        chat: &mut ChatSession<'_>,
        question: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = format!(
            "Context: {}\nQuestion: {}",
            truncate(context, self.char_limit),
            truncate(question, self.char_limit),
        );
        let reply = cancellable(cancel, chat.send(prompt)).await??;
        Ok(reply)
    }
}

/// Cut `text` to at most `limit` characters, marking the cut visibly.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}{}", head, TRUNCATION_MARKER)
}
