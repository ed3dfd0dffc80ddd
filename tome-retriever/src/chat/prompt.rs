//! Prompt assembly for answer synthesis.

use crate::chat::conversation::Exchange;
use std::fmt::Write;

/// Prompt for a single-shot grounded answer: retrieved context plus the
/// question.
pub fn grounded_answer(context: &str, question: &str) -> String {
    format!(
        "Answer the question using the retrieved document excerpts below. \
         Be accurate, concise, and helpful. If the excerpts are not \
         sufficient to answer, say so honestly.\n\n\
         Retrieved documents:\n{context}\n\n\
         Question: {question}\n\n\
         Answer:"
    )
}

/// Prompt for a conversational answer: the trailing history window, the
/// retrieved context, and the current question. `history` is expected to be
/// pre-windowed by the caller.
pub fn conversational(history: &[Exchange], context: &str, question: &str) -> String {
    let mut prompt = String::from(
        "You are an assistant answering questions about a set of documents. \
         Use the retrieved document excerpts and the conversation so far to \
         answer the user's current question.\n",
    );

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for (i, exchange) in history.iter().enumerate() {
            let _ = write!(
                prompt,
                "Turn {}:\nUser: {}\nAssistant: {}\n\n",
                i + 1,
                exchange.question,
                exchange.answer
            );
        }
        prompt.push_str("---\n");
    }

    let _ = write!(
        prompt,
        "\nRetrieved documents:\n{context}\n\n\
         Current question: {question}\n\n\
         Answer the current question. When it refers back to earlier turns, \
         use the conversation above; if the documents are not sufficient, \
         say so honestly.\n\nAnswer:"
    );
    prompt
}
