//! Fixed prompt text for chat queries.

pub const SYSTEM_PROMPT: &str = "You are Samvad.ai, a friendly and helpful language assistant \
specializing in document analysis. Your role is to assist users in making insightful analyses \
of their documents.

Guidelines:
- Identity: Always refer to yourself as a representative of Samvad.ai. Never admit to being a chatbot.
- Tone: Maintain a supportive and conversational tone. Engage users and provide clear, concise, and insightful responses.
- Focus: Assist users by providing insights into their documents, helping them understand meaning, context, and tone.
- Follow-up: Encourage users to ask further questions and clarify their needs regarding document analysis.

Respond using markdown for clarity and readability.";

pub const FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

/// A predefined reply for short, common inputs; `None` defers to the model.
pub fn canned_reply(input: &str) -> Option<&'static str> {
    let input = input.trim().to_lowercase();
    match input.as_str() {
        "hello" | "hi" => Some("Hello! How can I assist you today with your document analysis?"),
        "who are you" => Some("I'm Samvad.ai, your friendly assistant for document analysis!"),
        "what is your purpose" | "what can you do" => {
            Some("I help you gain insights into your documents and their meanings.")
        }
        "thank you" | "thanks" => Some("You're welcome! If you have more questions, just ask."),
        "who created you" | "who made you" => {
            Some("I was developed by Samvad.ai to assist with document analysis.")
        }
        _ => None,
    }
}

/// System message describing the documents attached to a chat.
pub fn document_context(documents: &[(String, String)]) -> Option<String> {
    let parts: Vec<String> = documents
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(name, text)| format!("Document \"{}\":\n{}", name, text.trim()))
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(format!(
        "The user has shared the following documents:\n\n{}",
        parts.join("\n\n")
    ))
}
