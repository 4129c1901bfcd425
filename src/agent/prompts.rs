//! Prompt rendering. Each function returns the full text sent to the generator; the expected
//! reply shape is stated at the end of every prompt as a YAML block.

use crate::agent::persona::Persona;
use crate::agent::retriever::{KnowledgeEntry, TopicInfo};
use crate::core::context::{Candidate, ChatTurn};

/// The last `window` messages as `- role: content` lines.
pub fn format_history(history: &[ChatTurn], window: usize) -> String {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .map(|turn| format!("- {}: {}", turn.role, turn.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| format!("- id: {}\n  question: {}", c.id, c.question))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_entries(entries: &[KnowledgeEntry], max_items: usize) -> String {
    entries
        .iter()
        .take(max_items)
        .enumerate()
        .map(|(i, e)| format!("{}. Q: {}\n   A: {}", i + 1, e.question.trim(), e.answer.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() { "(none)" } else { text }
}

pub fn decide_route(query: &str, persona: &Persona, history: &str) -> String {
    format!(
        r#"You are a {speaker} assistant talking to a {audience}. Decide how to handle the message.

Recent conversation:
{history}

Message: "{query}"

Actions:
- direct_response: small talk, greetings or thanks. Write the reply yourself.
- retrieve_kb: a medical question that needs the curated knowledge base.

Reply with one YAML block:
```yaml
type: direct_response
explanation: "your reply"
```
or
```yaml
type: retrieve_kb
explanation: ""
```"#,
        speaker = persona.speaker,
        audience = persona.audience,
        history = or_none(history),
        query = query,
    )
}

pub fn rag_agent(
    query: &str,
    summary: &str,
    candidates: &[Candidate],
    attempts: u32,
    max_attempts: u32,
) -> String {
    format!(
        r#"You select knowledge-base entries that answer the user's question.

Conversation summary: {summary}
Question: "{query}"
Retrieval attempts so far: {attempts} of {max_attempts}

Candidates:
{candidates}

Actions:
- compose_answer: the candidates are enough. List the ids to use in selected_ids.
- create_retrieval_query: the candidates miss the point. A better search query is needed.
- retrieve_kb: search again with the current query.

Reply with one YAML block:
```yaml
action: compose_answer
selected_ids:
  - "id-1"
reason: "short reason"
```"#,
        summary = or_none(summary),
        query = query,
        attempts = attempts,
        max_attempts = max_attempts,
        candidates = or_none(&format_candidates(candidates)),
    )
}

pub fn rewrite_query(query: &str, summary: &str, history: &str) -> String {
    format!(
        r#"Rewrite the question into a short, keyword-focused knowledge-base search query (3 to 7 words, medical terms preferred).

Conversation summary: {summary}
Recent conversation:
{history}

Question: "{query}"

Reply with one YAML block:
```yaml
retrieval_query: "keywords here"
reason: "short reason"
confidence: high
```"#,
        summary = or_none(summary),
        history = or_none(history),
        query = query,
    )
}

pub fn topic_classify(query: &str, topics: &[TopicInfo]) -> String {
    let listing = topics
        .iter()
        .map(|t| {
            if t.subtopics.is_empty() {
                format!("- {}", t.topic)
            } else {
                format!("- {} (subtopics: {})", t.topic, t.subtopics.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Pick the knowledge-base topic that best matches the question.

Topics:
{listing}

Question: "{query}"

Reply with one YAML block. Leave subtopic empty when unsure:
```yaml
topic: "one of the topics above"
subtopic: ""
```"#
    )
}

pub fn compose_answer(
    persona: &Persona,
    query: &str,
    summary: &str,
    entries: &[KnowledgeEntry],
    max_items: usize,
) -> String {
    format!(
        r#"Answer as a {speaker} speaking to a {audience}, using only the curated Q&A below.
Tone: {tone}.
Do not greet. Do not invent facts the Q&A does not contain. End with one line starting with "In short,".

Conversation summary: {summary}
Question: {query}

Q&A:
{entries}

Reply with one YAML block:
```yaml
explanation: |
  your answer
  In short, ...
suggestion_questions:
  - "follow-up question 1"
  - "follow-up question 2"
  - "follow-up question 3"
```"#,
        speaker = persona.speaker,
        audience = persona.audience,
        tone = persona.tone,
        summary = or_none(summary),
        query = query,
        entries = format_entries(entries, max_items),
    )
}
