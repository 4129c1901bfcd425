//! One conversational turn through the full pipeline.
//!
//! Runs offline against a canned generator by default. Built with `--features llm` and with
//! `GEMINI_API_KEYS` (or `GEMINI_API_KEY`) set, it talks to Gemini instead.
//!
//! ```text
//! cargo run --example conversation_turn -- "Does diabetes affect my gums?"
//! ```

use std::sync::Arc;
use turnflow::prelude::*;

/// Stands in for a real model: recognises each step's prompt and answers in its format.
fn canned_model(prompt: &str, _key: &Credential, _mode: GenerationMode) -> Result<String, GenerateError> {
    let reply = if prompt.starts_with("You are a") {
        if prompt.to_lowercase().contains("thank") {
            "type: direct_response\nexplanation: \"You're welcome! Take care.\""
        } else {
            "type: retrieve_kb\nexplanation: \"\""
        }
    } else if prompt.starts_with("Rewrite") {
        "retrieval_query: \"diabetes gum disease\"\nreason: \"keywords\""
    } else if prompt.starts_with("Pick the knowledge-base topic") {
        "topic: periodontal"
    } else if prompt.starts_with("You select") {
        "```yaml\naction: compose_answer\nselected_ids: [\"kb-1\", \"kb-3\"]\nreason: \"both relevant\"\n```"
    } else {
        "```yaml\nexplanation: |\n  Diabetes makes gum infections more likely and slower to heal,\n  and gum inflammation in turn makes blood sugar harder to control.\n  In short, good glucose control and daily oral care protect each other.\nsuggestion_questions:\n  - \"What are early signs of gum disease?\"\n  - \"How often should I see a dentist?\"\n  - \"Can treating my gums lower my HbA1c?\"\n```"
    };
    Ok(reply.to_string())
}

fn knowledge_base() -> StaticRetriever {
    StaticRetriever::new(vec![
        KnowledgeEntry::new(
            "kb-1",
            "Does diabetes increase the risk of gum disease?",
            "Yes. People with diabetes develop periodontitis more often and more severely.",
        )
        .with_topic("periodontal", Some("risk")),
        KnowledgeEntry::new(
            "kb-2",
            "How often should I brush my teeth?",
            "Twice a day with fluoride toothpaste, for two minutes.",
        )
        .with_topic("hygiene", None),
        KnowledgeEntry::new(
            "kb-3",
            "Can gum disease affect blood sugar?",
            "Periodontal inflammation can worsen glycaemic control; treatment may lower HbA1c.",
        )
        .with_topic("periodontal", Some("glycemic")),
    ])
}

#[cfg(feature = "llm")]
fn gemini_client() -> Result<Option<GenerationClient>, Box<dyn std::error::Error>> {
    let Ok(pool) = CredentialPool::from_env() else {
        return Ok(None);
    };
    println!("Using Gemini with {} key(s)", pool.len());
    let generator = turnflow::llm::GeminiGenerator::new(turnflow::llm::GeminiConfig::from_env())?;
    Ok(Some(GenerationClient::new(Arc::new(pool), Arc::new(generator))))
}

#[cfg(not(feature = "llm"))]
fn gemini_client() -> Result<Option<GenerationClient>, Box<dyn std::error::Error>> {
    Ok(None)
}

fn generation_client() -> Result<GenerationClient, Box<dyn std::error::Error>> {
    if let Some(client) = gemini_client()? {
        return Ok(client);
    }

    println!("Using the offline canned model");
    let pool = CredentialPool::new(["offline"], PoolConfig::default())?;
    Ok(GenerationClient::new(Arc::new(pool), Arc::new(canned_model)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Does diabetes affect my gums?".to_string());

    let deps = AgentDeps::new(generation_client()?, Arc::new(knowledge_base()));
    let flow = build_conversation_flow(&deps);
    flow.validate().log_summary();

    let telemetry = MemoryTelemetry::new();
    let mut ctx = SharedContext::new(question.clone(), "patient_diabetes").with_history(vec![
        ChatTurn::new("user", "I have type 2 diabetes."),
        ChatTurn::new("assistant", "Thanks, I will keep that in mind."),
    ]);
    let outcome = flow.run_with_telemetry(&mut ctx, &telemetry)?;

    println!("\nQuestion: {question}");
    println!("Path:     {}", telemetry.steps().join(" -> "));
    println!("Outcome:  {outcome}");
    if let Some(answer) = &ctx.answer {
        println!("\n{}\n", answer.text.trim());
        for suggestion in &answer.suggestions {
            println!("  * {suggestion}");
        }
    }
    println!("\nPool: {:?}", deps.client.pool().status());
    Ok(())
}
