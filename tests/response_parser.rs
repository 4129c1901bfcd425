//! Integration tests for structured-response extraction against realistic generator output.

use serde_json::json;
use turnflow::parser::{self, FieldType, ParseError, ResponseParser, Schema};

#[test]
fn test_fenced_yaml_with_required_string() {
    let schema = Schema::new().required("field", FieldType::String);
    let record = parser::parse("```yaml\nfield: value\n```", &schema).unwrap();
    assert_eq!(record.len(), 1);
    assert_eq!(record["field"], json!("value"));
}

#[test]
fn test_list_field_accepts_list_and_rejects_scalar() {
    let schema = Schema::new()
        .required("explanation", FieldType::String)
        .required("questions", FieldType::List);

    let listed = "explanation: ok\nquestions:\n  - one?\n  - two?\n  - three?\n";
    let record = parser::parse(listed, &schema).unwrap();
    assert_eq!(record["questions"].as_array().map(Vec::len), Some(3));

    let scalar = "explanation: ok\nquestions: just one question?\n";
    assert!(parser::parse(scalar, &schema).is_none());
    assert_eq!(
        ResponseParser::default().try_parse(scalar, &schema),
        Err(ParseError::WrongType {
            field: "questions".into(),
            expected: FieldType::List,
            found: "string",
        })
    );
}

#[test]
fn test_oversized_input_is_rejected() {
    let huge = format!("field: {}", "x".repeat(60_000));
    assert!(parser::extract_only(&huge).is_none());
    assert!(matches!(
        ResponseParser::default().try_extract(&huge),
        Err(ParseError::TooLarge { max: 50_000, .. })
    ));
}

#[test]
fn test_missing_required_field() {
    let schema = Schema::new()
        .required("type", FieldType::String)
        .require("explanation");
    assert_eq!(
        ResponseParser::default().try_parse("type: retrieve_kb", &schema),
        Err(ParseError::MissingField("explanation".into()))
    );
}

#[test]
fn test_chatty_reply_with_mislabelled_json_fence() {
    let reply = "Sure! Here is my decision:\n\n```yaml\n{\"action\": \"compose_answer\", \"selected_ids\": [\"12\", \"7\"]}\n```\nLet me know if you need more.";
    let schema = Schema::new()
        .required("action", FieldType::String)
        .optional("selected_ids", FieldType::List);
    let record = parser::parse(reply, &schema).unwrap();
    assert_eq!(record["selected_ids"], json!(["12", "7"]));
}

#[test]
fn test_unterminated_fence_at_end_of_reply() {
    let reply = "Answer below\n```yaml\nexplanation: |\n  Brush twice a day.\n  In short, be consistent.\n";
    let record = parser::extract_only(reply).unwrap();
    let explanation = record["explanation"].as_str().unwrap();
    assert!(explanation.starts_with("Brush twice a day.\nIn short, be consistent."));
}

#[test]
fn test_optional_field_type_is_checked_when_present() {
    let schema = Schema::new()
        .required("topic", FieldType::String)
        .optional("confidence", FieldType::Number);
    assert!(parser::parse("topic: hygiene", &schema).is_some());
    assert!(parser::parse("topic: hygiene\nconfidence: 0.8", &schema).is_some());
    assert!(parser::parse("topic: hygiene\nconfidence: high", &schema).is_none());
}

#[test]
fn test_code_fence_before_the_answer_is_skipped() {
    let reply = "Here is code:\n```python\nprint(1)\n```\nAnd the answer:\n```yaml\na: 1\n```\n";
    let record = parser::extract_only(reply).unwrap();
    assert_eq!(record.len(), 1);
    assert_eq!(record["a"], json!(1));
}

#[test]
fn test_first_mapping_fence_wins_over_earlier_list() {
    let reply = "Candidates:\n```json\n[\"12\", \"7\"]\n```\nDecision:\n```yaml\naction: retrieve_kb\n```\n";
    let schema = Schema::new().required("action", FieldType::String);
    let record = parser::parse(reply, &schema).unwrap();
    assert_eq!(record["action"], json!("retrieve_kb"));
}

#[test]
fn test_prose_between_fences_is_never_decoded() {
    let reply = "```text\nnotes\n```\nsummary: this line is prose\n```bash\nls\n```\n```yml\ntopic: hygiene\n```";
    let record = parser::extract_only(reply).unwrap();
    assert_eq!(record.len(), 1);
    assert_eq!(record["topic"], json!("hygiene"));
}
