use crate::core::error::NodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One curated question/answer pair from the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub subtopic: Option<String>,
}

impl KnowledgeEntry {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            answer: answer.into(),
            topic: None,
            subtopic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>, subtopic: Option<&str>) -> Self {
        self.topic = Some(topic.into());
        self.subtopic = subtopic.map(str::to_string);
        self
    }
}

/// Metadata filter applied to a retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFilter {
    pub topic: Option<String>,
    pub subtopic: Option<String>,
}

impl TopicFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.topic.is_none() && self.subtopic.is_none()
    }

    pub fn accepts(&self, entry: &KnowledgeEntry) -> bool {
        let matches = |wanted: &Option<String>, actual: &Option<String>| match wanted {
            Some(w) => actual.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(w)),
            None => true,
        };
        matches(&self.topic, &entry.topic) && matches(&self.subtopic, &entry.subtopic)
    }
}

/// A topic the knowledge base can be filtered on, with its subtopics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub topic: String,
    #[serde(default)]
    pub subtopics: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("knowledge base unavailable: {0}")]
    Unavailable(String),

    #[error("retrieval failed: {0}")]
    Failed(String),
}

impl From<RetrievalError> for NodeError {
    fn from(err: RetrievalError) -> Self {
        NodeError::External(Box::new(err))
    }
}

/// The knowledge base, treated as an opaque search service.
pub trait Retriever: Send + Sync {
    /// Best `top_k` entries for `query`, most relevant first.
    fn retrieve(
        &self,
        query: &str,
        filter: &TopicFilter,
        top_k: usize,
    ) -> Result<Vec<KnowledgeEntry>, RetrievalError>;

    /// Full entries for the given ids, in the order asked. Unknown ids are skipped.
    fn fetch(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>, RetrievalError>;

    /// Topics available to `role`. An empty list disables topic filtering.
    fn topics(&self, _role: &str) -> Result<Vec<TopicInfo>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// An in-memory knowledge base scored by keyword overlap.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    entries: Vec<KnowledgeEntry>,
}

impl StaticRetriever {
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        Self { entries }
    }

    fn score(query_terms: &[String], entry: &KnowledgeEntry) -> usize {
        let haystack = format!("{} {}", entry.question, entry.answer).to_lowercase();
        query_terms
            .iter()
            .filter(|term| haystack.contains(term.as_str()))
            .count()
    }
}

fn terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

impl Retriever for StaticRetriever {
    fn retrieve(
        &self,
        query: &str,
        filter: &TopicFilter,
        top_k: usize,
    ) -> Result<Vec<KnowledgeEntry>, RetrievalError> {
        let query_terms = terms(query);
        let mut scored: Vec<(usize, &KnowledgeEntry)> = self
            .entries
            .iter()
            .filter(|e| filter.accepts(e))
            .map(|e| (Self::score(&query_terms, e), e))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, e)| e.clone())
            .collect())
    }

    fn fetch(&self, ids: &[String]) -> Result<Vec<KnowledgeEntry>, RetrievalError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.entries.iter().find(|e| &e.id == id).cloned())
            .collect())
    }

    fn topics(&self, _role: &str) -> Result<Vec<TopicInfo>, RetrievalError> {
        let mut topics: Vec<TopicInfo> = Vec::new();
        for entry in &self.entries {
            let Some(topic) = &entry.topic else { continue };
            let index = match topics.iter().position(|t| &t.topic == topic) {
                Some(index) => index,
                None => {
                    topics.push(TopicInfo {
                        topic: topic.clone(),
                        subtopics: Vec::new(),
                    });
                    topics.len() - 1
                }
            };
            if let Some(sub) = &entry.subtopic {
                if !topics[index].subtopics.contains(sub) {
                    topics[index].subtopics.push(sub.clone());
                }
            }
        }
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kb() -> StaticRetriever {
        StaticRetriever::new(vec![
            KnowledgeEntry::new("1", "Does diabetes affect gum health?", "Yes, gum disease is more common.")
                .with_topic("periodontal", Some("diabetes")),
            KnowledgeEntry::new("2", "How often should I brush?", "Twice a day.")
                .with_topic("hygiene", None),
            KnowledgeEntry::new("3", "Can gum disease raise blood sugar?", "Inflammation can worsen control.")
                .with_topic("periodontal", Some("glycemic")),
        ])
    }

    #[test]
    fn test_retrieve_ranks_by_overlap_and_respects_filter() {
        let kb = kb();
        let hits = kb.retrieve("gum disease and diabetes", &TopicFilter::none(), 10).unwrap();
        let ids: Vec<_> = hits.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let filter = TopicFilter {
            topic: Some("Periodontal".into()),
            subtopic: Some("glycemic".into()),
        };
        let hits = kb.retrieve("gum disease", &filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "3");
    }

    #[test]
    fn test_fetch_keeps_requested_order_and_skips_unknown() {
        let ids = vec!["3".to_string(), "missing".to_string(), "1".to_string()];
        let entries = kb().fetch(&ids).unwrap();
        assert_eq!(entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["3", "1"]);
    }

    #[test]
    fn test_topics_are_collected_in_first_seen_order() {
        let topics = kb().topics("patient_dental").unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].topic, "periodontal");
        assert_eq!(topics[0].subtopics, vec!["diabetes", "glycemic"]);
        assert!(topics[1].subtopics.is_empty());
    }
}
