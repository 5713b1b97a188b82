use serde::{Deserialize, Serialize};

/// One clarification question written by the question-generation stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Contents of `questions.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
}

impl QuestionSet {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Keeps the first `max` questions; models occasionally overshoot the limit.
    pub fn truncated(mut self, max: usize) -> Self {
        self.questions.truncate(max);
        self
    }
}

/// An answered question, carried in the run context for molding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_question_objects() {
        let set: QuestionSet =
            serde_json::from_str(r#"{"questions":[{"question":"Which database?"}]}"#).unwrap();
        assert_eq!(set.questions[0].id, "");
        assert!(set.questions[0].options.is_empty());
    }

    #[test]
    fn truncates_to_limit() {
        let set = QuestionSet {
            questions: (0..7)
                .map(|i| Question {
                    id: i.to_string(),
                    question: format!("q{}", i),
                    options: vec![],
                })
                .collect(),
        };
        assert_eq!(set.truncated(5).questions.len(), 5);
    }
}
