//! Prompt sources: what each round asks.
//!
//! Word rooms draw a fresh letter per round from a pool, without repetition
//! inside one game. Quiz rooms walk a fixed deck of questions taken from the
//! [`QuizCatalog`]. The room only asks "is there a round `n`" and "what is
//! the prompt for round `n`"; everything else stays in here.

use crate::config::{RoomSettings, MAX_ROUND_DURATION_SECS, MIN_ROUND_DURATION_SECS};
use crate::error::CoreError;
use rand::Rng;
use roundtable_events::{GameMode, PromptView, RoomOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Id under which the built-in quiz is always available.
pub const SAMPLE_QUIZ_ID: &str = "sample";

const MAX_CATEGORIES: usize = 12;
const MAX_CATEGORY_LEN: usize = 32;

// ============================================================================
// Quiz catalog
// ============================================================================

/// One fixed-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct: usize,
    /// Overrides the room's round duration for this question.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
}

impl Quiz {
    fn validate(&self, id: &str) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidQuiz {
            id: id.to_string(),
            reason,
        };

        if self.questions.is_empty() {
            return Err(invalid("quiz has no questions".to_string()));
        }
        for (i, question) in self.questions.iter().enumerate() {
            if question.options.len() < 2 {
                return Err(invalid(format!("question {i} needs at least two options")));
            }
            if question.correct >= question.options.len() {
                return Err(invalid(format!(
                    "question {i} marks option {} correct but has only {} options",
                    question.correct,
                    question.options.len()
                )));
            }
            if let Some(secs) = question.time_limit_secs {
                if !(MIN_ROUND_DURATION_SECS..=MAX_ROUND_DURATION_SECS).contains(&secs) {
                    return Err(invalid(format!(
                        "question {i} time limit {secs}s is outside {MIN_ROUND_DURATION_SECS}..={MAX_ROUND_DURATION_SECS}s"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Read-mostly store of quizzes, addressed by id.
#[derive(Debug, Clone)]
pub struct QuizCatalog {
    quizzes: HashMap<String, Arc<Quiz>>,
}

impl QuizCatalog {
    /// A catalog holding only the built-in sample quiz.
    pub fn new() -> Self {
        let mut quizzes = HashMap::new();
        quizzes.insert(SAMPLE_QUIZ_ID.to_string(), Arc::new(sample_quiz()));
        Self { quizzes }
    }

    /// Parses a JSON object of `{id: quiz}` on top of the sample quiz.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let parsed: HashMap<String, Quiz> = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        for (id, quiz) in parsed {
            catalog.insert(id, quiz)?;
        }
        Ok(catalog)
    }

    /// Loads a catalog file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let catalog = Self::from_json(&content)?;
        info!(
            "📚 Loaded {} quizzes from {}",
            catalog.len(),
            path.as_ref().display()
        );
        Ok(catalog)
    }

    /// Adds or replaces a quiz after validating it.
    pub fn insert(&mut self, id: impl Into<String>, quiz: Quiz) -> Result<(), CoreError> {
        let id = id.into();
        quiz.validate(&id)?;
        self.quizzes.insert(id, Arc::new(quiz));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Quiz>> {
        self.quizzes.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.quizzes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quizzes.is_empty()
    }

    /// Sorted quiz ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.quizzes.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for QuizCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in three-question quiz.
pub fn sample_quiz() -> Quiz {
    let question = |text: &str, options: [&str; 4], correct: usize| Question {
        text: text.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct,
        time_limit_secs: None,
    };

    Quiz {
        title: "Warm-up".to_string(),
        questions: vec![
            question("Which planet is closest to the sun?", ["Venus", "Mercury", "Mars", "Earth"], 1),
            question("How many sides does a hexagon have?", ["5", "6", "7", "8"], 1),
            question("What is the chemical symbol for gold?", ["Ag", "Gd", "Au", "Go"], 2),
        ],
    }
}

// ============================================================================
// Round prompts
// ============================================================================

/// The prompt of one round, including any answer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundPrompt {
    Word {
        letter: char,
        categories: Vec<String>,
    },
    Quiz {
        question_index: usize,
        question_count: usize,
        question: Question,
    },
}

impl RoundPrompt {
    /// The client-facing view, without the answer key.
    pub fn view(&self) -> PromptView {
        match self {
            RoundPrompt::Word { letter, categories } => PromptView::Word {
                letter: *letter,
                categories: categories.clone(),
            },
            RoundPrompt::Quiz {
                question_index,
                question_count,
                question,
            } => PromptView::Quiz {
                question_index: *question_index,
                question_count: *question_count,
                text: question.text.clone(),
                options: question.options.clone(),
            },
        }
    }

    /// Per-prompt duration override.
    pub fn time_limit(&self) -> Option<Duration> {
        match self {
            RoundPrompt::Quiz { question, .. } => question.time_limit_secs.map(Duration::from_secs),
            RoundPrompt::Word { .. } => None,
        }
    }

    pub fn correct_option(&self) -> Option<usize> {
        match self {
            RoundPrompt::Quiz { question, .. } => Some(question.correct),
            RoundPrompt::Word { .. } => None,
        }
    }
}

/// Letter-per-round prompts for word mode.
#[derive(Debug, Clone)]
pub struct WordPrompts {
    categories: Vec<String>,
    rounds: usize,
    pool: Vec<char>,
    remaining: Vec<char>,
    drawn: Vec<char>,
}

impl WordPrompts {
    /// `rounds` is capped by the number of letters in the pool.
    pub fn new(categories: Vec<String>, rounds: usize, excluded: &[char]) -> Self {
        let pool: Vec<char> = ('A'..='Z')
            .filter(|c| !excluded.iter().any(|e| e.eq_ignore_ascii_case(c)))
            .collect();
        let rounds = rounds.clamp(1, pool.len().max(1));
        Self {
            categories,
            rounds,
            remaining: pool.clone(),
            pool,
            drawn: Vec::new(),
        }
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    fn prompt_for(&mut self, index: usize) -> Option<RoundPrompt> {
        if index >= self.rounds {
            return None;
        }
        while self.drawn.len() <= index {
            if self.remaining.is_empty() {
                return None;
            }
            let pick = rand::thread_rng().gen_range(0..self.remaining.len());
            self.drawn.push(self.remaining.swap_remove(pick));
        }
        Some(RoundPrompt::Word {
            letter: self.drawn[index],
            categories: self.categories.clone(),
        })
    }

    fn reset(&mut self) {
        self.remaining = self.pool.clone();
        self.drawn.clear();
    }
}

/// A fixed sequence of quiz questions.
#[derive(Debug, Clone)]
pub struct QuizDeck {
    quiz: Arc<Quiz>,
}

impl QuizDeck {
    pub fn new(quiz: Arc<Quiz>) -> Self {
        Self { quiz }
    }

    pub fn title(&self) -> &str {
        &self.quiz.title
    }

    fn prompt_for(&self, index: usize) -> Option<RoundPrompt> {
        self.quiz.questions.get(index).map(|question| RoundPrompt::Quiz {
            question_index: index,
            question_count: self.quiz.questions.len(),
            question: question.clone(),
        })
    }
}

/// Where a room's prompts come from.
#[derive(Debug, Clone)]
pub enum PromptSource {
    Word(WordPrompts),
    Quiz(QuizDeck),
}

impl PromptSource {
    /// Builds the prompt source for a room created with `options`.
    pub fn for_room(
        options: &RoomOptions,
        settings: &RoomSettings,
        catalog: &QuizCatalog,
    ) -> Result<Self, CoreError> {
        match options.mode {
            GameMode::Quiz => {
                let id = options.quiz_id.as_deref().unwrap_or(SAMPLE_QUIZ_ID);
                let quiz = catalog
                    .get(id)
                    .ok_or_else(|| CoreError::QuizNotFound(id.to_string()))?;
                Ok(PromptSource::Quiz(QuizDeck::new(quiz)))
            }
            GameMode::Word => {
                let categories = options
                    .categories
                    .as_deref()
                    .map(clean_categories)
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| settings.default_categories.clone());
                let rounds = options.rounds.unwrap_or(settings.word_rounds);
                Ok(PromptSource::Word(WordPrompts::new(
                    categories,
                    rounds,
                    &settings.excluded_letters,
                )))
            }
        }
    }

    pub fn total_rounds(&self) -> usize {
        match self {
            PromptSource::Word(words) => words.rounds,
            PromptSource::Quiz(deck) => deck.quiz.questions.len(),
        }
    }

    pub fn has_round(&self, index: usize) -> bool {
        index < self.total_rounds()
    }

    /// The prompt for round `index`. Asking again for the same index returns the same prompt.
    pub fn prompt_for(&mut self, index: usize) -> Option<RoundPrompt> {
        match self {
            PromptSource::Word(words) => words.prompt_for(index),
            PromptSource::Quiz(deck) => deck.prompt_for(index),
        }
    }

    /// Starts a new game with the same configuration.
    pub fn reset(&mut self) {
        if let PromptSource::Word(words) = self {
            words.reset();
        }
    }
}

/// Trims, drops empty or oversized entries and removes case-insensitive duplicates.
fn clean_categories(raw: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for category in raw {
        let category = category.trim();
        if category.is_empty() || category.chars().count() > MAX_CATEGORY_LEN {
            continue;
        }
        if cleaned.iter().any(|c| c.eq_ignore_ascii_case(category)) {
            continue;
        }
        cleaned.push(category.to_string());
        if cleaned.len() == MAX_CATEGORIES {
            break;
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Write;

    #[test]
    fn test_word_letters_do_not_repeat() {
        let mut prompts = WordPrompts::new(vec!["City".into()], 23, &['Q', 'X', 'Y']);
        let mut seen = HashSet::new();
        for i in 0..23 {
            match prompts.prompt_for(i) {
                Some(RoundPrompt::Word { letter, .. }) => {
                    assert!(!['Q', 'X', 'Y'].contains(&letter));
                    assert!(seen.insert(letter), "letter {letter} drawn twice");
                }
                other => panic!("unexpected prompt {other:?}"),
            }
        }
        assert!(prompts.prompt_for(23).is_none());
    }

    #[test]
    fn test_word_prompt_is_stable_per_index() {
        let mut source = PromptSource::Word(WordPrompts::new(vec!["A".into()], 3, &[]));
        let first = source.prompt_for(0);
        assert_eq!(source.prompt_for(0), first);
        source.reset();
        assert!(source.prompt_for(0).is_some());
    }

    #[test]
    fn test_rounds_are_capped_by_pool() {
        let prompts = WordPrompts::new(vec![], 100, &['Q', 'X', 'Y']);
        assert_eq!(prompts.rounds, 23);
        let prompts = WordPrompts::new(vec![], 0, &[]);
        assert_eq!(prompts.rounds, 1);
    }

    #[test]
    fn test_quiz_view_hides_answer() {
        let mut source = PromptSource::Quiz(QuizDeck::new(Arc::new(sample_quiz())));
        assert_eq!(source.total_rounds(), 3);
        let prompt = source.prompt_for(2).unwrap();
        assert_eq!(prompt.correct_option(), Some(2));
        let json = serde_json::to_value(prompt.view()).unwrap();
        assert_eq!(json["kind"], "quiz");
        assert_eq!(json["question_index"], 2);
        assert!(json.get("correct").is_none());
        assert!(source.prompt_for(3).is_none());
    }

    #[test]
    fn test_for_room_resolves_options() {
        let settings = RoomSettings::default();
        let catalog = QuizCatalog::new();

        let word = PromptSource::for_room(
            &RoomOptions {
                categories: Some(vec![" Fruit ".into(), "fruit".into(), "".into(), "Band".into()]),
                rounds: Some(2),
                ..Default::default()
            },
            &settings,
            &catalog,
        )
        .unwrap();
        match &word {
            PromptSource::Word(words) => {
                assert_eq!(words.categories().to_vec(), vec!["Fruit".to_string(), "Band".to_string()]);
            }
            other => panic!("unexpected source {other:?}"),
        }
        assert_eq!(word.total_rounds(), 2);

        let missing = PromptSource::for_room(
            &RoomOptions {
                mode: GameMode::Quiz,
                quiz_id: Some("nope".into()),
                ..Default::default()
            },
            &settings,
            &catalog,
        );
        assert!(matches!(missing, Err(CoreError::QuizNotFound(id)) if id == "nope"));
    }

    #[test]
    fn test_catalog_rejects_invalid_quiz() {
        let json = r#"{"broken": {"title": "B", "questions": [{"text": "?", "options": ["a", "b"], "correct": 5}]}}"#;
        assert!(matches!(
            QuizCatalog::from_json(json),
            Err(CoreError::InvalidQuiz { id, .. }) if id == "broken"
        ));
        assert!(matches!(QuizCatalog::from_json("[1, 2]"), Err(CoreError::CatalogParse(_))));
    }

    #[test]
    fn test_catalog_rejects_out_of_range_time_limits() {
        let quiz_with_limit = |secs: u64| {
            format!(
                r#"{{"timed": {{"title": "T", "questions": [
                    {{"text": "?", "options": ["a", "b"], "correct": 0, "time_limit_secs": {secs}}}
                ]}}}}"#
            )
        };

        for secs in [0, u64::MAX, MAX_ROUND_DURATION_SECS + 1] {
            assert!(
                matches!(
                    QuizCatalog::from_json(&quiz_with_limit(secs)),
                    Err(CoreError::InvalidQuiz { id, .. }) if id == "timed"
                ),
                "time limit {secs} accepted"
            );
        }

        let catalog = QuizCatalog::from_json(&quiz_with_limit(MIN_ROUND_DURATION_SECS)).unwrap();
        assert!(catalog.get("timed").is_some());
    }

    #[test]
    fn test_catalog_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"capitals": {{"title": "Capitals", "questions": [
                {{"text": "Capital of Peru?", "options": ["Lima", "Quito"], "correct": 0, "time_limit_secs": 15}}
            ]}}}}"#
        )
        .unwrap();

        let catalog = QuizCatalog::load_from_file(file.path()).unwrap();
        assert_eq!(catalog.ids(), vec!["capitals".to_string(), "sample".to_string()]);
        let quiz = catalog.get("capitals").unwrap();
        assert_eq!(quiz.questions[0].time_limit_secs, Some(15));

        let mut deck = PromptSource::Quiz(QuizDeck::new(quiz));
        assert_eq!(deck.prompt_for(0).unwrap().time_limit(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_missing_catalog_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = QuizCatalog::load_from_file(dir.path().join("missing.json"));
        assert!(matches!(result, Err(CoreError::CatalogIo(_))));
    }
}
