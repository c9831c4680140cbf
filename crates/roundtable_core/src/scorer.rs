//! Scoring backends.
//!
//! A [`Scorer`] turns one round's answers into a [`ScoreSheet`]. Rooms never
//! call a scorer inline: the actor runs it in a worker task under a timeout
//! and feeds the result back as an ordinary event. When a scorer fails or is
//! too slow the room falls back to [`fallback_sheet`] and flags the round as
//! degraded.
//!
//! ## Backends
//!
//! - [`QuizScorer`] - deterministic index compare against the answer key.
//! - [`WordScorer`] - local letter-rule validation with uniqueness bonus.
//! - [`HttpScorer`] - posts the round to an external validator over HTTP.

use crate::error::ScorerError;
use crate::prompt::RoundPrompt;
use async_trait::async_trait;
use roundtable_events::{AnswerPayload, GameMode, PlayerId, ScoreLine};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Points per player for one round.
pub type ScoreSheet = BTreeMap<PlayerId, ScoreLine>;

/// Points for a valid word nobody else gave.
pub const UNIQUE_WORD_POINTS: u32 = 10;
/// Points for a valid word shared with another player.
pub const SHARED_WORD_POINTS: u32 = 5;

/// Everything a scorer needs to grade one round.
#[derive(Debug, Clone)]
pub struct ScoringRequest {
    pub round_index: usize,
    pub prompt: RoundPrompt,
    pub answers: BTreeMap<PlayerId, AnswerPayload>,
    /// How long the caller will wait.
    pub timeout: Duration,
}

/// A pluggable scoring backend.
#[async_trait]
pub trait Scorer: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Grades a round. The caller enforces `request.timeout`.
    async fn score(&self, request: &ScoringRequest) -> Result<ScoreSheet, ScorerError>;
}

/// The scorer used for each game mode.
#[derive(Clone)]
pub struct Scorers {
    pub word: Arc<dyn Scorer>,
    pub quiz: Arc<dyn Scorer>,
}

impl Scorers {
    /// Local scorers only, no network.
    pub fn local(quiz_points: u32) -> Self {
        Self {
            word: Arc::new(WordScorer::default()),
            quiz: Arc::new(QuizScorer::new(quiz_points)),
        }
    }

    pub fn for_mode(&self, mode: GameMode) -> Arc<dyn Scorer> {
        match mode {
            GameMode::Word => Arc::clone(&self.word),
            GameMode::Quiz => Arc::clone(&self.quiz),
        }
    }
}

impl std::fmt::Debug for Scorers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scorers")
            .field("word", &self.word.name())
            .field("quiz", &self.quiz.name())
            .finish()
    }
}

// ============================================================================
// Quiz
// ============================================================================

/// Awards a fixed number of points for the correct option.
#[derive(Debug, Clone)]
pub struct QuizScorer {
    points: u32,
}

impl QuizScorer {
    pub fn new(points: u32) -> Self {
        Self { points }
    }
}

#[async_trait]
impl Scorer for QuizScorer {
    fn name(&self) -> &str {
        "quiz"
    }

    async fn score(&self, request: &ScoringRequest) -> Result<ScoreSheet, ScorerError> {
        let correct = request
            .prompt
            .correct_option()
            .ok_or_else(|| ScorerError::Failed("quiz scorer received a word prompt".to_string()))?;
        Ok(compare_choices(correct, &request.answers, self.points))
    }
}

fn compare_choices(
    correct: usize,
    answers: &BTreeMap<PlayerId, AnswerPayload>,
    points: u32,
) -> ScoreSheet {
    answers
        .iter()
        .map(|(player, answer)| {
            let line = match answer {
                AnswerPayload::Choice(choice) if *choice == correct => ScoreLine::new(points, "correct"),
                AnswerPayload::Choice(_) => ScoreLine::zero("incorrect"),
                _ => ScoreLine::zero("no answer"),
            };
            (*player, line)
        })
        .collect()
}

// ============================================================================
// Word
// ============================================================================

/// Accepts a word if it has at least two letters and starts with the round letter.
#[derive(Debug, Clone, Default)]
pub struct LetterRuleJudge;

impl LetterRuleJudge {
    pub fn is_valid(&self, letter: char, word: &str) -> bool {
        let word = word.trim();
        let letters = word.chars().filter(|c| c.is_alphabetic()).count();
        let starts = word
            .chars()
            .next()
            .map(|first| first.to_lowercase().eq(letter.to_lowercase()))
            .unwrap_or(false);
        letters >= 2 && starts
    }
}

/// Scores word rounds locally with a [`LetterRuleJudge`].
#[derive(Debug, Clone, Default)]
pub struct WordScorer {
    judge: LetterRuleJudge,
}

impl WordScorer {
    pub fn new(judge: LetterRuleJudge) -> Self {
        Self { judge }
    }
}

fn normalize_word(word: &str) -> String {
    word.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[async_trait]
impl Scorer for WordScorer {
    fn name(&self) -> &str {
        "word"
    }

    async fn score(&self, request: &ScoringRequest) -> Result<ScoreSheet, ScorerError> {
        let (letter, categories) = match &request.prompt {
            RoundPrompt::Word { letter, categories } => (*letter, categories),
            RoundPrompt::Quiz { .. } => {
                return Err(ScorerError::Failed("word scorer received a quiz prompt".to_string()))
            }
        };

        // category -> normalized word -> how many players gave it
        let mut frequency: HashMap<&str, HashMap<String, usize>> = HashMap::new();
        for answer in request.answers.values() {
            if let AnswerPayload::Words(words) = answer {
                for category in categories {
                    if let Some(word) = words.get(category) {
                        if self.judge.is_valid(letter, word) {
                            *frequency
                                .entry(category.as_str())
                                .or_default()
                                .entry(normalize_word(word))
                                .or_default() += 1;
                        }
                    }
                }
            }
        }

        let mut sheet = ScoreSheet::new();
        for (player, answer) in &request.answers {
            let words = match answer {
                AnswerPayload::Words(words) => words,
                AnswerPayload::Blank => {
                    sheet.insert(*player, ScoreLine::zero("no answer"));
                    continue;
                }
                AnswerPayload::Choice(_) => {
                    sheet.insert(*player, ScoreLine::zero("invalid answer"));
                    continue;
                }
            };

            let mut points = 0;
            let mut verdicts = Vec::with_capacity(categories.len());
            for category in categories {
                let verdict = match words.get(category).map(|w| w.trim()).filter(|w| !w.is_empty()) {
                    None => format!("{category}: missing +0"),
                    Some(word) if !self.judge.is_valid(letter, word) => {
                        format!("{category}: '{word}' invalid +0")
                    }
                    Some(word) => {
                        let count = frequency
                            .get(category.as_str())
                            .and_then(|f| f.get(&normalize_word(word)))
                            .copied()
                            .unwrap_or(1);
                        if count > 1 {
                            points += SHARED_WORD_POINTS;
                            format!("{category}: '{word}' shared +{SHARED_WORD_POINTS}")
                        } else {
                            points += UNIQUE_WORD_POINTS;
                            format!("{category}: '{word}' unique +{UNIQUE_WORD_POINTS}")
                        }
                    }
                };
                verdicts.push(verdict);
            }
            sheet.insert(*player, ScoreLine::new(points, verdicts.join("; ")));
        }
        Ok(sheet)
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Serialize)]
struct HttpScoringBody<'a> {
    round_index: usize,
    prompt: roundtable_events::PromptView,
    answers: &'a BTreeMap<PlayerId, AnswerPayload>,
}

/// Delegates scoring to an external validator.
///
/// The validator receives `{round_index, prompt, answers}` and must reply
/// with `{player_id: {points, explanation}}`.
#[derive(Debug, Clone)]
pub struct HttpScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpScorer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ScorerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScorerError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Scorer for HttpScorer {
    fn name(&self) -> &str {
        "http"
    }

    async fn score(&self, request: &ScoringRequest) -> Result<ScoreSheet, ScorerError> {
        let body = HttpScoringBody {
            round_index: request.round_index,
            prompt: request.prompt.view(),
            answers: &request.answers,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ScorerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScorerError::Failed(format!("validator returned http {}", status.as_u16())));
        }

        let sheet = response
            .json::<ScoreSheet>()
            .await
            .map_err(|e| ScorerError::Transport(e.to_string()))?;
        debug!(round_index = request.round_index, entries = sheet.len(), "Validator replied");
        Ok(sheet)
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// Scores a round without any scorer.
///
/// Quiz rounds still compare against the answer key. Word rounds cannot be
/// validated locally in degraded mode, so every player gets zero.
pub fn fallback_sheet(request: &ScoringRequest, quiz_points: u32) -> ScoreSheet {
    match request.prompt.correct_option() {
        Some(correct) => compare_choices(correct, &request.answers, quiz_points),
        None => request
            .answers
            .keys()
            .map(|player| (*player, ScoreLine::zero("validator unavailable")))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::sample_quiz;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn pid(token: &str) -> PlayerId {
        PlayerId::from_identity(token)
    }

    fn words(pairs: &[(&str, &str)]) -> AnswerPayload {
        AnswerPayload::Words(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    fn word_request(answers: Vec<(PlayerId, AnswerPayload)>) -> ScoringRequest {
        ScoringRequest {
            round_index: 0,
            prompt: RoundPrompt::Word {
                letter: 'B',
                categories: vec!["City".to_string(), "Animal".to_string()],
            },
            answers: answers.into_iter().collect(),
            timeout: Duration::from_secs(1),
        }
    }

    fn quiz_request(answers: Vec<(PlayerId, AnswerPayload)>) -> ScoringRequest {
        let quiz = sample_quiz();
        ScoringRequest {
            round_index: 0,
            prompt: RoundPrompt::Quiz {
                question_index: 0,
                question_count: quiz.questions.len(),
                question: quiz.questions[0].clone(),
            },
            answers: answers.into_iter().collect(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_letter_rule_judge() {
        let judge = LetterRuleJudge;
        assert!(judge.is_valid('B', "Berlin"));
        assert!(judge.is_valid('b', "  bear "));
        assert!(!judge.is_valid('B', "B"));
        assert!(!judge.is_valid('B', "Paris"));
        assert!(!judge.is_valid('B', ""));
    }

    #[tokio::test]
    async fn test_quiz_scorer_compares_index() {
        let request = quiz_request(vec![
            (pid("a"), AnswerPayload::Choice(1)),
            (pid("b"), AnswerPayload::Choice(0)),
            (pid("c"), AnswerPayload::Blank),
        ]);
        let sheet = QuizScorer::new(100).score(&request).await.unwrap();
        assert_eq!(sheet[&pid("a")].points, 100);
        assert_eq!(sheet[&pid("b")].points, 0);
        assert_eq!(sheet[&pid("c")], ScoreLine::zero("no answer"));
    }

    #[tokio::test]
    async fn test_word_scorer_unique_and_shared() {
        let request = word_request(vec![
            (pid("a"), words(&[("City", "Berlin"), ("Animal", "Bear")])),
            (pid("b"), words(&[("City", "berlin "), ("Animal", "Bison")])),
            (pid("c"), words(&[("City", "Paris"), ("Animal", "")])),
            (pid("d"), AnswerPayload::Blank),
        ]);
        let sheet = WordScorer::default().score(&request).await.unwrap();

        assert_eq!(sheet[&pid("a")].points, SHARED_WORD_POINTS + UNIQUE_WORD_POINTS);
        assert_eq!(sheet[&pid("b")].points, SHARED_WORD_POINTS + UNIQUE_WORD_POINTS);
        assert_eq!(sheet[&pid("c")].points, 0);
        assert!(sheet[&pid("c")].explanation.contains("City: 'Paris' invalid"));
        assert!(sheet[&pid("c")].explanation.contains("Animal: missing"));
        assert_eq!(sheet[&pid("d")].points, 0);
    }

    #[tokio::test]
    async fn test_scorers_reject_foreign_prompts() {
        let word = word_request(vec![]);
        assert!(QuizScorer::new(100).score(&word).await.is_err());

        let quiz = quiz_request(vec![]);
        assert!(WordScorer::default().score(&quiz).await.is_err());
    }

    #[test]
    fn test_fallback_sheet() {
        let quiz = quiz_request(vec![(pid("a"), AnswerPayload::Choice(1)), (pid("b"), AnswerPayload::Choice(3))]);
        let sheet = fallback_sheet(&quiz, 50);
        assert_eq!(sheet[&pid("a")].points, 50);
        assert_eq!(sheet[&pid("b")].points, 0);

        let word = word_request(vec![(pid("a"), words(&[("City", "Berlin")]))]);
        let sheet = fallback_sheet(&word, 50);
        assert_eq!(sheet[&pid("a")], ScoreLine::zero("validator unavailable"));
    }

    #[test]
    fn test_scorers_for_mode() {
        let scorers = Scorers::local(100);
        assert_eq!(scorers.for_mode(GameMode::Word).name(), "word");
        assert_eq!(scorers.for_mode(GameMode::Quiz).name(), "quiz");
    }

    /// Serves exactly one HTTP request with a canned response.
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/score")
    }

    #[tokio::test]
    async fn test_http_scorer_parses_sheet() {
        let a = pid("a");
        let body = format!(r#"{{"{a}": {{"points": 7, "explanation": "ok"}}}}"#);
        let endpoint = serve_once("HTTP/1.1 200 OK", body).await;

        let scorer = HttpScorer::new(endpoint, Duration::from_secs(5)).unwrap();
        let request = word_request(vec![(a, words(&[("City", "Bonn")]))]);
        let sheet = scorer.score(&request).await.unwrap();
        assert_eq!(sheet[&a], ScoreLine::new(7, "ok"));
    }

    #[tokio::test]
    async fn test_http_scorer_reports_status() {
        let endpoint = serve_once("HTTP/1.1 503 Service Unavailable", "{}".to_string()).await;
        let scorer = HttpScorer::new(endpoint, Duration::from_secs(5)).unwrap();
        let result = scorer.score(&word_request(vec![])).await;
        assert_eq!(result, Err(ScorerError::Failed("validator returned http 503".to_string())));
    }
}
