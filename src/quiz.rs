use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: String,
    pub explanation: String,
}

/// Authoring-time validation: the quiz form only ever produces four options,
/// and the stored correct answer has to be one of them or scoring can never
/// mark anything right.
pub fn validate_questions(questions: &[Question]) -> Result<(), String> {
    if questions.is_empty() {
        return Err("a quiz needs at least one question".to_string());
    }
    for (i, q) in questions.iter().enumerate() {
        let n = i + 1;
        if q.question.trim().is_empty() {
            return Err(format!("question {} has empty text", n));
        }
        if q.options.len() != OPTIONS_PER_QUESTION {
            return Err(format!(
                "question {} has {} options, expected {}",
                n,
                q.options.len(),
                OPTIONS_PER_QUESTION
            ));
        }
        if q.options.iter().any(|o| o.trim().is_empty()) {
            return Err(format!("question {} has an empty option", n));
        }
        if !q.options.contains(&q.correct_option) {
            return Err(format!(
                "question {}: correct option is not one of the options",
                n
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub total_questions: usize,
    pub correct_answers: usize,
    pub wrong_answers: usize,
    pub marks: usize,
    pub percentage: f64,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Exact-match scoring: answer i is correct iff it equals the stored correct
/// option, character for character. Unanswered counts as wrong.
pub fn score_answers(questions: &[Question], selected: &[Option<String>]) -> Score {
    let total = questions.len();
    let mut correct = 0usize;
    for (i, q) in questions.iter().enumerate() {
        if selected.get(i).and_then(|s| s.as_deref()) == Some(q.correct_option.as_str()) {
            correct += 1;
        }
    }
    let percentage = if total > 0 {
        round2(100.0 * correct as f64 / total as f64)
    } else {
        0.0
    };
    Score {
        total_questions: total,
        correct_answers: correct,
        wrong_answers: total - correct,
        marks: correct,
        percentage,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InProgress,
    PendingConfirmation,
    Submitted,
}

impl Phase {
    pub fn key(self) -> &'static str {
        match self {
            Phase::InProgress => "inProgress",
            Phase::PendingConfirmation => "pendingConfirmation",
            Phase::Submitted => "submitted",
        }
    }
}

#[derive(Debug)]
pub enum SessionError {
    BadState(&'static str),
    BadIndex,
    BadOption,
}

impl SessionError {
    pub fn message(&self) -> String {
        match self {
            SessionError::BadState(m) => (*m).to_string(),
            SessionError::BadIndex => "question index out of range".to_string(),
            SessionError::BadOption => "selected option is not one of the question's options".to_string(),
        }
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    NeedsConfirmation(Vec<usize>),
    Submitted(Score),
}

/// A timed, single-attempt run through one quiz. The clock is an argument on
/// every operation: the deadline is checked whenever the session is touched,
/// and expiry forces submission no matter which phase the session is in,
/// skipping the unanswered-question confirmation entirely.
#[derive(Debug)]
pub struct Session {
    pub user_id: String,
    pub quiz_id: String,
    pub responses_collection: String,
    questions: Vec<Question>,
    selected: Vec<Option<String>>,
    deadline: DateTime<Utc>,
    phase: Phase,
    score: Option<Score>,
}

impl Session {
    pub fn new(
        user_id: String,
        quiz_id: String,
        responses_collection: String,
        questions: Vec<Question>,
        duration_secs: i64,
        now: DateTime<Utc>,
    ) -> Session {
        let selected = vec![None; questions.len()];
        Session {
            user_id,
            quiz_id,
            responses_collection,
            questions,
            selected,
            deadline: now + Duration::seconds(duration_secs),
            phase: Phase::InProgress,
            score: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn selected(&self) -> &[Option<String>] {
        &self.selected
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.deadline - now).num_seconds().max(0)
    }

    /// 1-based indices of unanswered questions, the confirmation prompt list.
    pub fn unanswered(&self) -> Vec<usize> {
        self.selected
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i + 1)
            .collect()
    }

    fn finalize(&mut self) -> Score {
        let score = score_answers(&self.questions, &self.selected);
        self.phase = Phase::Submitted;
        self.score = Some(score);
        score
    }

    /// Applies deadline expiry; returns the score if the session is (now)
    /// submitted. Every public operation goes through this first.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<Score> {
        if self.phase != Phase::Submitted && now >= self.deadline {
            self.finalize();
        }
        self.score
    }

    pub fn select_answer(
        &mut self,
        index: usize,
        option: &str,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.tick(now);
        if self.phase == Phase::Submitted {
            return Err(SessionError::BadState("session is already submitted"));
        }
        let Some(question) = self.questions.get(index) else {
            return Err(SessionError::BadIndex);
        };
        if !question.options.iter().any(|o| o == option) {
            return Err(SessionError::BadOption);
        }
        self.selected[index] = Some(option.to_string());
        // Answering implicitly abandons a pending confirmation prompt.
        self.phase = Phase::InProgress;
        Ok(())
    }

    pub fn request_submit(&mut self, now: DateTime<Utc>) -> Result<SubmitOutcome, SessionError> {
        if let Some(score) = self.tick(now) {
            return Ok(SubmitOutcome::Submitted(score));
        }
        let unanswered = self.unanswered();
        if unanswered.is_empty() {
            Ok(SubmitOutcome::Submitted(self.finalize()))
        } else {
            self.phase = Phase::PendingConfirmation;
            Ok(SubmitOutcome::NeedsConfirmation(unanswered))
        }
    }

    pub fn confirm_submit(&mut self, now: DateTime<Utc>) -> Result<Score, SessionError> {
        if let Some(score) = self.tick(now) {
            return Ok(score);
        }
        if self.phase != Phase::PendingConfirmation {
            return Err(SessionError::BadState(
                "no submission is waiting for confirmation",
            ));
        }
        Ok(self.finalize())
    }

    pub fn cancel_submit(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.tick(now);
        match self.phase {
            Phase::PendingConfirmation => {
                self.phase = Phase::InProgress;
                Ok(())
            }
            Phase::Submitted => Err(SessionError::BadState("session is already submitted")),
            Phase::InProgress => Err(SessionError::BadState(
                "no submission is waiting for confirmation",
            )),
        }
    }

    /// The persisted QuizResponse document: computed aggregate plus the full
    /// question snapshot, so the response stays readable if the quiz is later
    /// edited or deleted.
    pub fn response_fields(&self, score: &Score, now: DateTime<Utc>) -> Value {
        json!({
            "quizId": self.quiz_id,
            "userId": self.user_id,
            "totalQuestions": score.total_questions,
            "correctAnswers": score.correct_answers,
            "wrongAnswers": score.wrong_answers,
            "marks": score.marks,
            "percentage": score.percentage,
            "questions": self.questions,
            "selectedAnswers": self.selected,
            "submittedAt": now.to_rfc3339(),
        })
    }

    /// Read-only review rows shown after submission.
    pub fn sheet_rows(&self) -> Vec<Value> {
        self.questions
            .iter()
            .zip(self.selected.iter())
            .map(|(q, s)| {
                json!({
                    "question": q.question,
                    "options": q.options,
                    "selectedOption": s,
                    "correctOption": q.correct_option,
                    "correct": s.as_deref() == Some(q.correct_option.as_str()),
                    "explanation": q.explanation,
                })
            })
            .collect()
    }
}
