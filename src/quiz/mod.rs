pub mod codeguess;
pub mod math;
pub mod scores;
pub mod session;

use std::time::Duration;

use teloxide::types::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("invalid quiz content: {0}")]
    Configuration(String),
    #[error("quiz protocol violation: {0}")]
    Protocol(String),
}

// The body fields are HTML fragments: whoever builds the quiz escapes any
// user-provided or scraped text before it ends up here.
#[derive(Debug, Clone)]
pub struct MultiChoiceQuiz {
    pub title: String,
    pub prompt_header: String,
    pub prompt_body: String,
    pub answer_header: String,
    pub answer_body: String,
    pub options: Vec<String>,
    pub answer: String,
}

impl MultiChoiceQuiz {
    pub fn validate(&self) -> Result<(), QuizError> {
        let hits = self
            .options
            .iter()
            .filter(|option| **option == self.answer)
            .count();
        if hits != 1 {
            return Err(QuizError::Configuration(format!(
                "correct answer \"{}\" appears {} times in the option list",
                self.answer, hits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub user: UserId,
    pub mention: String,
    pub answer: String,
    pub success: bool,
    pub time_taken: Duration,
}

impl Submission {
    // Correct answers rank before wrong ones, faster before slower.
    fn sort_key(&self) -> (bool, Duration) {
        (!self.success, self.time_taken)
    }
}

pub fn insert_ranked(scoreboard: &mut Vec<Submission>, submission: Submission) {
    let at = scoreboard.partition_point(|s| s.sort_key() <= submission.sort_key());
    scoreboard.insert(at, submission);
}

pub fn render_leaderboard(scoreboard: &[Submission]) -> String {
    let mut lines = Vec::new();
    let mut rank = 0;

    for submission in scoreboard {
        let seconds = submission.time_taken.as_secs();
        let time_taken = format!("{:02}:{:02}", seconds / 60, seconds % 60);
        if submission.success {
            rank += 1;
            lines.push(format!(
                "<b>{}) {} {} ✅</b>",
                rank, submission.mention, time_taken
            ));
        } else {
            lines.push(format!(
                "<b>_) {} {} ❌</b>",
                submission.mention, time_taken
            ));
        }
    }

    lines.join("\n")
}
