use std::time::Duration;

use chrono::{DateTime, Utc};
use teloxide::types::UserId;

use super::{insert_ranked, render_leaderboard, MultiChoiceQuiz, QuizError, Submission};

pub type ScorePolicy = Box<dyn Fn(&Submission) + Send + Sync>;

// What the chat message should currently show. `options` is one keyboard
// label per answer choice, gone once the quiz has ended.
#[derive(Debug, Clone)]
pub struct QuizDisplay {
    pub text: String,
    pub options: Option<Vec<String>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    AlreadySubmitted,
    Closed,
}

pub struct QuizSession {
    quiz: MultiChoiceQuiz,
    accent: &'static str,
    timeout: Duration,
    policy: Option<ScorePolicy>,
    scoreboard: Vec<Submission>,
    posted_at: Option<DateTime<Utc>>,
    finalized: bool,
}

impl QuizSession {
    pub fn new(
        quiz: MultiChoiceQuiz,
        accent: &'static str,
        timeout: Duration,
        policy: Option<ScorePolicy>,
    ) -> Result<Self, QuizError> {
        quiz.validate()?;
        Ok(Self {
            quiz,
            accent,
            timeout,
            policy,
            scoreboard: Vec::new(),
            posted_at: None,
            finalized: false,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // Records when the quiz message actually went out. Answers are timed
    // against this instant, so it must be set exactly once.
    pub fn mark_sent(&mut self, posted_at: DateTime<Utc>) -> Result<(), QuizError> {
        if self.posted_at.is_some() {
            return Err(QuizError::Protocol(
                "quiz message was already sent".to_string(),
            ));
        }
        self.posted_at = Some(posted_at);
        Ok(())
    }

    pub fn submit(
        &mut self,
        user: UserId,
        mention: String,
        label: &str,
        received_at: DateTime<Utc>,
    ) -> Result<SubmitOutcome, QuizError> {
        if self.finalized {
            // Button presses racing the timeout are expected, just drop them.
            return Ok(SubmitOutcome::Closed);
        }

        let posted_at = match self.posted_at {
            Some(posted_at) => posted_at,
            None => {
                return Err(QuizError::Protocol(
                    "answer arrived before the quiz message was sent".to_string(),
                ))
            }
        };

        if self.scoreboard.iter().any(|s| s.user == user) {
            return Ok(SubmitOutcome::AlreadySubmitted);
        }

        if !self.quiz.options.iter().any(|option| option == label) {
            return Err(QuizError::Protocol(format!(
                "\"{}\" is not one of the answer options",
                label
            )));
        }

        // Message delivery and the button press are timestamped by different
        // services, so clock skew can make the difference negative.
        let time_taken = (received_at - posted_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let submission = Submission {
            user,
            mention,
            answer: label.to_string(),
            success: label == self.quiz.answer,
            time_taken,
        };

        if let Some(policy) = &self.policy {
            policy(&submission);
        }
        insert_ranked(&mut self.scoreboard, submission);

        Ok(SubmitOutcome::Accepted)
    }

    // Idempotent: the first call reveals the answer and returns the final
    // display, later calls change nothing.
    pub fn finalize(&mut self) -> Option<QuizDisplay> {
        if self.finalized {
            return None;
        }
        self.finalized = true;
        Some(self.display())
    }

    pub fn display(&self) -> QuizDisplay {
        let mut text = format!("{} <b>{}</b>", self.accent, self.quiz.title);
        if self.finalized {
            text.push_str(" <b>*ENDED*</b>");
        }

        text.push_str(&format!(
            "\n\n<b>{}</b>\n{}",
            self.quiz.prompt_header, self.quiz.prompt_body
        ));

        if !self.scoreboard.is_empty() {
            text.push_str("\n\n");
            text.push_str(&render_leaderboard(&self.scoreboard));
        }

        if self.finalized {
            text.push_str(&format!(
                "\n\n<b>{}</b>\n{}",
                self.quiz.answer_header, self.quiz.answer_body
            ));
        }

        let options = if self.finalized {
            None
        } else {
            Some(self.quiz.options.clone())
        };

        QuizDisplay { text, options }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Duration as ChronoDuration;

    use super::*;

    fn sample_quiz() -> MultiChoiceQuiz {
        MultiChoiceQuiz {
            title: "CodeGuessr".to_string(),
            prompt_header: "What's this programming language?!".to_string(),
            prompt_body: "<pre><code>fn main() {}</code></pre>".to_string(),
            answer_header: "Answer".to_string(),
            answer_body: "It was of course <b>Rust</b>!".to_string(),
            options: vec![
                "Python".to_string(),
                "Go".to_string(),
                "Rust".to_string(),
                "C".to_string(),
                "Java".to_string(),
            ],
            answer: "Rust".to_string(),
        }
    }

    fn open_session() -> (QuizSession, DateTime<Utc>) {
        let mut session =
            QuizSession::new(sample_quiz(), "⚫", Duration::from_secs(60), None).unwrap();
        let posted_at = Utc::now();
        session.mark_sent(posted_at).unwrap();
        (session, posted_at)
    }

    #[test]
    fn test_new_rejects_invalid_content() {
        let mut quiz = sample_quiz();
        quiz.answer = "Haskell".to_string();
        let result = QuizSession::new(quiz, "⚫", Duration::from_secs(60), None);
        assert!(matches!(result, Err(QuizError::Configuration(_))));
    }

    #[test]
    fn test_mark_sent_twice_is_a_protocol_violation() {
        let (mut session, posted_at) = open_session();
        assert!(matches!(
            session.mark_sent(posted_at),
            Err(QuizError::Protocol(_))
        ));
    }

    #[test]
    fn test_submit_before_send_is_a_protocol_violation() {
        let mut session =
            QuizSession::new(sample_quiz(), "⚫", Duration::from_secs(60), None).unwrap();
        let result = session.submit(UserId(1), "A".to_string(), "Rust", Utc::now());
        assert!(matches!(result, Err(QuizError::Protocol(_))));
    }

    #[test]
    fn test_accepted_submissions_show_up_ranked() {
        let (mut session, posted_at) = open_session();

        let outcome = session
            .submit(
                UserId(1),
                "A".to_string(),
                "Go",
                posted_at + ChronoDuration::seconds(5),
            )
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);

        let outcome = session
            .submit(
                UserId(2),
                "B".to_string(),
                "Rust",
                posted_at + ChronoDuration::seconds(12),
            )
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);

        let text = session.display().text;
        let b_at = text.find("1) B 00:12 ✅").expect("B should rank first");
        let a_at = text.find("_) A 00:05 ❌").expect("A should be unranked");
        assert!(b_at < a_at);
    }

    #[test]
    fn test_second_submission_from_same_user_changes_nothing() {
        let (mut session, posted_at) = open_session();

        session
            .submit(
                UserId(1),
                "A".to_string(),
                "Rust",
                posted_at + ChronoDuration::seconds(3),
            )
            .unwrap();
        let before = session.display().text;

        let outcome = session
            .submit(
                UserId(1),
                "A".to_string(),
                "Go",
                posted_at + ChronoDuration::seconds(9),
            )
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadySubmitted);
        assert_eq!(session.display().text, before);
    }

    #[test]
    fn test_unknown_label_is_a_protocol_violation() {
        let (mut session, posted_at) = open_session();
        let result = session.submit(
            UserId(1),
            "A".to_string(),
            "Brainfuck",
            posted_at + ChronoDuration::seconds(1),
        );
        assert!(matches!(result, Err(QuizError::Protocol(_))));
        assert!(!session.display().text.contains("Brainfuck"));
    }

    #[test]
    fn test_submit_after_finalize_is_silently_dropped() {
        let (mut session, posted_at) = open_session();
        session.finalize();
        let before = session.display().text;

        let outcome = session
            .submit(
                UserId(1),
                "A".to_string(),
                "Rust",
                posted_at + ChronoDuration::seconds(2),
            )
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Closed);
        assert_eq!(session.display().text, before);
    }

    #[test]
    fn test_negative_elapsed_time_is_clamped_to_zero() {
        let (mut session, posted_at) = open_session();

        // Simulated clock skew: the answer appears to precede the question.
        session
            .submit(
                UserId(1),
                "A".to_string(),
                "Rust",
                posted_at - ChronoDuration::seconds(30),
            )
            .unwrap();

        assert!(session.display().text.contains("1) A 00:00 ✅"));
    }

    #[test]
    fn test_finalize_is_idempotent_and_reveals_the_answer() {
        let (mut session, _) = open_session();

        let display = session.finalize().expect("first finalize yields a display");
        assert!(display.text.contains("*ENDED*"));
        assert!(display.text.contains("It was of course <b>Rust</b>!"));
        assert!(display.options.is_none());

        assert!(session.finalize().is_none());
    }

    #[test]
    fn test_open_display_lists_every_option_and_hides_the_answer() {
        let (session, _) = open_session();
        let display = session.display();

        assert_eq!(display.options, Some(sample_quiz().options));
        assert!(!display.text.contains("It was of course"));
        assert!(display.text.contains("What's this programming language?!"));
    }

    #[test]
    fn test_policy_runs_once_per_accepted_submission() {
        let seen: Arc<Mutex<Vec<(u64, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy: ScorePolicy = Box::new(move |submission| {
            sink.lock()
                .unwrap()
                .push((submission.user.0, submission.success));
        });

        let mut session =
            QuizSession::new(sample_quiz(), "⚫", Duration::from_secs(60), Some(policy)).unwrap();
        let posted_at = Utc::now();
        session.mark_sent(posted_at).unwrap();

        session
            .submit(
                UserId(7),
                "A".to_string(),
                "Rust",
                posted_at + ChronoDuration::seconds(3),
            )
            .unwrap();
        session
            .submit(
                UserId(7),
                "A".to_string(),
                "Go",
                posted_at + ChronoDuration::seconds(4),
            )
            .unwrap();
        session
            .submit(
                UserId(8),
                "B".to_string(),
                "Go",
                posted_at + ChronoDuration::seconds(5),
            )
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(7, true), (8, false)]);
    }
}
