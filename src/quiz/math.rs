use std::io::Read;

use rand::seq::SliceRandom;
use serde::Deserialize;
use teloxide::utils::html;
use thiserror::Error;

use super::MultiChoiceQuiz;

#[derive(Debug, Error)]
pub enum MathBankError {
    #[error("failed to parse the math question bank: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("the math question bank is empty")]
    Empty,
    #[error("problem \"{0}\" marks \"{1}\" correct, but there is no such option")]
    UnknownCorrectOption(String, String),
}

// One record of the question bank file: a JSON array of objects whose
// "options" are [letter, text] pairs and whose "correct" is a letter.
#[derive(Debug, Clone, Deserialize)]
pub struct MathProblem {
    pub problem: String,
    pub category: String,
    pub options: Vec<(String, String)>,
    pub correct: String,
    pub rationale: String,
}

impl MathProblem {
    fn answer_text(&self) -> Option<&str> {
        let letter = self.correct.trim().bytes().next()?;
        let index = (letter as usize).checked_sub(b'A' as usize)?;
        self.options.get(index).map(|(_, text)| text.as_str())
    }

    pub fn to_quiz(&self) -> MultiChoiceQuiz {
        MultiChoiceQuiz {
            title: "Math Quiz".to_string(),
            prompt_header: "Problem".to_string(),
            prompt_body: html::escape(&self.problem),
            answer_header: "Rationale".to_string(),
            answer_body: html::escape(&self.rationale),
            options: self.options.iter().map(|(_, text)| text.clone()).collect(),
            answer: self.answer_text().unwrap_or_default().to_string(),
        }
    }
}

pub struct MathBank {
    problems: Vec<MathProblem>,
}

impl MathBank {
    pub fn new(reader: impl Read) -> Result<Self, MathBankError> {
        let problems: Vec<MathProblem> = serde_json::from_reader(reader)?;
        if problems.is_empty() {
            return Err(MathBankError::Empty);
        }
        for problem in &problems {
            if problem.answer_text().is_none() {
                return Err(MathBankError::UnknownCorrectOption(
                    problem.problem.clone(),
                    problem.correct.clone(),
                ));
            }
        }
        Ok(Self { problems })
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn random_quiz(&self) -> MultiChoiceQuiz {
        // The bank is checked to be non-empty at load time.
        let problem = self.problems.choose(&mut rand::thread_rng()).unwrap();
        problem.to_quiz()
    }
}
