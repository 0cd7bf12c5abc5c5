use std::sync::Mutex;

use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::{Connection, OpenFlags};
use teloxide::utils::html;
use thiserror::Error;
use url::Url;

use super::MultiChoiceQuiz;

// Telegram caps messages at 4096 chars, leave room for the rest of the text.
const MAX_SNIPPET_CHARS: usize = 3000;

#[derive(Debug, Error)]
pub enum CodeGuessError {
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error("the solutions database has no languages to offer as options")]
    NoLanguages,
}

// Rows scraped from Rosetta Code.
#[derive(Debug, Clone)]
pub struct Solution {
    pub solution_id: i64,
    pub task_name: String,
    pub task_url: String,
    pub language: String,
    pub code: String,
}

pub struct SolutionsDb {
    conn: Mutex<Connection>,
}

impl SolutionsDb {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn random_solution(&self) -> rusqlite::Result<Solution> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, task_name, lang, code FROM solutions ORDER BY random() LIMIT 1",
            [],
            |row| {
                let task_name: String = row.get(1)?;
                Ok(Solution {
                    solution_id: row.get(0)?,
                    task_url: rosetta_task_url(&task_name),
                    task_name,
                    language: row.get(2)?,
                    code: row.get(3)?,
                })
            },
        )
    }

    pub fn languages(&self) -> rusqlite::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT(lang) FROM solutions")?;
        let langs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(langs)
    }

    pub fn random_quiz(&self, n_choices: usize) -> Result<MultiChoiceQuiz, CodeGuessError> {
        let solution = self.random_solution()?;
        let langs = self.languages()?;
        if langs.is_empty() {
            return Err(CodeGuessError::NoLanguages);
        }
        Ok(quiz_from_solution(
            &solution,
            &langs,
            n_choices,
            &mut rand::thread_rng(),
        ))
    }
}

pub fn quiz_from_solution<R: Rng>(
    solution: &Solution,
    langs: &[String],
    n_choices: usize,
    rng: &mut R,
) -> MultiChoiceQuiz {
    let mut options: Vec<String> = langs
        .choose_multiple(rng, n_choices)
        .cloned()
        .collect();

    // The draw may have missed the actual language. Overwrite a random slot
    // instead of appending, so the position gives nothing away.
    if !options.iter().any(|lang| lang == &solution.language) {
        let slot = rng.gen_range(0..options.len());
        options[slot] = solution.language.clone();
    }

    MultiChoiceQuiz {
        title: "CodeGuessr".to_string(),
        prompt_header: "What's this programming language?!".to_string(),
        prompt_body: format!(
            "<pre><code>{}</code></pre>",
            html::escape(&truncate_chars(&solution.code, MAX_SNIPPET_CHARS))
        ),
        answer_header: "Answer".to_string(),
        answer_body: format!(
            "It was of course <b>{}</b>! This code is a solution to a Rosetta Code problem called <a href=\"{}\">{}</a>.",
            html::escape(&solution.language),
            solution_link(&solution.task_url, &solution.language),
            html::escape(&solution.task_name),
        ),
        options,
        answer: solution.language.clone(),
    }
}

fn rosetta_task_url(task_name: &str) -> String {
    let mut url = Url::parse("https://rosettacode.org/wiki/").unwrap();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(task_name);
    }
    url.to_string()
}

// Rosetta Code anchors each solution by its language name.
fn solution_link(task_url: &str, language: &str) -> String {
    match Url::parse(task_url) {
        Ok(mut url) => {
            url.set_fragment(Some(language));
            url.to_string()
        }
        Err(_) => task_url.to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("\n…");
    truncated
}
