use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use super::session::ScorePolicy;
use super::Submission;

pub struct ScoreStore {
    conn: Mutex<Connection>,
}

impl ScoreStore {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS player_scores (user_id INTEGER PRIMARY KEY, points INTEGER)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // Upsert-add: a missing row starts at the delta, an existing one grows by it.
    pub fn add_points(&self, user_id: u64, delta: i64) -> rusqlite::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO player_scores (user_id, points) VALUES (?1, ?2)
             ON CONFLICT (user_id) DO UPDATE SET points = points + ?2",
            rusqlite::params![user_id as i64, delta],
        )?;
        Ok(())
    }

    pub fn top_n(&self, n: u32) -> rusqlite::Result<Vec<(u64, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT user_id, points FROM player_scores ORDER BY points DESC LIMIT ?1")?;
        let rows = stmt
            .query_map([n], |row| {
                Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// Guessing fast is worth up to 20 points, guessing at all is worth at least 1,
// guessing wrong costs 20.
pub fn points_for(submission: &Submission) -> i64 {
    if submission.success {
        let seconds = submission.time_taken.as_secs_f64();
        ((20.0 - seconds).round() as i64).max(1)
    } else {
        -20
    }
}

pub fn guessing_points_policy(store: Arc<ScoreStore>) -> ScorePolicy {
    Box::new(move |submission| {
        let points = points_for(submission);
        if let Err(error) = store.add_points(submission.user.0, points) {
            log::warn!(
                "Failed to record {} points for user {}: {}",
                points,
                submission.user.0,
                error
            );
        }
    })
}
