use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS learners (
            id INTEGER PRIMARY KEY,
            branch_id INTEGER NOT NULL,
            display_name TEXT NOT NULL,
            token TEXT NOT NULL UNIQUE,
            channel_address TEXT UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            state INTEGER NOT NULL DEFAULT 0 CHECK (state BETWEEN 0 AND 5),
            active_attempt_id INTEGER,
            active_quiz_id INTEGER,
            active_question_index INTEGER,
            pending_answer_id INTEGER,
            CHECK ((state = 5) = (active_attempt_id IS NOT NULL)),
            CHECK (pending_answer_id IS NULL OR state = 5)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY,
            branch_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            name TEXT NOT NULL,
            intro TEXT NOT NULL,
            quiz_id INTEGER
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS content_blocks (
            topic_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            text TEXT NOT NULL,
            PRIMARY KEY (topic_id, position),
            FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS quizzes (
            id INTEGER PRIMARY KEY,
            topic_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY,
            quiz_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            prompt TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('closed', 'open')),
            FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS answer_options (
            id INTEGER PRIMARY KEY,
            question_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            label TEXT NOT NULL,
            is_right INTEGER NOT NULL,
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS learner_topic_progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            learner_id INTEGER NOT NULL,
            topic_id INTEGER NOT NULL,
            theory_complete INTEGER NOT NULL DEFAULT 0,
            test_complete INTEGER,
            open_answers_reviewed INTEGER,
            locked INTEGER NOT NULL,
            finished INTEGER NOT NULL DEFAULT 0,
            UNIQUE (learner_id, topic_id),
            FOREIGN KEY (learner_id) REFERENCES learners(id),
            FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            learner_id INTEGER NOT NULL,
            quiz_id INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            closed_score INTEGER CHECK (closed_score >= 0),
            closed_max INTEGER CHECK (closed_max >= 0),
            open_score INTEGER CHECK (open_score >= 0),
            open_max INTEGER CHECK (open_max >= 0),
            FOREIGN KEY (learner_id) REFERENCES learners(id),
            FOREIGN KEY (quiz_id) REFERENCES quizzes(id) ON DELETE CASCADE
        );
    ",
    // At most one unfinished attempt per (learner, quiz).
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_open
            ON attempts (learner_id, quiz_id)
            WHERE finished_at IS NULL;
    ",
    r"
        CREATE TABLE IF NOT EXISTS recorded_answers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attempt_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            option_id INTEGER,
            text TEXT,
            answered_at TEXT NOT NULL,
            UNIQUE (attempt_id, question_id),
            CHECK (option_id IS NULL OR text IS NULL),
            FOREIGN KEY (attempt_id) REFERENCES attempts(id) ON DELETE CASCADE,
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
            FOREIGN KEY (option_id) REFERENCES answer_options(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_topics_branch_position
            ON topics (branch_id, position, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_attempts_learner_quiz_finished
            ON attempts (learner_id, quiz_id, finished_at);
    ",
];

/// Runs the versioned schema migrations.
///
/// Each version is applied once inside its own transaction and recorded in
/// `schema_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    let migrations: [(i64, &[&str]); 1] = [(1, SCHEMA_V1)];

    for (version, statements) in migrations {
        if is_applied(pool, version).await? {
            continue;
        }
        let mut tx = pool.begin().await?;
        for statement in statements {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
