use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use trainer_core::model::{
    ActiveAttempt, AnswerId, AnswerSelection, Attempt, AttemptId, AttemptScore, BranchId,
    ChannelAddress, CredentialToken, Learner, LearnerId, LearnerTopicProgress, OptionId,
    ProgressId, QuestionId, QuizId, RecordedAnswer, SessionState, TopicId,
};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps a sqlx error, turning unique-constraint violations into `Conflict`.
pub(crate) fn db(e: sqlx::Error) -> StorageError {
    match e.as_database_error() {
        Some(dbe) if dbe.is_unique_violation() => StorageError::Conflict,
        _ => StorageError::Connection(e.to_string()),
    }
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

macro_rules! id_column {
    ($fn_name:ident, $ty:ident) => {
        pub(crate) fn $fn_name(row: &SqliteRow, column: &'static str) -> Result<$ty, StorageError> {
            let raw: i64 = row.try_get(column).map_err(ser)?;
            Ok($ty::new(i64_to_u64(column, raw)?))
        }
    };
}

id_column!(learner_id, LearnerId);
id_column!(branch_id, BranchId);
id_column!(topic_id, TopicId);
id_column!(quiz_id, QuizId);
id_column!(question_id, QuestionId);
id_column!(option_id, OptionId);
id_column!(attempt_id, AttemptId);
id_column!(answer_id, AnswerId);
id_column!(progress_id, ProgressId);

fn optional_id(row: &SqliteRow, column: &'static str) -> Result<Option<u64>, StorageError> {
    row.try_get::<Option<i64>, _>(column)
        .map_err(ser)?
        .map(|v| i64_to_u64(column, v))
        .transpose()
}

pub(crate) const LEARNER_COLUMNS: &str = "id, branch_id, display_name, token, channel_address, \
     active, state, active_attempt_id, active_quiz_id, active_question_index, pending_answer_id";

pub(crate) fn map_learner_row(row: &SqliteRow) -> Result<Learner, StorageError> {
    let state_code: i64 = row.try_get("state").map_err(ser)?;
    let state = u8::try_from(state_code)
        .map_err(ser)
        .and_then(|code| SessionState::from_code(code).map_err(ser))?;

    let active_attempt = match (
        optional_id(row, "active_attempt_id")?,
        optional_id(row, "active_quiz_id")?,
    ) {
        (Some(attempt), Some(quiz)) => {
            let index: i64 = row.try_get("active_question_index").map_err(ser)?;
            Some(ActiveAttempt::new(
                AttemptId::new(attempt),
                QuizId::new(quiz),
                i32::try_from(index).map_err(ser)?,
            ))
        }
        (None, None) => None,
        _ => {
            return Err(StorageError::Serialization(
                "active attempt and quiz must be set together".into(),
            ));
        }
    };

    let channel = row
        .try_get::<Option<String>, _>("channel_address")
        .map_err(ser)?
        .map(ChannelAddress::new)
        .transpose()
        .map_err(ser)?;
    let token = CredentialToken::new(row.try_get::<String, _>("token").map_err(ser)?).map_err(ser)?;

    Learner::from_persisted(
        learner_id(row, "id")?,
        branch_id(row, "branch_id")?,
        row.try_get("display_name").map_err(ser)?,
        token,
        channel,
        row.try_get("active").map_err(ser)?,
        state,
        active_attempt,
        optional_id(row, "pending_answer_id")?.map(AnswerId::new),
    )
    .map_err(ser)
}

pub(crate) const PROGRESS_COLUMNS: &str = "id, learner_id, topic_id, theory_complete, \
     test_complete, open_answers_reviewed, locked, finished";

pub(crate) fn map_progress_row(row: &SqliteRow) -> Result<LearnerTopicProgress, StorageError> {
    Ok(LearnerTopicProgress {
        id: progress_id(row, "id")?,
        learner_id: learner_id(row, "learner_id")?,
        topic_id: topic_id(row, "topic_id")?,
        theory_complete: row.try_get("theory_complete").map_err(ser)?,
        test_complete: row.try_get("test_complete").map_err(ser)?,
        open_answers_reviewed: row.try_get("open_answers_reviewed").map_err(ser)?,
        locked: row.try_get("locked").map_err(ser)?,
        finished: row.try_get("finished").map_err(ser)?,
    })
}

pub(crate) const ATTEMPT_COLUMNS: &str = "id, learner_id, quiz_id, started_at, finished_at, \
     closed_score, closed_max, open_score, open_max";

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<Attempt, StorageError> {
    let finished_at: Option<DateTime<Utc>> = row.try_get("finished_at").map_err(ser)?;
    let score = if finished_at.is_some() {
        let field = |name: &'static str| -> Result<u32, StorageError> {
            let raw: Option<i64> = row.try_get(name).map_err(ser)?;
            let raw = raw.ok_or_else(|| StorageError::Serialization(format!("missing {name}")))?;
            u32_from_i64(name, raw)
        };
        Some(
            AttemptScore::from_persisted(
                field("closed_score")?,
                field("closed_max")?,
                field("open_score")?,
                field("open_max")?,
            )
            .map_err(ser)?,
        )
    } else {
        None
    };

    Attempt::from_persisted(
        attempt_id(row, "id")?,
        learner_id(row, "learner_id")?,
        quiz_id(row, "quiz_id")?,
        row.try_get("started_at").map_err(ser)?,
        finished_at,
        score,
    )
    .map_err(ser)
}

pub(crate) const ANSWER_COLUMNS: &str = "id, attempt_id, question_id, option_id, text, answered_at";

/// A row with an option is a closed selection; anything else is an open slot.
pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<RecordedAnswer, StorageError> {
    let selection = match optional_id(row, "option_id")? {
        Some(option) => AnswerSelection::Choice(OptionId::new(option)),
        None => AnswerSelection::Text(row.try_get("text").map_err(ser)?),
    };
    Ok(RecordedAnswer {
        id: answer_id(row, "id")?,
        attempt_id: attempt_id(row, "attempt_id")?,
        question_id: question_id(row, "question_id")?,
        selection,
        answered_at: row.try_get("answered_at").map_err(ser)?,
    })
}
