use crate::grading::{self, QuestionKind};
use crate::ipc::error::{db_err, err, ok, CoreError};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use crate::status::SubmissionStatus;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct ResultStudent {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultSubmission {
    id: String,
    status: String,
    points_earned: Option<f64>,
    submitted_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultQuestion {
    id: String,
    text: String,
    kind: String,
    correct_answer: Option<String>,
    points: f64,
    order_index: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultAnswer {
    text: String,
    is_correct: Option<bool>,
    points_awarded: f64,
}

#[derive(Debug, Serialize)]
struct AnswerPair {
    question: ResultQuestion,
    answer: ResultAnswer,
}

#[derive(Debug, Serialize)]
struct QuizResultRow {
    student: ResultStudent,
    submission: ResultSubmission,
    answers: Vec<AnswerPair>,
}

struct QuestionRow {
    id: String,
    assignment_id: String,
    kind: String,
    correct_answer: Option<String>,
    points: f64,
    order_index: i64,
}

fn load_question(conn: &Connection, question_id: &str) -> Result<QuestionRow, CoreError> {
    let row = conn
        .query_row(
            "SELECT id, assignment_id, kind, correct_answer, points, order_index
             FROM quiz_questions WHERE id = ?",
            [question_id],
            |r| {
                Ok(QuestionRow {
                    id: r.get(0)?,
                    assignment_id: r.get(1)?,
                    kind: r.get(2)?,
                    correct_answer: r.get(3)?,
                    points: r.get(4)?,
                    order_index: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    row.ok_or(CoreError::NotFound { what: "question" })
}

fn handle_questions_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let text = match req.params.get("text").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing text", None),
    };
    if text.is_empty() {
        return err(&req.id, "bad_params", "text must not be empty", None);
    }
    let kind = match req
        .params
        .get("kind")
        .and_then(|v| v.as_str())
        .and_then(QuestionKind::parse)
    {
        Some(k) => k,
        None => {
            return err(
                &req.id,
                "bad_params",
                "kind must be one of: multiple_choice, true_false, short_answer, essay",
                None,
            )
        }
    };
    let points = match req.params.get("points").and_then(|v| v.as_f64()) {
        Some(v) if v >= 1.0 => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "points must be >= 1",
                Some(json!({ "points": v })),
            )
        }
        None => return err(&req.id, "bad_params", "missing points", None),
    };
    // Essays carry no key; a key on an objective question enables auto-scoring.
    let correct_answer = if kind.auto_scored() {
        req.params
            .get("correctAnswer")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    } else {
        None
    };
    let choices = match req.params.get("choices") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) if v.is_array() => Some(v.to_string()),
        Some(_) => return err(&req.id, "bad_params", "choices must be an array", None),
    };
    let order_index_req = req.params.get("orderIndex").and_then(|v| v.as_i64());

    if let Err(e) = guard::assignment_for_teacher(conn, &assignment_id, &teacher_id) {
        return e.response(&req.id);
    }

    // Index assignment lives inside the operation: omitted means append,
    // explicit values must land inside the existing dense range.
    let append_index: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(order_index), -1) + 1 FROM quiz_questions WHERE assignment_id = ?",
        [&assignment_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let order_index = match order_index_req {
        Some(v) if v >= 0 && v <= append_index => v,
        Some(_) => {
            return err(
                &req.id,
                "bad_params",
                "orderIndex out of range",
                Some(json!({ "max": append_index })),
            )
        }
        None => append_index,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Inserting into the middle shifts existing indices up by one
    // (descending walk so the UNIQUE constraint never trips).
    if order_index < append_index {
        let mut stmt = match tx.prepare(
            "SELECT id, order_index FROM quiz_questions
             WHERE assignment_id = ? AND order_index >= ?
             ORDER BY order_index DESC",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows: Vec<(String, i64)> = match stmt
            .query_map((&assignment_id, order_index), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        drop(stmt);
        let mut up = match tx.prepare("UPDATE quiz_questions SET order_index = ? WHERE id = ?") {
            Ok(s) => s,
            Err(e) => {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "quiz_questions" })),
                )
            }
        };
        for (qid, cur_index) in rows {
            if let Err(e) = up.execute((cur_index + 1, &qid)) {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "quiz_questions" })),
                );
            }
        }
        drop(up);
    }

    let question_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO quiz_questions(
           id, assignment_id, text, kind, correct_answer, choices, points, order_index
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &question_id,
            &assignment_id,
            &text,
            kind.as_str(),
            correct_answer.as_deref(),
            choices.as_deref(),
            points,
            order_index,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_questions" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "questionId": question_id, "orderIndex": order_index }),
    )
}

fn handle_questions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    // The owning teacher sees answer keys; enrolled students never do,
    // regardless of submission state.
    let include_keys = match guard::assignment_for_teacher(conn, &assignment_id, &user_id) {
        Ok(_) => true,
        Err(e) if e.code() == "not_authorized" => {
            if let Err(e) = guard::assignment_for_student(conn, &assignment_id, &user_id) {
                return e.response(&req.id);
            }
            false
        }
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, text, kind, correct_answer, choices, points, order_index
         FROM quiz_questions
         WHERE assignment_id = ?
         ORDER BY order_index",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&assignment_id], |row| {
            let id: String = row.get(0)?;
            let text: String = row.get(1)?;
            let kind: String = row.get(2)?;
            let correct_answer: Option<String> = row.get(3)?;
            let choices: Option<String> = row.get(4)?;
            let points: f64 = row.get(5)?;
            let order_index: i64 = row.get(6)?;
            let choices_json = choices
                .as_deref()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "id": id,
                "text": text,
                "kind": kind,
                "correctAnswer": if include_keys { json!(correct_answer) } else { json!(null) },
                "choices": choices_json,
                "points": points,
                "orderIndex": order_index
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(questions) => ok(&req.id, json!({ "questions": questions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_questions_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let question_id = match req.params.get("questionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing questionId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let question = match load_question(conn, &question_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = guard::assignment_for_teacher(conn, &question.assignment_id, &teacher_id) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM quiz_answers WHERE question_id = ?",
        [&question_id],
    ) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_answers" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM quiz_questions WHERE id = ?", [&question_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "quiz_questions" })),
        );
    }

    // Contiguity repair: shift down every higher index (ascending walk).
    let mut stmt = match tx.prepare(
        "SELECT id, order_index FROM quiz_questions
         WHERE assignment_id = ? AND order_index > ?
         ORDER BY order_index ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Vec<(String, i64)> = match stmt
        .query_map((&question.assignment_id, question.order_index), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    drop(stmt);
    let mut up = match tx.prepare("UPDATE quiz_questions SET order_index = ? WHERE id = ?") {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_questions" })),
            )
        }
    };
    for (qid, cur_index) in rows {
        if let Err(e) = up.execute((cur_index - 1, &qid)) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_questions" })),
            );
        }
    }
    drop(up);

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_answers_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let submission_id = match req.params.get("submissionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing submissionId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let Some(answers) = req.params.get("answers").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing answers[]", None);
    };

    let submission = match guard::submission_for_student(conn, &submission_id, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let status = SubmissionStatus::parse(&submission.status).unwrap_or(SubmissionStatus::Submitted);
    if !status.can_submit() {
        return CoreError::InvalidState {
            action: "answer",
            status: submission.status.clone(),
        }
        .response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for (i, entry) in answers.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            return err(
                &req.id,
                "bad_params",
                format!("answer at index {} must be an object", i),
                None,
            );
        };
        let question_id = match obj.get("questionId").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("answer at index {} missing questionId", i),
                    None,
                )
            }
        };
        let answer_text = match obj.get("answerText").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("answer at index {} missing answerText", i),
                    None,
                )
            }
        };

        let question = match load_question(&tx, &question_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
        // A question id from a different assignment does not resolve within
        // this submission's scope.
        if question.assignment_id != submission.assignment_id {
            return CoreError::NotFound { what: "question" }.response(&req.id);
        }

        let kind = QuestionKind::parse(&question.kind).unwrap_or(QuestionKind::Essay);
        let (is_correct, points_awarded) = grading::score_answer(
            kind,
            question.correct_answer.as_deref(),
            &answer_text,
            question.points,
        );

        // Re-answering replaces the prior row for (submission, question).
        if let Err(e) = tx.execute(
            "DELETE FROM quiz_answers WHERE submission_id = ? AND question_id = ?",
            (&submission.id, &question.id),
        ) {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_answers" })),
            );
        }
        if let Err(e) = tx.execute(
            "INSERT INTO quiz_answers(
               id, submission_id, question_id, answer_text, is_correct, points_awarded
             ) VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &submission.id,
                &question.id,
                &answer_text,
                is_correct.map(|b| b as i64),
                points_awarded,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "quiz_answers" })),
            );
        }
    }

    // Advisory auto-score: the sum over auto-scored answers only. Essays
    // stay out until a teacher grades through the normal path.
    let auto_score: f64 = match tx.query_row(
        "SELECT COALESCE(SUM(points_awarded), 0.0)
         FROM quiz_answers
         WHERE submission_id = ? AND is_correct IS NOT NULL",
        [&submission_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE submissions SET points_earned = ?, status = 'submitted', submitted_at = ?
         WHERE id = ?",
        (auto_score, Utc::now().to_rfc3339(), &submission_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true, "autoScore": auto_score }))
}

fn handle_quiz_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    if let Err(e) = guard::assignment_for_teacher(conn, &assignment_id, &teacher_id) {
        return e.response(&req.id);
    }

    let mut sub_stmt = match conn.prepare(
        "SELECT s.id, s.student_id, u.name, s.status, s.points_earned, s.submitted_at
         FROM submissions s
         JOIN users u ON u.id = s.student_id
         WHERE s.assignment_id = ?
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let submissions: Vec<(String, String, String, String, Option<f64>, Option<String>)> =
        match sub_stmt
            .query_map([&assignment_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<f64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
    drop(sub_stmt);

    let mut ans_stmt = match conn.prepare(
        "SELECT q.id, q.text, q.kind, q.correct_answer, q.points, q.order_index,
                a.answer_text, a.is_correct, a.points_awarded
         FROM quiz_answers a
         JOIN quiz_questions q ON q.id = a.question_id
         WHERE a.submission_id = ?
         ORDER BY q.order_index",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut results: Vec<QuizResultRow> = Vec::with_capacity(submissions.len());
    for (sub_id, student_id, student_name, status, points_earned, submitted_at) in submissions {
        let answers = ans_stmt
            .query_map([&sub_id], |row| {
                let is_correct: Option<i64> = row.get(7)?;
                Ok(AnswerPair {
                    question: ResultQuestion {
                        id: row.get(0)?,
                        text: row.get(1)?,
                        kind: row.get(2)?,
                        correct_answer: row.get(3)?,
                        points: row.get(4)?,
                        order_index: row.get(5)?,
                    },
                    answer: ResultAnswer {
                        text: row.get(6)?,
                        is_correct: is_correct.map(|v| v != 0),
                        points_awarded: row.get(8)?,
                    },
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());

        let answers = match answers {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };

        results.push(QuizResultRow {
            student: ResultStudent {
                id: student_id,
                name: student_name,
            },
            submission: ResultSubmission {
                id: sub_id,
                status,
                points_earned,
                submitted_at,
            },
            answers,
        });
    }

    ok(&req.id, json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "quiz.questions.create" => Some(handle_questions_create(state, req)),
        "quiz.questions.list" => Some(handle_questions_list(state, req)),
        "quiz.questions.delete" => Some(handle_questions_delete(state, req)),
        "quiz.answers.submit" => Some(handle_answers_submit(state, req)),
        "quiz.results" => Some(handle_quiz_results(state, req)),
        _ => None,
    }
}
