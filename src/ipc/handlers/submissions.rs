use crate::ipc::error::{db_err, err, ok, CoreError};
use crate::ipc::guard;
use crate::ipc::handlers::gradebook::project_grade;
use crate::ipc::handlers::notifications::{self, NotificationDraft};
use crate::ipc::types::{AppState, Request};
use crate::status::SubmissionStatus;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn submission_json(conn: &Connection, submission_id: &str) -> Result<serde_json::Value, CoreError> {
    let row = conn
        .query_row(
            "SELECT id, assignment_id, student_id, content, status, points_earned,
                    feedback, submitted_at, graded_at, graded_by
             FROM submissions WHERE id = ?",
            [submission_id],
            |r| {
                let id: String = r.get(0)?;
                let assignment_id: String = r.get(1)?;
                let student_id: String = r.get(2)?;
                let content: Option<String> = r.get(3)?;
                let status: String = r.get(4)?;
                let points_earned: Option<f64> = r.get(5)?;
                let feedback: Option<String> = r.get(6)?;
                let submitted_at: Option<String> = r.get(7)?;
                let graded_at: Option<String> = r.get(8)?;
                let graded_by: Option<String> = r.get(9)?;
                Ok(json!({
                    "id": id,
                    "assignmentId": assignment_id,
                    "studentId": student_id,
                    "content": content,
                    "status": status,
                    "pointsEarned": points_earned,
                    "feedback": feedback,
                    "submittedAt": submitted_at,
                    "gradedAt": graded_at,
                    "gradedBy": graded_by
                }))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    row.ok_or(CoreError::NotFound { what: "submission" })
}

fn current_status(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> Result<Option<SubmissionStatus>, CoreError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM submissions WHERE assignment_id = ? AND student_id = ?",
            (assignment_id, student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    Ok(status.map(|s| SubmissionStatus::parse(&s).unwrap_or(SubmissionStatus::Submitted)))
}

fn handle_submissions_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let content = req
        .params
        .get("content")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Err(e) = guard::assignment_for_student(conn, &assignment_id, &student_id) {
        return e.response(&req.id);
    }

    // Graded work must be returned for revision before it can come back in.
    match current_status(conn, &assignment_id, &student_id) {
        Ok(Some(status)) if !status.can_submit() => {
            return CoreError::InvalidState {
                action: "resubmit",
                status: status.as_str().to_string(),
            }
            .response(&req.id)
        }
        Ok(_) => {}
        Err(e) => return e.response(&req.id),
    }

    // One row per (assignment, student): a resubmission updates in place and
    // re-enters 'submitted', clearing any stale grade fields.
    let submission_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO submissions(
           id, assignment_id, student_id, content, status, submitted_at
         ) VALUES(?, ?, ?, ?, 'submitted', ?)
         ON CONFLICT(assignment_id, student_id) DO UPDATE SET
           content = excluded.content,
           status = 'submitted',
           submitted_at = excluded.submitted_at,
           points_earned = NULL,
           graded_at = NULL,
           graded_by = NULL",
        (
            &submission_id,
            &assignment_id,
            &student_id,
            content.as_deref(),
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }

    let row_id: String = match conn.query_row(
        "SELECT id FROM submissions WHERE assignment_id = ? AND student_id = ?",
        (&assignment_id, &student_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match submission_json(conn, &row_id) {
        Ok(submission) => ok(&req.id, json!({ "submission": submission })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_submissions_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let submission_id = match req.params.get("submissionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing submissionId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let points_earned = match req.params.get("pointsEarned").and_then(|v| v.as_f64()) {
        Some(v) if v >= 0.0 => v,
        Some(v) => {
            return err(
                &req.id,
                "bad_params",
                "pointsEarned must be >= 0",
                Some(json!({ "pointsEarned": v })),
            )
        }
        None => return err(&req.id, "bad_params", "missing pointsEarned", None),
    };
    let feedback = req
        .params
        .get("feedback")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let (submission, assignment) =
        match guard::submission_for_grader(conn, &submission_id, &teacher_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };

    let status = SubmissionStatus::parse(&submission.status).unwrap_or(SubmissionStatus::Submitted);
    if !status.can_grade() {
        return CoreError::InvalidState {
            action: "grade",
            status: submission.status.clone(),
        }
        .response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE submissions SET
           status = 'graded',
           points_earned = ?,
           feedback = ?,
           graded_at = ?,
           graded_by = ?
         WHERE id = ?",
        (
            points_earned,
            feedback.as_deref(),
            Utc::now().to_rfc3339(),
            &teacher_id,
            &submission_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }

    // Re-grading re-runs the projection; the gradebook row always reflects
    // the latest grade.
    if let Err(e) = project_grade(
        &tx,
        &assignment.class_id,
        &submission.student_id,
        &assignment.id,
        points_earned,
        assignment.points_possible,
    ) {
        return e.response(&req.id);
    }

    notifications::emit(
        &tx,
        &NotificationDraft {
            recipient_id: &submission.student_id,
            title: "Grade received",
            message: format!("Your submission for '{}' was graded", assignment.title),
            kind: "grade_received",
            class_id: Some(&assignment.class_id),
            assignment_id: Some(&assignment.id),
        },
    );

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match submission_json(conn, &submission_id) {
        Ok(submission) => ok(&req.id, json!({ "submission": submission })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_submissions_return(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let submission_id = match req.params.get("submissionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing submissionId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let feedback = match req.params.get("feedback").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing feedback", None),
    };

    let (submission, assignment) =
        match guard::submission_for_grader(conn, &submission_id, &teacher_id) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };

    let status = SubmissionStatus::parse(&submission.status).unwrap_or(SubmissionStatus::Submitted);
    if !status.can_return() {
        return CoreError::InvalidState {
            action: "return",
            status: submission.status.clone(),
        }
        .response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Returning work never touches points_earned or the gradebook.
    if let Err(e) = tx.execute(
        "UPDATE submissions SET status = 'returned', feedback = ?, graded_by = ? WHERE id = ?",
        (&feedback, &teacher_id, &submission_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }

    notifications::emit(
        &tx,
        &NotificationDraft {
            recipient_id: &submission.student_id,
            title: "Work returned",
            message: format!(
                "Your submission for '{}' was returned for revision",
                assignment.title
            ),
            kind: "comment_added",
            class_id: Some(&assignment.class_id),
            assignment_id: Some(&assignment.id),
        },
    );

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match submission_json(conn, &submission_id) {
        Ok(submission) => ok(&req.id, json!({ "submission": submission })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_submissions_for_assignment(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.student_id, u.name, s.content, s.status, s.points_earned,
                s.feedback, s.submitted_at, s.graded_at
         FROM submissions s
         JOIN users u ON u.id = s.student_id
         WHERE s.assignment_id = ?
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&assignment_id], |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let student_name: String = row.get(2)?;
            let content: Option<String> = row.get(3)?;
            let status: String = row.get(4)?;
            let points_earned: Option<f64> = row.get(5)?;
            let feedback: Option<String> = row.get(6)?;
            let submitted_at: Option<String> = row.get(7)?;
            let graded_at: Option<String> = row.get(8)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": student_name,
                "content": content,
                "status": status,
                "pointsEarned": points_earned,
                "feedback": feedback,
                "submittedAt": submitted_at,
                "gradedAt": graded_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_submissions_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    if let Err(e) = guard::assignment_for_student(conn, &assignment_id, &student_id) {
        return e.response(&req.id);
    }

    let row_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM submissions WHERE assignment_id = ? AND student_id = ?",
            (&assignment_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match row_id {
        None => ok(&req.id, json!({ "submission": null })),
        Some(id) => match submission_json(conn, &id) {
            Ok(submission) => ok(&req.id, json!({ "submission": submission })),
            Err(e) => e.response(&req.id),
        },
    }
}

fn handle_submissions_pending(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let class_filter = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let sql = "SELECT s.id, s.assignment_id, a.title, a.class_id, s.student_id, u.name,
                      s.status, s.submitted_at
               FROM submissions s
               JOIN assignments a ON a.id = s.assignment_id
               JOIN users u ON u.id = s.student_id
               WHERE a.teacher_id = ?1
                 AND s.status IN ('pending', 'submitted')
                 AND (?2 IS NULL OR a.class_id = ?2)
               ORDER BY s.submitted_at, s.id";

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&teacher_id, class_filter.as_deref()), |row| {
            let id: String = row.get(0)?;
            let assignment_id: String = row.get(1)?;
            let assignment_title: String = row.get(2)?;
            let class_id: String = row.get(3)?;
            let student_id: String = row.get(4)?;
            let student_name: String = row.get(5)?;
            let status: String = row.get(6)?;
            let submitted_at: Option<String> = row.get(7)?;
            Ok(json!({
                "id": id,
                "assignmentId": assignment_id,
                "assignmentTitle": assignment_title,
                "classId": class_id,
                "studentId": student_id,
                "studentName": student_name,
                "status": status,
                "submittedAt": submitted_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.submit" => Some(handle_submissions_submit(state, req)),
        "submissions.grade" => Some(handle_submissions_grade(state, req)),
        "submissions.returnForRevision" => Some(handle_submissions_return(state, req)),
        "submissions.forAssignment" => Some(handle_submissions_for_assignment(state, req)),
        "submissions.forStudent" => Some(handle_submissions_for_student(state, req)),
        "submissions.pending" => Some(handle_submissions_pending(state, req)),
        _ => None,
    }
}
