use crate::grading::{self, GradeMark};
use crate::ipc::error::{db_err, err, ok, CoreError};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

const FALLBACK_POINTS_POSSIBLE: f64 = 100.0;

/// Upsert the gradebook row for (student, assignment) from a grading event.
/// This is the only writer of letter_grade; it also clears any prior
/// excusal. Assignments without a point value project against 100.
pub fn project_grade(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    assignment_id: &str,
    points_earned: f64,
    points_possible: Option<f64>,
) -> Result<(), CoreError> {
    let possible = points_possible.unwrap_or(FALLBACK_POINTS_POSSIBLE);
    let percent = grading::percentage(points_earned, possible);
    let letter = grading::letter_grade(percent);

    conn.execute(
        "INSERT INTO gradebook_entries(
           id, class_id, student_id, assignment_id, points_earned, points_possible,
           percentage, letter_grade, is_excused, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
         ON CONFLICT(student_id, assignment_id) DO UPDATE SET
           points_earned = excluded.points_earned,
           points_possible = excluded.points_possible,
           percentage = excluded.percentage,
           letter_grade = excluded.letter_grade,
           is_excused = 0,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            class_id,
            student_id,
            assignment_id,
            points_earned,
            possible,
            percent,
            letter,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(db_err("db_insert_failed"))?;

    Ok(())
}

/// Upsert the excusal row for (student, assignment). Excusal actively clears
/// any prior grade fields rather than merely flagging them.
pub fn project_excusal(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    assignment_id: &str,
    points_possible: Option<f64>,
) -> Result<(), CoreError> {
    let possible = points_possible.unwrap_or(FALLBACK_POINTS_POSSIBLE);

    conn.execute(
        "INSERT INTO gradebook_entries(
           id, class_id, student_id, assignment_id, points_earned, points_possible,
           percentage, letter_grade, is_excused, updated_at
         ) VALUES(?, ?, ?, ?, NULL, ?, NULL, NULL, 1, ?)
         ON CONFLICT(student_id, assignment_id) DO UPDATE SET
           points_earned = NULL,
           percentage = NULL,
           letter_grade = NULL,
           is_excused = 1,
           updated_at = excluded.updated_at",
        (
            Uuid::new_v4().to_string(),
            class_id,
            student_id,
            assignment_id,
            possible,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(db_err("db_insert_failed"))?;

    Ok(())
}

fn entry_json(
    conn: &Connection,
    student_id: &str,
    assignment_id: &str,
) -> Result<serde_json::Value, CoreError> {
    let row = conn
        .query_row(
            "SELECT id, class_id, student_id, assignment_id, points_earned, points_possible,
                    percentage, letter_grade, is_excused, updated_at
             FROM gradebook_entries WHERE student_id = ? AND assignment_id = ?",
            (student_id, assignment_id),
            |r| {
                let id: String = r.get(0)?;
                let class_id: String = r.get(1)?;
                let student_id: String = r.get(2)?;
                let assignment_id: String = r.get(3)?;
                let points_earned: Option<f64> = r.get(4)?;
                let points_possible: f64 = r.get(5)?;
                let percentage: Option<i64> = r.get(6)?;
                let letter_grade: Option<String> = r.get(7)?;
                let is_excused: i64 = r.get(8)?;
                let updated_at: Option<String> = r.get(9)?;
                Ok(json!({
                    "id": id,
                    "classId": class_id,
                    "studentId": student_id,
                    "assignmentId": assignment_id,
                    "pointsEarned": points_earned,
                    "pointsPossible": points_possible,
                    "percentage": percentage,
                    "letterGrade": letter_grade,
                    "isExcused": is_excused != 0,
                    "updatedAt": updated_at
                }))
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    row.ok_or(CoreError::NotFound {
        what: "gradebook entry",
    })
}

fn require_student(conn: &Connection, student_id: &str) -> Result<(), CoreError> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if hit.is_none() {
        return Err(CoreError::NotFound { what: "user" });
    }
    Ok(())
}

fn handle_gradebook_upsert_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
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

    let assignment = match guard::assignment_for_teacher(conn, &assignment_id, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_student(conn, &student_id) {
        return e.response(&req.id);
    }

    if let Err(e) = project_grade(
        conn,
        &assignment.class_id,
        &student_id,
        &assignment_id,
        points_earned,
        assignment.points_possible,
    ) {
        return e.response(&req.id);
    }

    match entry_json(conn, &student_id, &assignment_id) {
        Ok(entry) => ok(&req.id, json!({ "entry": entry })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_gradebook_excuse(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let assignment = match guard::assignment_for_teacher(conn, &assignment_id, &teacher_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if let Err(e) = require_student(conn, &student_id) {
        return e.response(&req.id);
    }

    if let Err(e) = project_excusal(
        conn,
        &assignment.class_id,
        &student_id,
        &assignment_id,
        assignment.points_possible,
    ) {
        return e.response(&req.id);
    }

    match entry_json(conn, &student_id, &assignment_id) {
        Ok(entry) => ok(&req.id, json!({ "entry": entry })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_gradebook_by_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    if let Err(e) = guard::class_for_teacher(conn, &class_id, &teacher_id) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT g.student_id, u.name, g.assignment_id, a.title, g.points_earned,
                g.points_possible, g.percentage, g.letter_grade, g.is_excused
         FROM gradebook_entries g
         JOIN users u ON u.id = g.student_id
         JOIN assignments a ON a.id = g.assignment_id
         WHERE g.class_id = ?
         ORDER BY u.name, a.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            let student_id: String = row.get(0)?;
            let student_name: String = row.get(1)?;
            let assignment_id: String = row.get(2)?;
            let assignment_title: String = row.get(3)?;
            let points_earned: Option<f64> = row.get(4)?;
            let points_possible: f64 = row.get(5)?;
            let percentage: Option<i64> = row.get(6)?;
            let letter_grade: Option<String> = row.get(7)?;
            let is_excused: i64 = row.get(8)?;
            Ok(json!({
                "studentId": student_id,
                "studentName": student_name,
                "assignmentId": assignment_id,
                "assignmentTitle": assignment_title,
                "pointsEarned": points_earned,
                "pointsPossible": points_possible,
                "percentage": percentage,
                "letterGrade": letter_grade,
                "isExcused": is_excused != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_gradebook_by_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let requester_id = match req.params.get("requesterId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing requesterId", None),
    };

    // Students may read their own rows; anyone else must own the class.
    if requester_id != student_id {
        if let Err(e) = guard::class_for_teacher(conn, &class_id, &requester_id) {
            return e.response(&req.id);
        }
    }

    let mut stmt = match conn.prepare(
        "SELECT g.assignment_id, a.title, g.points_earned, g.points_possible,
                g.percentage, g.letter_grade, g.is_excused
         FROM gradebook_entries g
         JOIN assignments a ON a.id = g.assignment_id
         WHERE g.class_id = ? AND g.student_id = ?
         ORDER BY a.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&class_id, &student_id), |row| {
            let assignment_id: String = row.get(0)?;
            let assignment_title: String = row.get(1)?;
            let points_earned: Option<f64> = row.get(2)?;
            let points_possible: f64 = row.get(3)?;
            let percentage: Option<i64> = row.get(4)?;
            let letter_grade: Option<String> = row.get(5)?;
            let is_excused: i64 = row.get(6)?;
            Ok(json!({
                "assignmentId": assignment_id,
                "assignmentTitle": assignment_title,
                "pointsEarned": points_earned,
                "pointsPossible": points_possible,
                "percentage": percentage,
                "letterGrade": letter_grade,
                "isExcused": is_excused != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_gradebook_class_averages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    if let Err(e) = guard::class_for_teacher(conn, &class_id, &teacher_id) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT g.assignment_id, a.title, g.is_excused, g.percentage
         FROM gradebook_entries g
         JOIN assignments a ON a.id = g.assignment_id
         WHERE g.class_id = ?
         ORDER BY a.created_at, g.assignment_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Vec<(String, String, i64, Option<i64>)> = match stmt
        .query_map([&class_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut by_assignment: BTreeMap<String, (String, Vec<GradeMark>)> = BTreeMap::new();
    for (assignment_id, title, is_excused, percentage) in rows {
        let mark = if is_excused != 0 {
            GradeMark::Excused
        } else {
            match percentage {
                Some(p) => GradeMark::Percent(p),
                None => GradeMark::Ungraded,
            }
        };
        by_assignment
            .entry(assignment_id)
            .or_insert_with(|| (title, Vec::new()))
            .1
            .push(mark);
    }

    let averages: Vec<serde_json::Value> = by_assignment
        .into_iter()
        .map(|(assignment_id, (title, marks))| {
            let avg = grading::class_average(marks);
            json!({
                "assignmentId": assignment_id,
                "assignmentTitle": title,
                "average": avg.average,
                "gradedCount": avg.graded_count,
                "excusedCount": avg.excused_count
            })
        })
        .collect();

    ok(&req.id, json!({ "averages": averages }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradebook.upsertGrade" => Some(handle_gradebook_upsert_grade(state, req)),
        "gradebook.excuse" => Some(handle_gradebook_excuse(state, req)),
        "gradebook.byClass" => Some(handle_gradebook_by_class(state, req)),
        "gradebook.byStudent" => Some(handle_gradebook_by_student(state, req)),
        "gradebook.classAverages" => Some(handle_gradebook_class_averages(state, req)),
        _ => None,
    }
}
