use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

const ASSIGNMENT_KINDS: [&str; 3] = ["assignment", "quiz", "question"];
const DEFAULT_POINTS_POSSIBLE: f64 = 100.0;

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let kind = match req.params.get("kind").and_then(|v| v.as_str()) {
        Some(k) if ASSIGNMENT_KINDS.contains(&k) => k.to_string(),
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                "kind must be one of: assignment, quiz, question",
                Some(json!({ "kind": other })),
            )
        }
        None => "assignment".to_string(),
    };
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .and_then(|s| if s.is_empty() { None } else { Some(s) });
    let due_date = req
        .params
        .get("dueDate")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Absent => the 100-point default; an explicit null => not graded by
    // points (the projector falls back to 100 at grading time).
    let points_possible = match req.params.get("pointsPossible") {
        None => Some(DEFAULT_POINTS_POSSIBLE),
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_f64() {
            Some(p) if p >= 0.0 => Some(p),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "pointsPossible must be a non-negative number or null",
                    None,
                )
            }
        },
    };
    let published = req
        .params
        .get("published")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    // The creator must be the owning teacher of the class.
    if let Err(e) = guard::class_for_teacher(conn, &class_id, &teacher_id) {
        return e.response(&req.id);
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO assignments(
           id,
           class_id,
           teacher_id,
           title,
           description,
           kind,
           due_date,
           points_possible,
           published,
           created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &class_id,
            &teacher_id,
            &title,
            description.as_deref(),
            &kind,
            due_date.as_deref(),
            points_possible,
            published as i64,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(&req.id, json!({ "assignmentId": assignment_id }))
}

fn handle_assignments_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let published = req
        .params
        .get("published")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if let Err(e) = guard::assignment_for_teacher(conn, &assignment_id, &teacher_id) {
        return e.response(&req.id);
    }

    if let Err(e) = conn.execute(
        "UPDATE assignments SET published = ? WHERE id = ?",
        (published as i64, &assignment_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "assignments" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "published": published }))
}

fn handle_assignments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    // The class teacher sees everything; an enrolled student sees published
    // assignments only.
    let published_only = match guard::class_for_teacher(conn, &class_id, &user_id) {
        Ok(()) => false,
        Err(e) if e.code() == "not_authorized" => {
            match guard::is_enrolled(conn, &class_id, &user_id) {
                Ok(true) => true,
                Ok(false) => {
                    return err(
                        &req.id,
                        "enrollment_required",
                        "student is not enrolled in this class",
                        None,
                    )
                }
                Err(e) => return e.response(&req.id),
            }
        }
        Err(e) => return e.response(&req.id),
    };

    let sql = if published_only {
        "SELECT id, title, description, kind, due_date, points_possible, published, created_at
         FROM assignments WHERE class_id = ? AND published = 1 ORDER BY created_at"
    } else {
        "SELECT id, title, description, kind, due_date, points_possible, published, created_at
         FROM assignments WHERE class_id = ? ORDER BY created_at"
    };

    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let kind: String = row.get(3)?;
            let due_date: Option<String> = row.get(4)?;
            let points_possible: Option<f64> = row.get(5)?;
            let published: i64 = row.get(6)?;
            let created_at: String = row.get(7)?;
            Ok(json!({
                "id": id,
                "title": title,
                "description": description,
                "kind": kind,
                "dueDate": due_date,
                "pointsPossible": points_possible,
                "published": published != 0,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.publish" => Some(handle_assignments_publish(state, req)),
        "assignments.list" => Some(handle_assignments_list(state, req)),
        _ => None,
    }
}
