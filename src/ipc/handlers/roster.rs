use crate::ipc::error::{db_err, err, ok, CoreError};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const JOIN_CODE_ATTEMPTS: usize = 8;

fn new_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_CHARSET[rng.gen_range(0..JOIN_CODE_CHARSET.len())] as char)
        .collect()
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn load_user_role(conn: &Connection, user_id: &str) -> Result<String, CoreError> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err("db_query_failed"))?;
    role.ok_or(CoreError::NotFound { what: "user" })
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        Some("student") => "student",
        Some("teacher") => "teacher",
        _ => {
            return err(
                &req.id,
                "bad_params",
                "role must be one of: student, teacher",
                None,
            )
        }
    };

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, name, role) VALUES(?, ?, ?)",
        (&user_id, &name, role),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "userId": user_id, "name": name, "role": role }))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, name, role FROM users ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let role: String = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "role": role }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    match load_user_role(conn, &teacher_id) {
        Ok(role) if role == "teacher" => {}
        Ok(_) => {
            return err(
                &req.id,
                "not_authorized",
                "only teachers may create classes",
                None,
            )
        }
        Err(e) => return e.response(&req.id),
    }

    let class_id = Uuid::new_v4().to_string();

    // Join codes are drawn at random; redraw on the (unlikely) collision
    // with an existing class rather than pre-checking.
    for attempt in 0..JOIN_CODE_ATTEMPTS {
        let code = new_join_code();
        match conn.execute(
            "INSERT INTO classes(id, name, code, teacher_id) VALUES(?, ?, ?, ?)",
            (&class_id, &name, &code, &teacher_id),
        ) {
            Ok(_) => {
                return ok(
                    &req.id,
                    json!({ "classId": class_id, "name": name, "code": code }),
                )
            }
            Err(e) if is_unique_violation(&e) && attempt + 1 < JOIN_CODE_ATTEMPTS => continue,
            Err(e) => {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "classes" })),
                )
            }
        }
    }

    err(&req.id, "db_insert_failed", "could not allocate join code", None)
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Include basic counts so the host UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.code,
           c.teacher_id,
           c.archived,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS student_count,
           (SELECT COUNT(*) FROM assignments a WHERE a.class_id = c.id) AS assignment_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: String = row.get(2)?;
            let teacher_id: String = row.get(3)?;
            let archived: i64 = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            let assignment_count: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "name": name,
                "code": code,
                "teacherId": teacher_id,
                "archived": archived != 0,
                "studentCount": student_count,
                "assignmentCount": assignment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_archive(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let archived = req
        .params
        .get("archived")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if let Err(e) = guard::class_for_teacher(conn, &class_id, &teacher_id) {
        return e.response(&req.id);
    }

    if let Err(e) = conn.execute(
        "UPDATE classes SET archived = ? WHERE id = ?",
        (archived as i64, &class_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "archived": archived }))
}

fn handle_classes_join(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_uppercase(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    match load_user_role(conn, &student_id) {
        Ok(role) if role == "student" => {}
        Ok(_) => {
            return err(
                &req.id,
                "not_authorized",
                "only students may join a class",
                None,
            )
        }
        Err(e) => return e.response(&req.id),
    }

    let class: Option<(String, i64)> = match conn
        .query_row(
            "SELECT id, archived FROM classes WHERE code = ?",
            [&code],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_id, archived)) = class else {
        return err(&req.id, "not_found", "class not found", None);
    };
    if archived != 0 {
        return err(&req.id, "not_authorized", "class is archived", None);
    }

    // Joining twice is a no-op; the original enrollment timestamp is kept.
    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO enrollments(class_id, student_id, enrolled_at)
         VALUES(?, ?, ?)",
        (&class_id, &student_id, Utc::now().to_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_classes_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
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
        "SELECT u.id, u.name, e.enrolled_at
         FROM enrollments e
         JOIN users u ON u.id = e.student_id
         WHERE e.class_id = ?
         ORDER BY u.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let enrolled_at: String = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "enrolledAt": enrolled_at }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.archive" => Some(handle_classes_archive(state, req)),
        "classes.join" => Some(handle_classes_join(state, req)),
        "classes.roster" => Some(handle_classes_roster(state, req)),
        _ => None,
    }
}
