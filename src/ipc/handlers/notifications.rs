use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

pub struct NotificationDraft<'a> {
    pub recipient_id: &'a str,
    pub title: &'a str,
    pub message: String,
    pub kind: &'a str,
    pub class_id: Option<&'a str>,
    pub assignment_id: Option<&'a str>,
}

/// Write one outbox row. Emission is fire-and-forget: a failure is logged
/// and never surfaced to the caller, so a grading transaction cannot fail on
/// its notification side effect.
pub fn emit(conn: &Connection, draft: &NotificationDraft) {
    let result = conn.execute(
        "INSERT INTO notifications(
           id, recipient_id, title, message, kind, class_id, assignment_id, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            draft.recipient_id,
            draft.title,
            &draft.message,
            draft.kind,
            draft.class_id,
            draft.assignment_id,
            Utc::now().to_rfc3339(),
        ),
    );
    if let Err(e) = result {
        tracing::warn!(
            "failed to emit {} notification for {}: {}",
            draft.kind,
            draft.recipient_id,
            e
        );
    }
}

fn handle_notifications_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let recipient_id = match req.params.get("recipientId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing recipientId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, title, message, kind, class_id, assignment_id, created_at, read
         FROM notifications
         WHERE recipient_id = ?
         ORDER BY created_at DESC, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&recipient_id], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let message: String = row.get(2)?;
            let kind: String = row.get(3)?;
            let class_id: Option<String> = row.get(4)?;
            let assignment_id: Option<String> = row.get(5)?;
            let created_at: String = row.get(6)?;
            let read: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "title": title,
                "message": message,
                "kind": kind,
                "classId": class_id,
                "assignmentId": assignment_id,
                "createdAt": created_at,
                "read": read != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(notifications) => ok(&req.id, json!({ "notifications": notifications })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let notification_id = match req.params.get("notificationId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing notificationId", None),
    };
    let recipient_id = match req.params.get("recipientId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing recipientId", None),
    };

    let changed = match conn.execute(
        "UPDATE notifications SET read = 1 WHERE id = ? AND recipient_id = ?",
        (&notification_id, &recipient_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "notifications" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "notification not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        _ => None,
    }
}
