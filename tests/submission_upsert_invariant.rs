use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_classroomd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn classroomd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

struct Classroom {
    teacher_id: String,
    student_id: String,
    class_id: String,
    code: String,
    assignment_id: String,
}

fn setup_classroom(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> Classroom {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "s2",
        "users.create",
        json!({ "name": "Ms. Frizzle", "role": "teacher" }),
    );
    let teacher_id = teacher.get("userId").and_then(|v| v.as_str()).unwrap().to_string();
    let student = request_ok(
        stdin,
        reader,
        "s3",
        "users.create",
        json!({ "name": "Arnold", "role": "student" }),
    );
    let student_id = student.get("userId").and_then(|v| v.as_str()).unwrap().to_string();
    let class = request_ok(
        stdin,
        reader,
        "s4",
        "classes.create",
        json!({ "name": "Science", "teacherId": teacher_id }),
    );
    let code = class.get("code").and_then(|v| v.as_str()).unwrap().to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "classes.join",
        json!({ "code": code, "studentId": student_id }),
    );
    let class_id = class.get("classId").and_then(|v| v.as_str()).unwrap().to_string();
    let assignment = request_ok(
        stdin,
        reader,
        "s6",
        "assignments.create",
        json!({
            "classId": class_id,
            "teacherId": teacher_id,
            "title": "Lab Report",
            "pointsPossible": 20,
            "published": true
        }),
    );
    let assignment_id = assignment
        .get("assignmentId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    Classroom {
        teacher_id,
        student_id,
        class_id,
        code,
        assignment_id,
    }
}

#[test]
fn resubmission_updates_the_single_row_in_place() {
    let workspace = temp_dir("classroom-submit-upsert");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let ctx = setup_classroom(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.submit",
        json!({
            "assignmentId": ctx.assignment_id,
            "studentId": ctx.student_id,
            "content": "first draft"
        }),
    );
    let first_id = first
        .get("submission")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("submission id")
        .to_string();

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.submit",
        json!({
            "assignmentId": ctx.assignment_id,
            "studentId": ctx.student_id,
            "content": "second draft"
        }),
    );
    let second_id = second
        .get("submission")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("submission id")
        .to_string();
    assert_eq!(first_id, second_id, "resubmission must reuse the row");
    assert_eq!(
        second
            .get("submission")
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str()),
        Some("second draft")
    );
    assert_eq!(
        second
            .get("submission")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str()),
        Some("submitted")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.forAssignment",
        json!({ "assignmentId": ctx.assignment_id, "teacherId": ctx.teacher_id }),
    );
    let submissions = listed
        .get("submissions")
        .and_then(|v| v.as_array())
        .expect("submissions array");
    assert_eq!(submissions.len(), 1, "exactly one row per (assignment, student)");
    assert_eq!(
        submissions[0].get("content").and_then(|v| v.as_str()),
        Some("second draft")
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn submit_requires_enrollment_and_existing_assignment() {
    let workspace = temp_dir("classroom-submit-guards");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let ctx = setup_classroom(&mut stdin, &mut reader, &workspace);

    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({ "name": "Wanda", "role": "student" }),
    );
    let outsider_id = outsider
        .get("userId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let denied = request(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.submit",
        json!({
            "assignmentId": ctx.assignment_id,
            "studentId": outsider_id,
            "content": "sneaky"
        }),
    );
    assert_eq!(denied.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(error_code(&denied), "enrollment_required");

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.submit",
        json!({
            "assignmentId": "no-such-assignment",
            "studentId": ctx.student_id,
            "content": "lost"
        }),
    );
    assert_eq!(error_code(&missing), "not_found");

    // An archived class stops accepting new joins.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.archive",
        json!({ "classId": ctx.class_id, "teacherId": ctx.teacher_id }),
    );
    let archived = request(
        &mut stdin,
        &mut reader,
        "5",
        "classes.join",
        json!({ "code": ctx.code, "studentId": outsider_id }),
    );
    assert_eq!(error_code(&archived), "not_authorized");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn graded_work_cannot_be_resubmitted_without_a_return() {
    let workspace = temp_dir("classroom-submit-after-grade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let ctx = setup_classroom(&mut stdin, &mut reader, &workspace);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.submit",
        json!({
            "assignmentId": ctx.assignment_id,
            "studentId": ctx.student_id,
            "content": "final"
        }),
    );
    let submission_id = submitted
        .get("submission")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.grade",
        json!({
            "submissionId": submission_id,
            "teacherId": ctx.teacher_id,
            "pointsEarned": 18
        }),
    );

    let blocked = request(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.submit",
        json!({
            "assignmentId": ctx.assignment_id,
            "studentId": ctx.student_id,
            "content": "one more edit"
        }),
    );
    assert_eq!(error_code(&blocked), "invalid_state");

    // Returning the work reopens the resubmission path.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "submissions.returnForRevision",
        json!({
            "submissionId": submission_id,
            "teacherId": ctx.teacher_id,
            "feedback": "please expand section 2"
        }),
    );
    let resubmitted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "submissions.submit",
        json!({
            "assignmentId": ctx.assignment_id,
            "studentId": ctx.student_id,
            "content": "expanded"
        }),
    );
    assert_eq!(
        resubmitted
            .get("submission")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str()),
        Some("submitted")
    );
    assert!(resubmitted
        .get("submission")
        .and_then(|v| v.get("pointsEarned"))
        .map(|v| v.is_null())
        .unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}
