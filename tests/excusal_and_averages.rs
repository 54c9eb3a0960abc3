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

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    code: &str,
) -> String {
    let student_id = request_ok(
        stdin,
        reader,
        id,
        "users.create",
        json!({ "name": name, "role": "student" }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .unwrap()
    .to_string();
    let join_id = format!("{}-join", id);
    let _ = request_ok(
        stdin,
        reader,
        &join_id,
        "classes.join",
        json!({ "code": code, "studentId": student_id }),
    );
    student_id
}

#[test]
fn excusal_clears_the_grade_and_is_reversible_by_regrading() {
    let workspace = temp_dir("classroom-excusal");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "name": "Excuser", "role": "teacher" }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .unwrap()
    .to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Geography", "teacherId": teacher_id }),
    );
    let class_id = class.get("classId").and_then(|v| v.as_str()).unwrap().to_string();
    let code = class.get("code").and_then(|v| v.as_str()).unwrap().to_string();
    let student_id = create_student(&mut stdin, &mut reader, "4", "Mabel", &code);
    let assignment_id = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.create",
        json!({
            "classId": class_id,
            "teacherId": teacher_id,
            "title": "Map Test",
            "pointsPossible": 100,
            "published": true
        }),
    )
    .get("assignmentId")
    .and_then(|v| v.as_str())
    .unwrap()
    .to_string();

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "gradebook.upsertGrade",
        json!({
            "studentId": student_id,
            "assignmentId": assignment_id,
            "teacherId": teacher_id,
            "pointsEarned": 72
        }),
    );
    let entry = graded.get("entry").expect("entry");
    assert_eq!(entry.get("percentage").and_then(|v| v.as_i64()), Some(72));
    assert_eq!(entry.get("letterGrade").and_then(|v| v.as_str()), Some("C"));

    // Excusal nulls the numeric fields outright.
    let excused = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "gradebook.excuse",
        json!({
            "studentId": student_id,
            "assignmentId": assignment_id,
            "teacherId": teacher_id
        }),
    );
    let entry = excused.get("entry").expect("entry");
    assert_eq!(entry.get("isExcused").and_then(|v| v.as_bool()), Some(true));
    assert!(entry.get("pointsEarned").map(|v| v.is_null()).unwrap_or(false));
    assert!(entry.get("percentage").map(|v| v.is_null()).unwrap_or(false));
    assert!(entry.get("letterGrade").map(|v| v.is_null()).unwrap_or(false));

    // A later grade restores the numeric fields and drops the flag.
    let regraded = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "gradebook.upsertGrade",
        json!({
            "studentId": student_id,
            "assignmentId": assignment_id,
            "teacherId": teacher_id,
            "pointsEarned": 88
        }),
    );
    let entry = regraded.get("entry").expect("entry");
    assert_eq!(entry.get("isExcused").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(entry.get("percentage").and_then(|v| v.as_i64()), Some(88));
    assert_eq!(entry.get("letterGrade").and_then(|v| v.as_str()), Some("B"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_average_excludes_excused_entries_entirely() {
    let workspace = temp_dir("classroom-averages");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "name": "Averager", "role": "teacher" }),
    )
    .get("userId")
    .and_then(|v| v.as_str())
    .unwrap()
    .to_string();
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "Statistics", "teacherId": teacher_id }),
    );
    let class_id = class.get("classId").and_then(|v| v.as_str()).unwrap().to_string();
    let code = class.get("code").and_then(|v| v.as_str()).unwrap().to_string();

    let s1 = create_student(&mut stdin, &mut reader, "4", "Alice", &code);
    let s2 = create_student(&mut stdin, &mut reader, "5", "Bob", &code);
    let s3 = create_student(&mut stdin, &mut reader, "6", "Carol", &code);

    let assignment_id = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.create",
        json!({
            "classId": class_id,
            "teacherId": teacher_id,
            "title": "Sampling Project",
            "pointsPossible": 100,
            "published": true
        }),
    )
    .get("assignmentId")
    .and_then(|v| v.as_str())
    .unwrap()
    .to_string();

    for (i, (student, points)) in [(s1.as_str(), 80), (s2.as_str(), 90)].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("8-{}", i),
            "gradebook.upsertGrade",
            json!({
                "studentId": student,
                "assignmentId": assignment_id,
                "teacherId": teacher_id,
                "pointsEarned": points
            }),
        );
    }
    // Carol is graded then excused; she must leave both the numerator and
    // the denominator.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "gradebook.upsertGrade",
        json!({
            "studentId": s3,
            "assignmentId": assignment_id,
            "teacherId": teacher_id,
            "pointsEarned": 10
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "gradebook.excuse",
        json!({
            "studentId": s3,
            "assignmentId": assignment_id,
            "teacherId": teacher_id
        }),
    );

    let averages = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "gradebook.classAverages",
        json!({ "classId": class_id, "teacherId": teacher_id }),
    );
    let averages = averages.get("averages").and_then(|v| v.as_array()).unwrap();
    assert_eq!(averages.len(), 1);
    assert_eq!(
        averages[0].get("average").and_then(|v| v.as_f64()),
        Some(85.0)
    );
    assert_eq!(
        averages[0].get("gradedCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(
        averages[0].get("excusedCount").and_then(|v| v.as_u64()),
        Some(1)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
