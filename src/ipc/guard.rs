//! Per-call-site access checks. Every operation threads an explicit
//! principal id; there is no global policy table. Lookups distinguish an id
//! that does not resolve (`not_found`) from one the caller may not act on
//! (`not_authorized`).

use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::{db_err, CoreError};

#[derive(Debug, Clone)]
pub struct AssignmentRef {
    pub id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub title: String,
    pub points_possible: Option<f64>,
    pub published: bool,
}

#[derive(Debug, Clone)]
pub struct SubmissionRef {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub status: String,
}

pub fn load_assignment(
    conn: &Connection,
    assignment_id: &str,
) -> Result<AssignmentRef, CoreError> {
    let row = conn
        .query_row(
            "SELECT id, class_id, teacher_id, title, points_possible, published
             FROM assignments WHERE id = ?",
            [assignment_id],
            |r| {
                Ok(AssignmentRef {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    teacher_id: r.get(2)?,
                    title: r.get(3)?,
                    points_possible: r.get(4)?,
                    published: r.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    row.ok_or(CoreError::NotFound { what: "assignment" })
}

pub fn load_submission(
    conn: &Connection,
    submission_id: &str,
) -> Result<SubmissionRef, CoreError> {
    let row = conn
        .query_row(
            "SELECT id, assignment_id, student_id, status FROM submissions WHERE id = ?",
            [submission_id],
            |r| {
                Ok(SubmissionRef {
                    id: r.get(0)?,
                    assignment_id: r.get(1)?,
                    student_id: r.get(2)?,
                    status: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    row.ok_or(CoreError::NotFound { what: "submission" })
}

pub fn is_enrolled(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
) -> Result<bool, CoreError> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE class_id = ? AND student_id = ?",
            (class_id, student_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    Ok(hit.is_some())
}

/// Teacher access to an assignment: the principal must own it (transitively
/// the owner of the class).
pub fn assignment_for_teacher(
    conn: &Connection,
    assignment_id: &str,
    teacher_id: &str,
) -> Result<AssignmentRef, CoreError> {
    let assignment = load_assignment(conn, assignment_id)?;
    if assignment.teacher_id != teacher_id {
        return Err(CoreError::NotAuthorized(
            "only the assignment's teacher may do this".to_string(),
        ));
    }
    Ok(assignment)
}

/// Student access to an assignment: enrollment in its class, and the
/// assignment must be published.
pub fn assignment_for_student(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> Result<AssignmentRef, CoreError> {
    let assignment = load_assignment(conn, assignment_id)?;
    if !is_enrolled(conn, &assignment.class_id, student_id)? {
        return Err(CoreError::EnrollmentRequired);
    }
    if !assignment.published {
        return Err(CoreError::NotAuthorized(
            "assignment is not published".to_string(),
        ));
    }
    Ok(assignment)
}

/// Grader access to a submission: ownership of the parent assignment.
/// Returns both rows since callers need the assignment for the projection.
pub fn submission_for_grader(
    conn: &Connection,
    submission_id: &str,
    teacher_id: &str,
) -> Result<(SubmissionRef, AssignmentRef), CoreError> {
    let submission = load_submission(conn, submission_id)?;
    let assignment = load_assignment(conn, &submission.assignment_id)?;
    if assignment.teacher_id != teacher_id {
        return Err(CoreError::NotAuthorized(
            "only the assignment's teacher may do this".to_string(),
        ));
    }
    Ok((submission, assignment))
}

/// Student access to their own submission.
pub fn submission_for_student(
    conn: &Connection,
    submission_id: &str,
    student_id: &str,
) -> Result<SubmissionRef, CoreError> {
    let submission = load_submission(conn, submission_id)?;
    if submission.student_id != student_id {
        return Err(CoreError::NotAuthorized(
            "submission belongs to another student".to_string(),
        ));
    }
    Ok(submission)
}

/// Teacher access to a class.
pub fn class_for_teacher(
    conn: &Connection,
    class_id: &str,
    teacher_id: &str,
) -> Result<(), CoreError> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT teacher_id FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    match owner {
        None => Err(CoreError::NotFound { what: "class" }),
        Some(owner) if owner != teacher_id => Err(CoreError::NotAuthorized(
            "only the class teacher may do this".to_string(),
        )),
        Some(_) => Ok(()),
    }
}
