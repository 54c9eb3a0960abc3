/// Submission lifecycle. `Pending` is the implicit no-row state; rows in the
/// database only ever hold `submitted`, `graded`, or `returned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    Graded,
    Returned,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<SubmissionStatus> {
        match s {
            "pending" => Some(SubmissionStatus::Pending),
            "submitted" => Some(SubmissionStatus::Submitted),
            "graded" => Some(SubmissionStatus::Graded),
            "returned" => Some(SubmissionStatus::Returned),
            _ => None,
        }
    }

    /// A student submitting (or resubmitting) work. Graded work must be
    /// returned for revision before it can be resubmitted.
    pub fn can_submit(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Pending | SubmissionStatus::Submitted | SubmissionStatus::Returned
        )
    }

    /// A teacher recording a grade. Re-grading is allowed and re-runs the
    /// gradebook projection; grading returned work without a resubmission is
    /// allowed too.
    pub fn can_grade(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Submitted | SubmissionStatus::Graded | SubmissionStatus::Returned
        )
    }

    /// A teacher sending work back for revision.
    pub fn can_return(self) -> bool {
        matches!(self, SubmissionStatus::Submitted | SubmissionStatus::Graded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for s in [
            SubmissionStatus::Pending,
            SubmissionStatus::Submitted,
            SubmissionStatus::Graded,
            SubmissionStatus::Returned,
        ] {
            assert_eq!(SubmissionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SubmissionStatus::parse("excused"), None);
    }

    #[test]
    fn graded_work_cannot_be_resubmitted_directly() {
        assert!(!SubmissionStatus::Graded.can_submit());
        assert!(SubmissionStatus::Returned.can_submit());
        assert!(SubmissionStatus::Submitted.can_submit());
        assert!(SubmissionStatus::Pending.can_submit());
    }

    #[test]
    fn grading_allowed_from_submitted_graded_and_returned() {
        assert!(SubmissionStatus::Submitted.can_grade());
        assert!(SubmissionStatus::Graded.can_grade());
        assert!(SubmissionStatus::Returned.can_grade());
        assert!(!SubmissionStatus::Pending.can_grade());
    }

    #[test]
    fn returning_already_returned_work_is_invalid() {
        assert!(SubmissionStatus::Submitted.can_return());
        assert!(SubmissionStatus::Graded.can_return());
        assert!(!SubmissionStatus::Returned.can_return());
        assert!(!SubmissionStatus::Pending.can_return());
    }
}
