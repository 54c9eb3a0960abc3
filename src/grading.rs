/// Quiz question kinds. Objective kinds carry an answer key and are scored
/// automatically; essays are left for manual grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Essay,
}

impl QuestionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKind::MultipleChoice => "multiple_choice",
            QuestionKind::TrueFalse => "true_false",
            QuestionKind::ShortAnswer => "short_answer",
            QuestionKind::Essay => "essay",
        }
    }

    pub fn parse(s: &str) -> Option<QuestionKind> {
        match s {
            "multiple_choice" => Some(QuestionKind::MultipleChoice),
            "true_false" => Some(QuestionKind::TrueFalse),
            "short_answer" => Some(QuestionKind::ShortAnswer),
            "essay" => Some(QuestionKind::Essay),
            _ => None,
        }
    }

    pub fn auto_scored(self) -> bool {
        !matches!(self, QuestionKind::Essay)
    }
}

/// Canonical form used for answer comparison: surrounding whitespace is
/// ignored and matching is case-insensitive.
pub fn normalize_answer(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Score one answer against a question's key. Returns the correctness flag
/// (None for essays or keyless questions) and the points awarded.
pub fn score_answer(
    kind: QuestionKind,
    correct_answer: Option<&str>,
    answer_text: &str,
    points: f64,
) -> (Option<bool>, f64) {
    match correct_answer {
        Some(key) if kind.auto_scored() => {
            let correct = normalize_answer(answer_text) == normalize_answer(key);
            (Some(correct), if correct { points } else { 0.0 })
        }
        _ => (None, 0.0),
    }
}

/// Integer percentage, ties rounding half away from zero (`f64::round`).
/// A missing or non-positive points-possible yields 0.
pub fn percentage(points_earned: f64, points_possible: f64) -> i64 {
    if points_possible <= 0.0 {
        return 0;
    }
    (points_earned / points_possible * 100.0).round() as i64
}

/// Fixed letter-grade thresholds.
pub fn letter_grade(percent: i64) -> &'static str {
    match percent {
        p if p >= 90 => "A",
        p if p >= 80 => "B",
        p if p >= 70 => "C",
        p if p >= 60 => "D",
        _ => "F",
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeMark {
    Excused,
    Ungraded,
    Percent(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassAverage {
    pub average: Option<f64>,
    pub graded_count: usize,
    pub excused_count: usize,
    pub ungraded_count: usize,
}

/// Average the graded percentages for one assignment. Excused and ungraded
/// entries are excluded from both the numerator and the denominator.
pub fn class_average<I>(marks: I) -> ClassAverage
where
    I: IntoIterator<Item = GradeMark>,
{
    let mut sum: i64 = 0;
    let mut graded_count: usize = 0;
    let mut excused_count: usize = 0;
    let mut ungraded_count: usize = 0;

    for m in marks {
        match m {
            GradeMark::Excused => excused_count += 1,
            GradeMark::Ungraded => ungraded_count += 1,
            GradeMark::Percent(p) => {
                graded_count += 1;
                sum += p;
            }
        }
    }

    let average = if graded_count > 0 {
        Some(sum as f64 / graded_count as f64)
    } else {
        None
    };

    ClassAverage {
        average,
        graded_count,
        excused_count,
        ungraded_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objective_answers_match_after_normalization() {
        let (correct, pts) =
            score_answer(QuestionKind::MultipleChoice, Some("4"), "4", 5.0);
        assert_eq!(correct, Some(true));
        assert_eq!(pts, 5.0);

        let (correct, pts) =
            score_answer(QuestionKind::MultipleChoice, Some("4"), " 4 ", 5.0);
        assert_eq!(correct, Some(true));
        assert_eq!(pts, 5.0);

        let (correct, pts) =
            score_answer(QuestionKind::ShortAnswer, Some("Paris"), "paris", 2.0);
        assert_eq!(correct, Some(true));
        assert_eq!(pts, 2.0);

        let (correct, pts) =
            score_answer(QuestionKind::MultipleChoice, Some("4"), "5", 5.0);
        assert_eq!(correct, Some(false));
        assert_eq!(pts, 0.0);
    }

    #[test]
    fn essays_are_never_auto_scored() {
        let (correct, pts) = score_answer(QuestionKind::Essay, Some("anything"), "anything", 10.0);
        assert_eq!(correct, None);
        assert_eq!(pts, 0.0);

        let (correct, pts) = score_answer(QuestionKind::ShortAnswer, None, "whatever", 3.0);
        assert_eq!(correct, None);
        assert_eq!(pts, 0.0);
    }

    #[test]
    fn percentage_rounds_ties_half_away_from_zero() {
        assert_eq!(percentage(85.0, 100.0), 85);
        assert_eq!(percentage(67.0, 200.0), 34); // 33.5 rounds up
        assert_eq!(percentage(1.0, 200.0), 1); // 0.5 rounds up
        assert_eq!(percentage(89.4, 100.0), 89);
        assert_eq!(percentage(0.0, 100.0), 0);
        assert_eq!(percentage(50.0, 0.0), 0);
    }

    #[test]
    fn letter_grade_boundaries() {
        assert_eq!(letter_grade(100), "A");
        assert_eq!(letter_grade(90), "A");
        assert_eq!(letter_grade(89), "B");
        assert_eq!(letter_grade(80), "B");
        assert_eq!(letter_grade(79), "C");
        assert_eq!(letter_grade(70), "C");
        assert_eq!(letter_grade(69), "D");
        assert_eq!(letter_grade(60), "D");
        assert_eq!(letter_grade(59), "F");
        assert_eq!(letter_grade(0), "F");
    }

    #[test]
    fn class_average_excludes_excused_from_both_sides() {
        let avg = class_average([
            GradeMark::Percent(80),
            GradeMark::Excused,
            GradeMark::Percent(90),
        ]);
        assert_eq!(avg.average, Some(85.0));
        assert_eq!(avg.graded_count, 2);
        assert_eq!(avg.excused_count, 1);
        assert_eq!(avg.ungraded_count, 0);
    }

    #[test]
    fn class_average_of_nothing_graded_is_none() {
        let avg = class_average([GradeMark::Excused, GradeMark::Ungraded]);
        assert_eq!(avg.average, None);
        assert_eq!(avg.graded_count, 0);
        assert_eq!(avg.excused_count, 1);
        assert_eq!(avg.ungraded_count, 1);
    }
}
