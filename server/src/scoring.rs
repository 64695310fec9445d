//! Authoritative answer scoring.
//!
//! A submission is scored exactly once, at the moment it is marked final,
//! from the question definition, the selected choice(s) and the elapsed
//! time since the question went live. Faster correct answers earn a larger
//! time bonus; multi-choice submissions that select only correct choices
//! but miss some earn flat partial credit with no time bonus.

use std::time::Duration;

use shared::{Question, QuestionKind, Selection};

/// Points for a correct answer with no time left.
const BASE_POINTS: f64 = 500.0;

/// Additional points for a correct answer, scaled by the remaining time.
const TIME_BONUS: f64 = 500.0;

/// Pool for multi-choice partial credit, scaled by the matched fraction.
const PARTIAL_POINTS: f64 = 300.0;

/// Outcome of scoring one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    /// True only when the selection matches the correct answer exactly.
    pub correct: bool,
    pub points: u32,
}

impl Score {
    const ZERO: Score = Score {
        correct: false,
        points: 0,
    };
}

/// Fraction of the time limit still remaining at submission, in `0.0..=1.0`.
/// Submissions that land after the deadline clamp to zero.
fn time_ratio(limit_secs: u64, elapsed: Duration) -> f64 {
    let limit = limit_secs as f64;
    ((limit - elapsed.as_secs_f64()) / limit).max(0.0)
}

fn timed_points(limit_secs: u64, elapsed: Duration) -> u32 {
    (BASE_POINTS + TIME_BONUS * time_ratio(limit_secs, elapsed)).round() as u32
}

/// Scores a submission against `question`.
///
/// The selection is compared as a deduplicated set, so a perfect
/// multi-choice submission earns exactly what a correct single-choice
/// submission earns at the same elapsed time. Out-of-range indices never
/// match anything and therefore score as wrong.
pub fn score(question: &Question, selection: &Selection, elapsed: Duration) -> Score {
    let correct = question.correct.indices();
    let selected = selection.indices();

    if selected.is_empty() {
        return Score::ZERO;
    }
    if selected == correct {
        return Score {
            correct: true,
            points: timed_points(question.time, elapsed),
        };
    }
    if question.question_type == QuestionKind::Multiple && selected.is_subset(&correct) {
        let matched = selected.len() as f64 / correct.len() as f64;
        return Score {
            correct: false,
            points: (matched * PARTIAL_POINTS).round() as u32,
        };
    }
    Score::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Correct;

    fn single_question(correct: usize, time: u64) -> Question {
        Question {
            question: "2+2?".into(),
            answers: vec!["3".into(), "4".into(), "5".into(), "6".into()],
            correct: Correct::One(correct),
            time,
            question_type: QuestionKind::Single,
            image: None,
        }
    }

    fn multi_question(correct: &[usize], time: u64) -> Question {
        Question {
            question: "primes?".into(),
            answers: vec!["2".into(), "3".into(), "5".into(), "4".into()],
            correct: Correct::Many(correct.to_vec()),
            time,
            question_type: QuestionKind::Multiple,
            image: None,
        }
    }

    #[test]
    fn instant_correct_answer_earns_full_points() {
        let q = single_question(1, 20);
        let s = score(&q, &Selection::One(1), Duration::ZERO);
        assert_eq!(s, Score { correct: true, points: 1000 });
    }

    #[test]
    fn half_time_answer_earns_half_bonus() {
        let q = single_question(1, 20);
        let s = score(&q, &Selection::One(1), Duration::from_secs(10));
        assert_eq!(s, Score { correct: true, points: 750 });
    }

    #[test]
    fn deadline_answer_earns_base_points_only() {
        let q = single_question(1, 20);
        let s = score(&q, &Selection::One(1), Duration::from_secs(20));
        assert_eq!(s, Score { correct: true, points: 500 });
    }

    #[test]
    fn late_answer_clamps_to_base_points() {
        let q = single_question(1, 20);
        let s = score(&q, &Selection::One(1), Duration::from_secs(31));
        assert_eq!(s, Score { correct: true, points: 500 });
    }

    #[test]
    fn wrong_single_choice_earns_nothing() {
        let q = single_question(1, 20);
        let s = score(&q, &Selection::One(2), Duration::ZERO);
        assert_eq!(s, Score::ZERO);
    }

    #[test]
    fn perfect_multi_choice_matches_single_choice_formula() {
        let multi = multi_question(&[0, 1, 2], 20);
        let single = single_question(1, 20);
        for secs in [0, 3, 10, 17, 20] {
            let elapsed = Duration::from_secs(secs);
            let m = score(&multi, &Selection::Many(vec![2, 0, 1]), elapsed);
            let s = score(&single, &Selection::One(1), elapsed);
            assert!(m.correct);
            assert_eq!(m.points, s.points, "elapsed {secs}s");
        }
    }

    #[test]
    fn partial_multi_choice_earns_flat_fraction() {
        let q = multi_question(&[0, 1, 2], 20);
        let s = score(&q, &Selection::Many(vec![0, 1]), Duration::ZERO);
        assert_eq!(s, Score { correct: false, points: 200 });

        // No time bonus: the same subset late still earns the fraction.
        let late = score(&q, &Selection::Many(vec![0, 1]), Duration::from_secs(19));
        assert_eq!(late.points, 200);
    }

    #[test]
    fn multi_choice_with_a_wrong_pick_earns_nothing() {
        let q = multi_question(&[0, 1, 2], 20);
        let s = score(&q, &Selection::Many(vec![0, 3]), Duration::ZERO);
        assert_eq!(s, Score::ZERO);
    }

    #[test]
    fn empty_selection_earns_nothing() {
        let q = multi_question(&[0, 1, 2], 20);
        let s = score(&q, &Selection::Many(vec![]), Duration::ZERO);
        assert_eq!(s, Score::ZERO);
    }

    #[test]
    fn out_of_range_index_scores_as_wrong() {
        let q = single_question(1, 20);
        let s = score(&q, &Selection::One(99), Duration::ZERO);
        assert_eq!(s, Score::ZERO);
    }

    #[test]
    fn duplicate_indices_collapse_before_comparison() {
        let q = multi_question(&[0, 1], 20);
        let s = score(&q, &Selection::Many(vec![0, 0, 1, 1]), Duration::ZERO);
        assert!(s.correct);
        assert_eq!(s.points, 1000);
    }

    #[test]
    fn points_never_increase_with_elapsed_time() {
        let q = single_question(1, 20);
        let mut last = u32::MAX;
        for millis in (0..=20_000).step_by(250) {
            let s = score(&q, &Selection::One(1), Duration::from_millis(millis));
            assert!(s.points <= last, "points rose at {millis}ms");
            last = s.points;
        }
    }
}
