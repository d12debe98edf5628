//! Thresholded classification metrics and the composite ranking score.

use crate::common::error::{CsatError, CsatResult};
use crate::training::domain::{SATISFIED, UNSATISFIED};

use super::domain::{
    label_for, ClassMetrics, Metrics, WEIGHT_ACCURACY, WEIGHT_F1_UNSATISFIED,
    WEIGHT_RECALL_UNSATISFIED,
};

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn class_metrics(confusion: &[[usize; 2]; 2], class: usize) -> ClassMetrics {
    let other = 1 - class;
    let tp = confusion[class][class];
    let fp = confusion[other][class];
    let fn_ = confusion[class][other];
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support: tp + fn_,
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic, ties averaged.
///
/// `scores` rank the positive class; `None` when either class is absent.
pub fn roc_auc(positive: &[bool], scores: &[f64]) -> Option<f64> {
    let n_pos = positive.iter().filter(|&&p| p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // Ranks are 1-based; tied block [start, end) shares the mean rank.
        let mean_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| positive[i]).count();
        rank_sum += mean_rank * tied_positives as f64;
        start = end;
    }
    let n_pos_f = n_pos as f64;
    Some((rank_sum - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}

/// Score thresholded predictions against `y_true` given per-row `p_unsatisfied`.
pub fn evaluate(y_true: &[usize], p_unsatisfied: &[f64]) -> CsatResult<Metrics> {
    if y_true.is_empty() {
        return Err(CsatError::invalid("cannot score an empty test partition"));
    }
    if y_true.len() != p_unsatisfied.len() {
        return Err(CsatError::invalid(format!(
            "{} labels but {} probabilities",
            y_true.len(),
            p_unsatisfied.len()
        )));
    }
    if let Some(p) = p_unsatisfied.iter().find(|p| !p.is_finite()) {
        return Err(CsatError::invalid(format!("probability {p} is not finite")));
    }

    let mut confusion = [[0usize; 2]; 2];
    for (&actual, &p) in y_true.iter().zip(p_unsatisfied) {
        if actual > SATISFIED {
            return Err(CsatError::invalid(format!("label {actual} is not binary")));
        }
        confusion[actual][label_for(p)] += 1;
    }

    let correct = confusion[0][0] + confusion[1][1];
    let accuracy = ratio(correct, y_true.len());
    let unsatisfied = class_metrics(&confusion, UNSATISFIED);
    let satisfied = class_metrics(&confusion, SATISFIED);
    let positive: Vec<bool> = y_true.iter().map(|&y| y == UNSATISFIED).collect();
    let composite = WEIGHT_F1_UNSATISFIED * unsatisfied.f1
        + WEIGHT_RECALL_UNSATISFIED * unsatisfied.recall
        + WEIGHT_ACCURACY * accuracy;

    Ok(Metrics {
        accuracy,
        roc_auc: roc_auc(&positive, p_unsatisfied),
        unsatisfied,
        satisfied,
        confusion,
        composite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_ranking_scores_one() {
        let m = evaluate(&[0, 0, 1, 1], &[0.9, 0.6, 0.2, 0.1]).unwrap();
        assert_eq!(m.accuracy, 1.0);
        assert_eq!(m.unsatisfied.f1, 1.0);
        assert_eq!(m.roc_auc, Some(1.0));
        assert!((m.composite - 1.0).abs() < 1e-12);
        assert_eq!(m.confusion, [[2, 0], [0, 2]]);
    }

    #[test]
    fn threshold_is_applied_to_the_unsatisfied_probability() {
        // 0.41 and 0.39 straddle the threshold.
        let m = evaluate(&[0, 1], &[0.41, 0.39]).unwrap();
        assert_eq!(m.confusion, [[1, 0], [0, 1]]);
        let flipped = evaluate(&[0, 1], &[0.39, 0.41]).unwrap();
        assert_eq!(flipped.confusion, [[0, 1], [1, 0]]);
        assert_eq!(flipped.composite, 0.0);
    }

    #[test]
    fn zero_division_yields_zero() {
        let m = evaluate(&[1, 1, 1], &[0.1, 0.1, 0.1]).unwrap();
        assert_eq!(m.unsatisfied.precision, 0.0);
        assert_eq!(m.unsatisfied.recall, 0.0);
        assert_eq!(m.unsatisfied.support, 0);
        assert_eq!(m.roc_auc, None);
        assert!((m.composite - 0.2).abs() < 1e-12);
    }

    #[test]
    fn ties_average_ranks() {
        assert_eq!(roc_auc(&[true, false], &[0.5, 0.5]), Some(0.5));
        let auc = roc_auc(&[true, true, false, false], &[0.8, 0.4, 0.4, 0.1]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn composite_mixes_f1_recall_and_accuracy() {
        // tp=1 fn=1 fp=1 tn=1 for the unsatisfied class.
        let m = evaluate(&[0, 0, 1, 1], &[0.9, 0.1, 0.9, 0.1]).unwrap();
        let expected = 0.5 * 0.5 + 0.3 * 0.5 + 0.2 * 0.5;
        assert!((m.composite - expected).abs() < 1e-12);
    }

    #[test]
    fn mismatched_lengths_are_invalid() {
        assert!(evaluate(&[0, 1], &[0.5]).is_err());
        assert!(evaluate(&[], &[]).is_err());
    }
}
