/// Ranking metrics: hit rate and NDCG split by clicks and purchases
use super::report::{CutoffMetrics, EvalReport};

/// Evaluation cutoffs
pub const TOPK: [usize; 4] = [5, 10, 15, 20];

/// Largest cutoff, the length of the ranking that has to be extracted
pub const MAX_K: usize = 20;

/// Indices of the `k` highest scores, best first
///
/// Equal scores are ordered by ascending index.
pub fn top_k_indices(scores: &[f32], k: usize) -> Vec<u32> {
    let by_score = |a: &u32, b: &u32| {
        scores[*b as usize]
            .total_cmp(&scores[*a as usize])
            .then(a.cmp(b))
    };

    let mut indices: Vec<u32> = (0..scores.len() as u32).collect();
    let k = k.min(indices.len());
    if k == 0 {
        return Vec::new();
    }

    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, by_score);
        indices.truncate(k);
    }
    indices.sort_unstable_by(by_score);
    indices
}

/// 1-based rank of `action` within the first `k` entries of a best-first ranking
pub fn hit_rank(ranking: &[u32], action: u32, k: usize) -> Option<usize> {
    ranking
        .iter()
        .take(k)
        .position(|&item| item == action)
        .map(|position| position + 1)
}

/// NDCG gain of a single relevant item at a 1-based rank
pub fn ndcg_gain(rank: usize) -> f64 {
    1.0 / ((rank + 1) as f64).log2()
}

/// Running totals for one evaluation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitAccumulator {
    pub total_clicks: f64,
    pub total_purchases: f64,
    pub total_reward: [f64; TOPK.len()],
    pub hit_clicks: [f64; TOPK.len()],
    pub ndcg_clicks: [f64; TOPK.len()],
    pub hit_purchases: [f64; TOPK.len()],
    pub ndcg_purchases: [f64; TOPK.len()],
}

impl HitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one logged event against a best-first ranking
    ///
    /// # Arguments
    /// * `ranking` - At least `MAX_K` item ids, best first
    /// * `action` - Logged item
    /// * `is_buy` - Whether the event was a purchase
    /// * `reward` - Reward of the event, credited on a hit
    pub fn record(&mut self, ranking: &[u32], action: u32, is_buy: bool, reward: f32) {
        if is_buy {
            self.total_purchases += 1.0;
        } else {
            self.total_clicks += 1.0;
        }

        for (i, &k) in TOPK.iter().enumerate() {
            let Some(rank) = hit_rank(ranking, action, k) else {
                continue;
            };

            self.total_reward[i] += reward as f64;
            if is_buy {
                self.hit_purchases[i] += 1.0;
                self.ndcg_purchases[i] += ndcg_gain(rank);
            } else {
                self.hit_clicks[i] += 1.0;
                self.ndcg_clicks[i] += ndcg_gain(rank);
            }
        }
    }

    /// Add the totals of another accumulator
    pub fn merge(&mut self, other: &HitAccumulator) {
        self.total_clicks += other.total_clicks;
        self.total_purchases += other.total_purchases;
        for i in 0..TOPK.len() {
            self.total_reward[i] += other.total_reward[i];
            self.hit_clicks[i] += other.hit_clicks[i];
            self.ndcg_clicks[i] += other.ndcg_clicks[i];
            self.hit_purchases[i] += other.hit_purchases[i];
            self.ndcg_purchases[i] += other.ndcg_purchases[i];
        }
    }

    /// Normalize the totals into a report
    ///
    /// A side without events reports 0.0 for its hit rate and NDCG.
    pub fn report(&self) -> EvalReport {
        if self.total_clicks == 0.0 {
            log::warn!("No click events evaluated, click metrics reported as 0");
        }
        if self.total_purchases == 0.0 {
            log::warn!("No purchase events evaluated, purchase metrics reported as 0");
        }

        let ratio = |value: f64, total: f64| if total > 0.0 { value / total } else { 0.0 };

        let cutoffs = TOPK
            .iter()
            .enumerate()
            .map(|(i, &k)| CutoffMetrics {
                k,
                reward: self.total_reward[i],
                hr_click: ratio(self.hit_clicks[i], self.total_clicks),
                ndcg_click: ratio(self.ndcg_clicks[i], self.total_clicks),
                hr_purchase: ratio(self.hit_purchases[i], self.total_purchases),
                ndcg_purchase: ratio(self.ndcg_purchases[i], self.total_purchases),
            })
            .collect();

        EvalReport { cutoffs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_indices() {
        let scores = [0.1f32, 0.9, 0.3, 0.9, -1.0, 0.5];

        assert_eq!(top_k_indices(&scores, 3), vec![1, 3, 5]);
        assert_eq!(top_k_indices(&scores, 10), vec![1, 3, 5, 2, 0, 4]);
        assert!(top_k_indices(&scores, 0).is_empty());
    }

    #[test]
    fn test_hit_rank() {
        let ranking = [7u32, 3, 9, 1];

        assert_eq!(hit_rank(&ranking, 7, 4), Some(1));
        assert_eq!(hit_rank(&ranking, 9, 4), Some(3));
        assert_eq!(hit_rank(&ranking, 9, 2), None);
        assert_eq!(hit_rank(&ranking, 42, 4), None);
    }

    #[test]
    fn test_ndcg_gain() {
        assert!((ndcg_gain(1) - 1.0).abs() < 1e-12);
        assert!((ndcg_gain(3) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_accumulator_splits_clicks_and_purchases() {
        // Item i is ranked at position i (1-based rank i + 1)
        let ranking: Vec<u32> = (0..MAX_K as u32).collect();
        let mut acc = HitAccumulator::new();

        acc.record(&ranking, 0, false, 0.2); // rank 1 click
        acc.record(&ranking, 7, true, 1.0); // rank 8 purchase
        acc.record(&ranking, 99, false, 0.2); // miss

        assert_eq!(acc.total_clicks, 2.0);
        assert_eq!(acc.total_purchases, 1.0);

        // @5: only the click hits
        assert!((acc.total_reward[0] - 0.2).abs() < 1e-6);
        assert_eq!(acc.hit_clicks[0], 1.0);
        assert_eq!(acc.hit_purchases[0], 0.0);

        // @10: both hit
        assert!((acc.total_reward[1] - 1.2).abs() < 1e-6);
        assert_eq!(acc.hit_purchases[1], 1.0);
        assert!((acc.ndcg_purchases[1] - ndcg_gain(8)).abs() < 1e-12);

        let report = acc.report();
        assert_eq!(report.cutoffs[0].hr_click, 0.5);
        assert_eq!(report.cutoffs[0].ndcg_click, 0.5);
        assert_eq!(report.cutoffs[1].hr_purchase, 1.0);
    }

    #[test]
    fn test_empty_side_reports_zero() {
        let ranking: Vec<u32> = (0..MAX_K as u32).collect();
        let mut acc = HitAccumulator::new();
        acc.record(&ranking, 2, false, 0.2);

        let report = acc.report();
        for cutoff in &report.cutoffs {
            assert_eq!(cutoff.hr_purchase, 0.0);
            assert_eq!(cutoff.ndcg_purchase, 0.0);
            assert_eq!(cutoff.hr_click, 1.0);
        }
    }

    #[test]
    fn test_merge() {
        let ranking: Vec<u32> = (0..MAX_K as u32).collect();

        let mut a = HitAccumulator::new();
        a.record(&ranking, 1, false, 0.2);
        let mut b = HitAccumulator::new();
        b.record(&ranking, 2, true, 1.0);

        let mut all = HitAccumulator::new();
        all.record(&ranking, 1, false, 0.2);
        all.record(&ranking, 2, true, 1.0);

        a.merge(&b);
        assert_eq!(a, all);
    }
}
