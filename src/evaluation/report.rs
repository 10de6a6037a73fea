/// Evaluation reports and CSV training logs
use std::path::{Path, PathBuf};

use super::metrics::TOPK;

/// Metrics at one cutoff
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CutoffMetrics {
    pub k: usize,
    /// Summed reward of the hit events
    pub reward: f64,
    pub hr_click: f64,
    pub ndcg_click: f64,
    pub hr_purchase: f64,
    pub ndcg_purchase: f64,
}

/// Result of one evaluation pass, one entry per cutoff in `TOPK`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvalReport {
    pub cutoffs: Vec<CutoffMetrics>,
}

impl EvalReport {
    /// Column names in row order: `rew@k, hr_c@k, ng_c@k, hr_p@k, ng_p@k` per cutoff
    pub fn column_names() -> Vec<String> {
        TOPK.iter()
            .flat_map(|k| {
                ["rew", "hr_c", "ng_c", "hr_p", "ng_p"]
                    .into_iter()
                    .map(move |name| format!("{}@{}", name, k))
            })
            .collect()
    }

    /// Flattened values, aligned with `column_names`
    pub fn row(&self) -> Vec<f64> {
        self.cutoffs
            .iter()
            .flat_map(|c| [c.reward, c.hr_click, c.ndcg_click, c.hr_purchase, c.ndcg_purchase])
            .collect()
    }

    /// Sum of all row values below 1
    ///
    /// Rewards are usually above 1 and drop out, so the score mostly
    /// aggregates the hit rates and NDCGs.
    pub fn total_score(&self) -> f64 {
        self.row().into_iter().filter(|&v| v < 1.0).sum()
    }

    /// Log one line per cutoff
    pub fn log_summary(&self) {
        for c in &self.cutoffs {
            log::info!("reward @{}: {:.6}", c.k, c.reward);
            log::info!("  clicks    hr/ndcg @{}: {:.6}, {:.6}", c.k, c.hr_click, c.ndcg_click);
            log::info!("  purchases hr/ndcg @{}: {:.6}, {:.6}", c.k, c.hr_purchase, c.ndcg_purchase);
        }
    }
}

/// Evaluation history written as `<log_dir>/<run_name>.csv`
#[derive(Debug, Clone)]
pub struct MetricsLog {
    path: PathBuf,
    rows: Vec<Vec<f64>>,
    total_scores: Vec<f64>,
}

impl MetricsLog {
    pub fn new<P: AsRef<Path>>(log_dir: P, run_name: &str) -> Self {
        Self {
            path: log_dir.as_ref().join(format!("{}.csv", run_name)),
            rows: Vec::new(),
            total_scores: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a report and return its total score
    pub fn push(&mut self, report: &EvalReport) -> f64 {
        let score = report.total_score();
        self.rows.push(report.row());
        self.total_scores.push(score);
        score
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total scores of every pushed report, rounded to 3 decimals
    pub fn total_scores(&self) -> Vec<f64> {
        self.total_scores
            .iter()
            .map(|s| (s * 1000.0).round() / 1000.0)
            .collect()
    }

    /// Write an index column followed by the 20 metric columns
    pub fn write_csv(&self) -> crate::Result<()> {
        create_parent(&self.path)?;
        let mut writer = csv::Writer::from_path(&self.path)?;

        let mut header = vec![String::new()];
        header.extend(EvalReport::column_names());
        writer.write_record(&header)?;

        for (i, row) in self.rows.iter().enumerate() {
            let mut record = vec![i.to_string()];
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        log::info!("Wrote {} evaluation rows to {}", self.rows.len(), self.path.display());
        Ok(())
    }
}

/// A logged scalar series, e.g. the mean Q-value every `log_every` steps
#[derive(Debug, Clone)]
pub struct ScalarSeries {
    path: PathBuf,
    values: Vec<f64>,
}

impl ScalarSeries {
    /// Series written as `<log_dir>/<prefix>_<run_name>.csv`
    pub fn new<P: AsRef<Path>>(log_dir: P, prefix: &str, run_name: &str) -> Self {
        Self {
            path: log_dir.as_ref().join(format!("{}_{}.csv", prefix, run_name)),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_csv(&self) -> crate::Result<()> {
        create_parent(&self.path)?;
        let mut writer = csv::Writer::from_path(&self.path)?;

        writer.write_record(["", "0"])?;
        for (i, value) in self.values.iter().enumerate() {
            writer.write_record([i.to_string(), value.to_string()])?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn create_parent(path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
