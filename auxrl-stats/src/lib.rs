//! Aggregation of training progress over runs.
//!
//! Each run is a directory holding a `progress.csv` with a `total/steps` column.
//! Runs are selected by a keyword in their directory name, and a column is
//! summarized per row as a mean with a Student-t confidence interval.
pub mod error;
mod interval;
mod runs;
pub use interval::{
    mean_confidence_interval, regularized_incomplete_beta, student_t_cdf, student_t_quantile,
    ConfidenceInterval,
};
pub use runs::{collect_runs, read_progress, Run, PROGRESS_FILE, STEPS_COLUMN};

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

/// A summarized column of the runs matching a keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    /// Steps, taken from the first run.
    pub steps: Vec<f64>,

    /// Mean and interval at each step.
    pub interval: ConfidenceInterval,
}

#[derive(Serialize)]
struct Row {
    steps: f64,
    mean: f64,
    lower: f64,
    upper: f64,
}

/// Collects the runs matching `keyword` and summarizes column `data_name`.
pub fn aggregate(
    main_dir: impl AsRef<Path>,
    keyword: &str,
    data_name: &str,
    confidence: f64,
) -> Result<Curve> {
    let runs = collect_runs(main_dir, keyword, data_name)?;
    let values = runs.iter().map(|r| r.values.clone()).collect::<Vec<_>>();
    let interval = mean_confidence_interval(&values, confidence)?;
    let steps = runs
        .first()
        .map(|r| r.steps.iter().take(interval.len()).copied().collect())
        .unwrap_or_default();
    Ok(Curve { steps, interval })
}

impl Curve {
    /// Writes `steps,mean,lower,upper` rows.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        for (i, &steps) in self.steps.iter().enumerate() {
            wtr.serialize(Row {
                steps,
                mean: self.interval.mean[i],
                lower: self.interval.lower[i],
                upper: self.interval.upper[i],
            })?;
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempdir::TempDir;

    #[test]
    fn test_aggregate_and_write() -> Result<()> {
        let dir = TempDir::new("aggregate")?;
        for (name, rows) in [
            ("caus_0", "1000,1.0\n2000,3.0\n3000,5.0\n"),
            ("caus_1", "1000,3.0\n2000,5.0\n"),
        ] {
            fs::create_dir(dir.path().join(name))?;
            fs::write(
                dir.path().join(name).join(PROGRESS_FILE),
                format!("total/steps,rollout/return_history\n{}", rows),
            )?;
        }

        let curve = aggregate(dir.path(), "caus", "rollout/return_history", 0.68)?;
        assert_eq!(curve.steps, vec![1000.0, 2000.0]);
        assert_eq!(curve.interval.mean, vec![2.0, 4.0]);

        let out = dir.path().join("caus.csv");
        curve.write_csv(&out)?;
        let text = fs::read_to_string(&out)?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("steps,mean,lower,upper"));
        assert_eq!(lines.count(), 2);
        Ok(())
    }
}
