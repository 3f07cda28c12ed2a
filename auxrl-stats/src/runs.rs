//! Reading the progress files of runs.
use crate::error::StatsError;
use anyhow::{Context, Result};
use log::{info, warn};
use std::{fs, path::Path};

/// Name of the progress file in a run directory.
pub const PROGRESS_FILE: &str = "progress.csv";

/// Column holding the number of environment steps.
pub const STEPS_COLUMN: &str = "total/steps";

/// One column of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    /// Name of the run directory.
    pub name: String,

    /// Values of [`STEPS_COLUMN`].
    pub steps: Vec<f64>,

    /// Values of the selected column.
    pub values: Vec<f64>,
}

fn parse_cell(cell: &str) -> Result<f64> {
    match cell.trim() {
        "" => Ok(0.),
        s => Ok(s.parse::<f64>()?),
    }
}

/// Reads the steps column and column `data_name` of a progress file.
///
/// Empty cells read as 0.
pub fn read_progress(path: impl AsRef<Path>, data_name: &str) -> Result<(Vec<f64>, Vec<f64>)> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = rdr.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| StatsError::MissingColumn {
                path: path.display().to_string(),
                column: name.to_string(),
            })
    };
    let (i_steps, i_data) = (column(STEPS_COLUMN)?, column(data_name)?);

    let mut steps = vec![];
    let mut values = vec![];
    for (row, record) in rdr.records().enumerate() {
        let record = record?;
        let cell = |i: usize| {
            parse_cell(record.get(i).unwrap_or(""))
                .with_context(|| format!("{}, row {}", path.display(), row + 1))
        };
        steps.push(cell(i_steps)?);
        values.push(cell(i_data)?);
    }
    Ok((steps, values))
}

/// Reads every run under `main_dir` whose directory name contains `keyword`.
///
/// Runs are returned in the order of their names.
pub fn collect_runs(
    main_dir: impl AsRef<Path>,
    keyword: &str,
    data_name: &str,
) -> Result<Vec<Run>> {
    let main_dir = main_dir.as_ref();
    let mut names = vec![];
    for entry in fs::read_dir(main_dir)
        .with_context(|| format!("failed to read {}", main_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(keyword) {
            names.push(name);
        }
    }
    names.sort();

    let mut runs = vec![];
    for name in names {
        let (steps, values) = read_progress(main_dir.join(&name).join(PROGRESS_FILE), data_name)?;
        info!("{}: {} rows of {}", name, values.len(), data_name);
        runs.push(Run {
            name,
            steps,
            values,
        });
    }

    if runs.is_empty() {
        return Err(StatsError::NoRuns {
            keyword: keyword.to_string(),
            dir: main_dir.display().to_string(),
        }
        .into());
    }
    if runs.windows(2).any(|w| w[0].values.len() != w[1].values.len()) {
        warn!("runs matching {:?} differ in length", keyword);
    }
    Ok(runs)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    fn write_run(dir: &Path, name: &str, content: &str) -> Result<()> {
        fs::create_dir(dir.join(name))?;
        fs::write(dir.join(name).join(PROGRESS_FILE), content)?;
        Ok(())
    }

    #[test]
    fn test_collect_runs_by_keyword() -> Result<()> {
        let dir = TempDir::new("runs")?;
        write_run(
            dir.path(),
            "ddpg_caus_seed1",
            "rollout/return_history,total/steps,other\n1.5,1000,x\n,2000,y\n-2,3000,\n",
        )?;
        write_run(
            dir.path(),
            "ddpg_tc_seed1",
            "total/steps,rollout/return_history\n1000,9\n",
        )?;
        // Files are not runs even if the name matches.
        fs::write(dir.path().join("caus_notes.txt"), "")?;

        let runs = collect_runs(dir.path(), "caus", "rollout/return_history")?;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].name, "ddpg_caus_seed1");
        assert_eq!(runs[0].steps, vec![1000., 2000., 3000.]);
        assert_eq!(runs[0].values, vec![1.5, 0., -2.]);

        assert_eq!(collect_runs(dir.path(), "ddpg", "rollout/return_history")?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_missing_column_and_no_runs() -> Result<()> {
        let dir = TempDir::new("runs")?;
        write_run(dir.path(), "run_prop", "total/steps,loss\n1,0.5\n")?;

        let err = collect_runs(dir.path(), "prop", "rollout/return_history").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::MissingColumn { .. })
        ));

        let err = collect_runs(dir.path(), "repeat", "loss").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StatsError>(),
            Some(StatsError::NoRuns { .. })
        ));
        Ok(())
    }
}
