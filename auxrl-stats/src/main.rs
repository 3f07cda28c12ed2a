use anyhow::Result;
use auxrl_stats::aggregate;
use clap::Parser;
use log::info;
use std::{fs, path::PathBuf};

/// Summarize a column of `progress.csv` over runs as mean and confidence interval
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Parent directory of the runs
    #[arg(short = 'd', long)]
    maindir: PathBuf,

    /// Keyword selecting runs by directory name, can be repeated
    #[arg(short, long = "keyword", required = true)]
    keywords: Vec<String>,

    /// Column to summarize
    #[arg(short = 'n', long, default_value = "rollout/return_history")]
    data_name: String,

    /// Confidence level of the interval
    #[arg(short, long, default_value_t = 0.68)]
    confidence: f64,

    /// Directory where `<keyword>.csv` files are written
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    fs::create_dir_all(&args.output)?;

    for keyword in args.keywords.iter() {
        info!("keyword: {}", keyword);
        let curve = aggregate(&args.maindir, keyword, &args.data_name, args.confidence)?;
        let path = args.output.join(format!("{}.csv", keyword.replace('/', "_")));
        curve.write_csv(&path)?;
        info!("wrote {} rows to {}", curve.steps.len(), path.display());
    }
    Ok(())
}
