//! Running mean and standard deviation shared across workers.
use crate::{comm::Communicator, error::CoreError};
use anyhow::Result;
use std::sync::Arc;

const EPSILON: f64 = 1e-2;

/// Running mean and standard deviation of vectors of a fixed dimension.
///
/// Batch sums are all-reduced before they are accumulated, so every worker
/// ends up with the same statistics. `count` and `sumsq` start at `1e-2`,
/// which makes the initial standard deviation 1. Accumulators are kept in
/// `f64` so that long runs do not lose the variance.
pub struct RunningMeanStd {
    dim: usize,
    sum: Vec<f64>,
    sumsq: Vec<f64>,
    count: f64,
    comm: Arc<dyn Communicator>,
}

impl RunningMeanStd {
    /// Creates statistics over vectors of dimension `dim`.
    pub fn new(dim: usize, comm: Arc<dyn Communicator>) -> Self {
        Self {
            dim,
            sum: vec![0.; dim],
            sumsq: vec![EPSILON; dim],
            count: EPSILON,
            comm,
        }
    }

    /// Dimension of the tracked vectors.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Updates the statistics with a row-major batch of vectors.
    pub fn update(&mut self, x: &[f32]) -> Result<()> {
        if x.len() % self.dim != 0 {
            return Err(CoreError::DimensionMismatch {
                what: "running mean/std batch".to_string(),
                expected: self.dim,
                actual: x.len(),
            }
            .into());
        }

        // [sum, sumsq, count] in one collective call.
        let d = self.dim;
        let mut partial = vec![0f64; 2 * d + 1];
        for row in x.chunks(d) {
            for (j, &v) in row.iter().enumerate() {
                let v = v as f64;
                partial[j] += v;
                partial[d + j] += v * v;
            }
        }
        partial[2 * d] = (x.len() / d) as f64;
        let mut buf = partial.iter().map(|&v| v as f32).collect::<Vec<_>>();
        self.comm.allreduce_sum(&mut buf)?;

        self.sum
            .iter_mut()
            .zip(&buf[..d])
            .for_each(|(s, &v)| *s += v as f64);
        self.sumsq
            .iter_mut()
            .zip(&buf[d..2 * d])
            .for_each(|(s, &v)| *s += v as f64);
        self.count += buf[2 * d] as f64;
        Ok(())
    }

    /// Current mean.
    pub fn mean(&self) -> Vec<f32> {
        self.sum.iter().map(|s| (s / self.count) as f32).collect()
    }

    /// Current standard deviation.
    pub fn std(&self) -> Vec<f32> {
        self.sum
            .iter()
            .zip(self.sumsq.iter())
            .map(|(s, sq)| {
                let m = s / self.count;
                (sq / self.count - m * m).max(EPSILON).sqrt() as f32
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::{LocalComm, ThreadGroupComm};
    use std::thread;

    #[test]
    fn test_initial_statistics() {
        let rms = RunningMeanStd::new(2, Arc::new(LocalComm));
        assert_eq!(rms.mean(), vec![0.0, 0.0]);
        assert_eq!(rms.std(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_update() -> Result<()> {
        let mut rms = RunningMeanStd::new(1, Arc::new(LocalComm));
        rms.update(&[2.0; 1000])?;
        assert!((rms.mean()[0] - 2.0).abs() < 1e-3);
        // Variance collapses to the floor.
        assert!((rms.std()[0] - 0.1).abs() < 1e-2);
        assert!(rms.update(&[1.0, 2.0, 3.0]).is_ok());

        let mut rms = RunningMeanStd::new(2, Arc::new(LocalComm));
        assert!(rms.update(&[1.0, 2.0, 3.0]).is_err());
        Ok(())
    }

    #[test]
    fn test_long_run_keeps_variance() -> Result<()> {
        let mut rms = RunningMeanStd::new(1, Arc::new(LocalComm));
        for k in 0..2_000_000 {
            rms.update(&[if k % 2 == 0 { 10.0 } else { 12.0 }])?;
        }
        assert!((rms.mean()[0] - 11.0).abs() < 1e-3);
        assert!((rms.std()[0] - 1.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_workers_agree() {
        let handles = ThreadGroupComm::group(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || -> Result<(Vec<f32>, Vec<f32>)> {
                    let x = if comm.rank() == 0 { -3.0 } else { 3.0 };
                    let mut rms = RunningMeanStd::new(1, Arc::new(comm));
                    rms.update(&[x; 100])?;
                    Ok((rms.mean(), rms.std()))
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            let (mean, std) = h.join().unwrap().unwrap();
            assert!(mean[0].abs() < 1e-4);
            assert!((std[0] - 3.0).abs() < 1e-2);
        }
    }
}
