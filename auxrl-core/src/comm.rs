//! Collective communication between synchronized workers.
//!
//! Every worker holds a full copy of the parameters. Gradients and running
//! statistics are combined with [`Communicator::allreduce_sum`], and initial
//! parameters are distributed with [`Communicator::broadcast`]. All calls are
//! blocking and must be issued in the same order by every worker.
use crate::error::CoreError;
use anyhow::Result;
use std::sync::{Arc, Barrier, Mutex};

/// A synchronous collective-communication group.
pub trait Communicator: Send + Sync {
    /// Index of this worker in the group.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Replaces `data` with its element-wise sum over all workers.
    fn allreduce_sum(&self, data: &mut [f32]) -> Result<()>;

    /// Replaces `data` with the values held by worker `root`.
    fn broadcast(&self, data: &mut [f32], root: usize) -> Result<()>;

    /// Replaces `data` with its element-wise mean over all workers.
    fn allreduce_mean(&self, data: &mut [f32]) -> Result<()> {
        self.allreduce_sum(data)?;
        let n = self.size() as f32;
        data.iter_mut().for_each(|x| *x /= n);
        Ok(())
    }
}

/// Single-worker group. Every collective is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalComm;

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn allreduce_sum(&self, _data: &mut [f32]) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, _data: &mut [f32], _root: usize) -> Result<()> {
        Ok(())
    }
}

struct Shared {
    barrier: Barrier,
    buf: Mutex<Vec<f32>>,
}

/// In-process group of workers running on separate threads.
///
/// Each handle returned by [`ThreadGroupComm::group`] is moved into one
/// thread. The handles meet at a shared barrier on every collective call.
pub struct ThreadGroupComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadGroupComm {
    /// Creates the handles of a group of `size` workers, ordered by rank.
    pub fn group(size: usize) -> Vec<Self> {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            buf: Mutex::new(vec![]),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                shared: shared.clone(),
            })
            .collect()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<f32>>> {
        self.shared
            .buf
            .lock()
            .map_err(|_| CoreError::CommError("poisoned shared buffer".to_string()).into())
    }

    fn mismatch(expected: usize, actual: usize) -> anyhow::Error {
        CoreError::CommError(format!(
            "buffer length mismatch between workers: {} vs {}",
            expected, actual
        ))
        .into()
    }
}

impl Communicator for ThreadGroupComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn allreduce_sum(&self, data: &mut [f32]) -> Result<()> {
        // Every worker has finished reading the previous result once it gets here.
        if self.shared.barrier.wait().is_leader() {
            *self.lock()? = vec![0.; data.len()];
        }
        self.shared.barrier.wait();

        let mut err = None;
        {
            let mut buf = self.lock()?;
            if buf.len() == data.len() {
                buf.iter_mut().zip(data.iter()).for_each(|(b, x)| *b += x);
            } else {
                err = Some(Self::mismatch(buf.len(), data.len()));
            }
        }
        self.shared.barrier.wait();

        if let Some(err) = err {
            return Err(err);
        }
        let buf = self.lock()?;
        data.copy_from_slice(&buf);
        Ok(())
    }

    fn broadcast(&self, data: &mut [f32], root: usize) -> Result<()> {
        self.shared.barrier.wait();
        if self.rank == root {
            *self.lock()? = data.to_vec();
        }
        self.shared.barrier.wait();

        if self.rank != root {
            let buf = self.lock()?;
            if buf.len() != data.len() {
                return Err(Self::mismatch(buf.len(), data.len()));
            }
            data.copy_from_slice(&buf);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_local_comm_is_identity() -> Result<()> {
        let comm = LocalComm;
        let mut x = vec![1.0, 2.0];
        comm.allreduce_mean(&mut x)?;
        comm.broadcast(&mut x, 0)?;
        assert_eq!(x, vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_thread_group_allreduce_and_broadcast() {
        let handles = ThreadGroupComm::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || -> Result<(Vec<f32>, Vec<f32>, Vec<f32>)> {
                    let r = comm.rank() as f32;

                    let mut sum = vec![r, 1.0];
                    comm.allreduce_sum(&mut sum)?;

                    // Run a second collective right away to exercise buffer reuse.
                    let mut mean = vec![r * 2.0];
                    comm.allreduce_mean(&mut mean)?;

                    let mut b = vec![r, r];
                    comm.broadcast(&mut b, 2)?;
                    Ok((sum, mean, b))
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            let (sum, mean, b) = h.join().unwrap().unwrap();
            assert_eq!(sum, vec![3.0, 3.0]);
            assert_eq!(mean, vec![2.0]);
            assert_eq!(b, vec![2.0, 2.0]);
        }
    }
}
