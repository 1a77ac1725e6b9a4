use std::process::Command;
use std::sync::{Condvar, Mutex};

use tracing::debug;

use crate::error::{Result, TomoError};

/// Fixed pool of exclusive GPU tokens, one per accelerator.
///
/// `acquire` blocks the calling worker until a token is free; the returned
/// guard hands it back on drop, so a token is released on every path out
/// of an invocation, including failures. The number of tokens in
/// circulation never changes.
#[derive(Debug)]
pub struct GpuPool {
    free: Mutex<Vec<u32>>,
    available: Condvar,
    size: usize,
}

impl GpuPool {
    pub fn new(gpus: Vec<u32>) -> Result<Self> {
        if gpus.is_empty() {
            return Err(TomoError::NoGpus);
        }
        Ok(GpuPool {
            size: gpus.len(),
            free: Mutex::new(gpus),
            available: Condvar::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Tokens currently checked in; equals `len()` when the pool is idle.
    pub fn free_tokens(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Block until a token is available and take it.
    pub fn acquire(&self) -> GpuGuard<'_> {
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(id) = free.pop() {
                debug!(gpu = id, "acquired gpu");
                return GpuGuard {
                    pool: Some(self),
                    id,
                };
            }
            free = self
                .available
                .wait(free)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn release(&self, id: u32) {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(id);
        self.available.notify_one();
        debug!(gpu = id, "released gpu");
    }
}

/// Exclusive hold on one GPU token, returned to the pool on drop.
pub struct GpuGuard<'a> {
    pool: Option<&'a GpuPool>,
    id: u32,
}

impl GpuGuard<'_> {
    /// Fixed token used when no pool is configured (dry runs); never
    /// blocks, never releases anything.
    pub fn placeholder() -> GpuGuard<'static> {
        GpuGuard { pool: None, id: 0 }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for GpuGuard<'_> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool {
            pool.release(self.id);
        }
    }
}

/// Probe for visible NVIDIA GPUs. A missing or failing probe tool means
/// no GPUs were detected.
pub fn detect_gpus() -> Vec<u32> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=index", "--format=csv,noheader"])
        .output();
    let output = match output {
        Ok(out) if out.status.success() => out,
        _ => return Vec::new(),
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}
