//! Tensor allocation accounting
//!
//! Every tensor created on behalf of a classification call is wrapped in a
//! [`TrackedTensor`]. The wrapper registers itself with the engine's
//! [`MemoryLedger`] on creation and deregisters on drop, so the ledger reads
//! zero once a call has returned, whichever way it returned.

use candle_core::Tensor;
use serde::Serialize;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Live tensor counts for one engine instance
#[derive(Debug, Default)]
pub struct MemoryLedger {
    num_tensors: AtomicUsize,
    num_bytes: AtomicUsize,
    peak_tensors: AtomicUsize,
}

/// Snapshot of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub num_tensors: usize,
    pub num_bytes: usize,
    pub peak_tensors: usize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, bytes: usize) {
        let live = self.num_tensors.fetch_add(1, Ordering::SeqCst) + 1;
        self.num_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.peak_tensors.fetch_max(live, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        self.num_tensors.fetch_sub(1, Ordering::SeqCst);
        self.num_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }

    /// Current snapshot
    pub fn snapshot(&self) -> MemoryInfo {
        MemoryInfo {
            num_tensors: self.num_tensors.load(Ordering::SeqCst),
            num_bytes: self.num_bytes.load(Ordering::SeqCst),
            peak_tensors: self.peak_tensors.load(Ordering::SeqCst),
        }
    }
}

/// A tensor counted by a [`MemoryLedger`] for as long as it lives
#[derive(Debug)]
pub struct TrackedTensor {
    tensor: Tensor,
    bytes: usize,
    ledger: Arc<MemoryLedger>,
}

impl TrackedTensor {
    pub(crate) fn new(tensor: Tensor, ledger: Arc<MemoryLedger>) -> Self {
        let bytes = tensor.elem_count() * tensor.dtype().size_in_bytes();
        ledger.register(bytes);
        Self {
            tensor,
            bytes,
            ledger,
        }
    }

    /// Borrow the underlying tensor
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Release the tensor now instead of at end of scope
    pub fn dispose(self) {
        drop(self);
    }
}

impl Deref for TrackedTensor {
    type Target = Tensor;

    fn deref(&self) -> &Tensor {
        &self.tensor
    }
}

impl Drop for TrackedTensor {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
    }
}
