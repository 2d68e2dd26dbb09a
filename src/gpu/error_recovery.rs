//! GPU device loss tracking
//!
//! Watches the wgpu uncaptured-error hook and latches a lost flag, so the
//! lattice system can tear down its buffers before the next frame uses them.

use crate::error::{DeformError, DeformResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Consecutive validation errors tolerated before the device is treated as lost
const MAX_VALIDATION_ERRORS: u32 = 10;

/// Shared loss state for one wgpu device
#[derive(Clone)]
pub struct DeviceLossMonitor {
    lost: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl DeviceLossMonitor {
    /// Install the monitor on a device's uncaptured-error hook
    pub fn install(device: &wgpu::Device) -> Self {
        let monitor = Self::detached();
        let lost = monitor.lost.clone();
        let error_count = monitor.error_count.clone();

        device.on_uncaptured_error(Box::new(move |error| match error {
            wgpu::Error::OutOfMemory { .. } => {
                log::error!("[Device Loss] GPU out of memory, marking device lost");
                lost.store(true, Ordering::Release);
            }
            wgpu::Error::Validation { description, .. } => {
                let count = error_count.fetch_add(1, Ordering::Relaxed) + 1;
                log::error!("[Device Loss] GPU validation error: {}", description);
                if count > MAX_VALIDATION_ERRORS {
                    log::error!(
                        "[Device Loss] Too many GPU errors ({}), marking device lost",
                        count
                    );
                    lost.store(true, Ordering::Release);
                }
            }
        }));

        monitor
    }

    /// A monitor not attached to any device
    pub fn detached() -> Self {
        Self {
            lost: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn is_device_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
    }

    /// A submission went through; forget earlier validation errors
    pub fn record_success(&self) {
        self.error_count.store(0, Ordering::Relaxed);
    }

    pub fn ensure_alive(&self) -> DeformResult<()> {
        if self.is_device_lost() {
            Err(DeformError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

/// Extension trait for Result types to add GPU error context
pub trait GpuResultExt<T> {
    fn gpu_context(self, operation: &str) -> DeformResult<T>;
}

impl<T, E: std::fmt::Display> GpuResultExt<T> for Result<T, E> {
    fn gpu_context(self, operation: &str) -> DeformResult<T> {
        self.map_err(|e| DeformError::GpuOperationFailed {
            operation: operation.to_string(),
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_latches_loss() {
        let monitor = DeviceLossMonitor::detached();
        assert!(monitor.ensure_alive().is_ok());

        let shared = monitor.clone();
        shared.mark_lost();
        assert!(monitor.is_device_lost());
        assert!(matches!(monitor.ensure_alive(), Err(DeformError::DeviceLost)));
    }

    #[test]
    fn test_gpu_context_wraps_errors() {
        let failed: Result<(), String> = Err("timeout".to_string());
        let err = failed.gpu_context("readback").expect_err("must fail");
        assert_eq!(err.to_string(), "GPU operation 'readback' failed: timeout");
    }
}
