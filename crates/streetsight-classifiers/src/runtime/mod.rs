//! Tensor engine bootstrap
//!
//! [`EngineLoader`] brings the candle engine up once per process. Callers
//! supply a [`HostAdapter`]; the loader checks that every symbol the engine
//! needs is present, selects the execution device, and waits for a readiness
//! probe to pass before handing out a [`RuntimeHandle`].

pub mod host;
pub mod memory;

pub use host::{Capability, Clock, HostAdapter, MonotonicClock};
pub use memory::{MemoryInfo, MemoryLedger, TrackedTensor};

use crate::config::{DeviceSpec, EngineConfig};
use candle_core::{DType, Device, Tensor};
use host::Element;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streetsight_core::{Error, Result};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Host symbols the engine cannot start without
pub const REQUIRED_CAPABILITIES: &[Capability] = &Capability::ALL;

const ENGINE_NAME: &str = "candle";

/// Static description of the running engine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub engine: String,
    pub backend: String,
    pub device: String,
    pub platform: String,
    pub user_agent: String,
    pub hardware_concurrency: usize,
    pub version: String,
}

/// Cheap, cloneable handle to a ready engine
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    device: Device,
    host: HostAdapter,
    ledger: Arc<MemoryLedger>,
    info: EngineInfo,
}

impl RuntimeHandle {
    fn new(device: Device, host: HostAdapter, info: EngineInfo) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                device,
                host,
                ledger: Arc::new(MemoryLedger::new()),
                info,
            }),
        }
    }

    /// Device tensors are created on
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Host adapter the engine was started with
    pub fn host(&self) -> &HostAdapter {
        &self.inner.host
    }

    pub fn info(&self) -> &EngineInfo {
        &self.inner.info
    }

    /// Register a tensor with the memory ledger
    pub fn track(&self, tensor: Tensor) -> TrackedTensor {
        TrackedTensor::new(tensor, Arc::clone(&self.inner.ledger))
    }

    /// Live tensor accounting
    pub fn memory(&self) -> MemoryInfo {
        self.inner.ledger.snapshot()
    }

    /// Milliseconds from the host clock
    pub fn now_ms(&self) -> f64 {
        self.inner
            .host
            .clock()
            .map(|clock| clock.now_ms())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("info", &self.inner.info)
            .field("memory", &self.memory())
            .finish()
    }
}

/// Loads the engine at most once; concurrent callers share the in-flight load
#[derive(Default)]
pub struct EngineLoader {
    handle: OnceCell<RuntimeHandle>,
    load_attempts: AtomicUsize,
}

impl EngineLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the engine, loading it first if needed.
    ///
    /// A failed load leaves the loader empty so a later call can try again.
    pub async fn initialize(&self, host: &HostAdapter, config: &EngineConfig) -> Result<RuntimeHandle> {
        self.handle
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::SeqCst);
                load_engine(host.clone(), config).await
            })
            .await
            .cloned()
    }

    /// The engine, if it finished loading
    pub fn get(&self) -> Option<&RuntimeHandle> {
        self.handle.get()
    }

    /// Number of loads actually started
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    /// Drop the loaded engine so the next `initialize` loads it again
    pub fn reset(&mut self) -> Option<RuntimeHandle> {
        self.handle.take()
    }
}

async fn load_engine(host: HostAdapter, config: &EngineConfig) -> Result<RuntimeHandle> {
    info!(backend = config.device.backend_name(), "Loading tensor engine");

    let missing = host.missing(REQUIRED_CAPABILITIES);
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(|cap| cap.to_string()).collect();
        return Err(Error::engine(format!(
            "host adapter is missing required symbols: {}",
            names.join(", ")
        )));
    }

    let host = host.with_frame_interval(Duration::from_millis(config.frame_interval_ms));
    let device = create_device(&config.device)?;

    let navigator = host
        .navigator()
        .cloned()
        .ok_or_else(|| Error::engine("navigator unavailable"))?;
    let info = EngineInfo {
        engine: ENGINE_NAME.to_string(),
        backend: config.device.backend_name().to_string(),
        device: config.device.label(),
        platform: navigator.platform,
        user_agent: navigator.user_agent,
        hardware_concurrency: navigator.hardware_concurrency,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let handle = RuntimeHandle::new(device, host, info);
    wait_ready(&handle, config.ready_attempts).await?;

    info!(
        engine = %handle.info().engine,
        backend = %handle.info().backend,
        threads = handle.info().hardware_concurrency,
        "Tensor engine ready"
    );
    Ok(handle)
}

fn create_device(spec: &DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Cpu => Ok(Device::Cpu),
        DeviceSpec::Cuda { index } => Device::new_cuda(index.unwrap_or(0))
            .map_err(|e| Error::engine(format!("Failed to create CUDA device: {}", e))),
        DeviceSpec::Metal { index } => Device::new_metal(index.unwrap_or(0))
            .map_err(|e| Error::engine(format!("Failed to create Metal device: {}", e))),
    }
}

async fn wait_ready(handle: &RuntimeHandle, attempts: u32) -> Result<()> {
    let mut last_error = None;

    for attempt in 1..=attempts.max(1) {
        match readiness_probe(handle).await {
            Ok(()) => {
                debug!(attempt, "Readiness probe passed");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "Readiness probe failed");
                last_error = Some(e);
                if let Some(frames) = handle.host().frames() {
                    frames.next_frame().await;
                }
            }
        }
    }

    Err(Error::engine(format!(
        "backend not ready after {} attempts: {}",
        attempts,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}

/// Draw an image element onto a 1x1 canvas, read it back and reduce it on
/// the device. Exercises every host symbol plus a real tensor round trip.
async fn readiness_probe(handle: &RuntimeHandle) -> Result<()> {
    let document = handle
        .host()
        .document()
        .ok_or_else(|| Error::engine("document unavailable"))?;

    let mut image = match document.create_element("img") {
        Element::Image(image) => image,
        _ => return Err(Error::engine("document cannot create image elements")),
    };
    image.load("data:,").await;
    if !image.is_complete() {
        return Err(Error::engine("image element never finished loading"));
    }

    let canvas = match document.create_element("canvas") {
        Element::Canvas(canvas) => canvas,
        _ => return Err(Error::engine("document cannot create canvas elements")),
    };
    let mut ctx = canvas
        .get_context("2d")
        .ok_or_else(|| Error::engine("canvas has no 2d context"))?;
    ctx.draw_image(&image, 0, 0);
    let pixels = ctx.get_image_data(0, 0, 1, 1);
    ctx.put_image_data(&pixels, 0, 0);

    let probe = Tensor::from_vec(pixels.data, (1, 1, 4), handle.device())
        .and_then(|t| t.to_dtype(DType::F32))
        .map(|t| handle.track(t))
        .map_err(|e| Error::engine(format!("probe tensor creation failed: {}", e)))?;
    let total = probe
        .sum_all()
        .and_then(|t| t.to_scalar::<f32>())
        .map_err(|e| Error::engine(format!("probe reduction failed: {}", e)))?;

    if probe.elem_count() != 4 || total != 0.0 {
        return Err(Error::engine(format!(
            "probe readback mismatch: {} elements summing to {}",
            probe.elem_count(),
            total
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_engine_loads_on_cpu() {
        let loader = EngineLoader::new();
        let handle = loader
            .initialize(&HostAdapter::headless(), &EngineConfig::default())
            .await
            .unwrap();

        assert_eq!(handle.info().engine, "candle");
        assert_eq!(handle.info().backend, "cpu");
        assert_eq!(handle.info().device, "cpu");
        assert!(handle.info().hardware_concurrency >= 1);
        assert_eq!(handle.memory().num_tensors, 0);
        assert!(loader.get().is_some());
    }

    #[tokio::test]
    async fn test_engine_is_loaded_once() {
        let loader = EngineLoader::new();
        let host = HostAdapter::headless();
        let config = EngineConfig::default();

        loader.initialize(&host, &config).await.unwrap();
        loader.initialize(&host, &config).await.unwrap();

        assert_eq!(loader.load_attempts(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialization_shares_one_load() {
        let loader = Arc::new(EngineLoader::new());
        let host = HostAdapter::headless();
        let config = EngineConfig::default();

        let calls = (0..8).map(|_| loader.initialize(&host, &config));
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(loader.load_attempts(), 1);
    }

    #[tokio::test]
    async fn test_missing_capability_is_engine_unavailable() {
        let loader = EngineLoader::new();
        let host = HostAdapter::headless().without(Capability::Canvas);

        let err = loader
            .initialize(&host, &EngineConfig::default())
            .await
            .unwrap_err();

        match err {
            Error::EngineUnavailable(msg) => assert!(msg.contains("HTMLCanvasElement")),
            other => panic!("expected EngineUnavailable, got {:?}", other),
        }
        assert!(loader.get().is_none());
    }

    #[tokio::test]
    async fn test_failed_load_can_be_retried() {
        let loader = EngineLoader::new();
        let config = EngineConfig::default();

        let broken = HostAdapter::headless().without(Capability::AnimationFrame);
        assert!(loader.initialize(&broken, &config).await.is_err());

        let handle = loader.initialize(&HostAdapter::headless(), &config).await;
        assert!(handle.is_ok());
        assert_eq!(loader.load_attempts(), 2);
    }

    #[tokio::test]
    async fn test_tracked_tensor_released_on_drop() {
        let loader = EngineLoader::new();
        let handle = loader
            .initialize(&HostAdapter::headless(), &EngineConfig::default())
            .await
            .unwrap();

        {
            let t = handle.track(Tensor::ones((2, 2), DType::F32, handle.device()).unwrap());
            assert_eq!(t.elem_count(), 4);
            assert_eq!(handle.memory().num_tensors, 1);
        }
        assert_eq!(handle.memory().num_tensors, 0);
    }
}
