//! Host capability adapter
//!
//! The tensor engine's bootstrap path expects a small browser-like surface:
//! a document that can create canvas and image elements, a navigator, an
//! animation-frame scheduler and a monotonic clock. [`HostAdapter`] bundles
//! headless stand-ins for exactly those symbols and is handed to
//! [`EngineLoader::initialize`](super::EngineLoader::initialize) explicitly.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Animation frame interval used by the headless scheduler (~60 Hz)
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// A host symbol the engine may depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Document,
    Canvas,
    ImageElement,
    Navigator,
    AnimationFrame,
    Clock,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Self::Document,
        Self::Canvas,
        Self::ImageElement,
        Self::Navigator,
        Self::AnimationFrame,
        Self::Clock,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Document => "document",
            Self::Canvas => "HTMLCanvasElement",
            Self::ImageElement => "HTMLImageElement",
            Self::Navigator => "navigator",
            Self::AnimationFrame => "requestAnimationFrame",
            Self::Clock => "performance.now",
        };
        f.write_str(name)
    }
}

/// Monotonic time source in milliseconds since an arbitrary origin
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> f64;
}

/// [`Clock`] backed by `std::time::Instant`
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Timer-based approximation of animation-frame scheduling
#[derive(Debug, Clone, Copy)]
pub struct FrameScheduler {
    interval: Duration,
}

impl FrameScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Wait for the next frame
    pub async fn next_frame(&self) {
        tokio::time::sleep(self.interval).await;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_INTERVAL)
    }
}

/// Navigator stub
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Navigator {
    pub user_agent: String,
    pub platform: String,
    pub hardware_concurrency: usize,
}

impl Navigator {
    pub fn headless() -> Self {
        Self {
            user_agent: format!("streetsight/{} (headless)", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_string(),
            hardware_concurrency: num_cpus::get(),
        }
    }
}

/// RGBA pixel buffer returned by [`Context2d::get_image_data`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }
}

/// Canvas stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The only supported context kind is `"2d"`
    pub fn get_context(&self, kind: &str) -> Option<Context2d> {
        (kind == "2d").then(Context2d::default)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(300, 150)
    }
}

/// 2D drawing context. Drawing is a no-op; readback yields zeroed buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context2d;

impl Context2d {
    pub fn draw_image(&mut self, _image: &ImageElement, _dx: i32, _dy: i32) {}

    pub fn get_image_data(&self, _sx: i32, _sy: i32, sw: u32, sh: u32) -> ImageData {
        ImageData::new(sw, sh)
    }

    pub fn put_image_data(&mut self, _data: &ImageData, _dx: i32, _dy: i32) {}
}

/// Image element stub. Loading completes on the next scheduler turn.
#[derive(Debug, Clone, Default)]
pub struct ImageElement {
    pub width: u32,
    pub height: u32,
    src: Option<String>,
    complete: bool,
}

impl ImageElement {
    /// Set the source and wait for the "loaded" notification
    pub async fn load(&mut self, src: impl Into<String>) {
        self.src = Some(src.into());
        self.complete = false;
        tokio::task::yield_now().await;
        self.complete = true;
    }

    pub fn src(&self) -> Option<&str> {
        self.src.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Element produced by [`Document::create_element`]
#[derive(Debug, Clone)]
pub enum Element {
    Canvas(Canvas),
    Image(ImageElement),
    Generic { tag: String },
}

/// Document stub
#[derive(Debug, Clone)]
pub struct Document {
    canvas: bool,
    images: bool,
}

impl Document {
    pub fn create_element(&self, tag: &str) -> Element {
        match tag.to_ascii_lowercase().as_str() {
            "canvas" if self.canvas => Element::Canvas(Canvas::default()),
            "img" if self.images => Element::Image(ImageElement::default()),
            other => Element::Generic {
                tag: other.to_string(),
            },
        }
    }

    pub fn ready_state(&self) -> &'static str {
        "complete"
    }
}

/// Explicit bundle of the host symbols the engine needs
#[derive(Clone)]
pub struct HostAdapter {
    document: Option<Document>,
    navigator: Option<Navigator>,
    frames: Option<FrameScheduler>,
    clock: Option<Arc<dyn Clock>>,
}

impl HostAdapter {
    /// Full headless adapter with every capability present
    pub fn headless() -> Self {
        Self {
            document: Some(Document {
                canvas: true,
                images: true,
            }),
            navigator: Some(Navigator::headless()),
            frames: Some(FrameScheduler::default()),
            clock: Some(Arc::new(MonotonicClock::new())),
        }
    }

    /// Replace the frame scheduler interval
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        if self.frames.is_some() {
            self.frames = Some(FrameScheduler::new(interval));
        }
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Remove a capability
    pub fn without(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Document => self.document = None,
            Capability::Canvas => {
                if let Some(doc) = self.document.as_mut() {
                    doc.canvas = false;
                }
            }
            Capability::ImageElement => {
                if let Some(doc) = self.document.as_mut() {
                    doc.images = false;
                }
            }
            Capability::Navigator => self.navigator = None,
            Capability::AnimationFrame => self.frames = None,
            Capability::Clock => self.clock = None,
        }
        self
    }

    pub fn provides(&self, capability: Capability) -> bool {
        match capability {
            Capability::Document => self.document.is_some(),
            Capability::Canvas => self.document.as_ref().is_some_and(|d| d.canvas),
            Capability::ImageElement => self.document.as_ref().is_some_and(|d| d.images),
            Capability::Navigator => self.navigator.is_some(),
            Capability::AnimationFrame => self.frames.is_some(),
            Capability::Clock => self.clock.is_some(),
        }
    }

    /// Capabilities from `required` this adapter lacks
    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        required
            .iter()
            .copied()
            .filter(|cap| !self.provides(*cap))
            .collect()
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn navigator(&self) -> Option<&Navigator> {
        self.navigator.as_ref()
    }

    pub fn frames(&self) -> Option<&FrameScheduler> {
        self.frames.as_ref()
    }

    pub fn clock(&self) -> Option<&Arc<dyn Clock>> {
        self.clock.as_ref()
    }
}

impl Default for HostAdapter {
    fn default() -> Self {
        Self::headless()
    }
}

impl fmt::Debug for HostAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<Capability> = Capability::ALL
            .iter()
            .copied()
            .filter(|cap| self.provides(*cap))
            .collect();
        f.debug_struct("HostAdapter")
            .field("capabilities", &present)
            .finish()
    }
}
