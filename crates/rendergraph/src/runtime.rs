//! Frame-loop bookkeeping shared by renderers: lifecycle status, visibility
//! gating, frame clocks, FPS limiting and statistics.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle state of a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RendererStatus {
    Created,
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
    DeviceLost,
    Destroyed,
}

impl RendererStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RendererStatus::Created => "created",
            RendererStatus::Initializing => "initializing",
            RendererStatus::Ready => "ready",
            RendererStatus::Running => "running",
            RendererStatus::Paused => "paused",
            RendererStatus::Error => "error",
            RendererStatus::DeviceLost => "device-lost",
            RendererStatus::Destroyed => "destroyed",
        }
    }

    /// States that own live GPU objects.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            RendererStatus::Ready | RendererStatus::Running | RendererStatus::Paused
        )
    }
}

impl fmt::Display for RendererStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host capability answering "may this renderer draw this tick".
pub trait VisibilityProvider: Send {
    fn is_visible(&self) -> bool;

    /// Called once the renderer has finished initializing.
    fn connect(&mut self) {}

    /// Called on destroy; the provider must stop reporting to the renderer.
    fn disconnect(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysVisible;

impl VisibilityProvider for AlwaysVisible {
    fn is_visible(&self) -> bool {
        true
    }
}

pub const DEFAULT_VISIBILITY_THRESHOLD: f32 = 0.1;

/// Visibility driven by a viewport intersection ratio the host writes through
/// a [`VisibilityHandle`].
#[derive(Debug)]
pub struct ViewportVisibility {
    ratio: Arc<AtomicU32>,
    threshold: f32,
    connected: bool,
}

/// Writer side of a [`ViewportVisibility`]; cheap to clone into host callbacks.
#[derive(Debug, Clone)]
pub struct VisibilityHandle {
    ratio: Arc<AtomicU32>,
}

impl VisibilityHandle {
    pub fn set_ratio(&self, ratio: f32) {
        self.ratio
            .store(ratio.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn ratio(&self) -> f32 {
        f32::from_bits(self.ratio.load(Ordering::Relaxed))
    }
}

impl ViewportVisibility {
    /// Starts fully visible.
    pub fn new(threshold: f32) -> (Self, VisibilityHandle) {
        let ratio = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let provider = Self {
            ratio: Arc::clone(&ratio),
            threshold: threshold.clamp(0.0, 1.0),
            connected: false,
        };
        (provider, VisibilityHandle { ratio })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl VisibilityProvider for ViewportVisibility {
    fn is_visible(&self) -> bool {
        self.connected && f32::from_bits(self.ratio.load(Ordering::Relaxed)) >= self.threshold
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Time values handed to the `time` uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Seconds since the clock started.
    pub seconds: f32,
    /// Seconds since the previous sample.
    pub delta: f32,
    pub frame_index: u64,
}

/// Monotonic clock started on the first sample.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    origin: Option<Instant>,
    last: Option<Instant>,
    frame: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn sample(&mut self, now: Instant) -> TimeSample {
        let origin = *self.origin.get_or_insert(now);
        let delta = self
            .last
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last = Some(now);
        let sample = TimeSample {
            seconds: now.saturating_duration_since(origin).as_secs_f32(),
            delta,
            frame_index: self.frame,
        };
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

pub fn normalize_fps(value: Option<f32>) -> Option<f32> {
    value.and_then(|fps| if fps > 0.0 { Some(fps) } else { None })
}

/// Whole-nanosecond frame interval for `target_fps`; `None` when uncapped.
/// The float-to-int cast saturates, so vanishing rates yield a huge interval.
pub fn frame_interval(target_fps: Option<f32>) -> Option<Duration> {
    normalize_fps(target_fps).map(|fps| Duration::from_nanos((1e9 / f64::from(fps)).round() as u64))
}

/// Minimum interval between drawn frames for a capped renderer.
#[derive(Debug, Default, Clone)]
pub struct FrameLimiter {
    interval: Option<Duration>,
    last_drawn: Option<Instant>,
}

impl FrameLimiter {
    pub fn new(target_fps: Option<f32>) -> Self {
        let mut limiter = Self::default();
        limiter.set_target(target_fps);
        limiter
    }

    pub fn set_target(&mut self, target_fps: Option<f32>) {
        self.interval = frame_interval(target_fps);
    }

    pub fn should_draw(&self, now: Instant) -> bool {
        match (self.interval, self.last_drawn) {
            (Some(interval), Some(last)) => now.saturating_duration_since(last) >= interval,
            _ => true,
        }
    }

    pub fn mark_drawn(&mut self, now: Instant) {
        self.last_drawn = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_drawn = None;
    }
}

/// Rolling frames-per-second estimate, refreshed once per second.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    frames_since_update: u32,
    last_update: Option<Instant>,
    fps: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self {
            frames_since_update: 0,
            last_update: None,
            fps: 0.0,
        }
    }
}

impl FpsCounter {
    /// Records a frame; returns the new estimate when it was refreshed.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        let last = *self.last_update.get_or_insert(now);
        self.frames_since_update += 1;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.frames_since_update as f32 / elapsed.as_secs_f32();
            self.frames_since_update = 0;
            self.last_update = Some(now);
            return Some(self.fps);
        }
        None
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

/// Per-renderer counters exposed through the statistics query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub status: RendererStatus,
    pub fps: f32,
    pub frame_count: u64,
    /// Draw calls issued by the most recent frame.
    pub draw_calls: u32,
    pub pass_count: usize,
    /// Passes skipped by the most recent frame.
    pub failed_passes: u32,
    pub submissions: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&RendererStatus::DeviceLost).unwrap(),
            "\"device-lost\""
        );
        assert_eq!(RendererStatus::Running.to_string(), "running");
        assert!(RendererStatus::Paused.is_live());
        assert!(!RendererStatus::Error.is_live());
    }

    #[test]
    fn viewport_visibility_honours_threshold_and_connection() {
        let (mut provider, handle) = ViewportVisibility::new(DEFAULT_VISIBILITY_THRESHOLD);
        assert!(!provider.is_visible(), "not visible before connect");
        provider.connect();
        assert!(provider.is_visible());
        handle.set_ratio(0.05);
        assert!(!provider.is_visible());
        handle.set_ratio(0.1);
        assert!(provider.is_visible());
        provider.disconnect();
        assert!(!provider.is_visible());
    }

    #[test]
    fn clock_reports_elapsed_and_delta() {
        let start = Instant::now();
        let mut clock = FrameClock::new();
        let first = clock.sample(start);
        assert_eq!(first.frame_index, 0);
        assert_eq!(first.seconds, 0.0);
        let second = clock.sample(start + Duration::from_millis(500));
        assert_eq!(second.frame_index, 1);
        assert!((second.seconds - 0.5).abs() < 1e-6);
        assert!((second.delta - 0.5).abs() < 1e-6);
        clock.reset();
        assert_eq!(clock.sample(start).frame_index, 0);
    }

    #[test]
    fn limiter_spaces_frames() {
        let start = Instant::now();
        let mut limiter = FrameLimiter::new(Some(10.0));
        assert!(limiter.should_draw(start));
        limiter.mark_drawn(start);
        assert!(!limiter.should_draw(start + Duration::from_millis(50)));
        assert!(limiter.should_draw(start + Duration::from_millis(100)));

        let uncapped = FrameLimiter::new(Some(0.0));
        assert!(uncapped.should_draw(start));
        assert_eq!(normalize_fps(Some(-1.0)), None);
    }

    #[test]
    fn limiter_keeps_an_exact_cadence() {
        let start = Instant::now();
        let mut limiter = FrameLimiter::new(Some(60.0));
        let mut drawn = 0;
        for tick in 0..60u32 {
            let now = start + frame_interval(Some(60.0)).unwrap() * tick;
            if limiter.should_draw(now) {
                limiter.mark_drawn(now);
                drawn += 1;
            }
        }
        assert_eq!(drawn, 60);
        assert_eq!(frame_interval(Some(10.0)), Some(Duration::from_millis(100)));
        assert_eq!(frame_interval(Some(3.0)), Some(Duration::from_nanos(333_333_333)));
    }

    #[test]
    fn vanishing_fps_does_not_overflow() {
        let start = Instant::now();
        let mut limiter = FrameLimiter::new(Some(1e-30));
        assert!(limiter.should_draw(start));
        limiter.mark_drawn(start);
        assert!(!limiter.should_draw(start + Duration::from_secs(3600)));
        assert_eq!(frame_interval(Some(1e-30)), Some(Duration::from_nanos(u64::MAX)));
        assert_eq!(frame_interval(Some(f32::INFINITY)), Some(Duration::ZERO));
        assert_eq!(frame_interval(Some(f32::NAN)), None);
    }

    #[test]
    fn fps_counter_refreshes_each_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::default();
        assert_eq!(counter.tick(start), None);
        for frame in 1..30 {
            assert_eq!(counter.tick(start + Duration::from_millis(frame * 30)), None);
        }
        let fps = counter.tick(start + Duration::from_secs(1)).unwrap();
        assert!((fps - 31.0).abs() < 0.01);
    }
}
