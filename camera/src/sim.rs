//! Synthetic camera for tests and bench runs.
//!
//! Generates deterministic test patterns at a configurable frame rate,
//! stamps the same sync words and rolling frame index real hardware does,
//! and models pixel brightness as a function of gain and exposure so the
//! automatic gain loop closes against it. Fault injection covers the
//! producer's error paths: fetch timeouts, torn transfers, device removal.

use crate::limits::{self, EXPOSURE_DEFAULT_US};
use crate::select::CameraProvider;
use crate::tag;
use crate::{CameraDescriptor, CameraError, CameraResult, StaticConfig, VideoCamera};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::debug;

/// Scene rendered by the synthetic sensor.
#[derive(Debug, Clone)]
pub enum TestPattern {
    /// Uniform field at the given relative brightness (0.0..=1.0).
    Flat(f64),
    /// Horizontal ramp from black to full scale.
    Gradient,
    /// Per-pixel uniform noise, reseeded every frame from `seed`.
    Noise {
        /// Base RNG seed.
        seed: u64,
    },
}

/// Scheduled failures, keyed by read attempt number (zero-based).
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Read attempts that time out instead of delivering a frame.
    pub timeout_at: Vec<u64>,
    /// Delivered frames whose leading sync word is corrupted.
    pub corrupt_sync_at: Vec<u64>,
    /// Report the device as removed after this many delivered frames.
    pub remove_after: Option<u64>,
}

/// Configuration of one synthetic camera.
#[derive(Debug, Clone)]
pub struct SimCameraConfig {
    /// Device name reported during enumeration.
    pub name: String,
    /// Full sensor width in pixels.
    pub max_width: usize,
    /// Full sensor height in pixels.
    pub max_height: usize,
    /// Whether the device claims a Bayer sensor.
    pub is_color: bool,
    /// Delivery rate in frames per second.
    pub fps: f64,
    /// Rendered scene.
    pub pattern: TestPattern,
    /// Scene flux in DN per millisecond of exposure at unity gain.
    pub scene_flux: f64,
    /// Scheduled failures.
    pub faults: FaultPlan,
}

impl SimCameraConfig {
    /// Small, fast geometry for unit and integration tests.
    pub fn small() -> Self {
        Self {
            name: "SimCam".to_string(),
            max_width: 64,
            max_height: 48,
            is_color: false,
            fps: 2_000.0,
            pattern: TestPattern::Gradient,
            scene_flux: 200.0,
            faults: FaultPlan::default(),
        }
    }

    /// Full ASI178 geometry at its 8-bit frame rate.
    pub fn asi178() -> Self {
        Self {
            name: "ZWO ASI178MM (simulated)".to_string(),
            max_width: 3096,
            max_height: 2080,
            is_color: false,
            fps: 60.0,
            pattern: TestPattern::Noise { seed: 1 },
            scene_flux: 100.0,
            faults: FaultPlan::default(),
        }
    }
}

/// Synthetic streaming camera.
pub struct SimCamera {
    descriptor: CameraDescriptor,
    sim: SimCameraConfig,
    width: usize,
    height: usize,
    gain: i64,
    exposure_us: i64,
    streaming: bool,
    attempts: u64,
    frames_delivered: u64,
    hw_index: u16,
    next_frame_due: Option<Instant>,
}

impl SimCamera {
    /// Open a synthetic camera with the given static configuration.
    pub fn open(sim: SimCameraConfig, config: &StaticConfig) -> CameraResult<Self> {
        if config.binning == 0 {
            return Err(CameraError::InvalidControl("binning must be >= 1".into()));
        }
        let descriptor = CameraDescriptor {
            name: sim.name.clone(),
            max_width: sim.max_width,
            max_height: sim.max_height,
            is_color: sim.is_color,
        };
        debug!(
            "Simulated camera '{}' opened with binning {}, bandwidth overload {}, high speed {}",
            sim.name, config.binning, config.bandwidth_overload, config.high_speed_mode
        );
        if sim.is_color {
            debug!(
                "White balance defaults applied: red {}, blue {}",
                config.wb_red, config.wb_blue
            );
        }
        Ok(Self {
            width: sim.max_width / config.binning,
            height: sim.max_height / config.binning,
            descriptor,
            sim,
            gain: limits::GAIN_MIN,
            exposure_us: EXPOSURE_DEFAULT_US,
            streaming: false,
            attempts: 0,
            frames_delivered: 0,
            hw_index: 0,
            next_frame_due: None,
        })
    }

    /// Frames delivered so far (successful reads only).
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sim.fps)
    }

    // Brightness model: DN = base * flux * exposure_ms * 10^(gain / 200).
    // Gain is in 0.1 dB steps, so 200 units per decade of linear gain.
    fn render(&mut self, buf: &mut [u8]) {
        let gain_factor = 10f64.powf(self.gain as f64 / 200.0);
        let exposure_ms = self.exposure_us as f64 / 1_000.0;
        let scale = self.sim.scene_flux * exposure_ms * gain_factor;

        match self.sim.pattern {
            TestPattern::Flat(level) => {
                let dn = (level * scale).round().clamp(0.0, 255.0) as u8;
                buf.fill(dn);
            }
            TestPattern::Gradient => {
                let denominator = (self.width - 1).max(1) as f64;
                for (i, px) in buf.iter_mut().enumerate() {
                    let base = (i % self.width) as f64 / denominator;
                    *px = (base * scale).round().clamp(0.0, 255.0) as u8;
                }
            }
            TestPattern::Noise { seed } => {
                let mut rng = StdRng::seed_from_u64(seed ^ self.frames_delivered);
                for px in buf.iter_mut() {
                    *px = (rng.gen::<f64>() * scale).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

impl VideoCamera for SimCamera {
    fn descriptor(&self) -> &CameraDescriptor {
        &self.descriptor
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn set_gain(&mut self, gain: i64) -> CameraResult<()> {
        if !(limits::GAIN_MIN..=limits::GAIN_MAX).contains(&gain) {
            return Err(CameraError::InvalidControl(format!("gain {gain}")));
        }
        self.gain = gain;
        Ok(())
    }

    fn set_exposure_us(&mut self, exposure_us: i64) -> CameraResult<()> {
        if !(limits::EXPOSURE_MIN_US..=limits::EXPOSURE_MAX_US).contains(&exposure_us) {
            return Err(CameraError::InvalidControl(format!(
                "exposure {exposure_us} us"
            )));
        }
        self.exposure_us = exposure_us;
        Ok(())
    }

    fn exposure_us(&self) -> i64 {
        self.exposure_us
    }

    fn start_stream(&mut self) -> CameraResult<()> {
        self.streaming = true;
        self.next_frame_due = Some(Instant::now());
        Ok(())
    }

    fn stop_stream(&mut self) -> CameraResult<()> {
        self.streaming = false;
        self.next_frame_due = None;
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8], timeout: Duration) -> CameraResult<()> {
        if !self.streaming {
            return Err(CameraError::Device("stream not started".to_string()));
        }
        if buf.len() != self.frame_len() {
            return Err(CameraError::Device(format!(
                "buffer is {} bytes, frame is {}",
                buf.len(),
                self.frame_len()
            )));
        }

        if let Some(limit) = self.sim.faults.remove_after {
            if self.frames_delivered >= limit {
                return Err(CameraError::Removed);
            }
        }

        let attempt = self.attempts;
        self.attempts += 1;

        if self.sim.faults.timeout_at.contains(&attempt) {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
            return Err(CameraError::Timeout);
        }

        // Pace delivery to the configured frame rate.
        let due = self.next_frame_due.unwrap_or_else(Instant::now);
        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(CameraError::Timeout);
            }
            std::thread::sleep(wait);
        }
        self.next_frame_due = Some(due.max(now) + self.frame_period());

        self.render(buf);
        self.hw_index = self.hw_index.wrapping_add(1);
        tag::stamp(buf, self.hw_index);
        if self.sim.faults.corrupt_sync_at.contains(&self.frames_delivered) {
            buf[0] ^= 0xff;
        }
        self.frames_delivered += 1;
        Ok(())
    }
}

/// Provider serving a fixed rig of synthetic cameras.
pub struct SimProvider {
    configs: Vec<SimCameraConfig>,
}

impl SimProvider {
    /// Provider over an explicit list of synthetic cameras.
    pub fn new(configs: Vec<SimCameraConfig>) -> Self {
        Self { configs }
    }

    /// Default rig: one full-resolution ASI178-shaped device.
    pub fn asi178_rig() -> Self {
        Self::new(vec![SimCameraConfig::asi178()])
    }
}

impl CameraProvider for SimProvider {
    fn devices(&self) -> Vec<CameraDescriptor> {
        self.configs
            .iter()
            .map(|c| CameraDescriptor {
                name: c.name.clone(),
                max_width: c.max_width,
                max_height: c.max_height,
                is_color: c.is_color,
            })
            .collect()
    }

    fn open(
        &self,
        descriptor: &CameraDescriptor,
        config: &StaticConfig,
    ) -> CameraResult<Box<dyn VideoCamera>> {
        let sim = self
            .configs
            .iter()
            .find(|c| c.name == descriptor.name)
            .ok_or_else(|| CameraError::Device(format!("unknown device '{}'", descriptor.name)))?;
        Ok(Box::new(SimCamera::open(sim.clone(), config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_small(config: SimCameraConfig) -> SimCamera {
        SimCamera::open(config, &StaticConfig::default()).unwrap()
    }

    #[test]
    fn test_frames_are_tagged() {
        let mut cam = open_small(SimCameraConfig::small());
        cam.start_stream().unwrap();
        let mut buf = vec![0u8; cam.frame_len()];
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        let parsed = tag::validate(&buf);
        assert!(parsed.sync_valid);
        assert_eq!(parsed.index, 1);

        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        assert_eq!(tag::validate(&buf).index, 2);
    }

    #[test]
    fn test_binning_halves_geometry() {
        let config = StaticConfig {
            binning: 2,
            ..StaticConfig::default()
        };
        let cam = SimCamera::open(SimCameraConfig::small(), &config).unwrap();
        assert_eq!(cam.width(), 32);
        assert_eq!(cam.height(), 24);
    }

    #[test]
    fn test_brightness_follows_gain() {
        let mut cam = open_small(SimCameraConfig {
            pattern: TestPattern::Flat(1.0),
            scene_flux: 2.0,
            ..SimCameraConfig::small()
        });
        cam.start_stream().unwrap();
        let mut buf = vec![0u8; cam.frame_len()];

        cam.set_gain(0).unwrap();
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        let dim = buf[buf.len() / 2];

        cam.set_gain(400).unwrap();
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        let bright = buf[buf.len() / 2];
        assert!(bright > dim);
    }

    #[test]
    fn test_scheduled_timeout() {
        let mut cam = open_small(SimCameraConfig {
            faults: FaultPlan {
                timeout_at: vec![0],
                ..FaultPlan::default()
            },
            ..SimCameraConfig::small()
        });
        cam.start_stream().unwrap();
        let mut buf = vec![0u8; cam.frame_len()];
        assert!(matches!(
            cam.read_frame(&mut buf, Duration::from_millis(10)),
            Err(CameraError::Timeout)
        ));
        assert!(cam.read_frame(&mut buf, Duration::from_millis(200)).is_ok());
    }

    #[test]
    fn test_removal_after_n_frames() {
        let mut cam = open_small(SimCameraConfig {
            faults: FaultPlan {
                remove_after: Some(2),
                ..FaultPlan::default()
            },
            ..SimCameraConfig::small()
        });
        cam.start_stream().unwrap();
        let mut buf = vec![0u8; cam.frame_len()];
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        assert!(matches!(
            cam.read_frame(&mut buf, Duration::from_millis(200)),
            Err(CameraError::Removed)
        ));
    }

    #[test]
    fn test_corrupt_sync_injection() {
        let mut cam = open_small(SimCameraConfig {
            faults: FaultPlan {
                corrupt_sync_at: vec![1],
                ..FaultPlan::default()
            },
            ..SimCameraConfig::small()
        });
        cam.start_stream().unwrap();
        let mut buf = vec![0u8; cam.frame_len()];
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        assert!(tag::validate(&buf).sync_valid);
        cam.read_frame(&mut buf, Duration::from_millis(200)).unwrap();
        assert!(!tag::validate(&buf).sync_valid);
    }

    #[test]
    fn test_rejects_out_of_range_controls() {
        let mut cam = open_small(SimCameraConfig::small());
        assert!(cam.set_gain(511).is_err());
        assert!(cam.set_exposure_us(10).is_err());
    }
}
