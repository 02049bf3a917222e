//! Sliding-window fall classifier over the head-to-hip body angle.

use std::collections::VecDeque;
use std::time::SystemTime;

use anyhow::{anyhow, Result};

use crate::detect::Keypoint;

/// COCO keypoint indices used for the body axis.
pub const HEAD: usize = 0;
pub const LEFT_HIP: usize = 11;
pub const RIGHT_HIP: usize = 12;

pub const DEFAULT_WINDOW: usize = 15;
pub const DEFAULT_ANGLE_THRESHOLD_DEG: f32 = 60.0;
pub const DEFAULT_CONFIRM_RATIO: f32 = 0.8;

// Absorbs float error in ratio * window, so 0.8 * 15 requires 12 and not 13.
const RATIO_TOLERANCE: f64 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FallJudgeConfig {
    /// Number of consecutive valid observations considered.
    pub window: usize,
    /// Body angle from vertical, in degrees, above which a frame is abnormal.
    pub angle_threshold_deg: f32,
    /// Fraction of the window that must be abnormal, in `(0, 1]`.
    pub confirm_ratio: f32,
    /// Head and hip keypoints below this confidence make the frame invalid.
    pub min_keypoint_confidence: f32,
}

impl Default for FallJudgeConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            angle_threshold_deg: DEFAULT_ANGLE_THRESHOLD_DEG,
            confirm_ratio: DEFAULT_CONFIRM_RATIO,
            min_keypoint_confidence: 0.0,
        }
    }
}

impl FallJudgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(anyhow!("fall window must be at least 1"));
        }
        if !(self.confirm_ratio > 0.0 && self.confirm_ratio <= 1.0) {
            return Err(anyhow!(
                "fall confirm ratio must be in (0, 1], got {}",
                self.confirm_ratio
            ));
        }
        if !(0.0..=180.0).contains(&self.angle_threshold_deg) {
            return Err(anyhow!(
                "fall angle threshold must be in [0, 180], got {}",
                self.angle_threshold_deg
            ));
        }
        if !(0.0..=1.0).contains(&self.min_keypoint_confidence) {
            return Err(anyhow!(
                "minimum keypoint confidence must be in [0, 1], got {}",
                self.min_keypoint_confidence
            ));
        }
        Ok(())
    }

    /// Abnormal entries needed in a full window: `ceil(ratio * window)`.
    pub fn required_abnormal(&self) -> usize {
        let exact = self.confirm_ratio as f64 * self.window as f64;
        ((exact - RATIO_TOLERANCE).ceil().max(1.0) as usize).min(self.window)
    }
}

/// Result of one [`FallJudge::observe`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Observation {
    pub confirmed: bool,
    /// Body angle in degrees; 0 when it could not be computed.
    pub angle: f32,
}

/// Most recent confirmed fall.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FallEvent {
    pub angle: f32,
    pub at: SystemTime,
}

/// Angle in degrees between the hip-to-head vector and image "up".
///
/// Keypoints use image coordinates (y grows downward): upright is 0, lying flat
/// is 90, inverted is 180. `None` when any required keypoint is missing,
/// below `min_confidence`, non-finite, or the head sits on the hip midpoint.
pub fn body_angle(keypoints: &[Keypoint], min_confidence: f32) -> Option<f32> {
    let required = [HEAD, LEFT_HIP, RIGHT_HIP];
    if keypoints.len() <= RIGHT_HIP {
        return None;
    }
    for &i in &required {
        let kp = keypoints[i];
        if !(kp.x.is_finite() && kp.y.is_finite()) || !(kp.confidence >= min_confidence) {
            return None;
        }
    }
    let head = keypoints[HEAD];
    let hip_x = (keypoints[LEFT_HIP].x + keypoints[RIGHT_HIP].x) / 2.0;
    let hip_y = (keypoints[LEFT_HIP].y + keypoints[RIGHT_HIP].y) / 2.0;
    let (dx, dy) = (head.x - hip_x, head.y - hip_y);
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    Some(dx.atan2(-dy).to_degrees().abs())
}

/// Debounces per-frame body angles into a fall decision.
///
/// Only valid observations enter the window; a frame whose angle cannot be
/// computed leaves it untouched.
pub struct FallJudge {
    config: FallJudgeConfig,
    required: usize,
    window: VecDeque<bool>,
    confirmed: bool,
    last_event: Option<FallEvent>,
}

impl FallJudge {
    pub fn new(config: FallJudgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            required: config.required_abnormal(),
            window: VecDeque::with_capacity(config.window),
            config,
            confirmed: false,
            last_event: None,
        })
    }

    pub fn config(&self) -> &FallJudgeConfig {
        &self.config
    }

    pub fn observe(&mut self, keypoints: Option<&[Keypoint]>) -> Observation {
        self.observe_at(keypoints, SystemTime::now())
    }

    /// [`FallJudge::observe`] with an explicit timestamp for the event record.
    pub fn observe_at(&mut self, keypoints: Option<&[Keypoint]>, now: SystemTime) -> Observation {
        let Some(angle) =
            keypoints.and_then(|kps| body_angle(kps, self.config.min_keypoint_confidence))
        else {
            return Observation::default();
        };

        self.window.push_back(angle > self.config.angle_threshold_deg);
        while self.window.len() > self.config.window {
            self.window.pop_front();
        }
        if self.window.len() < self.config.window {
            return Observation {
                confirmed: false,
                angle,
            };
        }

        let abnormal = self.window.iter().filter(|&&a| a).count();
        let confirmed = abnormal >= self.required;
        if confirmed {
            if !self.confirmed {
                log::warn!(
                    "FallJudge: fall confirmed ({}/{} abnormal, angle {:.1})",
                    abnormal,
                    self.window.len(),
                    angle
                );
            }
            self.last_event = Some(FallEvent { angle, at: now });
        }
        self.confirmed = confirmed;
        Observation { confirmed, angle }
    }

    pub fn last_event(&self) -> Option<FallEvent> {
        self.last_event
    }

    /// Observations currently in the window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Forget all observations and the last event.
    pub fn reset(&mut self) {
        self.window.clear();
        self.confirmed = false;
        self.last_event = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ratio_requires_twelve_of_fifteen() {
        assert_eq!(FallJudgeConfig::default().required_abnormal(), 12);
        let all = FallJudgeConfig {
            confirm_ratio: 1.0,
            ..FallJudgeConfig::default()
        };
        assert_eq!(all.required_abnormal(), 15);
        let tiny = FallJudgeConfig {
            confirm_ratio: 0.01,
            ..FallJudgeConfig::default()
        };
        assert_eq!(tiny.required_abnormal(), 1);
    }

    #[test]
    fn rejects_invalid_config() {
        let zero_window = FallJudgeConfig {
            window: 0,
            ..FallJudgeConfig::default()
        };
        assert!(FallJudge::new(zero_window).is_err());
        let zero_ratio = FallJudgeConfig {
            confirm_ratio: 0.0,
            ..FallJudgeConfig::default()
        };
        assert!(FallJudge::new(zero_ratio).is_err());
        let nan_ratio = FallJudgeConfig {
            confirm_ratio: f32::NAN,
            ..FallJudgeConfig::default()
        };
        assert!(nan_ratio.validate().is_err());
    }

    #[test]
    fn reset_clears_window_and_event() -> Result<()> {
        let mut judge = FallJudge::new(FallJudgeConfig {
            window: 1,
            ..FallJudgeConfig::default()
        })?;
        let mut kps = vec![Keypoint::default(); 17];
        kps[HEAD] = Keypoint { x: 100.0, y: 0.0, confidence: 1.0 };
        assert!(judge.observe(Some(&kps)).confirmed);
        assert!(judge.last_event().is_some());

        judge.reset();
        assert_eq!(judge.window_len(), 0);
        assert!(judge.last_event().is_none());
        Ok(())
    }
}
