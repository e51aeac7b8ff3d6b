//! IMU plausibility check run before a calibration sample is sent.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::machine::VehiclePosition;
use crate::link::{LinkHandle, ListenerId};
use crate::mavlink::messages::ScaledImu;

/// One g in SCALED_IMU units (mG)
const ONE_G_MG: f32 = 1000.0;

/// Outcome of a plausibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImuVerdict {
    pub passed: bool,
    pub detail: String,
}

impl ImuVerdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            detail: String::new(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Decides whether the vehicle is plausibly in the requested position
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImuPlausibility: Send + Sync {
    async fn check(&self, position: VehiclePosition) -> ImuVerdict;
}

/// Checks that gravity lies on the body axis the position implies
///
/// Uses the most recent SCALED_IMU sample seen on the link.
pub struct GravityAlignmentCheck {
    link: LinkHandle,
    latest: Arc<Mutex<Option<ScaledImu>>>,
    listener: ListenerId,
    min_fraction: f32,
}

impl GravityAlignmentCheck {
    /// # Arguments
    ///
    /// * `min_fraction` - Share of 1 g required on the expected axis (e.g. 0.7)
    pub fn new(link: LinkHandle, min_fraction: f32) -> Self {
        let latest = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&latest);
        let listener = link.dispatcher().on_scaled_imu(move |_, imu| {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(*imu);
        });

        Self {
            link,
            latest,
            listener,
            min_fraction,
        }
    }
}

impl Drop for GravityAlignmentCheck {
    fn drop(&mut self) {
        self.link.dispatcher().unsubscribe(self.listener);
    }
}

#[async_trait]
impl ImuPlausibility for GravityAlignmentCheck {
    async fn check(&self, position: VehiclePosition) -> ImuVerdict {
        let sample = *self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        match sample {
            Some(imu) => evaluate(position, &imu, self.min_fraction),
            None => ImuVerdict::fail("no SCALED_IMU data received"),
        }
    }
}

/// Expected specific force (axis index, sign) with the vehicle at rest
fn expected_axis(position: VehiclePosition) -> (usize, f32) {
    match position {
        VehiclePosition::Level => (2, -1.0),
        VehiclePosition::Left => (1, 1.0),
        VehiclePosition::Right => (1, -1.0),
        VehiclePosition::NoseDown => (0, -1.0),
        VehiclePosition::NoseUp => (0, 1.0),
        VehiclePosition::Back => (2, 1.0),
    }
}

fn evaluate(position: VehiclePosition, imu: &ScaledImu, min_fraction: f32) -> ImuVerdict {
    let acc = [imu.acc.x as f32, imu.acc.y as f32, imu.acc.z as f32];
    let (axis, sign) = expected_axis(position);
    let along = acc[axis] * sign;

    if along >= min_fraction * ONE_G_MG {
        ImuVerdict::pass()
    } else {
        ImuVerdict::fail(format!(
            "expected {:.0} mG on {} axis for {}, measured x={} y={} z={}",
            sign * ONE_G_MG,
            ["x", "y", "z"][axis],
            position,
            imu.acc.x,
            imu.acc.y,
            imu.acc.z
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mavlink::messages::Axes;

    fn imu(x: i16, y: i16, z: i16) -> ScaledImu {
        ScaledImu {
            time_boot_ms: 0,
            acc: Axes { x, y, z },
            gyro: Axes::default(),
            mag: Axes::default(),
            temperature: 0,
        }
    }

    #[test]
    fn test_each_position_accepts_its_own_attitude() {
        let samples = [
            (VehiclePosition::Level, imu(10, -20, -995)),
            (VehiclePosition::Left, imu(0, 980, 40)),
            (VehiclePosition::Right, imu(0, -1002, 0)),
            (VehiclePosition::NoseDown, imu(-990, 0, -30)),
            (VehiclePosition::NoseUp, imu(1010, 5, 5)),
            (VehiclePosition::Back, imu(0, 0, 1000)),
        ];

        for (position, sample) in samples {
            assert!(evaluate(position, &sample, 0.7).passed, "{}", position);
        }
    }

    #[test]
    fn test_wrong_attitude_is_rejected() {
        let level = imu(0, 0, -1000);
        let verdict = evaluate(VehiclePosition::Left, &level, 0.7);
        assert!(!verdict.passed);
        assert!(verdict.detail.contains("y axis"));

        // Upside down is not level
        assert!(!evaluate(VehiclePosition::Level, &imu(0, 0, 1000), 0.7).passed);
    }

    #[test]
    fn test_tilted_vehicle_is_rejected() {
        // About 50 degrees off level
        assert!(!evaluate(VehiclePosition::Level, &imu(0, 760, -640), 0.7).passed);
    }

    #[test]
    fn test_threshold_is_relative_to_one_g() {
        // Entirely on the right axis but far below 1 g
        assert!(!evaluate(VehiclePosition::Level, &imu(0, 0, -600), 0.7).passed);
        assert!(evaluate(VehiclePosition::Level, &imu(0, 0, -750), 0.7).passed);
    }

    #[tokio::test]
    async fn test_mock_collaborator() {
        let mut mock = MockImuPlausibility::new();
        mock.expect_check()
            .withf(|position| *position == VehiclePosition::Back)
            .returning(|_| ImuVerdict::fail("upright"));

        let verdict = mock.check(VehiclePosition::Back).await;
        assert_eq!(verdict, ImuVerdict::fail("upright"));
    }
}
