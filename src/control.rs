//! Autonomous return-to-base.
//!
//! Runs one step per position update while the lifecycle state is `Resetting`. The robot first
//! drives straight to learn its heading from two fixes, turns towards the target, then steers
//! with a proportional correction on the heading error until it is within the distance
//! threshold. A final rotation puts it back to heading zero.

use libm::{acosf, sqrtf};

use crate::config::ControlConfig;
use crate::hal::Motion;
use crate::protocol::Position2d;

/// Distance driven blindly when the heading is still unknown, in millimetres.
const PROBE_DISTANCE: u16 = 50;
const PROBE_SPEED: i8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Driving,
    Arrived,
}

pub struct ReturnToBase {
    config: ControlConfig,
    previous: Position2d,
    direction: Option<i16>,
    initial_compensated: bool,
    target_reached: bool,
}

impl ReturnToBase {
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            previous: Position2d::default(),
            direction: None,
            initial_compensated: false,
            target_reached: false,
        }
    }

    /// Last heading derived from two consecutive fixes, in degrees.
    pub fn direction(&self) -> Option<i16> {
        self.direction
    }

    pub fn step<M: Motion>(&mut self, current: Position2d, target: Position2d, motion: &mut M) -> Step {
        if let Some(direction) = self.heading(current, self.previous) {
            self.direction = Some(direction);
        }
        self.previous = current;

        if !self.initial_compensated {
            self.compensate_initial_direction(current, target, motion);
        }

        if !self.target_reached {
            self.update(current, target, motion);
        }

        if !self.target_reached {
            return Step::Driving;
        }

        if let Some(direction) = self.direction {
            self.rotate_by(direction, motion);
        }
        info!("Target reached");
        *self = Self::new(self.config);
        Step::Arrived
    }

    fn compensate_initial_direction<M: Motion>(
        &mut self,
        current: Position2d,
        target: Position2d,
        motion: &mut M,
    ) {
        let Some(direction) = self.direction else {
            motion.straight(PROBE_DISTANCE, PROBE_SPEED);
            return;
        };

        let angle_to_target = self.heading(target, current).unwrap_or(0);
        self.rotate_by(angle_to_target - direction, motion);
        motion.straight(
            self.config.straight_speed as u16,
            self.config.straight_speed,
        );
        self.initial_compensated = true;
    }

    fn update<M: Motion>(&mut self, current: Position2d, target: Position2d, motion: &mut M) {
        let config = &self.config;
        let distance = distance(target, current);
        let mut reduction = 1.0;
        if distance < config.slow_down_distance {
            reduction = config.reduce_speed_factor;
        }

        let (mut left, mut right) = (0, 0);
        if distance < config.distance_threshold {
            self.target_reached = true;
        } else if let Some(direction) = self.direction {
            let angle_to_target = self.heading(target, current).unwrap_or(0);
            let error = wrap_degrees(angle_to_target - direction);
            if error.abs() > config.reduce_speed_angle {
                reduction = config.reduce_speed_factor;
            }

            let max = f32::from(config.max_speed) * reduction;
            let angular = (f32::from(error) / 180.0 * config.angular_speed_factor) as i16;
            let side = f32::from(angular) * config.angular_side_factor;
            left = ((max - side) as i16).min(config.max_speed);
            right = ((max + side) as i16).min(config.max_speed);
        } else {
            let speed = (f32::from(config.max_speed) * reduction) as i16;
            left = speed;
            right = speed;
        }

        trace!("Wheel speeds {} {}", left, right);
        motion.set_speed(left, right);
    }

    fn rotate_by<M: Motion>(&self, angle: i16, motion: &mut M) {
        let speed = self.config.rotate_speed;
        if angle < 0 {
            motion.rotate(angle.unsigned_abs(), speed);
        } else {
            motion.rotate(angle as u16, -speed);
        }
    }

    /// Bearing from `tail` to `head` in degrees, zero along +y and negative towards +x. `None`
    /// when the points are too close to tell.
    fn heading(&self, head: Position2d, tail: Position2d) -> Option<i16> {
        let (dx, dy) = delta(head, tail);
        let distance = sqrtf(dx * dx + dy * dy);
        if distance < self.config.direction_threshold {
            return None;
        }

        let side = if dx > 0.0 { -1 } else { 1 };
        let angle = (acosf(dy / distance).to_degrees()) as i16;
        Some(angle * side)
    }
}

fn delta(head: Position2d, tail: Position2d) -> (f32, f32) {
    (
        metres(head.x) - metres(tail.x),
        metres(head.y) - metres(tail.y),
    )
}

fn metres(micrometres: u32) -> f32 {
    micrometres as f32 / 1e6
}

fn distance(head: Position2d, tail: Position2d) -> f32 {
    let (dx, dy) = delta(head, tail);
    sqrtf(dx * dx + dy * dy)
}

fn wrap_degrees(angle: i16) -> i16 {
    if angle < -180 {
        angle + 360
    } else if angle > 180 {
        angle - 360
    } else {
        angle
    }
}
