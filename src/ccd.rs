//! Cyclic Coordinate Descent solver for single-axis joint chains.
//!
//! Every solve runs a fixed number of tip-to-root sweeps, so its cost per frame is
//! bounded no matter where the target is. Joints that cannot contribute (degenerate
//! vectors, target along the joint axis) are skipped for that sweep.

use nalgebra::Vector3;
use serde::Serialize;

use crate::angle::canonical_180;
use crate::chain::{JointLimits, KinematicChain};

pub const DEFAULT_ITERATIONS: usize = 10;
pub const DEFAULT_DAMPING: f32 = 0.6;
pub const MAX_ITERATIONS: usize = 200;
const MIN_VECTOR_LENGTH: f32 = 1e-5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CcdConfig {
    pub iterations: usize,
    /// Fraction of each joint's ideal correction applied per step, in `(0, 1]`.
    pub damping: f32,
}

impl Default for CcdConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            damping: DEFAULT_DAMPING,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// Effector-to-target distance after the solve.
    pub distance: f32,
}

#[derive(Clone, Debug)]
pub struct CcdSolver {
    config: CcdConfig,
}

impl Default for CcdSolver {
    fn default() -> Self {
        Self::new(CcdConfig::default())
    }
}

impl CcdSolver {
    pub fn new(config: CcdConfig) -> Self {
        let damping = if config.damping.is_finite() && config.damping > 0.0 {
            config.damping.min(1.0)
        } else {
            DEFAULT_DAMPING
        };
        Self {
            config: CcdConfig {
                iterations: config.iterations.min(MAX_ITERATIONS),
                damping,
            },
        }
    }

    pub fn config(&self) -> CcdConfig {
        self.config
    }

    /// Move `angles_deg` so the chain's effector approaches `target`.
    ///
    /// Angles are always left inside their joint limits, even when no sweep runs. A
    /// non-finite target only settles the angles into range.
    pub fn solve(
        &self,
        chain: &KinematicChain,
        angles_deg: &mut [f32],
        target: Vector3<f32>,
    ) -> SolveReport {
        settle_into_limits(chain, angles_deg);
        if !target.iter().all(|v| v.is_finite()) {
            return SolveReport {
                iterations: 0,
                distance: f32::INFINITY,
            };
        }

        for _ in 0..self.config.iterations {
            self.sweep(chain, angles_deg, target);
        }
        SolveReport {
            iterations: self.config.iterations,
            distance: (chain.effector(angles_deg) - target).norm(),
        }
    }

    /// One tip-to-root pass over the chain.
    pub fn sweep(&self, chain: &KinematicChain, angles_deg: &mut [f32], target: Vector3<f32>) {
        if !target.iter().all(|v| v.is_finite()) {
            return;
        }
        let count = chain.len().min(angles_deg.len());
        for index in (0..count).rev() {
            let Some(delta) = joint_correction(chain, angles_deg, index, target) else {
                continue;
            };
            let limits = chain.joints()[index].limits;
            let current = settle(angles_deg[index], &limits);
            angles_deg[index] = limits.clamp(current + delta * self.config.damping);
        }
    }
}

/// Undamped signed correction (degrees) that would swing the effector towards the
/// target about joint `index`'s axis, or `None` when the joint cannot help.
fn joint_correction(
    chain: &KinematicChain,
    angles_deg: &[f32],
    index: usize,
    target: Vector3<f32>,
) -> Option<f32> {
    let frames = chain.frames(angles_deg);
    let joint = frames.joints.get(index)?;
    let to_effector = frames.effector - joint.position;
    let to_target = target - joint.position;
    if to_effector.norm() < MIN_VECTOR_LENGTH || to_target.norm() < MIN_VECTOR_LENGTH {
        return None;
    }

    let axis = joint.axis.into_inner();
    let effector_in_plane = to_effector - axis * axis.dot(&to_effector);
    let target_in_plane = to_target - axis * axis.dot(&to_target);
    if effector_in_plane.norm() < MIN_VECTOR_LENGTH || target_in_plane.norm() < MIN_VECTOR_LENGTH {
        return None;
    }
    let from = effector_in_plane.normalize();
    let to = target_in_plane.normalize();

    let cross = from.cross(&to);
    let magnitude = cross.norm().clamp(-1.0, 1.0).asin().to_degrees();
    let direction = if cross.dot(&axis) >= 0.0 { 1.0 } else { -1.0 };
    let delta = direction * magnitude;
    delta.is_finite().then_some(delta)
}

fn settle(angle: f32, limits: &JointLimits) -> f32 {
    if limits.contains(angle) {
        angle
    } else if angle.is_finite() {
        limits.clamp(canonical_180(angle))
    } else {
        limits.clamp(0.0)
    }
}

fn settle_into_limits(chain: &KinematicChain, angles_deg: &mut [f32]) {
    for (angle, spec) in angles_deg.iter_mut().zip(chain.joints()) {
        *angle = settle(*angle, &spec.limits);
    }
}
