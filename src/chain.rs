//! Kinematic chain model: static joint descriptions and forward kinematics.
//!
//! Joints live in a flat array and point at their parent by index, so evaluating the
//! chain is a single root-to-tip fold over the joint angles. Nothing is cached between
//! evaluations; every pose is rebuilt from the angles it is given.

use nalgebra::{Unit, UnitQuaternion, Vector3, vector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const UPPER_ARM_LENGTH: f32 = 0.8;
pub const FOREARM_LENGTH: f32 = 0.7;
pub const HAND_LENGTH: f32 = 0.18;

pub const SHOULDER_PITCH: usize = 0;
pub const SHOULDER_ROLL: usize = 1;
pub const ELBOW_FLEX: usize = 2;
pub const WRIST_FLEX: usize = 3;
pub const ARM_JOINT_COUNT: usize = 4;

/// Rig revision where negative angles raise the arm forward.
pub const FORWARD_NEGATIVE_SIGNS: [Sign; ARM_JOINT_COUNT] =
    [Sign::Positive, Sign::Positive, Sign::Positive, Sign::Positive];
pub const FORWARD_NEGATIVE_LIMITS: [JointLimits; ARM_JOINT_COUNT] = [
    JointLimits::new(-180.0, 30.0),
    JointLimits::new(-180.0, 5.0),
    JointLimits::new(-150.0, 0.0),
    JointLimits::new(-90.0, 90.0),
];

/// Dashboard revision where positive angles raise the arm forward.
pub const FORWARD_POSITIVE_SIGNS: [Sign; ARM_JOINT_COUNT] =
    [Sign::Negative, Sign::Negative, Sign::Negative, Sign::Positive];
pub const FORWARD_POSITIVE_LIMITS: [JointLimits; ARM_JOINT_COUNT] = [
    JointLimits::new(-30.0, 180.0),
    JointLimits::new(-5.0, 180.0),
    JointLimits::new(0.0, 150.0),
    JointLimits::new(-90.0, 90.0),
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("chain has no joints")]
    Empty,
    #[error("joint {joint} is stored at index {index}; ids must be positional")]
    MisplacedId { joint: usize, index: usize },
    #[error("joint {joint} names parent {parent}, which does not precede it")]
    ParentNotBefore { joint: usize, parent: usize },
    #[error("joint {joint} has invalid limits [{min_deg}, {max_deg}]")]
    InvalidLimits {
        joint: usize,
        min_deg: f32,
        max_deg: f32,
    },
    #[error("joint {joint} has a non-finite offset")]
    NonFiniteOffset { joint: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn unit(self) -> Unit<Vector3<f32>> {
        match self {
            Axis::X => Vector3::x_axis(),
            Axis::Y => Vector3::y_axis(),
            Axis::Z => Vector3::z_axis(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Positive,
    Negative,
}

impl Sign {
    pub fn factor(self) -> f32 {
        match self {
            Sign::Positive => 1.0,
            Sign::Negative => -1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct JointLimits {
    pub min_deg: f32,
    pub max_deg: f32,
}

impl JointLimits {
    pub const fn new(min_deg: f32, max_deg: f32) -> Self {
        Self { min_deg, max_deg }
    }

    pub fn clamp(&self, deg: f32) -> f32 {
        if deg.is_nan() {
            return self.min_deg.max(0.0_f32.min(self.max_deg));
        }
        deg.max(self.min_deg).min(self.max_deg)
    }

    pub fn contains(&self, deg: f32) -> bool {
        deg >= self.min_deg && deg <= self.max_deg
    }

    fn is_valid(&self) -> bool {
        self.min_deg.is_finite() && self.max_deg.is_finite() && self.min_deg <= self.max_deg
    }
}

/// Immutable description of one revolute joint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JointSpec {
    pub id: usize,
    pub name: String,
    pub axis: Axis,
    pub sign: Sign,
    pub limits: JointLimits,
    /// `None` attaches the joint to the chain root.
    pub parent: Option<usize>,
    /// Fixed translation from the parent frame to this joint's pivot.
    pub offset: [f32; 3],
}

impl JointSpec {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        axis: Axis,
        sign: Sign,
        limits: JointLimits,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            axis,
            sign,
            limits,
            parent: id.checked_sub(1),
            offset: [0.0; 3],
        }
    }

    pub fn with_offset(mut self, offset: [f32; 3]) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_parent(mut self, parent: Option<usize>) -> Self {
        self.parent = parent;
        self
    }
}

/// World-space frame of one joint pivot, derived from the angles.
#[derive(Clone, Copy, Debug)]
pub struct JointFrame {
    pub position: Vector3<f32>,
    /// Orientation after this joint's own rotation.
    pub rotation: UnitQuaternion<f32>,
    /// World axis about which a positive angle change rotates the joint.
    pub axis: Unit<Vector3<f32>>,
}

#[derive(Clone, Debug)]
pub struct ChainFrames {
    pub joints: Vec<JointFrame>,
    pub effector: Vector3<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinkPose {
    pub joint: usize,
    pub p: [f32; 3],
    pub q: [f32; 4],
}

/// Read-only pose handed to the renderer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RigPose {
    pub links: Vec<LinkPose>,
    pub effector: [f32; 3],
}

#[derive(Clone, Debug)]
pub struct KinematicChain {
    joints: Vec<JointSpec>,
    tip_offset: Vector3<f32>,
}

impl KinematicChain {
    pub fn new(joints: Vec<JointSpec>, tip_offset: [f32; 3]) -> Result<Self, ChainError> {
        if joints.is_empty() {
            return Err(ChainError::Empty);
        }
        for (index, joint) in joints.iter().enumerate() {
            if joint.id != index {
                return Err(ChainError::MisplacedId {
                    joint: joint.id,
                    index,
                });
            }
            if let Some(parent) = joint.parent {
                if parent >= index {
                    return Err(ChainError::ParentNotBefore {
                        joint: index,
                        parent,
                    });
                }
            }
            if !joint.limits.is_valid() {
                return Err(ChainError::InvalidLimits {
                    joint: index,
                    min_deg: joint.limits.min_deg,
                    max_deg: joint.limits.max_deg,
                });
            }
            if !joint.offset.iter().all(|v| v.is_finite()) {
                return Err(ChainError::NonFiniteOffset { joint: index });
            }
        }
        if !tip_offset.iter().all(|v| v.is_finite()) {
            return Err(ChainError::NonFiniteOffset {
                joint: joints.len() - 1,
            });
        }
        Ok(Self {
            joints,
            tip_offset: Vector3::from(tip_offset),
        })
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn joints(&self) -> &[JointSpec] {
        &self.joints
    }

    pub fn spec(&self, joint: usize) -> Option<&JointSpec> {
        self.joints.get(joint)
    }

    pub fn clamp(&self, joint: usize, deg: f32) -> f32 {
        match self.joints.get(joint) {
            Some(spec) => spec.limits.clamp(deg),
            None => deg,
        }
    }

    /// Angles all at zero, clamped into each joint's range.
    pub fn rest_angles(&self) -> Vec<f32> {
        self.joints.iter().map(|j| j.limits.clamp(0.0)).collect()
    }

    /// Evaluate every joint frame and the end-effector for `angles_deg`.
    ///
    /// Missing or non-finite angles evaluate as zero.
    pub fn frames(&self, angles_deg: &[f32]) -> ChainFrames {
        let mut frames: Vec<JointFrame> = Vec::with_capacity(self.joints.len());
        for (index, joint) in self.joints.iter().enumerate() {
            let (parent_position, parent_rotation) = match joint.parent {
                Some(parent) => (frames[parent].position, frames[parent].rotation),
                None => (Vector3::zeros(), UnitQuaternion::identity()),
            };
            let angle = angles_deg
                .get(index)
                .copied()
                .filter(|a| a.is_finite())
                .unwrap_or(0.0);
            let local_axis = joint.axis.unit();
            let position = parent_position + parent_rotation * Vector3::from(joint.offset);
            let factor = joint.sign.factor();
            let axis = Unit::new_unchecked(parent_rotation * (local_axis.into_inner() * factor));
            let spin = UnitQuaternion::from_axis_angle(&local_axis, (factor * angle).to_radians());
            frames.push(JointFrame {
                position,
                rotation: parent_rotation * spin,
                axis,
            });
        }

        let effector = match frames.last() {
            Some(tip) => tip.position + tip.rotation * self.tip_offset,
            None => self.tip_offset,
        };
        ChainFrames {
            joints: frames,
            effector,
        }
    }

    pub fn effector(&self, angles_deg: &[f32]) -> Vector3<f32> {
        self.frames(angles_deg).effector
    }

    pub fn pose(&self, angles_deg: &[f32]) -> RigPose {
        let frames = self.frames(angles_deg);
        let links = frames
            .joints
            .iter()
            .enumerate()
            .map(|(joint, frame)| {
                let q = frame.rotation;
                LinkPose {
                    joint,
                    p: [frame.position.x, frame.position.y, frame.position.z],
                    q: [q.i, q.j, q.k, q.w],
                }
            })
            .collect();
        RigPose {
            links,
            effector: [frames.effector.x, frames.effector.y, frames.effector.z],
        }
    }
}

/// The two historical sign conventions of the right-arm rig.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArmConvention {
    ForwardNegative,
    ForwardPositive,
}

impl ArmConvention {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "forward-negative" | "forward_negative" | "negative" => Some(Self::ForwardNegative),
            "forward-positive" | "forward_positive" | "positive" => Some(Self::ForwardPositive),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ForwardNegative => "forward-negative",
            Self::ForwardPositive => "forward-positive",
        }
    }

    pub fn signs(self) -> [Sign; ARM_JOINT_COUNT] {
        match self {
            Self::ForwardNegative => FORWARD_NEGATIVE_SIGNS,
            Self::ForwardPositive => FORWARD_POSITIVE_SIGNS,
        }
    }

    pub fn limits(self) -> [JointLimits; ARM_JOINT_COUNT] {
        match self {
            Self::ForwardNegative => FORWARD_NEGATIVE_LIMITS,
            Self::ForwardPositive => FORWARD_POSITIVE_LIMITS,
        }
    }

    /// Right arm hanging straight down from the shoulder pivot at the origin.
    ///
    /// Shoulder pitch and roll share the pivot, the elbow sits one upper arm below and
    /// the wrist one forearm below that; the effector is the tip of the hand.
    pub fn right_arm(self) -> KinematicChain {
        let signs = self.signs();
        let limits = self.limits();
        let joints = vec![
            JointSpec::new(SHOULDER_PITCH, "shoulder", Axis::X, signs[0], limits[0]),
            JointSpec::new(SHOULDER_ROLL, "upper_arm", Axis::Z, signs[1], limits[1]),
            JointSpec::new(ELBOW_FLEX, "elbow", Axis::X, signs[2], limits[2])
                .with_offset([0.0, -UPPER_ARM_LENGTH, 0.0]),
            JointSpec::new(WRIST_FLEX, "wrist", Axis::X, signs[3], limits[3])
                .with_offset([0.0, -FOREARM_LENGTH, 0.0]),
        ];
        KinematicChain {
            joints,
            tip_offset: vector![0.0, -HAND_LENGTH, 0.0],
        }
    }
}
