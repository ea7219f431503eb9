//! Live joint state shared by telemetry, local edits and the IK drag gesture.
//!
//! Every `(joint, field)` pair has exactly one owner at a time. Telemetry only writes
//! fields it owns; a human edit takes a field over until it commits or cancels; a drag
//! takes over every angle of the chain until it ends. Each committed gesture yields one
//! outbound [`Command`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::angle::DialConvention;
use crate::ccd::{CcdSolver, SolveReport};
use crate::chain::{KinematicChain, RigPose};
use crate::protocol::{
    Command, DEFAULT_MICROSTEP, JointFlags, TelemetrySnapshot, is_valid_microstep,
};

pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(40);
pub const DEFAULT_SPEED: f32 = 30.0;
pub const DEFAULT_ACCEL: f32 = 50_000.0;
pub const DEFAULT_CURRENT_MA: f32 = 1_000.0;
const MAX_SPEED: f32 = 3_000.0;
const MAX_ACCEL: f32 = 100_000.0;
const MAX_CURRENT_MA: f32 = 3_000.0;
const ANGLE_CHANGE_EPSILON: f32 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JointState {
    pub id: usize,
    pub angle_deg: f32,
    pub target_deg: f32,
    pub speed: f32,
    pub accel: f32,
    pub current_ma: f32,
    pub microstep: u32,
    pub flags: JointFlags,
}

impl JointState {
    fn resting(id: usize, angle_deg: f32) -> Self {
        Self {
            id,
            angle_deg,
            target_deg: angle_deg,
            speed: DEFAULT_SPEED,
            accel: DEFAULT_ACCEL,
            current_ma: DEFAULT_CURRENT_MA,
            microstep: DEFAULT_MICROSTEP,
            flags: JointFlags::default(),
        }
    }

    pub fn field(&self, field: Field) -> f32 {
        match field {
            Field::Angle => self.angle_deg,
            Field::Speed => self.speed,
            Field::Accel => self.accel,
            Field::Current => self.current_ma,
            Field::Micro => self.microstep as f32,
        }
    }

    /// What an edit of `field` replaces, so a cancel can put it back.
    fn saved(&self, field: Field) -> SavedField {
        SavedField {
            value: self.field(field),
            target_deg: self.target_deg,
        }
    }

    fn restore(&mut self, field: Field, saved: SavedField) {
        self.set_field(field, saved.value);
        if field == Field::Angle {
            self.target_deg = saved.target_deg;
        }
    }

    fn set_field(&mut self, field: Field, value: f32) {
        match field {
            Field::Angle => {
                self.angle_deg = value;
                self.target_deg = value;
            }
            Field::Speed => self.speed = value,
            Field::Accel => self.accel = value,
            Field::Current => self.current_ma = value,
            Field::Micro => self.microstep = value as u32,
        }
    }

    fn command(&self, field: Field) -> Command {
        let joint = self.id;
        match field {
            Field::Angle => Command::Move {
                joint,
                deg: self.angle_deg,
            },
            Field::Speed => Command::Speed { joint, v: self.speed },
            Field::Accel => Command::Accel { joint, a: self.accel },
            Field::Current => Command::Current {
                joint,
                milliamps: self.current_ma,
            },
            Field::Micro => Command::Micro {
                joint,
                u: self.microstep,
            },
        }
    }
}

/// Editable per-joint quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Angle,
    Speed,
    Accel,
    Current,
    Micro,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOwner {
    Telemetry,
    UserEditing,
    IkOwned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FieldLock {
    pub joint: usize,
    pub field: Field,
    pub owner: FieldOwner,
}

/// Rate limiter for snapshots emitted while a gesture streams updates.
#[derive(Clone, Debug)]
pub struct EmissionSampler {
    interval: Duration,
    last: Option<Instant>,
}

impl EmissionSampler {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True at most once per interval; a skipped sample is dropped, not queued.
    pub fn should_emit(&mut self, now: Instant) -> bool {
        let due = match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    /// Forget the last emission so the next sample always passes.
    pub fn flush(&mut self) {
        self.last = None;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RigSnapshot {
    pub joints: Vec<JointState>,
    pub pose: RigPose,
    pub locks: Vec<FieldLock>,
    pub dragging: bool,
    pub drag_target: Option<[f32; 3]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DragOutcome {
    pub snapshot: RigSnapshot,
    pub commands: Vec<Command>,
}

#[derive(Clone, Copy, Debug)]
struct SavedField {
    value: f32,
    target_deg: f32,
}

#[derive(Clone, Debug)]
struct DragGesture {
    target: Vector3<f32>,
    start_angles: Vec<f32>,
    start_targets: Vec<f32>,
    last_report: Option<SolveReport>,
}

#[derive(Debug)]
pub struct Reconciler {
    chain: KinematicChain,
    solver: CcdSolver,
    dial: DialConvention,
    states: BTreeMap<usize, JointState>,
    owners: BTreeMap<(usize, Field), FieldOwner>,
    /// Values a field held before the edit in progress, restored on cancel.
    pre_edit: BTreeMap<(usize, Field), SavedField>,
    drag: Option<DragGesture>,
    sampler: EmissionSampler,
}

impl Reconciler {
    pub fn new(chain: KinematicChain, solver: CcdSolver) -> Self {
        Self {
            chain,
            solver,
            dial: DialConvention::default(),
            states: BTreeMap::new(),
            owners: BTreeMap::new(),
            pre_edit: BTreeMap::new(),
            drag: None,
            sampler: EmissionSampler::new(DEFAULT_EMIT_INTERVAL),
        }
    }

    pub fn with_dial(mut self, dial: DialConvention) -> Self {
        self.dial = dial;
        self
    }

    pub fn with_emit_interval(mut self, interval: Duration) -> Self {
        self.sampler = EmissionSampler::new(interval);
        self
    }

    pub fn chain(&self) -> &KinematicChain {
        &self.chain
    }

    pub fn owner(&self, joint: usize, field: Field) -> FieldOwner {
        self.owners
            .get(&(joint, field))
            .copied()
            .unwrap_or(FieldOwner::Telemetry)
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Current state of `joint`, or the resting defaults if it was never observed.
    pub fn joint(&self, joint: usize) -> Option<JointState> {
        if joint >= self.chain.len() {
            return None;
        }
        Some(
            self.states
                .get(&joint)
                .cloned()
                .unwrap_or_else(|| JointState::resting(joint, self.chain.clamp(joint, 0.0))),
        )
    }

    pub fn angles(&self) -> Vec<f32> {
        (0..self.chain.len())
            .map(|joint| match self.states.get(&joint) {
                Some(state) => state.angle_deg,
                None => self.chain.clamp(joint, 0.0),
            })
            .collect()
    }

    fn state_mut(&mut self, joint: usize) -> &mut JointState {
        let rest = self.chain.clamp(joint, 0.0);
        self.states
            .entry(joint)
            .or_insert_with(|| JointState::resting(joint, rest))
    }

    /// Merge one telemetry snapshot. Fields held by an edit or a drag are left alone.
    pub fn apply_telemetry(&mut self, snapshot: &TelemetrySnapshot) -> bool {
        let joint = snapshot.joint;
        let Some(limits) = self.chain.spec(joint).map(|spec| spec.limits) else {
            warn!("dropping telemetry for unknown joint {joint}");
            return false;
        };
        let owns = |field| self.owner(joint, field) == FieldOwner::Telemetry;
        let (angle, speed, accel, current, micro) = (
            owns(Field::Angle),
            owns(Field::Speed),
            owns(Field::Accel),
            owns(Field::Current),
            owns(Field::Micro),
        );

        let state = self.state_mut(joint);
        if angle {
            state.angle_deg = limits.clamp(snapshot.angle);
            state.target_deg = limits.clamp(snapshot.target.unwrap_or(snapshot.angle));
        }
        if let Some(value) = snapshot.speed.filter(|_| speed) {
            state.speed = value;
        }
        if let Some(value) = snapshot.accel.filter(|_| accel) {
            state.accel = value;
        }
        if let Some(value) = snapshot.current_ma.filter(|_| current) {
            state.current_ma = value;
        }
        if let Some(value) = snapshot.decoded_microstep().filter(|_| micro) {
            state.microstep = value;
        }
        if let Some(flags) = snapshot.decoded_flags() {
            state.flags = flags;
        }
        true
    }

    /// Take a field over for a human edit. Angles held by a drag cannot be edited.
    pub fn begin_edit(&mut self, joint: usize, field: Field) -> bool {
        if joint >= self.chain.len() {
            return false;
        }
        match self.owner(joint, field) {
            FieldOwner::IkOwned => false,
            FieldOwner::UserEditing => true,
            FieldOwner::Telemetry => {
                let saved = self.state_mut(joint).saved(field);
                self.pre_edit.insert((joint, field), saved);
                self.owners.insert((joint, field), FieldOwner::UserEditing);
                true
            }
        }
    }

    /// Optimistically show `value` while the edit is in progress.
    ///
    /// Starts the edit if needed. Invalid values are ignored and leave the field as is.
    pub fn preview_edit(&mut self, joint: usize, field: Field, value: f32) -> bool {
        let Some(value) = self.accept(joint, field, value) else {
            debug!("ignoring {field:?} value {value} for joint {joint}");
            return false;
        };
        if !self.begin_edit(joint, field) {
            return false;
        }
        self.state_mut(joint).set_field(field, value);
        true
    }

    /// Release the edit and produce the single command carrying its final value.
    pub fn commit_edit(&mut self, joint: usize, field: Field) -> Option<Command> {
        if self.owner(joint, field) != FieldOwner::UserEditing {
            return None;
        }
        self.owners.remove(&(joint, field));
        self.pre_edit.remove(&(joint, field));
        Some(self.state_mut(joint).command(field))
    }

    /// Release the edit without a command, restoring the value it replaced.
    pub fn cancel_edit(&mut self, joint: usize, field: Field) -> bool {
        if self.owner(joint, field) != FieldOwner::UserEditing {
            return false;
        }
        self.owners.remove(&(joint, field));
        if let Some(saved) = self.pre_edit.remove(&(joint, field)) {
            self.state_mut(joint).restore(field, saved);
        }
        true
    }

    /// One-shot edit: typed input, presets and buttons.
    pub fn set_and_commit(&mut self, joint: usize, field: Field, value: f32) -> Option<Command> {
        let was_editing = self.owner(joint, field) == FieldOwner::UserEditing;
        if !self.preview_edit(joint, field, value) {
            return None;
        }
        if was_editing {
            // a one-shot write inside an open gesture leaves that gesture open
            return None;
        }
        self.commit_edit(joint, field)
    }

    /// Step the angle by `delta_deg`, rounded to a whole degree then clamped.
    pub fn nudge(&mut self, joint: usize, delta_deg: f32) -> Option<Command> {
        if !delta_deg.is_finite() {
            return None;
        }
        let current = self.joint(joint)?.angle_deg;
        let next = self.chain.clamp(joint, (current + delta_deg).round());
        self.set_and_commit(joint, Field::Angle, next)
    }

    /// Jump to a named pose angle, clamped into the joint's range.
    pub fn preset(&mut self, joint: usize, deg: f32) -> Option<Command> {
        if !deg.is_finite() {
            return None;
        }
        let value = self.chain.clamp(joint, deg);
        self.set_and_commit(joint, Field::Angle, value)
    }

    /// Dial dragged to pointer offset `(dx, dy)`; commit with [`Self::commit_edit`].
    pub fn dial_drag(&mut self, joint: usize, dx: f32, dy: f32) -> bool {
        let Some(limits) = self.chain.spec(joint).map(|spec| spec.limits) else {
            return false;
        };
        let value = self
            .dial
            .value_from_pointer(dx, dy, limits.min_deg, limits.max_deg);
        self.preview_edit(joint, Field::Angle, value)
    }

    pub fn home(&self, joint: usize) -> Option<Command> {
        (joint < self.chain.len()).then_some(Command::Home { joint })
    }

    pub fn reset(&self, joint: usize) -> Option<Command> {
        (joint < self.chain.len()).then_some(Command::Reset { joint })
    }

    /// Start the drag-to-target gesture. The target starts at the current effector.
    ///
    /// Every chain angle becomes IK-owned; angle edits in progress are dropped without
    /// a command.
    pub fn begin_drag(&mut self) -> bool {
        if self.drag.is_some() {
            return false;
        }
        let angles = self.angles();
        let start_targets = (0..self.chain.len())
            .map(|joint| self.joint(joint).map_or(0.0, |state| state.target_deg))
            .collect();
        for joint in 0..self.chain.len() {
            if self.owner(joint, Field::Angle) == FieldOwner::UserEditing {
                debug!("drag supersedes the angle edit on joint {joint}");
                self.pre_edit.remove(&(joint, Field::Angle));
            }
            self.owners.insert((joint, Field::Angle), FieldOwner::IkOwned);
        }
        self.drag = Some(DragGesture {
            target: self.chain.effector(&angles),
            start_angles: angles,
            start_targets,
            last_report: None,
        });
        self.sampler.flush();
        true
    }

    pub fn drag_to(&mut self, target: [f32; 3]) -> bool {
        if !target.iter().all(|v| v.is_finite()) {
            return false;
        }
        match self.drag.as_mut() {
            Some(drag) => {
                drag.target = Vector3::from(target);
                true
            }
            None => false,
        }
    }

    /// Advance one frame. While dragging this runs one solve and returns a snapshot
    /// whenever the emission interval allows.
    pub fn tick(&mut self, now: Instant) -> Option<RigSnapshot> {
        let target = self.drag.as_ref()?.target;
        let mut angles = self.angles();
        let report = self.solver.solve(&self.chain, &mut angles, target);
        for (joint, angle) in angles.into_iter().enumerate() {
            let state = self.state_mut(joint);
            state.angle_deg = angle;
            state.target_deg = angle;
        }
        if let Some(drag) = self.drag.as_mut() {
            drag.last_report = Some(report);
        }
        self.sampler.should_emit(now).then(|| self.snapshot())
    }

    /// Finish the drag: one final snapshot plus a `move` for every joint it changed.
    pub fn end_drag(&mut self) -> Option<DragOutcome> {
        let drag = self.drag.take()?;
        self.release_drag_owners();
        let commands = self
            .angles()
            .into_iter()
            .zip(drag.start_angles)
            .enumerate()
            .filter(|(_, (now, before))| (now - before).abs() > ANGLE_CHANGE_EPSILON)
            .map(|(joint, (deg, _))| Command::Move { joint, deg })
            .collect();
        if let Some(report) = drag.last_report {
            debug!("drag ended {:.4} from target", report.distance);
        }
        Some(DragOutcome {
            snapshot: self.snapshot(),
            commands,
        })
    }

    /// Abandon the drag (lost focus): angles and targets go back to where the gesture
    /// started.
    pub fn cancel_drag(&mut self) -> Option<RigSnapshot> {
        let drag = self.drag.take()?;
        self.release_drag_owners();
        let starts = drag.start_angles.into_iter().zip(drag.start_targets);
        for (joint, (angle, target)) in starts.enumerate() {
            let state = self.state_mut(joint);
            state.angle_deg = angle;
            state.target_deg = target;
        }
        Some(self.snapshot())
    }

    fn release_drag_owners(&mut self) {
        self.owners.retain(|_, owner| *owner != FieldOwner::IkOwned);
        self.sampler.flush();
    }

    pub fn snapshot(&self) -> RigSnapshot {
        let joints: Vec<JointState> = (0..self.chain.len())
            .filter_map(|joint| self.joint(joint))
            .collect();
        let angles: Vec<f32> = joints.iter().map(|state| state.angle_deg).collect();
        let locks = self
            .owners
            .iter()
            .map(|(&(joint, field), &owner)| FieldLock { joint, field, owner })
            .collect();
        RigSnapshot {
            pose: self.chain.pose(&angles),
            joints,
            locks,
            dragging: self.drag.is_some(),
            drag_target: self
                .drag
                .as_ref()
                .map(|drag| [drag.target.x, drag.target.y, drag.target.z]),
        }
    }

    fn accept(&self, joint: usize, field: Field, value: f32) -> Option<f32> {
        let limits = self.chain.spec(joint)?.limits;
        if !value.is_finite() {
            return None;
        }
        let ok = match field {
            Field::Angle => limits.contains(value),
            Field::Speed => (0.0..=MAX_SPEED).contains(&value),
            Field::Accel => (0.0..=MAX_ACCEL).contains(&value),
            Field::Current => (0.0..=MAX_CURRENT_MA).contains(&value),
            Field::Micro => {
                value.fract() == 0.0 && value >= 0.0 && is_valid_microstep(value as u32)
            }
        };
        ok.then_some(value)
    }
}
