//! The rig actor: one task owns the [`Reconciler`] and everything reaches it as a
//! message.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeEvent, LinkStatus};
use crate::protocol::Command;
use crate::reconcile::{Field, Reconciler, RigSnapshot};

pub const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);
const VIEW_REQUEST_CAPACITY: usize = 256;
const VIEW_EVENT_CAPACITY: usize = 64;

/// Input from a connected view.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewRequest {
    DragStart,
    DragMove { target: [f32; 3] },
    DragEnd,
    DragCancel,
    EditBegin { joint: usize, field: Field },
    EditPreview { joint: usize, field: Field, value: f32 },
    EditCommit { joint: usize, field: Field },
    EditCancel { joint: usize, field: Field },
    /// Pointer offset from the dial centre; release with `edit_commit` on `angle`.
    DialDrag { joint: usize, dx: f32, dy: f32 },
    Set { joint: usize, field: Field, value: f32 },
    Nudge { joint: usize, delta: f32 },
    Preset { joint: usize, deg: f32 },
    Home { joint: usize },
    Reset { joint: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    Snapshot { snapshot: RigSnapshot },
    Link { status: LinkStatus },
}

/// What handling one view request produced.
#[derive(Debug, Default)]
struct Effect {
    commands: Vec<Command>,
    snapshot: Option<RigSnapshot>,
}

impl Effect {
    fn command(reconciler: &Reconciler, command: Option<Command>) -> Self {
        Self {
            snapshot: command.as_ref().map(|_| reconciler.snapshot()),
            commands: command.into_iter().collect(),
        }
    }

    fn refresh(reconciler: &Reconciler, changed: bool) -> Self {
        Self {
            commands: Vec::new(),
            snapshot: changed.then(|| reconciler.snapshot()),
        }
    }
}

fn apply_view_request(reconciler: &mut Reconciler, request: ViewRequest) -> Effect {
    match request {
        ViewRequest::DragStart => {
            let started = reconciler.begin_drag();
            Effect::refresh(reconciler, started)
        }
        // the frame loop publishes drag progress at its own rate
        ViewRequest::DragMove { target } => {
            reconciler.drag_to(target);
            Effect::default()
        }
        ViewRequest::DragEnd => match reconciler.end_drag() {
            Some(outcome) => Effect {
                commands: outcome.commands,
                snapshot: Some(outcome.snapshot),
            },
            None => Effect::default(),
        },
        ViewRequest::DragCancel => Effect {
            commands: Vec::new(),
            snapshot: reconciler.cancel_drag(),
        },
        ViewRequest::EditBegin { joint, field } => {
            let begun = reconciler.begin_edit(joint, field);
            Effect::refresh(reconciler, begun)
        }
        ViewRequest::EditPreview { joint, field, value } => {
            let shown = reconciler.preview_edit(joint, field, value);
            Effect::refresh(reconciler, shown)
        }
        ViewRequest::EditCommit { joint, field } => {
            let command = reconciler.commit_edit(joint, field);
            Effect::command(reconciler, command)
        }
        ViewRequest::EditCancel { joint, field } => {
            let cancelled = reconciler.cancel_edit(joint, field);
            Effect::refresh(reconciler, cancelled)
        }
        ViewRequest::DialDrag { joint, dx, dy } => {
            let shown = reconciler.dial_drag(joint, dx, dy);
            Effect::refresh(reconciler, shown)
        }
        ViewRequest::Set { joint, field, value } => {
            let command = reconciler.set_and_commit(joint, field, value);
            Effect::command(reconciler, command)
        }
        ViewRequest::Nudge { joint, delta } => {
            let command = reconciler.nudge(joint, delta);
            Effect::command(reconciler, command)
        }
        ViewRequest::Preset { joint, deg } => {
            let command = reconciler.preset(joint, deg);
            Effect::command(reconciler, command)
        }
        ViewRequest::Home { joint } => Effect {
            commands: reconciler.home(joint).into_iter().collect(),
            snapshot: None,
        },
        ViewRequest::Reset { joint } => Effect {
            commands: reconciler.reset(joint).into_iter().collect(),
            snapshot: None,
        },
    }
}

/// Cheap, cloneable access to a running rig.
#[derive(Clone, Debug)]
pub struct RigHandle {
    requests: mpsc::Sender<ViewRequest>,
    events: broadcast::Sender<ViewEvent>,
    latest: watch::Receiver<RigSnapshot>,
    link: watch::Receiver<LinkStatus>,
}

impl RigHandle {
    pub async fn request(&self, request: ViewRequest) -> Result<(), String> {
        self.requests
            .send(request)
            .await
            .map_err(|_| "rig is not running".to_string())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> RigSnapshot {
        self.latest.borrow().clone()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link.borrow().clone()
    }
}

pub struct RigActor {
    reconciler: Reconciler,
    requests: mpsc::Receiver<ViewRequest>,
    bridge: mpsc::Receiver<BridgeEvent>,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ViewEvent>,
    latest: watch::Sender<RigSnapshot>,
    link: watch::Sender<LinkStatus>,
}

impl RigActor {
    pub fn new(
        reconciler: Reconciler,
        bridge: mpsc::Receiver<BridgeEvent>,
        commands: mpsc::Sender<Command>,
    ) -> (Self, RigHandle) {
        let (request_tx, request_rx) = mpsc::channel(VIEW_REQUEST_CAPACITY);
        let (events, _) = broadcast::channel(VIEW_EVENT_CAPACITY);
        let (latest_tx, latest_rx) = watch::channel(reconciler.snapshot());
        let (link_tx, link_rx) = watch::channel(LinkStatus::Disconnected {
            reason: "not connected yet".to_string(),
        });
        let handle = RigHandle {
            requests: request_tx,
            events: events.clone(),
            latest: latest_rx,
            link: link_rx,
        };
        let actor = Self {
            reconciler,
            requests: request_rx,
            bridge,
            commands,
            events,
            latest: latest_tx,
            link: link_tx,
        };
        (actor, handle)
    }

    /// Run the frame loop until every [`RigHandle`] is dropped.
    pub async fn run(mut self) {
        let mut frames = tokio::time::interval(FRAME_INTERVAL);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut bridge_open = true;
        info!(
            "rig running with {} joints at {:.0} Hz",
            self.reconciler.chain().len(),
            1.0 / FRAME_INTERVAL.as_secs_f32()
        );

        loop {
            tokio::select! {
                _ = frames.tick() => {
                    if let Some(snapshot) = self.reconciler.tick(Instant::now()) {
                        self.publish(snapshot);
                    }
                }
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    debug!("view request: {request:?}");
                    let effect = apply_view_request(&mut self.reconciler, request);
                    for command in effect.commands {
                        self.dispatch(command);
                    }
                    if let Some(snapshot) = effect.snapshot {
                        self.publish(snapshot);
                    }
                }
                event = self.bridge.recv(), if bridge_open => match event {
                    Some(BridgeEvent::Telemetry(snapshot)) => {
                        let applied = self.reconciler.apply_telemetry(&snapshot);
                        if applied && !self.reconciler.is_dragging() {
                            let snapshot = self.reconciler.snapshot();
                            self.publish(snapshot);
                        }
                    }
                    Some(BridgeEvent::Link(status)) => {
                        self.link.send_replace(status.clone());
                        let _ = self.events.send(ViewEvent::Link { status });
                    }
                    None => {
                        warn!("bridge channel closed; rig continues on last known state");
                        bridge_open = false;
                    }
                },
            }
        }
        info!("rig stopped");
    }

    fn publish(&self, snapshot: RigSnapshot) {
        self.latest.send_replace(snapshot.clone());
        let _ = self.events.send(ViewEvent::Snapshot { snapshot });
    }

    fn dispatch(&self, command: Command) {
        info!("command: {command:?}");
        if let Err(err) = self.commands.try_send(command) {
            warn!("dropping command, bridge not accepting: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ccd::CcdSolver;
    use crate::chain::ArmConvention;
    use crate::protocol::parse_frame;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        handle: RigHandle,
        bridge: mpsc::Sender<BridgeEvent>,
        commands: mpsc::Receiver<Command>,
    }

    fn start(convention: ArmConvention) -> Harness {
        let reconciler = Reconciler::new(convention.right_arm(), CcdSolver::default());
        let (bridge_tx, bridge_rx) = mpsc::channel(16);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (actor, handle) = RigActor::new(reconciler, bridge_rx, command_tx);
        tokio::spawn(actor.run());
        Harness {
            handle,
            bridge: bridge_tx,
            commands: command_rx,
        }
    }

    async fn next_snapshot(events: &mut broadcast::Receiver<ViewEvent>) -> RigSnapshot {
        loop {
            match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
                ViewEvent::Snapshot { snapshot } => return snapshot,
                ViewEvent::Link { .. } => continue,
            }
        }
    }

    #[test]
    fn view_requests_parse_from_json() {
        let text = r#"{"type":"edit_preview","joint":2,"field":"current","value":900}"#;
        let parsed: ViewRequest = serde_json::from_str(text).unwrap();
        assert_eq!(
            parsed,
            ViewRequest::EditPreview { joint: 2, field: Field::Current, value: 900.0 }
        );
        let parsed: ViewRequest =
            serde_json::from_str(r#"{"type":"drag_move","target":[0.0,-1.5,0.3]}"#).unwrap();
        assert_eq!(parsed, ViewRequest::DragMove { target: [0.0, -1.5, 0.3] });
    }

    #[tokio::test]
    async fn telemetry_and_commands_flow_through_the_actor() {
        let mut rig = start(ArmConvention::ForwardPositive);
        let mut events = rig.handle.subscribe();

        let frame = parse_frame(r#"{"j":2,"a":10,"t":10,"s":30,"f":1}"#).unwrap().unwrap();
        rig.bridge.send(BridgeEvent::Telemetry(frame)).await.unwrap();
        let snapshot = next_snapshot(&mut events).await;
        assert_eq!(snapshot.joints[2].angle_deg, 10.0);
        assert_eq!(rig.handle.snapshot(), snapshot);

        rig.handle
            .request(ViewRequest::Set { joint: 0, field: Field::Speed, value: 120.0 })
            .await
            .unwrap();
        let command = timeout(WAIT, rig.commands.recv()).await.unwrap().unwrap();
        assert_eq!(command, Command::Speed { joint: 0, v: 120.0 });

        rig.handle.request(ViewRequest::Home { joint: 1 }).await.unwrap();
        let command = timeout(WAIT, rig.commands.recv()).await.unwrap().unwrap();
        assert_eq!(command, Command::Home { joint: 1 });
    }

    #[tokio::test]
    async fn drag_gesture_commits_moves_on_release() {
        let mut rig = start(ArmConvention::ForwardNegative);
        let mut events = rig.handle.subscribe();

        rig.handle.request(ViewRequest::DragStart).await.unwrap();
        let started = next_snapshot(&mut events).await;
        assert!(started.dragging);

        let hand = started.pose.effector;
        let target = [hand[0], hand[1] - 0.1, hand[2] + 0.3];
        rig.handle.request(ViewRequest::DragMove { target }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        rig.handle.request(ViewRequest::DragEnd).await.unwrap();

        let command = timeout(WAIT, rig.commands.recv()).await.unwrap().unwrap();
        match command {
            Command::Move { joint, deg } => {
                assert_eq!(joint, 0);
                assert!(deg < 0.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
        let mut last = next_snapshot(&mut events).await;
        while last.dragging {
            last = next_snapshot(&mut events).await;
        }
        assert!(last.locks.is_empty());
    }

    #[tokio::test]
    async fn link_status_is_tracked_and_broadcast() {
        let rig = start(ArmConvention::ForwardNegative);
        let mut events = rig.handle.subscribe();
        let status = LinkStatus::Connected { url: "ws://bridge/".to_string() };
        rig.bridge.send(BridgeEvent::Link(status.clone())).await.unwrap();
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            ViewEvent::Link { status: seen } => assert_eq!(seen, status),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(rig.handle.link_status(), status);
    }
}
