use std::time::{Duration, Instant};

use arm_rig::protocol::parse_frame;
use arm_rig::reconcile::{Field, FieldOwner};
use arm_rig::{ArmConvention, CcdSolver, Command, Reconciler};

fn telemetry(rig: &mut Reconciler, text: &str) {
    let snapshot = parse_frame(text).unwrap().unwrap();
    rig.apply_telemetry(&snapshot);
}

#[test]
fn locked_angle_survives_a_telemetry_burst() {
    let mut rig = Reconciler::new(
        ArmConvention::ForwardPositive.right_arm(),
        CcdSolver::default(),
    );
    telemetry(
        &mut rig,
        r#"{"type":"state","j":2,"a":10,"t":10,"s":30,"u":32,"i":1000,"acc":50000,"f":1}"#,
    );

    assert!(rig.dial_drag(2, 0.0, 10.0));
    let held = rig.joint(2).unwrap().angle_deg;
    for angle in [11, 12, 13, 14, 15] {
        telemetry(&mut rig, &format!(r#"{{"j":2,"a":{angle},"s":45}}"#));
        assert_eq!(rig.joint(2).unwrap().angle_deg, held);
    }
    assert_eq!(rig.joint(2).unwrap().speed, 45.0);

    let mut commands = Vec::new();
    commands.extend(rig.commit_edit(2, Field::Angle));
    commands.extend(rig.commit_edit(2, Field::Angle));
    assert_eq!(commands, vec![Command::Move { joint: 2, deg: held }]);
    assert_eq!(rig.owner(2, Field::Angle), FieldOwner::Telemetry);
}

#[test]
fn drag_snapshots_are_rate_limited_with_a_final_flush() {
    let mut rig = Reconciler::new(ArmConvention::ForwardNegative.right_arm(), CcdSolver::default())
        .with_emit_interval(Duration::from_millis(40));
    let start = Instant::now();
    rig.begin_drag();
    rig.drag_to([0.0, -1.5, 0.5]);

    // 60 Hz for 200 ms
    let emitted = (0..12u64)
        .filter(|frame| {
            rig.tick(start + Duration::from_micros(frame * 16_667))
                .is_some()
        })
        .count();
    assert!((4..=6).contains(&emitted), "emitted={emitted}");

    let outcome = rig.end_drag().unwrap();
    assert!(!outcome.snapshot.dragging);
    assert_eq!(outcome.snapshot.joints.len(), 4);
    let moved: Vec<usize> = outcome.commands.iter().map(Command::joint).collect();
    assert!(moved.contains(&0), "moved={moved:?}");
}
