use arm_rig::chain::{ARM_JOINT_COUNT, SHOULDER_PITCH};
use arm_rig::{ArmConvention, CcdConfig, CcdSolver};
use nalgebra::vector;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[test]
fn forward_reach_closes_distance_every_iteration() {
    let chain = ArmConvention::ForwardNegative.right_arm();
    let single_sweep = CcdSolver::new(CcdConfig {
        iterations: 1,
        damping: 0.6,
    });
    let mut angles = vec![0.0; ARM_JOINT_COUNT];
    let target = chain.effector(&angles) + vector![0.0, -0.1, 0.3];

    let initial = (chain.effector(&angles) - target).norm();
    let mut previous = initial;
    for iteration in 0..10 {
        let report = single_sweep.solve(&chain, &mut angles, target);
        assert!(
            report.distance < previous,
            "iteration {iteration}: {} after {previous}",
            report.distance
        );
        previous = report.distance;
    }
    assert!(previous < initial);
    assert!(angles[SHOULDER_PITCH] < 0.0, "angles={angles:?}");
}

#[test]
fn ten_iteration_solve_matches_stepwise_sweeps() {
    let chain = ArmConvention::ForwardNegative.right_arm();
    let target = chain.effector(&[0.0; ARM_JOINT_COUNT]) + vector![0.0, -0.1, 0.3];

    let mut batched = vec![0.0; ARM_JOINT_COUNT];
    let report = CcdSolver::default().solve(&chain, &mut batched, target);

    let single_sweep = CcdSolver::new(CcdConfig {
        iterations: 1,
        damping: 0.6,
    });
    let mut stepped = vec![0.0; ARM_JOINT_COUNT];
    for _ in 0..10 {
        single_sweep.solve(&chain, &mut stepped, target);
    }
    assert_eq!(report.iterations, 10);
    for (a, b) in batched.iter().zip(&stepped) {
        assert!((a - b).abs() < 1e-4, "batched={batched:?} stepped={stepped:?}");
    }
}

#[test]
fn target_at_effector_leaves_angles_in_place() {
    let solver = CcdSolver::default();
    for convention in [ArmConvention::ForwardNegative, ArmConvention::ForwardPositive] {
        let chain = convention.right_arm();
        let start: Vec<f32> = match convention {
            ArmConvention::ForwardNegative => vec![-35.0, -20.0, -60.0, 15.0],
            ArmConvention::ForwardPositive => vec![35.0, 20.0, 60.0, 15.0],
        };
        let mut angles = start.clone();
        let target = chain.effector(&angles);
        let report = solver.solve(&chain, &mut angles, target);
        assert!(report.distance < 1e-4);
        for (after, before) in angles.iter().zip(&start) {
            assert!((after - before).abs() < 1e-3, "{convention:?}: {angles:?}");
        }
    }
}

#[test]
fn solver_never_leaves_joint_limits() {
    let mut rng = SmallRng::seed_from_u64(0x5eed_a12b);
    for convention in [ArmConvention::ForwardNegative, ArmConvention::ForwardPositive] {
        let chain = convention.right_arm();
        for case in 0..400 {
            let iterations = rng.random_range(0..=3usize);
            let solver = CcdSolver::new(CcdConfig {
                iterations,
                damping: rng.random_range(0.05..=1.0f32),
            });
            let mut angles: Vec<f32> = (0..ARM_JOINT_COUNT)
                .map(|_| match rng.random_range(0..10u32) {
                    0 => f32::NAN,
                    1 => rng.random_range(-1000.0..1000.0f32),
                    _ => rng.random_range(-200.0..200.0f32),
                })
                .collect();
            let target = match case % 5 {
                0 => vector![f32::INFINITY, 0.0, 0.0],
                1 => vector![0.0, 0.0, 0.0],
                2 => vector![
                    rng.random_range(-50.0..50.0f32),
                    rng.random_range(-50.0..50.0f32),
                    rng.random_range(-50.0..50.0f32)
                ],
                _ => vector![
                    rng.random_range(-2.0..2.0f32),
                    rng.random_range(-2.0..2.0f32),
                    rng.random_range(-2.0..2.0f32)
                ],
            };
            solver.solve(&chain, &mut angles, target);
            for (angle, spec) in angles.iter().zip(chain.joints()) {
                assert!(
                    spec.limits.contains(*angle),
                    "{convention:?} case {case}: joint {} at {angle}",
                    spec.id
                );
            }
        }
    }
}
