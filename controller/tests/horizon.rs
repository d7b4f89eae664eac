#![allow(non_snake_case)]

use approx::assert_abs_diff_eq;

use control_model::LinearModel;
use controller::{
    ConstraintLine, ConstraintMode, ControlOutcome, CovarianceGrowth, MpcConfig, MpcController,
    NoSolution,
};
use estimator::Belief;
use prelude::*;

// Double integrator with a 0.1s step
fn model() -> LinearModel {
    LinearModel {
        op: Vector::zeros(2),
        A: Matrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]),
        B: Matrix::from_column_slice(2, 1, &[0.005, 0.1]),
        b: Vector::zeros(2),
    }
}

fn config(mode: ConstraintMode) -> MpcConfig {
    MpcConfig {
        horizon: 10,
        Q_cost: Matrix::from_diagonal(&Vector::from_column_slice(&[1.0, 0.1])),
        R_cost: Matrix::from_element(1, 1, 0.01),
        x_setpoint: Vector::from_column_slice(&[1.0, 0.0]),
        u_setpoint: Vector::zeros(1),
        u_max: Vector::from_element(1, INFINITY),
        u_delta_max: Vector::from_element(1, INFINITY),
        // x[0] <= 0.5
        line: ConstraintLine::new(Vector::from_column_slice(&[-1.0, 0.0]), 0.5),
        mode,
        disturbance: Vector::zeros(2),
        time_limit: None,
    }
}

fn chance(kappa: float) -> ConstraintMode {
    ConstraintMode::ChanceConstrained {
        kappa,
        growth: CovarianceGrowth::Compound,
        process_noise: Matrix::identity(2, 2) * 1e-3,
    }
}

fn belief() -> Belief {
    Belief::new(Vector::zeros(2), Matrix::identity(2, 2) * 0.01)
}

fn solved(outcome: ControlOutcome) -> controller::ControlSolution {
    match outcome {
        ControlOutcome::Optimal(solution) => solution,
        ControlOutcome::NoSolution(reason) => panic!("no solution: {}", reason),
    }
}

#[test]
fn unconstrained_tracks_setpoint() {
    let _ = env_logger::builder().is_test(true).try_init();
    let m = model();
    let controller = MpcController::new(config(ConstraintMode::Unconstrained)).unwrap();

    let mut x = Vector::zeros(2);
    for _ in 0..60 {
        let b = Belief::new(x.clone(), Matrix::identity(2, 2) * 0.01);
        let outcome = controller.solve(&m, &b, None).unwrap();
        let u = outcome.input().unwrap().clone();
        x = m.propagate(&x, &u);
    }
    assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(x[1], 0.0, epsilon = 1e-3);
}

#[test]
fn predicted_states_respect_margins() {
    let _ = env_logger::builder().is_test(true).try_init();
    let m = model();

    for mode in vec![ConstraintMode::Mean, chance(2.0)] {
        let controller = MpcController::new(config(mode)).unwrap();
        let solution = solved(controller.solve(&m, &belief(), None).unwrap());

        assert_eq!(solution.states.len(), 11);
        assert_eq!(solution.inputs.len(), 10);
        assert_eq!(solution.margins.len(), 10);
        assert_abs_diff_eq!(solution.states[0], belief().mean, epsilon = 1e-6);

        let line = &controller.config().line;
        for (x, &margin) in solution.states[1..].iter().zip(&solution.margins) {
            assert!(line.direction.dot(x) >= margin - 1e-6);
        }
        for k in 0..10 {
            let x_next = m.propagate(&solution.states[k], &solution.inputs[k]);
            assert_abs_diff_eq!(x_next, solution.states[k + 1], epsilon = 1e-6);
        }
    }
}

#[test]
fn chance_mode_is_more_conservative() {
    let m = model();
    let furthest = |mode| {
        let controller = MpcController::new(config(mode)).unwrap();
        let solution = solved(controller.solve(&m, &belief(), None).unwrap());
        solution.states.iter().map(|x| x[0]).fold(NEG_INFINITY, max)
    };

    let mean = furthest(ConstraintMode::Mean);
    let cautious = furthest(chance(2.0));
    let very_cautious = furthest(chance(3.0));

    // The mean trajectory runs up to the line
    assert_abs_diff_eq!(mean, 0.5, epsilon = 1e-4);
    // One step ahead the standard deviation along the line is above 0.1
    assert!(cautious < mean - 0.2);
    assert!(very_cautious < mean - 0.3);
}

#[test]
fn inputs_respect_limits() {
    let mut c = config(ConstraintMode::Mean);
    c.u_max = Vector::from_element(1, 0.3);
    c.u_delta_max = Vector::from_element(1, 0.1);
    let controller = MpcController::new(c).unwrap();

    let u_prev = Vector::from_element(1, 0.25);
    let solution = solved(controller.solve(&model(), &belief(), Some(&u_prev)).unwrap());

    let mut previous = u_prev[0];
    for u in &solution.inputs {
        assert!(u[0].abs() <= 0.3 + 1e-6);
        assert!((u[0] - previous).abs() <= 0.1 + 1e-6);
        previous = u[0];
    }
    // The first step is bounded relative to the previous input
    assert!(solution.inputs[0][0] >= 0.15 - 1e-6);
}

#[test]
fn no_solution_when_inputs_are_locked() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut c = config(ConstraintMode::Mean);
    c.u_max = Vector::zeros(1);
    // x[0] >= 5 from the first step, unreachable from rest without input
    c.line = ConstraintLine::new(Vector::from_column_slice(&[1.0, 0.0]), -5.0);
    let controller = MpcController::new(c).unwrap();

    let outcome = controller.solve(&model(), &belief(), None).unwrap();
    assert!(!outcome.is_optimal());
    assert!(outcome.input().is_none());
    match outcome {
        ControlOutcome::NoSolution(NoSolution::Infeasible) => (),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn locked_inputs_without_a_line_apply_nothing() {
    let mut c = config(ConstraintMode::Unconstrained);
    c.u_max = Vector::zeros(1);
    let controller = MpcController::new(c).unwrap();

    let solution = solved(controller.solve(&model(), &belief(), None).unwrap());
    for u in &solution.inputs {
        assert_abs_diff_eq!(u[0], 0.0, epsilon = 1e-6);
    }
}

#[test]
fn solves_do_not_share_state() {
    let m = model();
    let controller = MpcController::new(config(chance(2.0))).unwrap();

    let first = solved(controller.solve(&m, &belief(), None).unwrap());

    // Apply the first move and re-plan from the propagated belief
    let u = first.first_input().clone();
    let next = Belief::new(
        m.propagate(&belief().mean, &u),
        &m.A * &belief().covariance * m.A.transpose() + Matrix::identity(2, 2) * 1e-3,
    );
    let replanned = solved(controller.solve(&m, &next, Some(&u)).unwrap());

    // A controller that never saw the first problem must agree
    let fresh = MpcController::new(config(chance(2.0))).unwrap();
    let from_fresh = solved(fresh.solve(&m, &next, Some(&u)).unwrap());
    assert_eq!(replanned.inputs, from_fresh.inputs);
    assert_eq!(replanned.margins, from_fresh.margins);

    // Re-solving the first problem gives the first answer again
    let again = solved(controller.solve(&m, &belief(), None).unwrap());
    assert_eq!(again.inputs, first.inputs);
}

#[test]
fn time_limit_gives_no_solution() {
    let mut c = config(ConstraintMode::Mean);
    c.horizon = 200;
    c.time_limit = Some(1e-9);
    let controller = MpcController::new(c).unwrap();

    let outcome = controller.solve(&model(), &belief(), None).unwrap();
    match outcome {
        ControlOutcome::NoSolution(NoSolution::TimeLimit) => (),
        other => panic!("unexpected {:?}", other),
    }
}
