//! Scalar summaries of a run.

use controller::ConstraintLine;
use prelude::*;

/// Mean absolute relative error of `estimates` against `truth` per state, in percent.
pub fn tracking_error(truth: &[Vector], estimates: &[Vector]) -> Vec<float> {
    let n = truth.first().map_or(0, |x| x.len());
    let count = min(truth.len(), estimates.len());
    if count == 0 {
        return vec![0.0; n];
    }

    (0..n)
        .map(|i| {
            let total: float = truth
                .iter()
                .zip(estimates)
                .map(|(x, y)| ((x[i] - y[i]) / x[i]).abs())
                .sum();
            total / count as float * 100.0
        })
        .collect()
}

/// Mean absolute deviation of the inputs from `u_setpoint`, converted from kJ/min to kW.
pub fn energy(inputs: &[Vector], u_setpoint: &Vector) -> float {
    if inputs.is_empty() {
        return 0.0;
    }
    let total: float = inputs.iter().map(|u| (u - u_setpoint).abs().sum()).sum();
    total / (60.0 * inputs.len() as float)
}

/// Signed distance of each state from the safety line, negative when violated.
pub fn clearances(states: &[Vector], line: &ConstraintLine) -> Vec<float> {
    states.iter().map(|x| line.clearance(x)).collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Violations {
    pub count: usize,
    /// Time spent on the unsafe side in minutes.
    pub duration: float,
    /// Time integral of the violation depth measured in standard deviations along the line.
    /// Zero or negative.
    pub severity: float,
    pub closest_safe: Option<float>,
    pub deepest: Option<float>,
}

/// Summarises how `states` sat against `line`, scaling depth by the matching `covariances`.
pub fn violations(
    states: &[Vector],
    covariances: &[Matrix],
    line: &ConstraintLine,
    dt: float,
) -> Violations {
    let d = &line.direction;
    let mut summary = Violations::default();

    for (x, P) in states.iter().zip(covariances) {
        let clearance = line.clearance(x);
        if clearance < 0.0 {
            let sigma = d.dot(&(P * d)).sqrt();
            summary.count += 1;
            summary.severity -= line.value(x).abs() / sigma;
            summary.deepest = Some(summary.deepest.map_or(clearance, |c| min(c, clearance)));
        } else {
            summary.closest_safe =
                Some(summary.closest_safe.map_or(clearance, |c| min(c, clearance)));
        }
    }

    summary.duration = summary.count as float * dt;
    summary.severity *= dt;
    summary
}
