// Constrained linear approximation optimizer in the COBYLA manner:
// derivative-free trust region search for the design point
use crate::method::ReliabilityMethod;
use crate::result::{ConvergenceReport, DesignPoint, ReliabilityResult};
use crate::rng::RunRng;
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{CobylaSettings, RandomSettings};
use crate::startpoint::start_point;
use crate::transform::U_MAX;
use crate::validation::Severity;

pub struct CobylaMethod {
    pub settings: CobylaSettings,
    pub random: RandomSettings,
}

impl CobylaMethod {
    pub fn new(settings: CobylaSettings, random: RandomSettings) -> Self {
        CobylaMethod { settings, random }
    }

    /// Z value and linear constraint model from an axis-aligned simplex
    /// with edge `rho` at `u`. One batched evaluation per iteration.
    fn linear_model(
        runner: &mut ModelRunner,
        u: &[f64],
        rho: f64,
    ) -> (f64, Vec<f64>) {
        let n = u.len();
        let mut samples = vec![Sample::new(u.to_vec())];
        for i in 0..n {
            let mut vertex = u.to_vec();
            vertex[i] += rho;
            samples.push(Sample::new(vertex));
        }
        runner.z_values(&mut samples);
        let z0 = samples[0].z;
        let gradient = (0..n).map(|i| (samples[i + 1].z - z0) / rho).collect();
        (z0, gradient)
    }
}

impl ReliabilityMethod for CobylaMethod {
    fn name(&self) -> &'static str {
        "COBYLA"
    }

    /// Minimize the distance to the origin subject to Z = 0. Each
    /// iteration solves the linearized problem inside the trust
    /// region; rejected steps shrink the region until it collapses to
    /// the final radius.
    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };
        if n == 0 {
            let mut sample = Sample::new(vec![]);
            runner.z_value(&mut sample);
            result.beta = if sample.z < 0.0 { -U_MAX } else { U_MAX };
            result.convergence.converged = true;
            result.messages = runner.take_messages();
            return result;
        }

        let mut rng = RunRng::from_settings(&self.random);
        let mut u = start_point(&self.settings.start, runner, &mut rng);
        let z_origin = {
            let mut sample = Sample::new(vec![0.0; n]);
            runner.z_value(&mut sample);
            sample.z
        };
        let beta_sign = if z_origin < 0.0 { -1.0 } else { 1.0 };

        let mut rho = self.settings.initial_trust;
        let mut penalty = 1.0_f64;
        let mut z = f64::INFINITY;
        let mut converged = false;
        let mut stopped = false;
        let mut iteration = 0usize;

        let norm = |v: &[f64]| v.iter().map(|a| a * a).sum::<f64>().sqrt();
        let merit = |v: &[f64], z: f64, penalty: f64| norm(v) + penalty * z.abs();

        while iteration < self.settings.maximum_iterations && rho > self.settings.final_trust {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            iteration += 1;
            runner.set_iteration(iteration);

            let (z0, gradient) = Self::linear_model(runner, &u, rho);
            z = z0;
            let gradient_norm = norm(&gradient);
            if gradient_norm < 1e-12 {
                runner.message(
                    Severity::Warning,
                    "cobyla",
                    format!("flat constraint model at iteration {}", iteration),
                );
                rho *= 0.5;
                continue;
            }
            penalty = penalty.max(2.0 / gradient_norm);

            // linearized solution: the foot of the origin on z = 0
            let alpha: Vec<f64> = gradient.iter().map(|g| g / gradient_norm).collect();
            let projection: f64 =
                alpha.iter().zip(u.iter()).map(|(a, b)| a * b).sum::<f64>() - z0 / gradient_norm;
            let target: Vec<f64> = alpha.iter().map(|a| a * projection).collect();
            let mut step: Vec<f64> = target.iter().zip(u.iter()).map(|(t, v)| t - v).collect();
            let step_norm = norm(&step);
            if step_norm > rho {
                let shrink = rho / step_norm;
                for s in step.iter_mut() {
                    *s *= shrink;
                }
            }

            let candidate: Vec<f64> = u.iter().zip(step.iter()).map(|(v, s)| v + s).collect();
            let mut sample = Sample::new(candidate.clone());
            runner.z_value(&mut sample);

            let current = merit(&u, z0, penalty);
            let proposed = merit(&candidate, sample.z, penalty);
            if proposed < current {
                u = candidate;
                z = sample.z;
                // a full step that helps earns a wider region
                if step_norm >= 0.9 * rho {
                    rho = (rho * 1.5).min(self.settings.initial_trust);
                }
            } else {
                rho *= 0.5;
            }

            result.iterations.push(ReliabilityResult {
                iteration,
                beta: norm(&u) * beta_sign,
                z,
                u: u.clone(),
            });
            runner.progress.step(iteration, self.settings.maximum_iterations, norm(&u) * beta_sign, rho);
        }

        if rho <= self.settings.final_trust && z.abs() < 10.0 * self.settings.final_trust {
            converged = true;
        } else if !stopped {
            runner.message(
                Severity::Warning,
                "cobyla",
                format!(
                    "stopped with trust radius {:.2e} and |z| = {:.2e}",
                    rho,
                    z.abs()
                ),
            );
        }

        let beta = norm(&u) * beta_sign;
        let mut messages = runner.take_messages();
        result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
        result.beta = beta;
        result.convergence = ConvergenceReport {
            converged,
            iterations: iteration,
            convergence: rho,
            stopped,
            ..Default::default()
        };
        result.evaluations = runner.take_evaluations();
        result.messages = messages;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::correlation::CorrelationModel;
    use crate::settings::{RunSettings, StochastSettingsSet};
    use crate::stochast::Stochast;
    use crate::uconvert::UConverter;

    fn runner(z: crate::runner::ZFunction) -> ModelRunner {
        let stochasts = vec![
            (String::from("x1"), Stochast::standard_normal()),
            (String::from("x2"), Stochast::standard_normal()),
        ];
        let converter = UConverter::new(
            stochasts,
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap();
        ModelRunner::new(converter, z, RunSettings::default())
    }

    #[test]
    fn linear_limit_state() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.0 - s.x[0];
        });
        let mut runner = runner(z);
        let mut method = CobylaMethod::new(CobylaSettings::default(), RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.converged);
        assert!((result.beta - 2.0).abs() < 0.05);
    }

    #[test]
    fn curved_limit_state() {
        // circle of radius 2.5 around the origin
        let z = Arc::new(|s: &mut Sample| {
            s.z = s.x[0] * s.x[0] + s.x[1] * s.x[1] - 6.25;
        });
        let mut runner = runner(z);
        let settings = CobylaSettings {
            maximum_iterations: 200,
            ..Default::default()
        };
        let mut method = CobylaMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!((result.beta.abs() - 2.5).abs() < 0.1);
    }

    #[test]
    fn iteration_budget_is_respected() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.0 - s.x[0];
        });
        let mut runner = runner(z);
        let settings = CobylaSettings {
            maximum_iterations: 3,
            ..Default::default()
        };
        let mut method = CobylaMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.iterations <= 3);
    }
}
