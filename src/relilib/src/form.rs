// First Order Reliability Method with relaxed HLRF iteration
use crate::method::ReliabilityMethod;
use crate::result::{ConvergenceReport, DesignPoint, ReliabilityResult};
use crate::rng::RunRng;
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{FormSettings, RandomSettings};
use crate::startpoint::start_point;
use crate::transform::U_MAX;
use crate::validation::Severity;

pub struct FormMethod {
    pub settings: FormSettings,
    pub random: RandomSettings,
}

impl FormMethod {
    pub fn new(settings: FormSettings, random: RandomSettings) -> Self {
        FormMethod { settings, random }
    }

    /// Two-sided finite difference gradient, evaluated as one batch.
    fn gradient(&self, runner: &mut ModelRunner, u: &[f64]) -> Vec<f64> {
        let n = u.len();
        let h = self.settings.gradient.step_size;
        let mut samples: Vec<Sample> = Vec::with_capacity(2 * n);
        for i in 0..n {
            let mut forward = u.to_vec();
            forward[i] += h;
            let mut backward = u.to_vec();
            backward[i] -= h;
            samples.push(Sample::new(forward));
            samples.push(Sample::new(backward));
        }
        runner.z_values(&mut samples);
        (0..n)
            .map(|i| (samples[2 * i].z - samples[2 * i + 1].z) / (2.0 * h))
            .collect()
    }

    fn z_at(&self, runner: &mut ModelRunner, u: &[f64]) -> f64 {
        let mut sample = Sample::new(u.to_vec());
        runner.z_value(&mut sample);
        sample.z
    }
}

impl ReliabilityMethod for FormMethod {
    fn name(&self) -> &'static str {
        "FORM"
    }

    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };

        if n == 0 {
            let z = self.z_at(runner, &[]);
            result.beta = if z < 0.0 { -U_MAX } else { U_MAX };
            result.convergence.converged = true;
            runner.message(
                Severity::Warning,
                "form",
                String::from("no varying stochasts, reliability is deterministic"),
            );
            result.messages = runner.take_messages();
            return result;
        }

        let mut rng = RunRng::from_settings(&self.random);
        let mut u = start_point(&self.settings.start, runner, &mut rng);

        // Negative Z at the origin means the mean point already fails.
        let z_origin = self.z_at(runner, &vec![0.0; n]);
        let beta_sign = if z_origin < 0.0 { -1.0 } else { 1.0 };
        let z_scale = z_origin.abs().max(1.0);

        let mut relaxation = self.settings.relaxation_factor;
        let mut budget = self.settings.maximum_iterations;
        let mut beta = u.iter().map(|a| a * a).sum::<f64>().sqrt() * beta_sign;
        let mut delta_beta = f64::INFINITY;
        let mut z = f64::INFINITY;
        let mut converged = false;
        let mut iteration = 0usize;
        // trailing window of visited points for the fallback
        let mut history: Vec<(f64, Vec<f64>)> = vec![];

        'outer: for relax_loop in 0..self.settings.relaxation_loops.max(1) {
            if relax_loop > 0 {
                relaxation *= self.settings.relaxation_factor;
                budget = (budget as f64 * self.settings.max_iterations_growth_factor) as usize;
                runner.message(
                    Severity::Info,
                    "form",
                    format!(
                        "restarting with relaxation {:.3} and budget {}",
                        relaxation, budget
                    ),
                );
            }
            for _ in 0..budget {
                if runner.stop.is_stopped() {
                    runner.message(
                        Severity::Warning,
                        "form",
                        String::from("stopped before convergence"),
                    );
                    result.convergence.stopped = true;
                    break 'outer;
                }
                iteration += 1;
                runner.set_iteration(iteration);

                z = self.z_at(runner, &u);
                let gradient = self.gradient(runner, &u);
                let gradient_norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
                if gradient_norm < 1e-12 {
                    runner.message(
                        Severity::Warning,
                        "form",
                        format!("vanishing gradient at iteration {}", iteration),
                    );
                    break 'outer;
                }
                let alpha: Vec<f64> = gradient.iter().map(|g| g / gradient_norm).collect();

                // HLRF step to the tangent plane of Z = 0
                let projection: f64 =
                    alpha.iter().zip(u.iter()).map(|(a, b)| a * b).sum::<f64>()
                        - z / gradient_norm;
                let target: Vec<f64> = alpha.iter().map(|a| a * projection).collect();
                let next: Vec<f64> = u
                    .iter()
                    .zip(target.iter())
                    .map(|(old, new)| old + relaxation * (new - old))
                    .collect();

                let next_beta =
                    next.iter().map(|a| a * a).sum::<f64>().sqrt() * beta_sign;
                delta_beta = (next_beta - beta).abs();
                u = next;
                beta = next_beta;

                history.push((z.abs(), u.clone()));
                if history.len() > 10 {
                    history.remove(0);
                }
                result.iterations.push(ReliabilityResult {
                    iteration,
                    beta,
                    z,
                    u: u.clone(),
                });
                runner.progress.step(
                    iteration,
                    relax_loop,
                    beta,
                    delta_beta,
                );

                if delta_beta < self.settings.epsilon_beta
                    && z.abs() / z_scale < self.settings.epsilon_z
                {
                    converged = true;
                    break 'outer;
                }
            }
        }

        if !converged && !result.convergence.stopped {
            runner.message(
                Severity::Warning,
                "form",
                format!(
                    "no convergence after {} iterations (|dbeta| = {:.2e}, |z| = {:.2e})",
                    iteration,
                    delta_beta,
                    z.abs()
                ),
            );
            if self.settings.filter_at_non_convergence {
                // fall back to the visited point closest to the surface
                if let Some((_, best)) = history
                    .iter()
                    .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                {
                    u = best.clone();
                    beta = u.iter().map(|a| a * a).sum::<f64>().sqrt() * beta_sign;
                    runner.message(
                        Severity::Info,
                        "form",
                        String::from("using the trailing iterate nearest to Z = 0"),
                    );
                }
            }
        }

        let mut messages = runner.take_messages();
        result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
        result.beta = beta;
        result.convergence = ConvergenceReport {
            converged,
            iterations: iteration,
            convergence: delta_beta,
            stopped: result.convergence.stopped,
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

    fn two_normal_runner(mean: f64, z: crate::runner::ZFunction) -> ModelRunner {
        let stochasts = vec![
            (
                String::from("x1"),
                Stochast::Normal {
                    mean,
                    deviation: 1.0,
                },
            ),
            (
                String::from("x2"),
                Stochast::Normal {
                    mean,
                    deviation: 1.0,
                },
            ),
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
    fn linear_sum_of_normals() {
        // Z = x1 + x2 - 10 with x ~ N(6.65, 1): beta = 3.3 / sqrt(2)
        let z = Arc::new(|s: &mut Sample| {
            s.z = s.x[0] + s.x[1] - 10.0;
        });
        let mut runner = two_normal_runner(6.65, z);
        let mut method = FormMethod::new(FormSettings::default(), RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.converged);
        assert!((result.beta - 3.3 / 2.0_f64.sqrt()).abs() < 0.01);
        for alpha in &result.alphas {
            assert!((alpha.alpha + 1.0 / 2.0_f64.sqrt()).abs() < 0.02);
        }
        assert!(result.probability_of_failure() < 0.05);
    }

    #[test]
    fn failing_mean_gives_negative_beta() {
        // mean point already fails
        let z = Arc::new(|s: &mut Sample| {
            s.z = s.x[0] + s.x[1] - 10.0;
        });
        let mut runner = two_normal_runner(4.0, z);
        let mut method = FormMethod::new(FormSettings::default(), RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.beta < 0.0);
        assert!(result.probability_of_failure() > 0.5);
    }

    #[test]
    fn iteration_trace_is_recorded() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = s.x[0] - 2.0;
        });
        let stochasts = vec![(String::from("x"), Stochast::standard_normal())];
        let converter = UConverter::new(
            stochasts,
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap();
        let mut runner = ModelRunner::new(converter, z, RunSettings::default());
        let mut method = FormMethod::new(FormSettings::default(), RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.converged);
        assert!(!result.iterations.is_empty());
        assert!((result.beta - 2.0).abs() < 0.02);
        assert_eq!(result.convergence.iterations, result.iterations.len());
    }

    #[test]
    fn stop_flag_aborts_iteration() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = s.x[0] + s.x[1] - 10.0;
        });
        let mut runner = two_normal_runner(6.65, z);
        runner.stop.stop();
        let mut method = FormMethod::new(FormSettings::default(), RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.stopped);
        assert!(!result.convergence.converged);
    }
}
