// Monte Carlo reliability estimators: crude sampling, Latin hypercube,
// importance sampling and its adaptive variant
use crate::method::{variation_coefficient, ReliabilityMethod};
use crate::result::{ConvergenceReport, DesignPoint, Message};
use crate::rng::RunRng;
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{
    AdaptiveImportanceSamplingSettings, ImportanceSamplingSettings, MonteCarloSettings,
    RandomSettings,
};
use crate::transform::{normal_pdf, q_from_u, u_from_p, u_from_q, U_MAX};
use crate::validation::Severity;

/// Direction cosines from the failed samples: the normalized center of
/// gravity of the failure cloud, weighted per sample.
pub(crate) fn failure_direction(failed: &[(f64, Vec<f64>)]) -> Option<Vec<f64>> {
    let n = failed.first()?.1.len();
    let mut sum = vec![0.0; n];
    for (weight, u) in failed {
        for (acc, v) in sum.iter_mut().zip(u.iter()) {
            *acc += weight * v;
        }
    }
    let norm = sum.iter().map(|a| a * a).sum::<f64>().sqrt();
    if norm < 1e-12 {
        None
    } else {
        Some(sum.into_iter().map(|a| a / norm).collect())
    }
}

fn finish(
    result: &mut DesignPoint,
    runner: &mut ModelRunner,
    pf: f64,
    failed: &[(f64, Vec<f64>)],
) {
    let beta = u_from_q(pf.clamp(q_from_u(U_MAX), q_from_u(-U_MAX)));
    let mut messages = runner.take_messages();
    if let Some(direction) = failure_direction(failed) {
        let u: Vec<f64> = direction.iter().map(|d| d * beta).collect();
        result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
    } else {
        messages.push(Message {
            severity: Severity::Warning,
            subject: String::from("sampling"),
            text: String::from("no failed samples, alphas unavailable"),
        });
    }
    result.beta = beta;
    result.evaluations = runner.take_evaluations();
    result.messages = messages;
}

pub struct MonteCarloMethod {
    pub settings: MonteCarloSettings,
    pub random: RandomSettings,
}

impl MonteCarloMethod {
    pub fn new(settings: MonteCarloSettings, random: RandomSettings) -> Self {
        MonteCarloMethod { settings, random }
    }

    fn crude_batch(&self, rng: &mut RunRng, n: usize, count: usize) -> Vec<Sample> {
        (0..count)
            .map(|_| Sample::new(rng.standard_normal_vector(n)))
            .collect()
    }

    /// One Latin hypercube batch: every dimension gets one draw from
    /// each of `count` equiprobable strata, in shuffled order.
    fn latin_batch(&self, rng: &mut RunRng, n: usize, count: usize) -> Vec<Sample> {
        let mut strata: Vec<Vec<usize>> = (0..n).map(|_| (0..count).collect()).collect();
        for order in strata.iter_mut() {
            for i in (1..count).rev() {
                order.swap(i, rng.index(i + 1));
            }
        }
        (0..count)
            .map(|k| {
                let u = (0..n)
                    .map(|d| {
                        let p = (strata[d][k] as f64 + rng.uniform()) / count as f64;
                        u_from_p(p.clamp(f64::MIN_POSITIVE, 1.0 - 1e-16))
                    })
                    .collect();
                Sample::new(u)
            })
            .collect()
    }
}

impl ReliabilityMethod for MonteCarloMethod {
    fn name(&self) -> &'static str {
        if self.settings.latin_hypercube {
            "MC-LHS"
        } else {
            "MC"
        }
    }

    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };
        let mut rng = RunRng::from_settings(&self.random);

        let batch_size = self.settings.minimum_samples.max(1);
        let mut total = 0usize;
        let mut failures = 0usize;
        let mut failed: Vec<(f64, Vec<f64>)> = vec![];
        let mut cv = f64::INFINITY;
        let mut converged = false;
        let mut stopped = false;
        let mut batch_index = 0usize;

        while total < self.settings.maximum_samples {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            batch_index += 1;
            runner.set_iteration(batch_index);
            let count = batch_size.min(self.settings.maximum_samples - total);
            let mut samples = if self.settings.latin_hypercube {
                self.latin_batch(&mut rng, n, count)
            } else {
                self.crude_batch(&mut rng, n, count)
            };
            runner.z_values(&mut samples);
            total += samples.len();
            for sample in &samples {
                if sample.is_failed() {
                    failures += 1;
                    failed.push((sample.weight, sample.u.clone()));
                }
            }
            let pf = failures as f64 / total as f64;
            cv = variation_coefficient(pf, total);
            runner.progress.fraction(total as f64 / self.settings.maximum_samples as f64);
            if total >= self.settings.minimum_samples
                && cv < self.settings.variation_coefficient
            {
                converged = true;
                break;
            }
        }

        let pf = if total > 0 {
            failures as f64 / total as f64
        } else {
            0.0
        };
        result.convergence = ConvergenceReport {
            converged,
            samples: total,
            convergence: cv,
            variation_coefficient: cv,
            failure_fraction: pf,
            stopped,
            ..Default::default()
        };
        finish(&mut result, runner, pf, &failed);
        result
    }
}

pub struct ImportanceSamplingMethod {
    pub settings: ImportanceSamplingSettings,
    pub random: RandomSettings,
}

impl ImportanceSamplingMethod {
    pub fn new(settings: ImportanceSamplingSettings, random: RandomSettings) -> Self {
        ImportanceSamplingMethod { settings, random }
    }
}

/// Likelihood ratio of the standard normal against the shifted and
/// scaled sampling density, per component.
fn likelihood_ratio(u: &[f64], center: &[f64], scale: f64) -> f64 {
    u.iter()
        .zip(center.iter())
        .map(|(&v, &c)| scale * normal_pdf(v) / normal_pdf((v - c) / scale))
        .product()
}

/// Weighted estimate over one importance sampling population. Writes
/// each sample's likelihood-ratio weight, returns (pf, cv) and appends
/// the failed samples with their weights.
fn weighted_estimate(
    samples: &mut [Sample],
    center: &[f64],
    scale: f64,
    failed: &mut Vec<(f64, Vec<f64>)>,
) -> (f64, f64) {
    let m = samples.len() as f64;
    let mut sum = 0.0;
    let mut sum_squared = 0.0;
    for sample in samples.iter_mut() {
        sample.weight = likelihood_ratio(&sample.u, center, scale);
        if sample.is_failed() {
            sum += sample.weight;
            sum_squared += sample.weight * sample.weight;
            failed.push((sample.weight, sample.u.clone()));
        }
    }
    let pf = sum / m;
    let cv = if pf > 0.0 {
        let variance = (sum_squared / m - pf * pf).max(0.0);
        (variance / m).sqrt() / pf
    } else {
        f64::INFINITY
    };
    (pf, cv)
}

fn shifted_batch(
    rng: &mut RunRng,
    center: &[f64],
    scale: f64,
    count: usize,
) -> Vec<Sample> {
    (0..count)
        .map(|_| {
            let u = center
                .iter()
                .map(|c| c + scale * rng.standard_normal())
                .collect();
            Sample::new(u)
        })
        .collect()
}

impl ReliabilityMethod for ImportanceSamplingMethod {
    fn name(&self) -> &'static str {
        "IS"
    }

    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };
        let mut rng = RunRng::from_settings(&self.random);
        let mut center = self.settings.center.clone().unwrap_or_else(|| vec![0.0; n]);
        center.resize(n, 0.0);
        let scale = self.settings.scale;

        let batch_size = self.settings.minimum_samples.max(1);
        let mut population: Vec<Sample> = vec![];
        let mut failed: Vec<(f64, Vec<f64>)> = vec![];
        let mut pf = 0.0;
        let mut cv = f64::INFINITY;
        let mut converged = false;
        let mut stopped = false;
        let mut batch_index = 0usize;

        while population.len() < self.settings.maximum_samples {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            batch_index += 1;
            runner.set_iteration(batch_index);
            let count = batch_size.min(self.settings.maximum_samples - population.len());
            let mut samples = shifted_batch(&mut rng, &center, scale, count);
            runner.z_values(&mut samples);
            population.extend(samples);

            failed.clear();
            let (estimate, spread) = weighted_estimate(&mut population, &center, scale, &mut failed);
            pf = estimate;
            cv = spread;
            runner
                .progress
                .fraction(population.len() as f64 / self.settings.maximum_samples as f64);
            if population.len() >= self.settings.minimum_samples
                && cv < self.settings.variation_coefficient
            {
                converged = true;
                break;
            }
        }

        result.convergence = ConvergenceReport {
            converged,
            samples: population.len(),
            convergence: cv,
            variation_coefficient: cv,
            failure_fraction: pf,
            stopped,
            ..Default::default()
        };
        finish(&mut result, runner, pf, &failed);
        result
    }
}

pub struct AdaptiveImportanceSamplingMethod {
    pub settings: AdaptiveImportanceSamplingSettings,
    pub random: RandomSettings,
}

impl AdaptiveImportanceSamplingMethod {
    pub fn new(settings: AdaptiveImportanceSamplingSettings, random: RandomSettings) -> Self {
        AdaptiveImportanceSamplingMethod { settings, random }
    }
}

impl ReliabilityMethod for AdaptiveImportanceSamplingMethod {
    fn name(&self) -> &'static str {
        "AIS"
    }

    /// Importance sampling with a recentering loop: after every
    /// population the sampling density moves to the weighted center of
    /// gravity of the failures found so far.
    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };
        let mut rng = RunRng::from_settings(&self.random);
        let mut center = vec![0.0; n];
        let scale = self.settings.scale;

        let mut total = 0usize;
        let mut failed: Vec<(f64, Vec<f64>)> = vec![];
        let mut pf = 0.0;
        let mut cv = f64::INFINITY;
        let mut converged = false;
        let mut stopped = false;

        for round in 0..self.settings.loops.max(1) {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            runner.set_iteration(round + 1);
            let mut samples =
                shifted_batch(&mut rng, &center, scale, self.settings.samples_per_loop);
            runner.z_values(&mut samples);
            total += samples.len();

            let mut round_failed: Vec<(f64, Vec<f64>)> = vec![];
            let (estimate, spread) =
                weighted_estimate(&mut samples, &center, scale, &mut round_failed);
            pf = estimate;
            cv = spread;
            failed.extend(round_failed);

            runner.progress.step(round + 1, self.settings.loops, u_from_q(pf.max(1e-300)), cv);
            if pf > 0.0 && cv < self.settings.variation_coefficient {
                converged = true;
                break;
            }
            // recenter on the failure cloud for the next round
            let weight_sum: f64 = failed.iter().map(|(w, _)| w).sum();
            if weight_sum > 0.0 {
                let mut mean = vec![0.0; n];
                for (w, u) in &failed {
                    for (acc, v) in mean.iter_mut().zip(u.iter()) {
                        *acc += w * v / weight_sum;
                    }
                }
                center = mean;
            } else {
                runner.message(
                    Severity::Info,
                    "adaptive_is",
                    format!("no failures in round {}, keeping the center", round + 1),
                );
            }
        }

        result.convergence = ConvergenceReport {
            converged,
            samples: total,
            convergence: cv,
            variation_coefficient: cv,
            failure_fraction: pf,
            stopped,
            ..Default::default()
        };
        finish(&mut result, runner, pf, &failed);
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

    fn half_plane() -> crate::runner::ZFunction {
        // pf = Phi(-1), beta = 1
        Arc::new(|s: &mut Sample| {
            s.z = 1.0 - s.x[0];
        })
    }

    #[test]
    fn crude_monte_carlo_beta() {
        let mut runner = runner(half_plane());
        let settings = MonteCarloSettings {
            minimum_samples: 2000,
            maximum_samples: 50_000,
            variation_coefficient: 0.05,
            latin_hypercube: false,
        };
        let mut method = MonteCarloMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!((result.beta - 1.0).abs() < 0.1);
        assert!(result.convergence.failure_fraction > 0.1);
        assert_eq!(result.convergence.samples % 2000, 0);
    }

    #[test]
    fn latin_hypercube_beta() {
        let mut runner = runner(half_plane());
        let settings = MonteCarloSettings {
            minimum_samples: 2000,
            maximum_samples: 20_000,
            variation_coefficient: 0.05,
            latin_hypercube: true,
        };
        let mut method = MonteCarloMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert_eq!(result.method, "MC-LHS");
        assert!((result.beta - 1.0).abs() < 0.1);
    }

    #[test]
    fn weighted_estimate_writes_sample_weights() {
        let center = vec![2.0, 0.0];
        let mut samples = vec![
            Sample::new(vec![2.5, 0.3]),
            Sample::new(vec![1.0, -0.4]),
        ];
        samples[0].z = -0.5;
        samples[1].z = 0.7;
        let mut failed = vec![];
        let (pf, _) = weighted_estimate(&mut samples, &center, 1.0, &mut failed);
        for sample in &samples {
            let expected = likelihood_ratio(&sample.u, &center, 1.0);
            assert_eq!(sample.weight, expected);
        }
        // only the failed sample carries into the estimate
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, samples[0].weight);
        assert!((pf - samples[0].weight / 2.0).abs() < 1e-12);
    }

    #[test]
    fn importance_sampling_reaches_rare_events() {
        // beta = 3.5: far too rare for a small crude run
        let z = Arc::new(|s: &mut Sample| {
            s.z = 3.5 - s.x[0];
        });
        let mut runner = runner(z);
        let settings = ImportanceSamplingSettings {
            minimum_samples: 2000,
            maximum_samples: 20_000,
            variation_coefficient: 0.1,
            center: Some(vec![3.5, 0.0]),
            scale: 1.0,
        };
        let mut method = ImportanceSamplingMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!((result.beta - 3.5).abs() < 0.15);
        assert!(result.convergence.failure_fraction < 1e-3);
    }

    #[test]
    fn adaptive_recenters_toward_failure() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 3.0 - s.x[0];
        });
        let mut runner = runner(z);
        let settings = AdaptiveImportanceSamplingSettings {
            loops: 8,
            samples_per_loop: 2000,
            variation_coefficient: 0.1,
            scale: 1.5,
        };
        let mut method =
            AdaptiveImportanceSamplingMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!((result.beta - 3.0).abs() < 0.3);
    }

    #[test]
    fn no_failures_saturates_beta() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 100.0 + s.x[0].abs();
        });
        let mut runner = runner(z);
        let settings = MonteCarloSettings {
            minimum_samples: 500,
            maximum_samples: 1000,
            variation_coefficient: 0.1,
            latin_hypercube: false,
        };
        let mut method = MonteCarloMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.beta >= U_MAX - 1e-9);
        assert!(!result.convergence.converged);
    }
}
