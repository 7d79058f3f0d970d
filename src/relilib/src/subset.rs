// Subset simulation with component-wise Metropolis resampling
use crate::method::ReliabilityMethod;
use crate::montecarlo::failure_direction;
use crate::result::{ConvergenceReport, DesignPoint, Message};
use crate::rng::RunRng;
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{RandomSettings, SubsetSettings};
use crate::transform::{normal_pdf, q_from_u, u_from_q, U_MAX};
use crate::validation::Severity;

pub struct SubsetMethod {
    pub settings: SubsetSettings,
    pub random: RandomSettings,
}

impl SubsetMethod {
    pub fn new(settings: SubsetSettings, random: RandomSettings) -> Self {
        SubsetMethod { settings, random }
    }

    /// One Metropolis move from a seed, conditional on z <= threshold.
    /// Components are perturbed independently and accepted against the
    /// standard normal density; the whole candidate is rejected when it
    /// leaves the conditional level.
    fn metropolis_step(
        &self,
        runner: &mut ModelRunner,
        rng: &mut RunRng,
        seed: &Sample,
        threshold: f64,
        accepted: &mut usize,
    ) -> Sample {
        let mut candidate_u = seed.u.clone();
        for value in candidate_u.iter_mut() {
            let proposal = *value + self.settings.proposal_spread * rng.standard_normal();
            let ratio = normal_pdf(proposal) / normal_pdf(*value);
            if rng.uniform() < ratio.min(1.0) {
                *value = proposal;
            }
        }
        if candidate_u == seed.u {
            return seed.clone();
        }
        let mut candidate = Sample::new(candidate_u);
        runner.z_value(&mut candidate);
        if candidate.z <= threshold {
            *accepted += 1;
            candidate
        } else {
            seed.clone()
        }
    }
}

impl ReliabilityMethod for SubsetMethod {
    fn name(&self) -> &'static str {
        "SUBSET"
    }

    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };
        let mut rng = RunRng::from_settings(&self.random);
        let count = self.settings.samples_per_level.max(2);

        // level 0: crude Monte Carlo
        runner.set_iteration(1);
        let mut population: Vec<Sample> = (0..count)
            .map(|_| Sample::new(rng.standard_normal_vector(n)))
            .collect();
        runner.z_values(&mut population);

        let mut log_pf = 0.0_f64;
        let mut cv_squared = 0.0;
        let mut converged = false;
        let mut stopped = false;
        let mut levels = 0usize;

        loop {
            levels += 1;
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            let failing = population.iter().filter(|s| s.is_failed()).count();
            let p_fail = failing as f64 / population.len() as f64;
            if p_fail >= self.settings.p0 {
                // enough direct failures, close out at this level
                log_pf += p_fail.max(f64::MIN_POSITIVE).ln();
                cv_squared += (1.0 - p_fail) / (p_fail.max(1e-12) * population.len() as f64);
                converged = true;
                break;
            }
            if levels > self.settings.max_levels {
                runner.message(
                    Severity::Warning,
                    "subset",
                    format!("level budget of {} exhausted", self.settings.max_levels),
                );
                log_pf += p_fail.max(f64::MIN_POSITIVE).ln();
                break;
            }

            // conditional threshold at the p0 quantile of z
            let mut ordered: Vec<f64> = population.iter().map(|s| s.z).collect();
            ordered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let quantile = ((self.settings.p0 * count as f64).ceil() as usize)
                .clamp(1, count)
                - 1;
            let threshold = ordered[quantile].max(0.0);
            if threshold == 0.0 {
                // the quantile already reached the failure domain
                continue;
            }
            log_pf += self.settings.p0.ln();
            cv_squared += (1.0 - self.settings.p0) / (self.settings.p0 * count as f64);
            runner.progress.step(levels, self.settings.max_levels, u_from_q(log_pf.exp()), 0.0);

            // reseed the next level from the conditional samples
            let seeds: Vec<Sample> = population
                .iter()
                .filter(|s| s.z <= threshold)
                .cloned()
                .collect();
            if seeds.is_empty() {
                runner.message(
                    Severity::Error,
                    "subset",
                    String::from("no seeds below the level threshold"),
                );
                break;
            }
            runner.set_iteration(levels + 1);
            let mut accepted = 0usize;
            let mut proposals = 0usize;
            let mut next: Vec<Sample> = Vec::with_capacity(count);
            let mut index = 0usize;
            while next.len() < count {
                let seed = if index < seeds.len() {
                    seeds[index].clone()
                } else {
                    next[index - seeds.len()].clone()
                };
                proposals += 1;
                let sample =
                    self.metropolis_step(runner, &mut rng, &seed, threshold, &mut accepted);
                next.push(sample);
                index += 1;
            }
            let acceptance = accepted as f64 / proposals as f64;
            if acceptance < 0.1 {
                runner.message(
                    Severity::Warning,
                    "subset",
                    format!("low Metropolis acceptance rate {:.2}", acceptance),
                );
            }
            population = next;
        }

        let pf = log_pf.exp();
        let cv = cv_squared.sqrt();
        let beta = u_from_q(pf.clamp(q_from_u(U_MAX), q_from_u(-U_MAX)));

        let failed: Vec<(f64, Vec<f64>)> = population
            .iter()
            .filter(|s| s.is_failed())
            .map(|s| (1.0, s.u.clone()))
            .collect();
        let mut messages = runner.take_messages();
        if let Some(direction) = failure_direction(&failed) {
            let u: Vec<f64> = direction.iter().map(|d| d * beta).collect();
            result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
        } else {
            messages.push(Message {
                severity: Severity::Warning,
                subject: String::from("subset"),
                text: String::from("no failed samples at the final level"),
            });
        }

        result.beta = beta;
        result.convergence = ConvergenceReport {
            converged,
            iterations: levels,
            samples: runner.evaluation_count(),
            convergence: cv,
            variation_coefficient: cv,
            failure_fraction: pf,
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
    fn frequent_failure_closes_at_level_zero() {
        // pf = Phi(-1) = 0.159, well above p0
        let z = Arc::new(|s: &mut Sample| {
            s.z = 1.0 - s.x[0];
        });
        let mut runner = runner(z);
        let settings = SubsetSettings {
            samples_per_level: 2000,
            ..Default::default()
        };
        let mut method = SubsetMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert_eq!(result.convergence.iterations, 1);
        assert!((result.beta - 1.0).abs() < 0.15);
    }

    #[test]
    fn rare_failure_uses_multiple_levels() {
        // beta = 3.5, pf around 2.3e-4
        let z = Arc::new(|s: &mut Sample| {
            s.z = 3.5 - s.x[0];
        });
        let mut runner = runner(z);
        let settings = SubsetSettings {
            samples_per_level: 2000,
            ..Default::default()
        };
        let mut method = SubsetMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.iterations > 1);
        assert!((result.beta - 3.5).abs() < 0.4);
        let a1 = result.alphas.iter().find(|a| a.symbol == "x1").unwrap();
        assert!(a1.influence > 0.5);
    }

    #[test]
    fn level_budget_is_bounded() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 100.0 + 0.001 * s.x[0];
        });
        let mut runner = runner(z);
        let settings = SubsetSettings {
            samples_per_level: 200,
            max_levels: 3,
            ..Default::default()
        };
        let mut method = SubsetMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.convergence.iterations <= 4);
        assert!(!result.convergence.converged);
    }
}
