// Directional sampling: root search along random rays in u-space
use mathru::statistics::distrib::{Continuous, Gamma};
use roots::find_root_brent;

use crate::method::ReliabilityMethod;
use crate::result::{ConvergenceReport, DesignPoint};
use crate::rng::RunRng;
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{DesignPointMethod, DirectionalSamplingSettings, RandomSettings};
use crate::transform::{q_from_u, u_from_q, U_MAX};
use crate::validation::Severity;

pub struct DirectionalSamplingMethod {
    pub settings: DirectionalSamplingSettings,
    pub random: RandomSettings,
}

/// Probability that an n-dimensional standard-normal vector lies
/// beyond radius `t`: the radial distance follows a chi distribution,
/// so this is the chi-square survival of t² with n degrees of freedom.
fn radial_exceedance(n: usize, t: f64) -> f64 {
    if t <= 0.0 {
        return 1.0;
    }
    let chi_square = Gamma::new(n as f64 / 2.0, 0.5);
    (1.0 - chi_square.cdf(t * t)).clamp(0.0, 1.0)
}

struct Ray {
    direction: Vec<f64>,
    /// Root distance along the direction, when Z changes sign
    root: Option<f64>,
    /// Failure probability contribution of this ray
    contribution: f64,
}

impl DirectionalSamplingMethod {
    pub fn new(settings: DirectionalSamplingSettings, random: RandomSettings) -> Self {
        DirectionalSamplingMethod { settings, random }
    }

    fn z_along(runner: &mut ModelRunner, direction: &[f64], r: f64) -> f64 {
        let u: Vec<f64> = direction.iter().map(|d| d * r).collect();
        let mut sample = Sample::new(u);
        runner.z_value(&mut sample);
        sample.z
    }

    /// Walk outward until Z changes sign, then find the root with
    /// Brent's method on the bracketing interval.
    fn trace_ray(
        &self,
        runner: &mut ModelRunner,
        direction: Vec<f64>,
        z_origin: f64,
    ) -> Ray {
        let step = self.settings.direction.dsdu;
        let origin_fails = z_origin < 0.0;
        let mut previous = 0.0;
        let mut z_previous = z_origin;
        let mut root = None;
        let mut r = step;
        while r <= U_MAX {
            let z = Self::z_along(runner, &direction, r);
            if z.signum() != z_previous.signum() {
                let mut tolerance = self.settings.direction.epsilon_u_step;
                let found = find_root_brent(
                    previous,
                    r,
                    |t| Self::z_along(runner, &direction, t),
                    &mut tolerance,
                );
                root = match found {
                    Ok(t) => Some(t),
                    // keep the bracket midpoint when Brent gives up
                    Err(_) => Some(0.5 * (previous + r)),
                };
                break;
            }
            previous = r;
            z_previous = z;
            r += step;
        }
        let n = direction.len();
        let contribution = match root {
            Some(t) if origin_fails => 1.0 - radial_exceedance(n, t),
            Some(t) => radial_exceedance(n, t),
            None if origin_fails => 1.0,
            None => 0.0,
        };
        Ray {
            direction,
            root,
            contribution,
        }
    }

    /// Collapse the failing rays to a single design point direction.
    fn design_direction(&self, rays: &[Ray]) -> Option<Vec<f64>> {
        let failing: Vec<&Ray> = rays.iter().filter(|ray| ray.root.is_some()).collect();
        if failing.is_empty() {
            return None;
        }
        let n = failing[0].direction.len();
        let raw = match self.settings.design_point_method {
            DesignPointMethod::NearestToMean => failing
                .iter()
                .min_by(|a, b| {
                    a.root
                        .unwrap()
                        .partial_cmp(&b.root.unwrap())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|ray| ray.direction.clone())?,
            DesignPointMethod::CenterOfGravity => {
                let mut sum = vec![0.0; n];
                for ray in &failing {
                    let r = ray.root.unwrap();
                    for (acc, d) in sum.iter_mut().zip(ray.direction.iter()) {
                        *acc += ray.contribution * r * d;
                    }
                }
                sum
            }
            DesignPointMethod::CenterOfAngles => {
                let mut sum = vec![0.0; n];
                for ray in &failing {
                    for (acc, d) in sum.iter_mut().zip(ray.direction.iter()) {
                        *acc += d;
                    }
                }
                sum
            }
        };
        let norm = raw.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm < 1e-12 {
            None
        } else {
            Some(raw.into_iter().map(|a| a / norm).collect())
        }
    }
}

impl ReliabilityMethod for DirectionalSamplingMethod {
    fn name(&self) -> &'static str {
        "DS"
    }

    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        let n = runner.dimension();
        let mut result = DesignPoint {
            method: self.name().to_string(),
            ..Default::default()
        };
        if n == 0 {
            let z = Self::z_along(runner, &[], 0.0);
            result.beta = if z < 0.0 { -U_MAX } else { U_MAX };
            result.convergence.converged = true;
            result.messages = runner.take_messages();
            return result;
        }

        let mut rng = RunRng::from_settings(&self.random);
        let z_origin = Self::z_along(runner, &vec![0.0; n], 0.0);

        let mut rays: Vec<Ray> = vec![];
        let mut sum = 0.0;
        let mut sum_squared = 0.0;
        let mut cv = f64::INFINITY;
        let mut converged = false;
        let mut stopped = false;

        for count in 1..=self.settings.maximum_directions {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            runner.set_iteration(count);
            let ray = self.trace_ray(runner, rng.unit_direction(n), z_origin);
            sum += ray.contribution;
            sum_squared += ray.contribution * ray.contribution;
            rays.push(ray);

            let m = count as f64;
            let pf = sum / m;
            if count >= self.settings.minimum_directions && pf > 0.0 {
                let variance = (sum_squared / m - pf * pf).max(0.0);
                cv = (variance / m).sqrt() / pf;
                runner.progress.step(count, 0, u_from_q(pf), cv);
                if cv < self.settings.variation_coefficient {
                    converged = true;
                    break;
                }
            }
        }

        let directions = rays.len();
        let pf = if directions > 0 {
            sum / directions as f64
        } else {
            0.0
        };
        let beta = u_from_q(pf.clamp(q_from_u(U_MAX), q_from_u(-U_MAX)));

        let mut messages = runner.take_messages();
        if let Some(direction) = self.design_direction(&rays) {
            let u: Vec<f64> = direction.iter().map(|d| d * beta).collect();
            result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
        } else {
            messages.push(crate::result::Message {
                severity: Severity::Warning,
                subject: String::from("directional"),
                text: String::from("no failing direction found, alphas unavailable"),
            });
        }

        result.beta = beta;
        result.convergence = ConvergenceReport {
            converged,
            directions,
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
    fn linear_limit_state_beta() {
        // Z = 2.0 - x1: exact beta 2.0
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.0 - s.x[0];
        });
        let mut runner = runner(z);
        let settings = DirectionalSamplingSettings {
            minimum_directions: 1000,
            maximum_directions: 20_000,
            variation_coefficient: 0.03,
            ..Default::default()
        };
        let mut method = DirectionalSamplingMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(
            (result.beta - 2.0).abs() < 0.05,
            "beta {} deviates from exact 2.0",
            result.beta
        );
        assert!(result.convergence.directions >= 1000);
        // the design point should lean on x1
        let a1 = result.alphas.iter().find(|a| a.symbol == "x1").unwrap();
        let a2 = result.alphas.iter().find(|a| a.symbol == "x2").unwrap();
        assert!(a1.influence > a2.influence);
    }

    #[test]
    fn radial_mass_follows_the_chi_distribution() {
        // One dimension: both half-axes carry the tail, so the
        // exceedance is twice the one-sided normal tail
        assert!((radial_exceedance(1, 2.0) - 2.0 * q_from_u(2.0)).abs() < 1e-9);
        // Two dimensions: closed form exp(-t^2 / 2)
        assert!((radial_exceedance(2, 2.0) - (-2.0f64).exp()).abs() < 1e-9);
        assert_eq!(radial_exceedance(3, 0.0), 1.0);
    }

    #[test]
    fn safe_model_reports_no_failures() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 50.0 + s.x[0].abs();
        });
        let mut runner = runner(z);
        let settings = DirectionalSamplingSettings {
            minimum_directions: 20,
            maximum_directions: 50,
            ..Default::default()
        };
        let mut method = DirectionalSamplingMethod::new(settings, RandomSettings::default());
        let result = method.design_point(&mut runner);
        assert!(result.beta >= U_MAX - 1e-9);
        assert!(result
            .messages
            .iter()
            .any(|m| m.text.contains("no failing direction")));
    }

    #[test]
    fn repeatable_runs_match() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.5 - 0.5 * (s.x[0] + s.x[1]);
        });
        let settings = DirectionalSamplingSettings {
            minimum_directions: 100,
            maximum_directions: 400,
            ..Default::default()
        };
        let mut a = DirectionalSamplingMethod::new(settings.clone(), RandomSettings::default());
        let mut b = DirectionalSamplingMethod::new(settings, RandomSettings::default());
        let ra = a.design_point(&mut runner(z.clone()));
        let rb = b.design_point(&mut runner(z));
        assert_eq!(ra.beta, rb.beta);
        assert_eq!(ra.convergence.directions, rb.convergence.directions);
    }
}
