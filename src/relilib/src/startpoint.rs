// Start point selection for the iterative solvers
use crate::rng::RunRng;
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{StartMethodType, StartPointSettings};

/// Compute a start point in reduced u-space. All strategies fall back
/// to the converter's configured start values (the origin when no
/// per-stochast start_value is set).
pub fn start_point(
    settings: &StartPointSettings,
    runner: &mut ModelRunner,
    rng: &mut RunRng,
) -> Vec<f64> {
    let n = runner.dimension();
    let base = runner.converter.start_values();
    match settings.method {
        StartMethodType::Zero => base,
        StartMethodType::Fixed => {
            let mut u = settings.fixed.clone();
            u.resize(n, 0.0);
            u
        }
        StartMethodType::RaySearch => ray_search(settings, runner, base),
        StartMethodType::SphereSearch => sphere_search(settings, runner, rng, base),
        StartMethodType::SensitivitySearch => sensitivity_search(settings, runner, base),
    }
}

fn evaluate(runner: &mut ModelRunner, u: Vec<f64>) -> f64 {
    let mut sample = Sample::new(u);
    runner.z_value(&mut sample);
    sample.z
}

/// March outward along each coordinate half-axis; pick the nearest
/// point where Z turns negative, else the probed point with least Z.
fn ray_search(settings: &StartPointSettings, runner: &mut ModelRunner, base: Vec<f64>) -> Vec<f64> {
    let n = runner.dimension();
    let steps = (settings.ray_length / settings.ray_step).ceil() as usize;
    let mut nearest: Option<(f64, Vec<f64>)> = None;
    let mut least_z: Option<(f64, Vec<f64>)> = None;
    for axis in 0..n {
        for sign in [1.0, -1.0] {
            for step in 1..=steps {
                let r = (step as f64 * settings.ray_step).min(settings.ray_length);
                let mut u = base.clone();
                u[axis] += sign * r;
                let z = evaluate(runner, u.clone());
                if least_z.as_ref().map(|(best, _)| z < *best).unwrap_or(true) {
                    least_z = Some((z, u.clone()));
                }
                if z < 0.0 {
                    if nearest.as_ref().map(|(best, _)| r < *best).unwrap_or(true) {
                        nearest = Some((r, u));
                    }
                    break;
                }
            }
        }
    }
    nearest
        .map(|(_, u)| u)
        .or(least_z.map(|(_, u)| u))
        .unwrap_or(base)
}

/// Probe random directions at the configured radius; pick the point
/// with the least Z value.
fn sphere_search(
    settings: &StartPointSettings,
    runner: &mut ModelRunner,
    rng: &mut RunRng,
    base: Vec<f64>,
) -> Vec<f64> {
    let n = runner.dimension();
    let probes = (4 * n).max(8);
    let mut best: Option<(f64, Vec<f64>)> = None;
    for _ in 0..probes {
        let direction = rng.unit_direction(n);
        let u: Vec<f64> = base
            .iter()
            .zip(direction.iter())
            .map(|(b, d)| b + d * settings.sphere_radius)
            .collect();
        let z = evaluate(runner, u.clone());
        if best.as_ref().map(|(bz, _)| z < *bz).unwrap_or(true) {
            best = Some((z, u));
        }
    }
    best.map(|(_, u)| u).unwrap_or(base)
}

/// Walk along the direction of steepest Z decrease at the base point,
/// stopping at the first sign change or the ray length.
fn sensitivity_search(
    settings: &StartPointSettings,
    runner: &mut ModelRunner,
    base: Vec<f64>,
) -> Vec<f64> {
    let n = runner.dimension();
    let h = settings.ray_step.min(0.5).max(1e-3);
    let z0 = evaluate(runner, base.clone());
    let mut gradient = vec![0.0; n];
    for i in 0..n {
        let mut u = base.clone();
        u[i] += h;
        gradient[i] = (evaluate(runner, u) - z0) / h;
    }
    let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
    if norm < 1e-12 {
        return base;
    }
    let direction: Vec<f64> = gradient.iter().map(|g| -g / norm).collect();
    let steps = (settings.ray_length / settings.ray_step).ceil() as usize;
    let mut last = base.clone();
    for step in 1..=steps {
        let r = (step as f64 * settings.ray_step).min(settings.ray_length);
        let u: Vec<f64> = base
            .iter()
            .zip(direction.iter())
            .map(|(b, d)| b + d * r)
            .collect();
        let z = evaluate(runner, u.clone());
        last = u;
        if z < 0.0 {
            break;
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::correlation::CorrelationModel;
    use crate::settings::{GeneratorKind, RandomSettings, RunSettings, StochastSettingsSet};
    use crate::stochast::Stochast;

    fn runner() -> ModelRunner {
        let stochasts = vec![
            (String::from("a"), Stochast::standard_normal()),
            (String::from("b"), Stochast::standard_normal()),
        ];
        let converter = crate::uconvert::UConverter::new(
            stochasts,
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap();
        // failure beyond x0 = 2.5
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.5 - s.x[0];
        });
        ModelRunner::new(converter, z, RunSettings::default())
    }

    fn rng() -> RunRng {
        RunRng::from_settings(&RandomSettings {
            repeatable: true,
            seed: 4357,
            generator: GeneratorKind::Pcg64,
        })
    }

    #[test]
    fn fixed_start_is_padded_to_dimension() {
        let mut runner = runner();
        let settings = StartPointSettings {
            method: StartMethodType::Fixed,
            fixed: vec![1.0],
            ..Default::default()
        };
        let u = start_point(&settings, &mut runner, &mut rng());
        assert_eq!(u, vec![1.0, 0.0]);
    }

    #[test]
    fn ray_search_finds_failing_axis() {
        let mut runner = runner();
        let settings = StartPointSettings {
            method: StartMethodType::RaySearch,
            ray_length: 4.0,
            ray_step: 0.5,
            ..Default::default()
        };
        let u = start_point(&settings, &mut runner, &mut rng());
        // failure only along +u0
        assert!(u[0] > 2.5);
        assert_eq!(u[1], 0.0);
    }

    #[test]
    fn sensitivity_search_walks_toward_failure() {
        let mut runner = runner();
        let settings = StartPointSettings {
            method: StartMethodType::SensitivitySearch,
            ray_length: 4.0,
            ray_step: 0.25,
            ..Default::default()
        };
        let u = start_point(&settings, &mut runner, &mut rng());
        assert!(u[0] > 2.0);
        assert!(u[1].abs() < 1e-9);
    }
}
