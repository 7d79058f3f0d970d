// Composite methods chaining FORM and directional sampling
use crate::directional::DirectionalSamplingMethod;
use crate::form::FormMethod;
use crate::method::ReliabilityMethod;
use crate::result::DesignPoint;
use crate::runner::ModelRunner;
use crate::settings::{CompositeSettings, RandomSettings, StartMethodType};
use crate::validation::Severity;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeKind {
    /// FORM first; directional sampling when it does not converge
    FormThenDirectional,
    /// Directional sampling first; FORM restarted from its design point
    DirectionalThenForm,
    /// FORM accepted only above the beta threshold, else resampled
    FormWithThreshold,
}

pub struct CompositeMethod {
    pub kind: CompositeKind,
    pub settings: CompositeSettings,
    pub random: RandomSettings,
}

impl CompositeMethod {
    pub fn new(kind: CompositeKind, settings: CompositeSettings, random: RandomSettings) -> Self {
        CompositeMethod {
            kind,
            settings,
            random,
        }
    }

    fn run_form(&self, runner: &mut ModelRunner) -> DesignPoint {
        FormMethod::new(self.settings.form.clone(), self.random.clone()).design_point(runner)
    }

    fn run_directional(&self, runner: &mut ModelRunner) -> DesignPoint {
        DirectionalSamplingMethod::new(self.settings.directional.clone(), self.random.clone())
            .design_point(runner)
    }

    /// Promote `winner` to the outer result, stacking every attempt as
    /// a contributing result and carrying the evaluation counters over.
    fn combine(&self, winner: DesignPoint, attempts: Vec<DesignPoint>) -> DesignPoint {
        let mut result = winner;
        result.method = format!("{}({})", self.name(), result.method);
        for attempt in attempts {
            result.convergence.samples += attempt.convergence.samples;
            result.convergence.iterations += attempt.convergence.iterations;
            result.convergence.directions += attempt.convergence.directions;
            result.contributing.push(attempt);
        }
        result
    }
}

impl ReliabilityMethod for CompositeMethod {
    fn name(&self) -> &'static str {
        match self.kind {
            CompositeKind::FormThenDirectional => "FORM+DS",
            CompositeKind::DirectionalThenForm => "DS+FORM",
            CompositeKind::FormWithThreshold => "FORM|DS",
        }
    }

    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint {
        match self.kind {
            CompositeKind::FormThenDirectional => {
                let form = self.run_form(runner);
                if form.convergence.converged {
                    return self.combine(form, vec![]);
                }
                runner.message(
                    Severity::Info,
                    "composite",
                    String::from("FORM did not converge, sampling directions instead"),
                );
                let directional = self.run_directional(runner);
                self.combine(directional, vec![form])
            }
            CompositeKind::DirectionalThenForm => {
                let directional = self.run_directional(runner);
                // restart FORM from the sampled design point
                let mut restart = self.clone_with_start(&directional);
                let form = restart.design_point(runner);
                if form.convergence.converged {
                    self.combine(form, vec![directional])
                } else {
                    runner.message(
                        Severity::Info,
                        "composite",
                        String::from("FORM refinement failed, keeping the sampled result"),
                    );
                    let mut winner = self.combine(directional, vec![form]);
                    winner.messages.extend(runner.take_messages());
                    winner
                }
            }
            CompositeKind::FormWithThreshold => {
                let form = self.run_form(runner);
                if form.convergence.converged && form.beta >= self.settings.beta_threshold {
                    return self.combine(form, vec![]);
                }
                runner.message(
                    Severity::Info,
                    "composite",
                    format!(
                        "FORM beta {:.3} below threshold {:.3}, sampling directions",
                        form.beta, self.settings.beta_threshold
                    ),
                );
                let directional = self.run_directional(runner);
                self.combine(directional, vec![form])
            }
        }
    }
}

impl CompositeMethod {
    fn clone_with_start(&self, seed: &DesignPoint) -> FormMethod {
        let mut settings = self.settings.form.clone();
        let u: Vec<f64> = seed.alphas.iter().map(|a| -a.alpha * seed.beta).collect();
        if !u.is_empty() {
            settings.start.method = StartMethodType::Fixed;
            settings.start.fixed = u;
        }
        FormMethod::new(settings, self.random.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::correlation::CorrelationModel;
    use crate::sample::Sample;
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
    fn converging_form_short_circuits() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 3.0 - s.x[0];
        });
        let mut runner = runner(z);
        let mut method = CompositeMethod::new(
            CompositeKind::FormThenDirectional,
            CompositeSettings::default(),
            RandomSettings::default(),
        );
        let result = method.design_point(&mut runner);
        assert_eq!(result.method, "FORM+DS(FORM)");
        assert!(result.contributing.is_empty());
        assert!((result.beta - 3.0).abs() < 0.05);
    }

    #[test]
    fn threshold_falls_back_to_sampling() {
        // beta around 1.0, below the default threshold of 2.0
        let z = Arc::new(|s: &mut Sample| {
            s.z = 1.0 - s.x[0];
        });
        let mut runner = runner(z);
        let mut method = CompositeMethod::new(
            CompositeKind::FormWithThreshold,
            CompositeSettings::default(),
            RandomSettings::default(),
        );
        let result = method.design_point(&mut runner);
        assert_eq!(result.method, "FORM|DS(DS)");
        assert_eq!(result.contributing.len(), 1);
        assert_eq!(result.contributing[0].method, "FORM");
        assert!((result.beta - 1.0).abs() < 0.2);
        // counters from the FORM attempt are carried over
        assert!(result.convergence.iterations > 0);
    }

    #[test]
    fn directional_then_form_refines() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.5 - s.x[0];
        });
        let mut runner = runner(z);
        let mut method = CompositeMethod::new(
            CompositeKind::DirectionalThenForm,
            CompositeSettings::default(),
            RandomSettings::default(),
        );
        let result = method.design_point(&mut runner);
        assert!(result.method.contains("FORM"));
        assert_eq!(result.contributing.len(), 1);
        assert!((result.beta - 2.5).abs() < 0.05);
    }
}
