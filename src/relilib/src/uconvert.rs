// Mapping between reduced u-space and physical x-space
use crate::correlation::CorrelationModel;
use crate::error::ReliabilityError;
use crate::result::{Message, StochastPointAlpha};
use crate::sample::Sample;
use crate::settings::StochastSettingsSet;
use crate::stochast::Stochast;
use crate::validation::{Severity, ValidationReport};

/// Converts reduced u-vectors (one component per varying stochast) to
/// physical values. Non-varying stochasts are pinned at u = 0; the
/// correlation map always acts on the full vector.
pub struct UConverter {
    symbols: Vec<String>,
    stochasts: Vec<Stochast>,
    settings: StochastSettingsSet,
    correlation: CorrelationModel,
    /// Full-vector index of each varying stochast
    varying: Vec<usize>,
}

impl UConverter {
    pub fn new(
        stochasts: Vec<(String, Stochast)>,
        settings: StochastSettingsSet,
        correlation: CorrelationModel,
    ) -> Result<Self, ReliabilityError> {
        let mut symbols = vec![];
        let mut dists = vec![];
        for (symbol, mut stochast) in stochasts {
            stochast.initialize_for_run()?;
            symbols.push(symbol);
            dists.push(stochast);
        }
        // variance_allowed = false pins a stochast at u = 0 for the run
        let varying = dists
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                s.is_varying()
                    && settings
                        .get(&symbols[*i])
                        .map(|s| s.variance_allowed)
                        .unwrap_or(true)
            })
            .map(|(i, _)| i)
            .collect();
        Ok(UConverter {
            symbols,
            stochasts: dists,
            settings,
            correlation,
            varying,
        })
    }

    pub fn stochast_count(&self) -> usize {
        self.stochasts.len()
    }

    /// Dimension of the reduced u-space.
    pub fn varying_count(&self) -> usize {
        self.varying.len()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn varying_symbols(&self) -> Vec<String> {
        self.varying.iter().map(|&i| self.symbols[i].clone()).collect()
    }

    pub fn stochast(&self, symbol: &str) -> Option<&Stochast> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| &self.stochasts[i])
    }

    pub fn validate(&mut self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for (i, stochast) in self.stochasts.iter().enumerate() {
            if let Err(e) = stochast.check() {
                report.error(&self.symbols[i], e.to_string());
            }
        }
        self.settings.validate(&mut report);
        self.correlation.validate(self.stochasts.len(), &mut report);
        if self.varying.is_empty() {
            report.add(
                Severity::Warning,
                "stochasts",
                String::from("no varying stochasts, the model is deterministic"),
            );
        }
        report
    }

    fn clamp_u(&self, index: usize, u: f64) -> f64 {
        let symbol = &self.symbols[index];
        let mut u = u;
        if let Some(s) = self.settings.get(symbol) {
            if let Some(lo) = s.min_u {
                u = u.max(lo);
            }
            if let Some(hi) = s.max_u {
                u = u.min(hi);
            }
        }
        u
    }

    /// Expand a reduced u-vector to the full vector, zero elsewhere.
    pub fn expand(&self, u: &[f64]) -> Vec<f64> {
        let mut full = vec![0.0; self.stochasts.len()];
        for (k, &i) in self.varying.iter().enumerate() {
            full[i] = u[k];
        }
        full
    }

    /// Correlated full-space u-vector for a reduced u-vector.
    pub fn correlated(&mut self, u: &[f64]) -> Vec<f64> {
        let full = self.expand(u);
        self.correlation.apply(&full)
    }

    /// Physical values for every stochast at the sample's u-vector.
    pub fn x_values(&mut self, sample: &mut Sample) {
        let correlated = self.correlated(&sample.u.clone());
        sample.x = correlated
            .iter()
            .enumerate()
            .map(|(i, &u)| self.stochasts[i].x_from_u(self.clamp_u(i, u)))
            .collect();
    }

    /// Start values in reduced u-space, honoring configured overrides.
    pub fn start_values(&self) -> Vec<f64> {
        self.varying
            .iter()
            .map(|&i| {
                self.settings
                    .get(&self.symbols[i])
                    .and_then(|s| s.start_value)
                    .map(|x| self.stochasts[i].u_from_x(x))
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Design point description at a converged reduced u-vector. For
    /// beta = 0 the direction cosines are undefined and reported as
    /// zero with a diagnostic attached.
    pub fn stochast_point(
        &mut self,
        u: &[f64],
        beta: f64,
        messages: &mut Vec<Message>,
    ) -> Vec<StochastPointAlpha> {
        let full = self.expand(u);
        let correlated = self.correlation.apply(&full);
        let degenerate = beta.abs() < 1e-12;
        if degenerate {
            messages.push(Message {
                severity: Severity::Warning,
                subject: String::from("design point"),
                text: String::from("beta is zero, direction cosines are undefined"),
            });
        }
        self.varying
            .iter()
            .map(|&i| {
                let alpha = if degenerate { 0.0 } else { -full[i] / beta };
                let alpha_correlated = if degenerate { 0.0 } else { -correlated[i] / beta };
                StochastPointAlpha {
                    symbol: self.symbols[i].clone(),
                    alpha,
                    alpha_correlated,
                    u: full[i],
                    x: self.stochasts[i].x_from_u(self.clamp_u(i, correlated[i])),
                    influence: alpha * alpha,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationMatrix;

    fn two_normals() -> Vec<(String, Stochast)> {
        vec![
            (
                String::from("a"),
                Stochast::Normal {
                    mean: 10.0,
                    deviation: 2.0,
                },
            ),
            (
                String::from("b"),
                Stochast::Normal {
                    mean: 0.0,
                    deviation: 1.0,
                },
            ),
        ]
    }

    #[test]
    fn deterministic_stochast_is_pinned() {
        let stochasts = vec![
            (
                String::from("a"),
                Stochast::Normal {
                    mean: 10.0,
                    deviation: 2.0,
                },
            ),
            (String::from("c"), Stochast::Deterministic { value: 4.0 }),
        ];
        let mut conv = UConverter::new(
            stochasts,
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap();
        assert_eq!(conv.stochast_count(), 2);
        assert_eq!(conv.varying_count(), 1);

        let mut sample = Sample::new(vec![1.5]);
        conv.x_values(&mut sample);
        assert!((sample.x[0] - 13.0).abs() < 1e-12);
        assert!((sample.x[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_acts_on_full_vector() {
        let mut matrix = CorrelationMatrix::identity(2);
        matrix.set_correlation(0, 1, 0.8);
        let mut conv = UConverter::new(
            two_normals(),
            StochastSettingsSet::default(),
            CorrelationModel::Matrix(matrix),
        )
        .unwrap();

        let mut sample = Sample::new(vec![1.0, 0.0]);
        conv.x_values(&mut sample);
        // second variable follows the first through the Cholesky factor
        assert!((sample.x[0] - 12.0).abs() < 1e-9);
        assert!((sample.x[1] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn alphas_sum_to_unit_influence() {
        let mut conv = UConverter::new(
            two_normals(),
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap();
        let u = vec![1.0, -1.0];
        let beta = (2.0f64).sqrt();
        let mut messages = vec![];
        let alphas = conv.stochast_point(&u, beta, &mut messages);
        let total: f64 = alphas.iter().map(|a| a.influence).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(messages.is_empty());
        assert!((alphas[0].alpha + 1.0 / beta).abs() < 1e-12);
    }

    #[test]
    fn zero_beta_reports_diagnostic() {
        let mut conv = UConverter::new(
            two_normals(),
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap();
        let mut messages = vec![];
        let alphas = conv.stochast_point(&[0.0, 0.0], 0.0, &mut messages);
        assert!(alphas.iter().all(|a| a.alpha == 0.0));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn variance_disallowed_pins_stochast() {
        let mut settings = StochastSettingsSet::default();
        settings.set(
            "b",
            crate::settings::StochastSettings {
                start_value: None,
                min_u: None,
                max_u: None,
                variance_allowed: false,
            },
        );
        let conv = UConverter::new(
            two_normals(),
            settings,
            CorrelationModel::Independent,
        )
        .unwrap();
        assert_eq!(conv.varying_count(), 1);
        assert_eq!(conv.varying_symbols(), vec![String::from("a")]);
    }

    #[test]
    fn min_u_clamp_is_applied() {
        let mut settings = StochastSettingsSet::default();
        settings.set(
            "a",
            crate::settings::StochastSettings {
                start_value: None,
                min_u: Some(-1.0),
                max_u: Some(1.0),
                variance_allowed: true,
            },
        );
        let mut conv = UConverter::new(
            two_normals(),
            settings,
            CorrelationModel::Independent,
        )
        .unwrap();
        let mut sample = Sample::new(vec![5.0, 0.0]);
        conv.x_values(&mut sample);
        assert!((sample.x[0] - 12.0).abs() < 1e-12);
    }
}
