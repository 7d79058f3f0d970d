// Grid-based methods: numerical integration of the failure mass and
// bisection refinement toward the limit-state surface
use crate::method::ReliabilityMethod;
use crate::result::{ConvergenceReport, DesignPoint};
use crate::runner::ModelRunner;
use crate::sample::Sample;
use crate::settings::{NumericalBisectionSettings, NumericalIntegrationSettings};
use crate::transform::{p_from_u, q_from_u, u_from_q, U_MAX};
use crate::validation::Severity;

/// Axis-aligned box in reduced u-space.
#[derive(Clone, Debug)]
pub struct IntegrationCell {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

/// One evaluated grid point.
#[derive(Clone, Debug)]
pub struct IntegrationPoint {
    pub u: Vec<f64>,
    pub z: f64,
}

#[derive(Clone, Copy, PartialEq)]
enum CellState {
    Safe,
    Failed,
    Straddling,
}

impl IntegrationCell {
    pub fn center(&self) -> Vec<f64> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(a, b)| 0.5 * (a + b))
            .collect()
    }

    /// Standard normal probability mass inside the box.
    pub fn probability_mass(&self) -> f64 {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&a, &b)| p_from_u(b) - p_from_u(a))
            .product()
    }

    pub fn edge(&self) -> f64 {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(a, b)| b - a)
            .fold(0.0, f64::max)
    }

    /// All 2^n corners.
    pub fn corners(&self) -> Vec<Vec<f64>> {
        let n = self.low.len();
        (0..(1usize << n))
            .map(|mask| {
                (0..n)
                    .map(|i| {
                        if mask & (1 << i) != 0 {
                            self.high[i]
                        } else {
                            self.low[i]
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Split into 2^n equal children.
    pub fn subdivide(&self) -> Vec<IntegrationCell> {
        let n = self.low.len();
        let mid = self.center();
        (0..(1usize << n))
            .map(|mask| {
                let mut low = vec![0.0; n];
                let mut high = vec![0.0; n];
                for i in 0..n {
                    if mask & (1 << i) != 0 {
                        low[i] = mid[i];
                        high[i] = self.high[i];
                    } else {
                        low[i] = self.low[i];
                        high[i] = mid[i];
                    }
                }
                IntegrationCell { low, high }
            })
            .collect()
    }
}

/// The evolving grid: an initial uniform division of the box
/// [-range, range]^n, refined where cells straddle Z = 0.
pub struct IntegrationDomain {
    pub cells: Vec<IntegrationCell>,
}

impl IntegrationDomain {
    pub fn uniform(n: usize, range: f64, divisions: usize) -> Self {
        let divisions = divisions.max(1);
        let step = 2.0 * range / divisions as f64;
        let mut cells = vec![IntegrationCell {
            low: vec![],
            high: vec![],
        }];
        for _ in 0..n {
            let mut grown = Vec::with_capacity(cells.len() * divisions);
            for cell in &cells {
                for d in 0..divisions {
                    let mut low = cell.low.clone();
                    let mut high = cell.high.clone();
                    low.push(-range + d as f64 * step);
                    high.push(-range + (d + 1) as f64 * step);
                    grown.push(IntegrationCell { low, high });
                }
            }
            cells = grown;
        }
        IntegrationDomain { cells }
    }
}

/// Evaluate Z at the corners and the center of each cell as one batch,
/// classifying every cell by the signs seen.
fn classify(
    runner: &mut ModelRunner,
    cells: &[IntegrationCell],
) -> Vec<(CellState, IntegrationPoint)> {
    let mut samples: Vec<Sample> = vec![];
    let mut spans: Vec<(usize, usize)> = vec![];
    for cell in cells {
        let start = samples.len();
        samples.push(Sample::new(cell.center()));
        for corner in cell.corners() {
            samples.push(Sample::new(corner));
        }
        spans.push((start, samples.len()));
    }
    runner.z_values(&mut samples);
    spans
        .into_iter()
        .map(|(start, end)| {
            let center = IntegrationPoint {
                u: samples[start].u.clone(),
                z: samples[start].z,
            };
            let any_failed = samples[start..end].iter().any(|s| s.z < 0.0);
            let any_safe = samples[start..end].iter().any(|s| s.z >= 0.0);
            let state = match (any_failed, any_safe) {
                (true, true) => CellState::Straddling,
                (true, false) => CellState::Failed,
                _ => CellState::Safe,
            };
            (state, center)
        })
        .collect()
}

pub struct NumericalIntegrationMethod {
    pub settings: NumericalIntegrationSettings,
}

impl NumericalIntegrationMethod {
    pub fn new(settings: NumericalIntegrationSettings) -> Self {
        NumericalIntegrationMethod { settings }
    }
}

impl ReliabilityMethod for NumericalIntegrationMethod {
    fn name(&self) -> &'static str {
        "NI"
    }

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
        if n > 6 {
            runner.message(
                Severity::Warning,
                "integration",
                format!("grid integration over {} dimensions is expensive", n),
            );
        }

        let domain =
            IntegrationDomain::uniform(n, self.settings.range, self.settings.initial_divisions);
        let mut failed_mass = 0.0;
        let mut straddling: Vec<IntegrationCell> = vec![];
        let mut straddle_mass = 0.0;
        // failed samples for the direction estimate, weighted by mass
        let mut failed: Vec<(f64, Vec<f64>)> = vec![];

        runner.set_iteration(1);
        for (cell, (state, center)) in domain
            .cells
            .iter()
            .zip(classify(runner, &domain.cells).into_iter())
        {
            match state {
                CellState::Failed => {
                    let mass = cell.probability_mass();
                    failed_mass += mass;
                    failed.push((mass, center.u));
                }
                CellState::Straddling => {
                    straddle_mass += cell.probability_mass();
                    straddling.push(cell.clone());
                }
                CellState::Safe => {}
            }
        }

        let mut pf = failed_mass + 0.5 * straddle_mass;
        let mut converged = false;
        let mut stopped = false;
        let mut refinement = 0usize;
        while refinement < self.settings.max_refinements && !straddling.is_empty() {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            refinement += 1;
            runner.set_iteration(refinement + 1);
            let children: Vec<IntegrationCell> = straddling
                .iter()
                .flat_map(|cell| cell.subdivide())
                .collect();
            straddling.clear();
            straddle_mass = 0.0;
            for (cell, (state, center)) in
                children.iter().zip(classify(runner, &children).into_iter())
            {
                match state {
                    CellState::Failed => {
                        let mass = cell.probability_mass();
                        failed_mass += mass;
                        failed.push((mass, center.u));
                    }
                    CellState::Straddling => {
                        straddle_mass += cell.probability_mass();
                        straddling.push(cell.clone());
                    }
                    CellState::Safe => {}
                }
            }
            let next_pf = failed_mass + 0.5 * straddle_mass;
            runner
                .progress
                .step(refinement, self.settings.max_refinements, u_from_q(next_pf.max(1e-300)), (next_pf - pf).abs());
            if (next_pf - pf).abs() < self.settings.epsilon_pf {
                pf = next_pf;
                converged = true;
                break;
            }
            pf = next_pf;
        }

        let beta = u_from_q(pf.clamp(q_from_u(U_MAX), q_from_u(-U_MAX)));
        let mut messages = runner.take_messages();
        if let Some(direction) = crate::montecarlo::failure_direction(&failed) {
            let u: Vec<f64> = direction.iter().map(|d| d * beta).collect();
            result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
        }
        result.beta = beta;
        result.convergence = ConvergenceReport {
            converged,
            iterations: refinement,
            samples: runner.evaluation_count(),
            convergence: straddle_mass,
            failure_fraction: pf,
            stopped,
            ..Default::default()
        };
        result.evaluations = runner.take_evaluations();
        result.messages = messages;
        result
    }
}

pub struct NumericalBisectionMethod {
    pub settings: NumericalBisectionSettings,
}

impl NumericalBisectionMethod {
    pub fn new(settings: NumericalBisectionSettings) -> Self {
        NumericalBisectionMethod { settings }
    }
}

impl ReliabilityMethod for NumericalBisectionMethod {
    fn name(&self) -> &'static str {
        "BISECT"
    }

    /// Refine the cells straddling Z = 0 until their edge length drops
    /// below the target resolution, then take the straddling center
    /// nearest to the origin as the design point.
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

        let domain =
            IntegrationDomain::uniform(n, self.settings.range, self.settings.initial_divisions);
        runner.set_iteration(1);
        let mut straddling: Vec<IntegrationCell> = domain
            .cells
            .iter()
            .zip(classify(runner, &domain.cells).into_iter())
            .filter(|(_, (state, _))| *state == CellState::Straddling)
            .map(|(cell, _)| cell.clone())
            .collect();

        let mut stopped = false;
        let mut rounds = 0usize;
        while straddling
            .iter()
            .map(|c| c.edge())
            .fold(0.0, f64::max)
            > self.settings.target_resolution
            && !straddling.is_empty()
        {
            if runner.stop.is_stopped() {
                stopped = true;
                break;
            }
            rounds += 1;
            runner.set_iteration(rounds + 1);
            let children: Vec<IntegrationCell> = straddling
                .iter()
                .flat_map(|cell| cell.subdivide())
                .collect();
            straddling = children
                .iter()
                .zip(classify(runner, &children).into_iter())
                .filter(|(_, (state, _))| *state == CellState::Straddling)
                .map(|(cell, _)| cell.clone())
                .collect();
            runner.progress.fraction(
                (self.settings.target_resolution
                    / straddling
                        .iter()
                        .map(|c| c.edge())
                        .fold(self.settings.target_resolution, f64::max))
                .min(1.0),
            );
        }

        let mut messages = runner.take_messages();
        let nearest = straddling.iter().map(IntegrationCell::center).min_by(|a, b| {
            let da = a.iter().map(|v| v * v).sum::<f64>();
            let db = b.iter().map(|v| v * v).sum::<f64>();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        let (beta, converged) = match nearest {
            Some(u) => {
                let beta = u.iter().map(|v| v * v).sum::<f64>().sqrt();
                result.alphas = runner.converter.stochast_point(&u, beta, &mut messages);
                (beta, !stopped)
            }
            None => {
                messages.push(crate::result::Message {
                    severity: Severity::Warning,
                    subject: String::from("bisection"),
                    text: String::from("no cell straddles the limit state inside the grid"),
                });
                (U_MAX, false)
            }
        };

        result.beta = beta;
        result.convergence = ConvergenceReport {
            converged,
            iterations: rounds,
            samples: runner.evaluation_count(),
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
    fn uniform_grid_covers_the_box() {
        let domain = IntegrationDomain::uniform(2, 5.0, 4);
        assert_eq!(domain.cells.len(), 16);
        let mass: f64 = domain.cells.iter().map(|c| c.probability_mass()).sum();
        // nearly all standard normal mass lies inside [-5, 5]^2
        assert!((mass - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cell_subdivision_preserves_mass() {
        let cell = IntegrationCell {
            low: vec![-1.0, 0.5],
            high: vec![0.0, 1.5],
        };
        let children = cell.subdivide();
        assert_eq!(children.len(), 4);
        let mass: f64 = children.iter().map(|c| c.probability_mass()).sum();
        assert!((mass - cell.probability_mass()).abs() < 1e-12);
    }

    #[test]
    fn integration_of_half_plane() {
        // pf = Phi(-1.5)
        let z = Arc::new(|s: &mut Sample| {
            s.z = 1.5 - s.x[0];
        });
        let mut runner = runner(z);
        let mut method = NumericalIntegrationMethod::new(NumericalIntegrationSettings::default());
        let result = method.design_point(&mut runner);
        assert!((result.beta - 1.5).abs() < 0.05);
    }

    #[test]
    fn bisection_finds_the_nearest_boundary_point() {
        let z = Arc::new(|s: &mut Sample| {
            s.z = 2.0 - s.x[1];
        });
        let mut runner = runner(z);
        let mut method = NumericalBisectionMethod::new(NumericalBisectionSettings::default());
        let result = method.design_point(&mut runner);
        assert!((result.beta - 2.0).abs() < 0.1);
        let a2 = result.alphas.iter().find(|a| a.symbol == "x2").unwrap();
        assert!(a2.influence > 0.9);
    }
}
