// Structures for calculation results
use tabled::{builder::Builder, settings::Style};

use crate::transform::q_from_u;
use crate::validation::Severity;

/// Diagnostic message emitted during a run.
#[derive(Clone, Debug)]
pub struct Message {
    pub severity: Severity,
    pub subject: String,
    pub text: String,
}

/// One recorded model evaluation (kept when save_evaluations is set).
#[derive(Clone, Debug)]
pub struct Evaluation {
    pub iteration: usize,
    pub x: Vec<f64>,
    pub z: f64,
}

/// Convergence verdict for a finished method run.
#[derive(Clone, Debug, Default)]
pub struct ConvergenceReport {
    pub converged: bool,
    pub iterations: usize,
    pub directions: usize,
    pub samples: usize,
    /// Method-specific convergence metric: |delta beta| for the
    /// iterative solvers, coefficient of variation for the samplers
    pub convergence: f64,
    pub failure_fraction: f64,
    pub variation_coefficient: f64,
    pub stopped: bool,
}

/// Per-iteration trace entry.
#[derive(Clone, Debug)]
pub struct ReliabilityResult {
    pub iteration: usize,
    pub beta: f64,
    pub z: f64,
    pub u: Vec<f64>,
}

/// One varying stochast's contribution to the design point.
#[derive(Clone, Debug)]
pub struct StochastPointAlpha {
    pub symbol: String,
    /// Direction cosine, -u/beta
    pub alpha: f64,
    /// Direction cosine after the correlation map
    pub alpha_correlated: f64,
    pub u: f64,
    pub x: f64,
    /// Squared alpha: the variable's share of the total variance
    pub influence: f64,
}

/// The result of a reliability calculation: the reliability index with
/// its sensitivity directions and bookkeeping. Immutable once built.
#[derive(Clone, Debug, Default)]
pub struct DesignPoint {
    pub method: String,
    pub beta: f64,
    pub alphas: Vec<StochastPointAlpha>,
    pub convergence: ConvergenceReport,
    pub iterations: Vec<ReliabilityResult>,
    pub evaluations: Vec<Evaluation>,
    pub messages: Vec<Message>,
    /// Sub-results from composite methods, an owned tree
    pub contributing: Vec<DesignPoint>,
}

impl DesignPoint {
    pub fn probability_of_failure(&self) -> f64 {
        q_from_u(self.beta)
    }

    /// Raw output for the CLI.
    pub fn to_string(&self) -> String {
        let mut list: Vec<String> = vec![];
        list.push(format!("method = {}", self.method));
        list.push(format!("beta = {:.6}", self.beta));
        list.push(format!("pf = {:.6e}", self.probability_of_failure()));
        list.push(format!(
            "converged = {} ({} iterations, {} samples, {} directions)",
            self.convergence.converged,
            self.convergence.iterations,
            self.convergence.samples,
            self.convergence.directions,
        ));
        for a in &self.alphas {
            list.push(format!(
                "  {}: alpha={:.4} u={:.4} x={:.6}",
                a.symbol, a.alpha, a.u, a.x
            ));
        }
        for m in &self.messages {
            list.push(format!("  [{}] {}: {}", m.severity, m.subject, m.text));
        }
        for c in &self.contributing {
            for line in c.to_string().lines() {
                list.push(format!("    {}", line));
            }
        }
        list.join("\n")
    }

    /// Design point summary table.
    pub fn report(&self, ndig: usize) -> String {
        let mut out = String::new();

        let mut builder = Builder::default();
        builder.push_record(vec!["Parameter", "Value"]);
        builder.push_record(vec!["Method".to_string(), self.method.clone()]);
        builder.push_record(vec![
            "Reliability Index".to_string(),
            format!("{1:.0$}", ndig, self.beta),
        ]);
        builder.push_record(vec![
            "Failure Probability".to_string(),
            format!("{:.3e}", self.probability_of_failure()),
        ]);
        builder.push_record(vec![
            "Converged".to_string(),
            self.convergence.converged.to_string(),
        ]);
        builder.push_record(vec![
            "Iterations".to_string(),
            self.convergence.iterations.to_string(),
        ]);
        if self.convergence.samples > 0 {
            builder.push_record(vec![
                "Samples".to_string(),
                self.convergence.samples.to_string(),
            ]);
            builder.push_record(vec![
                "Variation Coefficient".to_string(),
                format!("{:.4}", self.convergence.variation_coefficient),
            ]);
        }
        if self.convergence.directions > 0 {
            builder.push_record(vec![
                "Directions".to_string(),
                self.convergence.directions.to_string(),
            ]);
        }
        let mut table = builder.build();
        table.with(Style::rounded());
        out.push_str(&table.to_string());

        if !self.alphas.is_empty() {
            out.push_str("\n\nDesign Point\n");
            let mut builder = Builder::default();
            builder.push_record(vec!["Variable", "Alpha", "Alpha (corr)", "u", "x", "Influence"]);
            for a in &self.alphas {
                builder.push_record(vec![
                    a.symbol.clone(),
                    format!("{1:.0$}", ndig, a.alpha),
                    format!("{1:.0$}", ndig, a.alpha_correlated),
                    format!("{1:.0$}", ndig, a.u),
                    format!("{1:.0$}", ndig, a.x),
                    format!("{:.2} %", a.influence * 100.0),
                ]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            out.push_str(&table.to_string());
        }
        out
    }

    pub fn printit(&self) {
        println!("{}", self.to_string());
    }
}
