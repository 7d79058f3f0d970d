// TOML project configuration, serializable
use std::collections::BTreeMap;
use std::sync::Arc;

use exmex::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cobyla::CobylaMethod;
use crate::composite::{CompositeKind, CompositeMethod};
use crate::correlation::{Copula, CopulaSet, CorrelationMatrix, CorrelationModel};
use crate::directional::DirectionalSamplingMethod;
use crate::error::ReliabilityError;
use crate::form::FormMethod;
use crate::method::ReliabilityMethod;
use crate::montecarlo::{
    AdaptiveImportanceSamplingMethod, ImportanceSamplingMethod, MonteCarloMethod,
};
use crate::numerical::{NumericalBisectionMethod, NumericalIntegrationMethod};
use crate::result::DesignPoint;
use crate::runner::{ModelRunner, NoProgress, ProgressSink, StopFlag, ZFunction};
use crate::sample::Sample;
use crate::settings::{
    AdaptiveImportanceSamplingSettings, CobylaSettings, CompositeSettings,
    DirectionalSamplingSettings, FormSettings, ImportanceSamplingSettings, MonteCarloSettings,
    NumericalBisectionSettings, NumericalIntegrationSettings, RandomSettings, RunSettings,
    StochastSettingsSet, SubsetSettings,
};
use crate::stochast::Stochast;
use crate::subset::SubsetMethod;
use crate::uconvert::UConverter;
use crate::validation::ValidationReport;

fn default_beta_threshold() -> f64 {
    2.0
}

/// Which calculation to run on the project.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodChoice {
    Form,
    DirectionalSampling,
    MonteCarlo,
    ImportanceSampling,
    AdaptiveImportanceSampling,
    Subset,
    NumericalIntegration,
    NumericalBisection,
    Cobyla,
    FormThenDirectionalSampling,
    DirectionalSamplingThenForm,
    FormWithFallback,
}
impl Default for MethodChoice {
    fn default() -> Self {
        MethodChoice::Form
    }
}

/// One correlation matrix entry between two stochasts.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CorrelationEntry {
    pub first: String,
    pub second: String,
    pub rho: f64,
}

/// One copula coupling between two stochasts; applied in file order.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CopulaEntry {
    pub first: String,
    pub second: String,
    pub copula: Copula,
}

/// A complete reliability project as read from a TOML file.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReliabilityProject {
    #[serde(default = "String::new")]
    pub name: String,
    /// Limit state expression over the stochast symbols; Z < 0 fails
    pub z: String,
    #[serde(default = "MethodChoice::default")]
    pub method: MethodChoice,
    pub stochasts: BTreeMap<String, Stochast>,
    #[serde(default)]
    pub correlations: Vec<CorrelationEntry>,
    #[serde(default)]
    pub copulas: Vec<CopulaEntry>,
    #[serde(default)]
    pub stochast_settings: StochastSettingsSet,
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub random: RandomSettings,
    #[serde(default)]
    pub form: FormSettings,
    #[serde(default)]
    pub directional: DirectionalSamplingSettings,
    #[serde(default)]
    pub monte_carlo: MonteCarloSettings,
    #[serde(default)]
    pub importance: ImportanceSamplingSettings,
    #[serde(default)]
    pub adaptive_importance: AdaptiveImportanceSamplingSettings,
    #[serde(default)]
    pub subset: SubsetSettings,
    #[serde(default)]
    pub integration: NumericalIntegrationSettings,
    #[serde(default)]
    pub bisection: NumericalBisectionSettings,
    #[serde(default)]
    pub cobyla: CobylaSettings,
    #[serde(default = "default_beta_threshold")]
    pub beta_threshold: f64,
}

impl ReliabilityProject {
    pub fn load_toml(config: &str) -> Result<ReliabilityProject, ReliabilityError> {
        toml::from_str::<ReliabilityProject>(config)
            .map_err(|e| ReliabilityError::Project(e.to_string()))
    }

    pub fn get_config(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(&self)
    }

    fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.stochasts.keys().position(|s| s == symbol)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::new();
        if self.stochasts.is_empty() {
            report.error("project", String::from("no stochasts defined"));
        }
        for (symbol, stochast) in &self.stochasts {
            if let Err(e) = stochast.check() {
                report.error(symbol, e.to_string());
            }
        }
        match exmex::parse::<f64>(&self.z) {
            Ok(expr) => {
                for name in expr.var_names() {
                    if self.symbol_index(name).is_none() {
                        report.error(
                            "z",
                            format!("expression variable {} is not a stochast", name),
                        );
                    }
                }
            }
            Err(e) => report.error("z", e.to_string()),
        }
        for entry in &self.correlations {
            for symbol in [&entry.first, &entry.second] {
                if self.symbol_index(symbol).is_none() {
                    report.error("correlations", format!("unknown stochast {}", symbol));
                }
            }
            if entry.rho.abs() > 1.0 {
                report.error(
                    "correlations",
                    format!("{}-{}: rho {} outside [-1, 1]", entry.first, entry.second, entry.rho),
                );
            }
        }
        for entry in &self.copulas {
            for symbol in [&entry.first, &entry.second] {
                if self.symbol_index(symbol).is_none() {
                    report.error("copulas", format!("unknown stochast {}", symbol));
                }
            }
            if !entry.copula.is_valid() {
                report.error(
                    "copulas",
                    format!("{}-{}: {}", entry.first, entry.second, entry.copula.describe()),
                );
            }
        }
        if !self.correlations.is_empty() && !self.copulas.is_empty() {
            report.error(
                "correlations",
                String::from("a project uses either a correlation matrix or copulas, not both"),
            );
        }
        self.stochast_settings.validate(&mut report);
        self.run.validate(&mut report);
        self.form.validate(&mut report);
        self.directional.validate(&mut report);
        self.monte_carlo.validate(&mut report);
        self.importance.validate(&mut report);
        self.adaptive_importance.validate(&mut report);
        self.subset.validate(&mut report);
        self.integration.validate(&mut report);
        self.bisection.validate(&mut report);
        self.cobyla.validate(&mut report);
        report
    }

    fn correlation_model(&self) -> Result<CorrelationModel, ReliabilityError> {
        if !self.copulas.is_empty() {
            let mut set = CopulaSet::default();
            for entry in &self.copulas {
                let first = self.symbol_index(&entry.first).ok_or_else(|| {
                    ReliabilityError::Project(format!("unknown stochast {}", entry.first))
                })?;
                let second = self.symbol_index(&entry.second).ok_or_else(|| {
                    ReliabilityError::Project(format!("unknown stochast {}", entry.second))
                })?;
                set.add(first, second, entry.copula.clone());
            }
            return Ok(CorrelationModel::Copulas(set));
        }
        if !self.correlations.is_empty() {
            let mut matrix = CorrelationMatrix::identity(self.stochasts.len());
            for entry in &self.correlations {
                let first = self.symbol_index(&entry.first).ok_or_else(|| {
                    ReliabilityError::Project(format!("unknown stochast {}", entry.first))
                })?;
                let second = self.symbol_index(&entry.second).ok_or_else(|| {
                    ReliabilityError::Project(format!("unknown stochast {}", entry.second))
                })?;
                matrix.set_correlation(first, second, entry.rho);
            }
            return Ok(CorrelationModel::Matrix(matrix));
        }
        Ok(CorrelationModel::Independent)
    }

    /// Compile the Z expression into a model function. Variables are
    /// bound to stochast positions once, at build time.
    fn z_function(&self) -> Result<ZFunction, ReliabilityError> {
        let expr = exmex::parse::<f64>(&self.z)
            .map_err(|e| ReliabilityError::Expression(e.to_string()))?;
        let indices: Vec<usize> = expr
            .var_names()
            .iter()
            .map(|name| {
                self.symbol_index(name).ok_or_else(|| {
                    ReliabilityError::Expression(format!(
                        "expression variable {} is not a stochast",
                        name
                    ))
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Arc::new(move |sample: &mut Sample| {
            let values: Vec<f64> = indices.iter().map(|&i| sample.x[i]).collect();
            sample.z = expr.eval(&values).unwrap_or(f64::NAN);
        }))
    }

    /// Build the evaluation pipeline for this project.
    pub fn build_runner(&self) -> Result<ModelRunner, ReliabilityError> {
        let stochasts: Vec<(String, Stochast)> = self
            .stochasts
            .iter()
            .map(|(symbol, stochast)| (symbol.clone(), stochast.clone()))
            .collect();
        let converter = UConverter::new(
            stochasts,
            self.stochast_settings.clone(),
            self.correlation_model()?,
        )?;
        Ok(ModelRunner::new(
            converter,
            self.z_function()?,
            self.run.clone(),
        ))
    }

    pub fn build_method(&self) -> Box<dyn ReliabilityMethod> {
        let random = self.random.resolved();
        let composite = CompositeSettings {
            form: self.form.clone(),
            directional: self.directional.clone(),
            beta_threshold: self.beta_threshold,
        };
        match self.method {
            MethodChoice::Form => Box::new(FormMethod::new(self.form.clone(), random)),
            MethodChoice::DirectionalSampling => Box::new(DirectionalSamplingMethod::new(
                self.directional.clone(),
                random,
            )),
            MethodChoice::MonteCarlo => {
                Box::new(MonteCarloMethod::new(self.monte_carlo.clone(), random))
            }
            MethodChoice::ImportanceSampling => {
                Box::new(ImportanceSamplingMethod::new(self.importance.clone(), random))
            }
            MethodChoice::AdaptiveImportanceSampling => Box::new(
                AdaptiveImportanceSamplingMethod::new(self.adaptive_importance.clone(), random),
            ),
            MethodChoice::Subset => Box::new(SubsetMethod::new(self.subset.clone(), random)),
            MethodChoice::NumericalIntegration => {
                Box::new(NumericalIntegrationMethod::new(self.integration.clone()))
            }
            MethodChoice::NumericalBisection => {
                Box::new(NumericalBisectionMethod::new(self.bisection.clone()))
            }
            MethodChoice::Cobyla => Box::new(CobylaMethod::new(self.cobyla.clone(), random)),
            MethodChoice::FormThenDirectionalSampling => Box::new(CompositeMethod::new(
                CompositeKind::FormThenDirectional,
                composite,
                random,
            )),
            MethodChoice::DirectionalSamplingThenForm => Box::new(CompositeMethod::new(
                CompositeKind::DirectionalThenForm,
                composite,
                random,
            )),
            MethodChoice::FormWithFallback => Box::new(CompositeMethod::new(
                CompositeKind::FormWithThreshold,
                composite,
                random,
            )),
        }
    }

    pub fn calculate(&self) -> Result<DesignPoint, ReliabilityError> {
        self.calculate_with(StopFlag::new(), Box::new(NoProgress))
    }

    /// Run the configured method with an externally owned stop flag
    /// and progress sink.
    pub fn calculate_with(
        &self,
        stop: StopFlag,
        progress: Box<dyn ProgressSink>,
    ) -> Result<DesignPoint, ReliabilityError> {
        let report = self.validate();
        if !report.is_valid() {
            let text = report
                .findings()
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ReliabilityError::Project(text));
        }
        let mut runner = self.build_runner()?;
        runner.stop = stop;
        runner.progress = progress;
        let mut method = self.build_method();
        info!(project = %self.name, method = method.name(), "starting calculation");
        let result = method.design_point(&mut runner);
        info!(
            beta = result.beta,
            converged = result.convergence.converged,
            evaluations = runner.evaluation_count(),
            "calculation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDITION: &str = r#"
        name = "addition"
        z = "x1 + x2 - 10"
        method = "Form"

        [stochasts.x1.Normal]
        mean = 6.65
        deviation = 1.0

        [stochasts.x2.Normal]
        mean = 6.65
        deviation = 1.0
    "#;

    #[test]
    fn load_and_calculate_form_project() {
        let project = ReliabilityProject::load_toml(ADDITION).unwrap();
        assert_eq!(project.method, MethodChoice::Form);
        assert!(project.validate().is_valid());
        let result = project.calculate().unwrap();
        assert!(result.convergence.converged);
        assert!((result.beta - 3.3 / 2.0_f64.sqrt()).abs() < 0.01);
    }

    #[test]
    fn unknown_expression_variable_is_rejected() {
        let text = ADDITION.replace("x1 + x2", "x1 + x3");
        let project = ReliabilityProject::load_toml(&text).unwrap();
        let report = project.validate();
        assert!(!report.is_valid());
        assert!(project.calculate().is_err());
    }

    #[test]
    fn bad_toml_is_a_project_error() {
        let err = ReliabilityProject::load_toml("not = [toml").unwrap_err();
        assert!(matches!(err, ReliabilityError::Project(_)));
    }

    #[test]
    fn correlated_project_round_trips() {
        let text = format!(
            "{}\n[[correlations]]\nfirst = \"x1\"\nsecond = \"x2\"\nrho = 0.5\n",
            ADDITION
        );
        let project = ReliabilityProject::load_toml(&text).unwrap();
        assert!(project.validate().is_valid());
        let config = project.get_config().unwrap();
        let back = ReliabilityProject::load_toml(&config).unwrap();
        assert_eq!(back.correlations.len(), 1);
        // positive correlation lowers the reliability of the sum
        let result = back.calculate().unwrap();
        assert!(result.beta < 3.3 / 2.0_f64.sqrt());
    }

    #[test]
    fn copula_and_matrix_together_are_rejected() {
        let text = format!(
            concat!(
                "{}\n[[correlations]]\nfirst = \"x1\"\nsecond = \"x2\"\nrho = 0.5\n",
                "[[copulas]]\nfirst = \"x1\"\nsecond = \"x2\"\n",
                "[copulas.copula.Gaussian]\nrho = 0.5\n"
            ),
            ADDITION
        );
        let project = ReliabilityProject::load_toml(&text).unwrap();
        assert!(!project.validate().is_valid());
    }

    #[test]
    fn method_dispatch_covers_sampling() {
        let mut project = ReliabilityProject::load_toml(ADDITION).unwrap();
        project.method = MethodChoice::MonteCarlo;
        project.monte_carlo.minimum_samples = 2000;
        project.monte_carlo.maximum_samples = 50_000;
        let result = project.calculate().unwrap();
        assert_eq!(result.method, "MC");
        assert!((result.beta - 3.3 / 2.0_f64.sqrt()).abs() < 0.35);
    }
}
