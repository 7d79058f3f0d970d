// Method and run settings, TOML serializable
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::validation::{Severity, ValidationReport};

// serde default functions
fn default_1size() -> usize {
    1
}
fn default_128size() -> usize {
    128
}
fn default_100size() -> usize {
    100
}
fn default_true() -> bool {
    true
}
fn default_severity() -> Severity {
    Severity::Warning
}
fn default_seed() -> u64 {
    4357
}
fn default_step_size() -> f64 {
    0.05
}
fn default_dsdu() -> f64 {
    0.5
}
fn default_epsilon_u() -> f64 {
    0.01
}
fn default_relaxation() -> f64 {
    0.75
}
fn default_epsilon_beta() -> f64 {
    0.01
}
fn default_epsilon_z() -> f64 {
    0.01
}
fn default_50size() -> usize {
    50
}
fn default_3size() -> usize {
    3
}
fn default_growth() -> f64 {
    1.5
}
fn default_varcoef() -> f64 {
    0.1
}
fn default_min_directions() -> usize {
    50
}
fn default_max_directions() -> usize {
    2000
}
fn default_min_samples() -> usize {
    1000
}
fn default_max_samples() -> usize {
    100_000
}
fn default_is_scale() -> f64 {
    1.5
}
fn default_5size() -> usize {
    5
}
fn default_500size() -> usize {
    500
}
fn default_p0() -> f64 {
    0.1
}
fn default_spread() -> f64 {
    1.0
}
fn default_10size() -> usize {
    10
}
fn default_range() -> f64 {
    5.0
}
fn default_4size() -> usize {
    4
}
fn default_6size() -> usize {
    6
}
fn default_epsilon_pf() -> f64 {
    1e-4
}
fn default_resolution() -> f64 {
    0.1
}
fn default_trust() -> f64 {
    1.0
}
fn default_trust_end() -> f64 {
    1e-4
}
fn default_ray_length() -> f64 {
    3.0
}
fn default_ray_step() -> f64 {
    0.5
}
fn default_radius() -> f64 {
    3.0
}
fn default_beta_threshold() -> f64 {
    2.0
}

// Parallel/telemetry settings shared by every method run
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunSettings {
    #[serde(default = "default_1size")]
    pub max_parallel_processes: usize,
    #[serde(default = "default_128size")]
    pub max_chunk_size: usize,
    #[serde(default)]
    pub save_evaluations: bool,
    #[serde(default = "default_severity")]
    pub min_severity: Severity,
    #[serde(default = "default_100size")]
    pub max_messages: usize,
}
impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_parallel_processes: 1,
            max_chunk_size: 128,
            save_evaluations: false,
            min_severity: Severity::Warning,
            max_messages: 100,
        }
    }
}
impl RunSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.max_parallel_processes == 0 {
            report.error(
                "run",
                String::from("max_parallel_processes must be at least 1"),
            );
        }
        if self.max_chunk_size == 0 {
            report.error("run", String::from("max_chunk_size must be at least 1"));
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeneratorKind {
    /// Permuted congruential generator (default)
    Pcg64,
    /// The rand crate's platform standard generator
    Standard,
}

// Random number configuration; one seed per run
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RandomSettings {
    #[serde(default = "default_true")]
    pub repeatable: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "GeneratorKind::default")]
    pub generator: GeneratorKind,
}
impl Default for GeneratorKind {
    fn default() -> Self {
        GeneratorKind::Pcg64
    }
}
impl Default for RandomSettings {
    fn default() -> Self {
        Self {
            repeatable: true,
            seed: 4357,
            generator: GeneratorKind::Pcg64,
        }
    }
}
impl RandomSettings {
    /// Pin the seed for the lifetime of a run. One-time runs take a
    /// wall-clock stamp here, once, so every stage of a composite run
    /// derives from the same stamp.
    pub fn resolved(&self) -> RandomSettings {
        if self.repeatable {
            self.clone()
        } else {
            RandomSettings {
                repeatable: true,
                seed: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(self.seed),
                generator: self.generator,
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct GradientSettings {
    /// Two-sided finite difference step in u-space
    #[serde(default = "default_step_size")]
    pub step_size: f64,
}
impl Default for GradientSettings {
    fn default() -> Self {
        Self { step_size: 0.05 }
    }
}
impl GradientSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.step_size <= 0.0 {
            report.error("gradient", String::from("step_size must be positive"));
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectionSettings {
    /// Step along a direction while hunting for a sign change
    #[serde(default = "default_dsdu")]
    pub dsdu: f64,
    /// Root tolerance on the u-distance
    #[serde(default = "default_epsilon_u")]
    pub epsilon_u_step: f64,
}
impl Default for DirectionSettings {
    fn default() -> Self {
        Self {
            dsdu: 0.5,
            epsilon_u_step: 0.01,
        }
    }
}
impl DirectionSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.dsdu <= 0.0 {
            report.error("direction", String::from("dsdu must be positive"));
        }
        if self.epsilon_u_step <= 0.0 {
            report.error(
                "direction",
                String::from("epsilon_u_step must be positive"),
            );
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartMethodType {
    Zero,
    Fixed,
    RaySearch,
    SphereSearch,
    SensitivitySearch,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StartPointSettings {
    #[serde(default = "StartMethodType::default")]
    pub method: StartMethodType,
    /// Start coordinates for the Fixed method, reduced u-space
    #[serde(default)]
    pub fixed: Vec<f64>,
    #[serde(default = "default_ray_length")]
    pub ray_length: f64,
    #[serde(default = "default_ray_step")]
    pub ray_step: f64,
    #[serde(default = "default_radius")]
    pub sphere_radius: f64,
}
impl Default for StartMethodType {
    fn default() -> Self {
        StartMethodType::Zero
    }
}
impl Default for StartPointSettings {
    fn default() -> Self {
        Self {
            method: StartMethodType::Zero,
            fixed: Vec::new(),
            ray_length: 3.0,
            ray_step: 0.5,
            sphere_radius: 3.0,
        }
    }
}
impl StartPointSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.method == StartMethodType::Fixed && self.fixed.is_empty() {
            report.error(
                "start_point",
                String::from("Fixed start method requires coordinates"),
            );
        }
        if self.ray_step <= 0.0 || self.ray_length <= 0.0 || self.sphere_radius <= 0.0 {
            report.error(
                "start_point",
                String::from("Search lengths and steps must be positive"),
            );
        }
    }
}

// Per-stochast overrides, keyed by stochast symbol
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StochastSettings {
    /// Physical start value; converted to u for the iteration seed
    pub start_value: Option<f64>,
    /// u-space truncation of the search domain
    pub min_u: Option<f64>,
    pub max_u: Option<f64>,
    /// When false the stochast is pinned at its mean for this run
    #[serde(default = "default_true")]
    pub variance_allowed: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(transparent)]
pub struct StochastSettingsSet {
    entries: BTreeMap<String, StochastSettings>,
}
impl StochastSettingsSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set(&mut self, symbol: &str, settings: StochastSettings) {
        self.entries.insert(symbol.to_string(), settings);
    }
    pub fn get(&self, symbol: &str) -> Option<&StochastSettings> {
        self.entries.get(symbol)
    }
    pub fn validate(&self, report: &mut ValidationReport) {
        for (symbol, s) in &self.entries {
            if let (Some(lo), Some(hi)) = (s.min_u, s.max_u) {
                if lo > hi {
                    report.error(
                        "stochast_settings",
                        format!("{}: min_u {} exceeds max_u {}", symbol, lo, hi),
                    );
                }
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FormSettings {
    #[serde(default = "default_relaxation")]
    pub relaxation_factor: f64,
    #[serde(default = "default_epsilon_beta")]
    pub epsilon_beta: f64,
    #[serde(default = "default_epsilon_z")]
    pub epsilon_z: f64,
    #[serde(default = "default_50size")]
    pub maximum_iterations: usize,
    #[serde(default = "default_3size")]
    pub relaxation_loops: usize,
    #[serde(default = "default_growth")]
    pub max_iterations_growth_factor: f64,
    #[serde(default = "default_true")]
    pub filter_at_non_convergence: bool,
    #[serde(default)]
    pub start: StartPointSettings,
    #[serde(default)]
    pub gradient: GradientSettings,
}
impl Default for FormSettings {
    fn default() -> Self {
        Self {
            relaxation_factor: 0.75,
            epsilon_beta: 0.01,
            epsilon_z: 0.01,
            maximum_iterations: 50,
            relaxation_loops: 3,
            max_iterations_growth_factor: 1.5,
            filter_at_non_convergence: true,
            start: StartPointSettings::default(),
            gradient: GradientSettings::default(),
        }
    }
}
impl FormSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if !(self.relaxation_factor > 0.0 && self.relaxation_factor <= 1.0) {
            report.error(
                "form",
                format!(
                    "relaxation_factor {} outside (0, 1]",
                    self.relaxation_factor
                ),
            );
        }
        if self.epsilon_beta <= 0.0 {
            report.error("form", String::from("epsilon_beta must be positive"));
        }
        if self.maximum_iterations == 0 {
            report.error("form", String::from("maximum_iterations must be at least 1"));
        }
        if self.relaxation_loops == 0 {
            report.error("form", String::from("relaxation_loops must be at least 1"));
        }
        if self.max_iterations_growth_factor < 1.0 {
            report.error(
                "form",
                String::from("max_iterations_growth_factor must be at least 1"),
            );
        }
        self.start.validate(report);
        self.gradient.validate(report);
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DesignPointMethod {
    NearestToMean,
    CenterOfGravity,
    CenterOfAngles,
}
impl Default for DesignPointMethod {
    fn default() -> Self {
        DesignPointMethod::NearestToMean
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DirectionalSamplingSettings {
    #[serde(default = "default_min_directions")]
    pub minimum_directions: usize,
    #[serde(default = "default_max_directions")]
    pub maximum_directions: usize,
    #[serde(default = "default_varcoef")]
    pub variation_coefficient: f64,
    #[serde(default)]
    pub direction: DirectionSettings,
    #[serde(default = "DesignPointMethod::default")]
    pub design_point_method: DesignPointMethod,
}
impl Default for DirectionalSamplingSettings {
    fn default() -> Self {
        Self {
            minimum_directions: 50,
            maximum_directions: 2000,
            variation_coefficient: 0.1,
            direction: DirectionSettings::default(),
            design_point_method: DesignPointMethod::NearestToMean,
        }
    }
}
impl DirectionalSamplingSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.maximum_directions < self.minimum_directions {
            report.error(
                "directional_sampling",
                format!(
                    "maximum_directions {} below minimum_directions {}",
                    self.maximum_directions, self.minimum_directions
                ),
            );
        }
        if self.variation_coefficient <= 0.0 {
            report.error(
                "directional_sampling",
                String::from("variation_coefficient must be positive"),
            );
        }
        self.direction.validate(report);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MonteCarloSettings {
    #[serde(default = "default_min_samples")]
    pub minimum_samples: usize,
    #[serde(default = "default_max_samples")]
    pub maximum_samples: usize,
    #[serde(default = "default_varcoef")]
    pub variation_coefficient: f64,
    /// Stratify each dimension with a Latin hypercube permutation
    #[serde(default)]
    pub latin_hypercube: bool,
}
impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            minimum_samples: 1000,
            maximum_samples: 100_000,
            variation_coefficient: 0.1,
            latin_hypercube: false,
        }
    }
}
impl MonteCarloSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.maximum_samples < self.minimum_samples {
            report.error(
                "monte_carlo",
                format!(
                    "maximum_samples {} below minimum_samples {}",
                    self.maximum_samples, self.minimum_samples
                ),
            );
        }
        if self.variation_coefficient <= 0.0 {
            report.error(
                "monte_carlo",
                String::from("variation_coefficient must be positive"),
            );
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ImportanceSamplingSettings {
    #[serde(default = "default_min_samples")]
    pub minimum_samples: usize,
    #[serde(default = "default_max_samples")]
    pub maximum_samples: usize,
    #[serde(default = "default_varcoef")]
    pub variation_coefficient: f64,
    /// Sampling density center in reduced u-space; zero vector if absent
    #[serde(default)]
    pub center: Option<Vec<f64>>,
    /// Widening of the sampling density deviation
    #[serde(default = "default_is_scale")]
    pub scale: f64,
}
impl Default for ImportanceSamplingSettings {
    fn default() -> Self {
        Self {
            minimum_samples: 1000,
            maximum_samples: 100_000,
            variation_coefficient: 0.1,
            center: None,
            scale: 1.5,
        }
    }
}
impl ImportanceSamplingSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.maximum_samples < self.minimum_samples {
            report.error(
                "importance_sampling",
                format!(
                    "maximum_samples {} below minimum_samples {}",
                    self.maximum_samples, self.minimum_samples
                ),
            );
        }
        if self.scale <= 0.0 {
            report.error(
                "importance_sampling",
                String::from("scale must be positive"),
            );
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AdaptiveImportanceSamplingSettings {
    #[serde(default = "default_5size")]
    pub loops: usize,
    #[serde(default = "default_500size")]
    pub samples_per_loop: usize,
    #[serde(default = "default_varcoef")]
    pub variation_coefficient: f64,
    #[serde(default = "default_is_scale")]
    pub scale: f64,
}
impl Default for AdaptiveImportanceSamplingSettings {
    fn default() -> Self {
        Self {
            loops: 5,
            samples_per_loop: 500,
            variation_coefficient: 0.1,
            scale: 1.5,
        }
    }
}
impl AdaptiveImportanceSamplingSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.loops == 0 || self.samples_per_loop == 0 {
            report.error(
                "adaptive_importance_sampling",
                String::from("loops and samples_per_loop must be at least 1"),
            );
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubsetSettings {
    #[serde(default = "default_500size")]
    pub samples_per_level: usize,
    /// Conditional probability per level
    #[serde(default = "default_p0")]
    pub p0: f64,
    #[serde(default = "default_10size")]
    pub max_levels: usize,
    /// Spread of the component-wise Metropolis proposal
    #[serde(default = "default_spread")]
    pub proposal_spread: f64,
}
impl Default for SubsetSettings {
    fn default() -> Self {
        Self {
            samples_per_level: 500,
            p0: 0.1,
            max_levels: 10,
            proposal_spread: 1.0,
        }
    }
}
impl SubsetSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if !(self.p0 > 0.0 && self.p0 < 1.0) {
            report.error("subset", format!("p0 {} outside (0, 1)", self.p0));
        }
        if self.samples_per_level < 10 {
            report.error(
                "subset",
                String::from("samples_per_level must be at least 10"),
            );
        }
        if self.max_levels == 0 {
            report.error("subset", String::from("max_levels must be at least 1"));
        }
        if self.proposal_spread <= 0.0 {
            report.error("subset", String::from("proposal_spread must be positive"));
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NumericalIntegrationSettings {
    /// Half-width of the integration box in u-space
    #[serde(default = "default_range")]
    pub range: f64,
    #[serde(default = "default_4size")]
    pub initial_divisions: usize,
    #[serde(default = "default_6size")]
    pub max_refinements: usize,
    /// Stop once the failure-probability mass moves less than this
    #[serde(default = "default_epsilon_pf")]
    pub epsilon_pf: f64,
}
impl Default for NumericalIntegrationSettings {
    fn default() -> Self {
        Self {
            range: 5.0,
            initial_divisions: 4,
            max_refinements: 6,
            epsilon_pf: 1e-4,
        }
    }
}
impl NumericalIntegrationSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.range <= 0.0 {
            report.error(
                "numerical_integration",
                String::from("range must be positive"),
            );
        }
        if self.initial_divisions == 0 {
            report.error(
                "numerical_integration",
                String::from("initial_divisions must be at least 1"),
            );
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NumericalBisectionSettings {
    #[serde(default = "default_range")]
    pub range: f64,
    #[serde(default = "default_4size")]
    pub initial_divisions: usize,
    /// Refine straddling cells down to this u-space edge length
    #[serde(default = "default_resolution")]
    pub target_resolution: f64,
}
impl Default for NumericalBisectionSettings {
    fn default() -> Self {
        Self {
            range: 5.0,
            initial_divisions: 4,
            target_resolution: 0.1,
        }
    }
}
impl NumericalBisectionSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.range <= 0.0 || self.target_resolution <= 0.0 {
            report.error(
                "numerical_bisection",
                String::from("range and target_resolution must be positive"),
            );
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CobylaSettings {
    #[serde(default = "default_trust")]
    pub initial_trust: f64,
    #[serde(default = "default_trust_end")]
    pub final_trust: f64,
    #[serde(default = "default_100size")]
    pub maximum_iterations: usize,
    #[serde(default)]
    pub start: StartPointSettings,
}
impl Default for CobylaSettings {
    fn default() -> Self {
        Self {
            initial_trust: 1.0,
            final_trust: 1e-4,
            maximum_iterations: 100,
            start: StartPointSettings::default(),
        }
    }
}
impl CobylaSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        if self.initial_trust <= 0.0 || self.final_trust <= 0.0 {
            report.error("cobyla", String::from("trust radii must be positive"));
        }
        if self.final_trust > self.initial_trust {
            report.error(
                "cobyla",
                String::from("final_trust must not exceed initial_trust"),
            );
        }
        self.start.validate(report);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CompositeSettings {
    #[serde(default)]
    pub form: FormSettings,
    #[serde(default)]
    pub directional: DirectionalSamplingSettings,
    /// For the threshold variant: accept the first result when its
    /// beta stays above this
    #[serde(default = "default_beta_threshold")]
    pub beta_threshold: f64,
}
impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            form: FormSettings::default(),
            directional: DirectionalSamplingSettings::default(),
            beta_threshold: 2.0,
        }
    }
}
impl CompositeSettings {
    pub fn validate(&self, report: &mut ValidationReport) {
        self.form.validate(report);
        self.directional.validate(report);
    }
}
