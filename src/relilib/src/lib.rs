// Reliability Library Functions

pub mod cfg;
pub mod cobyla;
pub mod composite;
pub mod correlation;
pub mod directional;
pub mod error;
pub mod form;
pub mod method;
pub mod montecarlo;
pub mod numerical;
pub mod result;
pub mod rng;
pub mod runner;
pub mod sample;
pub mod settings;
pub mod startpoint;
pub mod stochast;
pub mod subset;
pub mod transform;
pub mod uconvert;
pub mod validation;

pub use crate::cfg::{MethodChoice, ReliabilityProject};
pub use crate::error::ReliabilityError;
pub use crate::method::ReliabilityMethod;
pub use crate::result::DesignPoint;
pub use crate::runner::{ModelRunner, NoProgress, ProgressSink, StopFlag, ZFunction};
pub use crate::sample::Sample;
pub use crate::stochast::Stochast;
pub use crate::uconvert::UConverter;
