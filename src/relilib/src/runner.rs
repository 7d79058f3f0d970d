// Model evaluation pipeline: u to x conversion, chunked Z evaluation,
// message and evaluation bookkeeping
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::result::{Evaluation, Message};
use crate::sample::Sample;
use crate::settings::RunSettings;
use crate::uconvert::UConverter;
use crate::validation::Severity;

/// Limit-state function. Reads the physical values of a sample and
/// writes its z. Negative z is failure.
pub type ZFunction = Arc<dyn Fn(&mut Sample) + Send + Sync>;

/// Cooperative cancellation handle shared with the caller.
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Progress reporting seam for long runs. The CLI logs; embedders may
/// drive a progress bar.
pub trait ProgressSink: Send {
    fn fraction(&mut self, _done: f64) {}
    fn step(&mut self, _step: usize, _loops: usize, _beta: f64, _convergence: f64) {}
    fn text(&mut self, _text: &str) {}
}

/// Sink that swallows everything.
#[derive(Default)]
pub struct NoProgress;
impl ProgressSink for NoProgress {}

/// Evaluates the limit-state model for samples, batching evaluations
/// over a thread pool and collecting run diagnostics.
pub struct ModelRunner {
    pub converter: UConverter,
    z_function: ZFunction,
    pub settings: RunSettings,
    pub stop: StopFlag,
    pub progress: Box<dyn ProgressSink>,
    /// Dedicated pool bounding concurrent model calls; absent when the
    /// run is configured single-process
    pool: Option<ThreadPool>,
    evaluations: Vec<Evaluation>,
    messages: Vec<Message>,
    dropped_messages: usize,
    evaluation_count: usize,
    iteration: usize,
}

impl ModelRunner {
    pub fn new(converter: UConverter, z_function: ZFunction, settings: RunSettings) -> Self {
        let pool = if settings.max_parallel_processes > 1 {
            match ThreadPoolBuilder::new()
                .num_threads(settings.max_parallel_processes)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!("thread pool unavailable, evaluating serially: {e}");
                    None
                }
            }
        } else {
            None
        };
        ModelRunner {
            converter,
            z_function,
            settings,
            stop: StopFlag::new(),
            progress: Box::new(NoProgress),
            pool,
            evaluations: vec![],
            messages: vec![],
            dropped_messages: 0,
            evaluation_count: 0,
            iteration: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.converter.varying_count()
    }

    pub fn set_iteration(&mut self, iteration: usize) {
        self.iteration = iteration;
    }

    pub fn evaluation_count(&self) -> usize {
        self.evaluation_count
    }

    /// Evaluate one sample in place.
    pub fn z_value(&mut self, sample: &mut Sample) {
        sample.iteration = self.iteration;
        self.converter.x_values(sample);
        (self.z_function)(sample);
        self.evaluation_count += 1;
        if self.settings.save_evaluations {
            self.evaluations.push(Evaluation {
                iteration: sample.iteration,
                x: sample.x.clone(),
                z: sample.z,
            });
        }
    }

    /// Evaluate a batch of samples, preserving order. The u-to-x
    /// conversion is sequential (the correlation map holds cached
    /// state); the model calls run chunked on the runner's pool, so at
    /// most `max_parallel_processes` callbacks are in flight at once.
    pub fn z_values(&mut self, samples: &mut [Sample]) {
        for sample in samples.iter_mut() {
            sample.iteration = self.iteration;
            self.converter.x_values(sample);
        }
        let chunk = self.settings.max_chunk_size.max(1);
        let z_function = Arc::clone(&self.z_function);
        if let Some(pool) = &self.pool {
            pool.install(|| {
                samples.par_chunks_mut(chunk).for_each(|block| {
                    for sample in block {
                        (z_function)(sample);
                    }
                });
            });
        } else {
            for sample in samples.iter_mut() {
                (z_function)(sample);
            }
        }
        self.evaluation_count += samples.len();
        if self.settings.save_evaluations {
            for sample in samples.iter() {
                self.evaluations.push(Evaluation {
                    iteration: sample.iteration,
                    x: sample.x.clone(),
                    z: sample.z,
                });
            }
        }
    }

    /// Record a diagnostic. Messages below the configured severity are
    /// discarded; past the cap they are counted but not stored.
    pub fn message(&mut self, severity: Severity, subject: &str, text: String) {
        if severity < self.settings.min_severity {
            return;
        }
        debug!(subject, %severity, "{}", text);
        if self.messages.len() >= self.settings.max_messages {
            self.dropped_messages += 1;
            return;
        }
        self.messages.push(Message {
            severity,
            subject: subject.to_string(),
            text,
        });
    }

    /// Drain collected diagnostics, appending a summary line when the
    /// message cap was hit.
    pub fn take_messages(&mut self) -> Vec<Message> {
        let mut messages = std::mem::take(&mut self.messages);
        if self.dropped_messages > 0 {
            messages.push(Message {
                severity: Severity::Info,
                subject: String::from("runner"),
                text: format!("{} further messages suppressed", self.dropped_messages),
            });
            self.dropped_messages = 0;
        }
        messages
    }

    pub fn take_evaluations(&mut self) -> Vec<Evaluation> {
        std::mem::take(&mut self.evaluations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationModel;
    use crate::settings::StochastSettingsSet;
    use crate::stochast::Stochast;

    fn converter() -> UConverter {
        let stochasts = vec![
            (
                String::from("a"),
                Stochast::Normal {
                    mean: 0.0,
                    deviation: 1.0,
                },
            ),
            (
                String::from("b"),
                Stochast::Normal {
                    mean: 0.0,
                    deviation: 1.0,
                },
            ),
        ];
        UConverter::new(
            stochasts,
            StochastSettingsSet::default(),
            CorrelationModel::Independent,
        )
        .unwrap()
    }

    fn runner(parallel: usize) -> ModelRunner {
        let z: ZFunction = Arc::new(|s: &mut Sample| {
            s.z = s.x[0] + s.x[1];
        });
        let mut settings = RunSettings::default();
        settings.max_parallel_processes = parallel;
        settings.save_evaluations = true;
        ModelRunner::new(converter(), z, settings)
    }

    #[test]
    fn batch_preserves_sample_order() {
        let mut runner = runner(4);
        let mut samples: Vec<Sample> = (0..300)
            .map(|i| Sample::new(vec![i as f64, 0.0]))
            .collect();
        runner.z_values(&mut samples);
        for (i, s) in samples.iter().enumerate() {
            assert!((s.z - i as f64).abs() < 1e-9);
        }
        assert_eq!(runner.evaluation_count(), 300);
        assert_eq!(runner.take_evaluations().len(), 300);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let mut seq = runner(1);
        let mut par = runner(8);
        let make = || -> Vec<Sample> {
            (0..50)
                .map(|i| Sample::new(vec![0.1 * i as f64, -0.05 * i as f64]))
                .collect()
        };
        let mut a = make();
        let mut b = make();
        seq.z_values(&mut a);
        par.z_values(&mut b);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.z, y.z);
        }
    }

    #[test]
    fn parallel_evaluations_respect_the_process_bound() {
        use std::sync::atomic::AtomicUsize;
        use std::time::Duration;

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (fly, top) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let z: ZFunction = Arc::new(move |s: &mut Sample| {
            let now = fly.fetch_add(1, Ordering::SeqCst) + 1;
            top.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            s.z = s.x[0];
            fly.fetch_sub(1, Ordering::SeqCst);
        });
        let mut settings = RunSettings::default();
        settings.max_parallel_processes = 2;
        settings.max_chunk_size = 1;
        let mut runner = ModelRunner::new(converter(), z, settings);
        let mut samples: Vec<Sample> = (0..64)
            .map(|i| Sample::new(vec![i as f64, 0.0]))
            .collect();
        runner.z_values(&mut samples);
        let seen = peak.load(Ordering::SeqCst);
        assert!(seen >= 1 && seen <= 2, "peak concurrency {}", seen);
    }

    #[test]
    fn message_filter_and_cap() {
        let mut runner = runner(1);
        runner.settings.min_severity = Severity::Warning;
        runner.settings.max_messages = 2;
        runner.message(Severity::Debug, "t", String::from("dropped"));
        runner.message(Severity::Warning, "t", String::from("one"));
        runner.message(Severity::Error, "t", String::from("two"));
        runner.message(Severity::Error, "t", String::from("over the cap"));
        let messages = runner.take_messages();
        // two stored plus the suppression summary
        assert_eq!(messages.len(), 3);
        assert!(messages[2].text.contains("1 further"));
    }

    #[test]
    fn stop_flag_is_shared() {
        let runner = runner(1);
        let handle = runner.stop.clone();
        assert!(!runner.stop.is_stopped());
        handle.stop();
        assert!(runner.stop.is_stopped());
    }
}
