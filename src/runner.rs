//! Receiver scheduling: contiguous batches across a thread pool,
//! cooperative cancellation and path emission to the sink.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error};
use ndarray::Array1;
use rayon::prelude::*;

use crate::compose::PathFinder;
use crate::data::PropagationData;
use crate::error::{CityraysError, Result};
use crate::geom::{Coordinate, Envelope};
use crate::index::AabbTree;
use crate::path::PropagationPath;
use crate::sources::{collect_source_points, w_to_dba};

/// Concurrency-safe receiver of path lists, typically the acoustic
/// evaluator.
pub trait PathSink: Send + Sync {
    /// Hands over the paths of one source/receiver couple; returns the
    /// per-band levels the evaluator derived from them.
    fn add_propagation_paths(
        &self,
        source_id: usize,
        li: f64,
        receiver_id: usize,
        paths: Vec<PropagationPath>,
    ) -> Result<Array1<f64>>;

    /// Called exactly once when a receiver's source loop completes.
    fn finalize_receiver(&self, receiver_id: usize) -> Result<()>;

    /// View of the sink for one contiguous receiver batch.
    fn sub_process(&self, start: usize, end: usize) -> Box<dyn PathSink + '_>;
}

/// Process-wide cancellation and progress hook, polled cooperatively at
/// the receiver- and source-loop heads.
pub trait ProgressVisitor: Send + Sync {
    fn is_canceled(&self) -> bool;
    fn cancel(&self);
    /// Called after each completed receiver.
    fn end_step(&self) {}
}

/// Atomic-flag progress visitor.
#[derive(Debug, Default)]
pub struct ProgressFlag {
    canceled: AtomicBool,
}

impl ProgressFlag {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressVisitor for ProgressFlag {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }
}

/// Runs the whole computation: every receiver against every source in
/// range, batched over `thread_count` workers.
///
/// Cancellation and sink failures are surfaced; a canceled run may have
/// emitted partial results.
pub fn run(
    data: &PropagationData,
    sink: &dyn PathSink,
    progress: &dyn ProgressVisitor,
) -> Result<()> {
    data.config.validate()?;
    let receivers = data.receivers();
    if receivers.is_empty() {
        return Ok(());
    }
    let source_tree = data.build_source_tree();

    let split_count = data.config.thread_count.max(1);
    let batch = receivers.len().div_ceil(split_count);
    let ranges: Vec<(usize, usize)> = (0..receivers.len())
        .step_by(batch)
        .map(|start| (start, (start + batch).min(receivers.len())))
        .collect();

    let worker = |&(start, end): &(usize, usize)| -> Result<()> {
        let batch_sink = sink.sub_process(start, end);
        compute_receiver_range(data, &source_tree, batch_sink.as_ref(), progress, start, end)
    };

    let results: Vec<Result<()>> = if split_count == 1 {
        ranges.iter().map(worker).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(split_count)
            .build()
            .map_err(|e| CityraysError::Sink {
                message: format!("worker pool: {e}"),
            })?;
        pool.install(|| ranges.par_iter().map(worker).collect())
    };

    for result in results {
        if let Err(e) = result {
            error!("worker aborted: {e}");
            progress.cancel();
            return Err(e);
        }
    }
    if progress.is_canceled() {
        return Err(CityraysError::Cancelled);
    }
    Ok(())
}

/// Sequential receiver loop of one batch.
fn compute_receiver_range(
    data: &PropagationData,
    source_tree: &AabbTree,
    sink: &dyn PathSink,
    progress: &dyn ProgressVisitor,
    start: usize,
    end: usize,
) -> Result<()> {
    let finder = PathFinder::new(data);
    for receiver_id in start..end {
        if progress.is_canceled() {
            return Ok(());
        }
        let receiver = data.receivers()[receiver_id];
        if !data.scene.envelope().contains_point(&receiver) {
            debug!(
                "{}",
                CityraysError::OutOfRange {
                    x: receiver.x,
                    y: receiver.y
                }
            );
            finalize(sink, progress, receiver_id)?;
            progress.end_step();
            continue;
        }
        compute_rays_at_position(&finder, data, source_tree, &receiver, receiver_id, sink, progress)?;
        progress.end_step();
    }
    Ok(())
}

/// Source loop of one receiver, in descending power order with the
/// remaining-power early stop.
fn compute_rays_at_position(
    finder: &PathFinder<'_>,
    data: &PropagationData,
    source_tree: &AabbTree,
    receiver: &Coordinate,
    receiver_id: usize,
    sink: &dyn PathSink,
    progress: &dyn ProgressVisitor,
) -> Result<()> {
    let config = &data.config;
    let search = Envelope::new(
        receiver.x - config.max_src_dist,
        receiver.y - config.max_src_dist,
        receiver.x + config.max_src_dist,
        receiver.y + config.max_src_dist,
    );
    let in_range = source_tree.query_all(&search);
    let (source_points, total_power) =
        collect_source_points(data.sources(), &in_range, receiver, config);

    let mut processed_power = 0.0;
    let mut remaining_power = total_power;
    for sp in &source_points {
        if progress.is_canceled() {
            return Ok(());
        }
        if processed_power > 0.0 && remaining_power > 0.0 {
            let gain = w_to_dba(processed_power + remaining_power) - w_to_dba(processed_power);
            if gain < config.maximum_error {
                break;
            }
        }
        let paths = finder.source_receiver_paths(&sp.position, sp.source_id, receiver, receiver_id);
        if !paths.is_empty() {
            if let Err(e) = sink.add_propagation_paths(sp.source_id, sp.li, receiver_id, paths) {
                progress.cancel();
                return Err(e);
            }
        }
        processed_power += sp.global;
        remaining_power -= sp.global;
    }
    finalize(sink, progress, receiver_id)
}

fn finalize(sink: &dyn PathSink, progress: &dyn ProgressVisitor, receiver_id: usize) -> Result<()> {
    if let Err(e) = sink.finalize_receiver(receiver_id) {
        progress.cancel();
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::scene::SceneBuilder;
    use crate::sources::SourceGeometry;
    use std::sync::Mutex;

    /// Sink recording emissions for assertions.
    #[derive(Debug, Default)]
    struct RecordingSink {
        emissions: Mutex<Vec<(usize, usize, usize)>>,
        finalized: Mutex<Vec<usize>>,
        fail_on_add: bool,
    }

    impl PathSink for RecordingSink {
        fn add_propagation_paths(
            &self,
            source_id: usize,
            _li: f64,
            receiver_id: usize,
            paths: Vec<PropagationPath>,
        ) -> Result<Array1<f64>> {
            if self.fail_on_add {
                return Err(CityraysError::Sink {
                    message: "refused".into(),
                });
            }
            self.emissions
                .lock()
                .unwrap()
                .push((source_id, receiver_id, paths.len()));
            Ok(Array1::zeros(8))
        }

        fn finalize_receiver(&self, receiver_id: usize) -> Result<()> {
            self.finalized.lock().unwrap().push(receiver_id);
            Ok(())
        }

        fn sub_process(&self, _start: usize, _end: usize) -> Box<dyn PathSink + '_> {
            Box::new(ForwardingSink { parent: self })
        }
    }

    struct ForwardingSink<'a> {
        parent: &'a RecordingSink,
    }

    impl PathSink for ForwardingSink<'_> {
        fn add_propagation_paths(
            &self,
            source_id: usize,
            li: f64,
            receiver_id: usize,
            paths: Vec<PropagationPath>,
        ) -> Result<Array1<f64>> {
            self.parent
                .add_propagation_paths(source_id, li, receiver_id, paths)
        }

        fn finalize_receiver(&self, receiver_id: usize) -> Result<()> {
            self.parent.finalize_receiver(receiver_id)
        }

        fn sub_process(&self, start: usize, end: usize) -> Box<dyn PathSink + '_> {
            self.parent.sub_process(start, end)
        }
    }

    fn open_field_data(receiver_count: usize) -> PropagationData {
        let scene =
            SceneBuilder::new().finish(Envelope::new(-100.0, -100.0, 100.0, 100.0));
        let mut config = Config::default();
        config.thread_count = 2;
        let mut data = PropagationData::new(scene, config);
        data.add_source(
            SourceGeometry::Point(Coordinate::new(10.0, 0.0, 0.05)),
            Array1::from_elem(8, 1.0e-3),
        )
        .unwrap();
        for i in 0..receiver_count {
            data.add_receiver(Coordinate::new(0.0, i as f64 * 0.1, 4.0));
        }
        data
    }

    #[test]
    fn emits_and_finalizes_every_receiver() {
        let data = open_field_data(5);
        let sink = RecordingSink::default();
        let progress = ProgressFlag::new();
        run(&data, &sink, &progress).unwrap();

        let mut finalized = sink.finalized.lock().unwrap().clone();
        finalized.sort_unstable();
        assert_eq!(finalized, vec![0, 1, 2, 3, 4]);
        assert_eq!(sink.emissions.lock().unwrap().len(), 5);
    }

    #[test]
    fn out_of_envelope_receiver_completes_silently() {
        let mut data = open_field_data(1);
        data.add_receiver(Coordinate::new(500.0, 0.0, 4.0));
        let sink = RecordingSink::default();
        let progress = ProgressFlag::new();
        run(&data, &sink, &progress).unwrap();

        let finalized = sink.finalized.lock().unwrap().clone();
        assert_eq!(finalized.len(), 2);
        // Only the in-range receiver produced paths.
        assert_eq!(sink.emissions.lock().unwrap().len(), 1);
    }

    #[test]
    fn pre_canceled_run_is_surfaced() {
        let data = open_field_data(3);
        let sink = RecordingSink::default();
        let progress = ProgressFlag::new();
        progress.cancel();
        let err = run(&data, &sink, &progress).unwrap_err();
        assert!(matches!(err, CityraysError::Cancelled));
        assert!(sink.emissions.lock().unwrap().is_empty());
    }

    #[test]
    fn sink_failure_cancels_globally() {
        let data = open_field_data(3);
        let sink = RecordingSink {
            fail_on_add: true,
            ..Default::default()
        };
        let progress = ProgressFlag::new();
        let err = run(&data, &sink, &progress).unwrap_err();
        assert!(err.is_fatal());
        assert!(progress.is_canceled());
    }

    #[test]
    fn empty_receiver_list_is_a_no_op() {
        let scene =
            SceneBuilder::new().finish(Envelope::new(-10.0, -10.0, 10.0, 10.0));
        let data = PropagationData::new(scene, Config::default());
        let sink = RecordingSink::default();
        run(&data, &sink, &ProgressFlag::new()).unwrap();
        assert!(sink.finalized.lock().unwrap().is_empty());
    }
}
