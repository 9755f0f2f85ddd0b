use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, sync_channel, TryRecvError};

use anyhow::Context;
use rayon::prelude::*;

use super::processor::process_feature;
use super::task::FeatureTask;
use crate::geofile::feature::Feature;

/// How many tasks may wait in the queue per worker before the reader blocks.
/// Keeps the task sequence lazy instead of materializing the whole input.
const TASK_QUEUE_DEPTH_PER_WORKER: usize = 4;

/// Run every task through the feature processor and hand surviving features
/// to `write`.
///
/// With one job this is a plain loop and input order is preserved. With more
/// jobs, tasks fan out across a worker pool and results are written in
/// completion order, which is explicitly not input order; the tradeoff buys
/// throughput. Read and write failures follow the same skip-failures policy
/// as processing failures. There are no retries: a fatal error aborts the
/// run, in-flight results are discarded, and the original error is returned.
pub fn dispatch<I, W>(tasks: I, jobs: usize, skip_failures: bool, write: W) -> anyhow::Result<()>
where
    I: Iterator<Item = anyhow::Result<FeatureTask>>,
    W: FnMut(Feature) -> anyhow::Result<()>,
{
    if jobs <= 1 {
        dispatch_serial(tasks, skip_failures, write)
    } else {
        dispatch_parallel(tasks, jobs, skip_failures, write)
    }
}

fn dispatch_serial<I, W>(tasks: I, skip_failures: bool, mut write: W) -> anyhow::Result<()>
where
    I: Iterator<Item = anyhow::Result<FeatureTask>>,
    W: FnMut(Feature) -> anyhow::Result<()>,
{
    for task in tasks {
        match task {
            Ok(task) => {
                if let Some(feature) = process_feature(task)? {
                    write_with_policy(feature, skip_failures, &mut write)?;
                }
            }
            Err(err) => read_failure(err, skip_failures)?,
        }
    }
    Ok(())
}

fn dispatch_parallel<I, W>(
    mut tasks: I,
    jobs: usize,
    skip_failures: bool,
    mut write: W,
) -> anyhow::Result<()>
where
    I: Iterator<Item = anyhow::Result<FeatureTask>>,
    W: FnMut(Feature) -> anyhow::Result<()>,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("Building the worker pool")?;
    let abort = AtomicBool::new(false);
    let (task_tx, task_rx) = sync_channel::<FeatureTask>(jobs * TASK_QUEUE_DEPTH_PER_WORKER);
    let (result_tx, result_rx) = channel::<anyhow::Result<Option<Feature>>>();

    let mut run_error = None;
    std::thread::scope(|scope| {
        scope.spawn(|| {
            pool.install(|| {
                task_rx
                    .into_iter()
                    .par_bridge()
                    .for_each_with(result_tx, |result_tx, task| {
                        if abort.load(Ordering::Relaxed) {
                            return;
                        }
                        // A dropped receiver means the run is already over.
                        let _ = result_tx.send(process_feature(task));
                    });
            });
        });

        let mut handle_result = |result: anyhow::Result<Option<Feature>>| match result {
            Ok(Some(feature)) => write_with_policy(feature, skip_failures, &mut write),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };

        // Feed the bounded task queue, draining finished results in between
        // so the coordinator never holds more than the queue depth in memory.
        for task in &mut tasks {
            let task = match task {
                Ok(task) => task,
                Err(err) => match read_failure(err, skip_failures) {
                    Ok(()) => continue,
                    Err(err) => {
                        run_error = Some(err);
                        break;
                    }
                },
            };
            if task_tx.send(task).is_err() {
                break;
            }
            loop {
                match result_rx.try_recv() {
                    Ok(result) => {
                        if let Err(err) = handle_result(result) {
                            run_error = Some(err);
                            break;
                        }
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if run_error.is_some() {
                break;
            }
        }
        drop(task_tx);

        if run_error.is_none() {
            for result in result_rx.iter() {
                if let Err(err) = handle_result(result) {
                    run_error = Some(err);
                    break;
                }
            }
        }
        if run_error.is_some() {
            abort.store(true, Ordering::Relaxed);
        }
    });

    match run_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn read_failure(err: anyhow::Error, skip_failures: bool) -> anyhow::Result<()> {
    log::error!("Could not read feature: {:#}", err);
    if skip_failures {
        Ok(())
    } else {
        Err(err)
    }
}

fn write_with_policy<W>(feature: Feature, skip_failures: bool, write: &mut W) -> anyhow::Result<()>
where
    W: FnMut(Feature) -> anyhow::Result<()>,
{
    let fid = feature.fid;
    match write(feature) {
        Ok(()) => Ok(()),
        Err(err) => {
            log::error!("Could not write feature with ID {:?}: {:#}", fid, err);
            if skip_failures {
                Ok(())
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use rstest::rstest;

    use super::dispatch;
    use crate::buffer::params::{BufferParams, CapStyle, Distance, JoinStyle};
    use crate::crs::resolve::CrsTriple;
    use crate::geofile::feature::Feature;
    use crate::pipeline::task::{FeatureTask, TaskBuilder};

    fn builder(skip_failures: bool) -> TaskBuilder {
        let crs = CrsTriple {
            source: "EPSG:3857".to_string(),
            buffer: "EPSG:3857".to_string(),
            destination: "EPSG:3857".to_string(),
        };
        let params = BufferParams {
            distance: Distance::Fixed(1.0),
            resolution: 16,
            cap_style: CapStyle::Round,
            join_style: JoinStyle::Round,
            mitre_limit: 5.0,
        };
        TaskBuilder::new(crs, params, skip_failures)
    }

    fn point_task(fid: u64, skip_failures: bool) -> FeatureTask {
        let feature = Feature {
            fid: Some(fid),
            geometry: geo::Geometry::Point(geo::Point::new(fid as f64 * 10.0, 0.0)),
            fields: Vec::new(),
        };
        builder(skip_failures).build(feature)
    }

    fn collect_fids(
        tasks: Vec<anyhow::Result<FeatureTask>>,
        jobs: usize,
        skip_failures: bool,
    ) -> anyhow::Result<Vec<u64>> {
        let mut fids = Vec::new();
        dispatch(tasks.into_iter(), jobs, skip_failures, |feature| {
            fids.push(feature.fid.unwrap());
            Ok(())
        })?;
        Ok(fids)
    }

    #[rstest]
    fn test_single_job_preserves_input_order() {
        let tasks: Vec<_> = (0..8).map(|fid| Ok(point_task(fid, false))).collect();
        let fids = collect_fids(tasks, 1, false).unwrap();
        assert_eq!(fids, (0..8).collect::<Vec<u64>>());
    }

    #[rstest]
    fn test_parallel_jobs_produce_the_same_feature_set() {
        let tasks: Vec<_> = (0..32).map(|fid| Ok(point_task(fid, false))).collect();
        let mut fids = collect_fids(tasks, 4, false).unwrap();
        fids.sort_unstable();
        assert_eq!(fids, (0..32).collect::<Vec<u64>>());
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    fn test_fatal_processing_error_aborts_the_run(#[case] jobs: usize) {
        let mut tasks: Vec<_> = (0..8).map(|fid| Ok(point_task(fid, false))).collect();
        let mut poisoned = point_task(8, false);
        poisoned.buf_crs = "EPSG:999999".to_string();
        tasks.push(Ok(poisoned));
        let result = collect_fids(tasks, jobs, false);
        assert!(result.is_err());
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    fn test_skip_failures_keeps_valid_siblings(#[case] jobs: usize) {
        let mut tasks: Vec<_> = (0..8).map(|fid| Ok(point_task(fid, true))).collect();
        let mut poisoned = point_task(3, true);
        poisoned.buf_crs = "EPSG:999999".to_string();
        tasks[3] = Ok(poisoned);
        let mut fids = collect_fids(tasks, jobs, true).unwrap();
        fids.sort_unstable();
        assert_eq!(fids, vec![0, 1, 2, 4, 5, 6, 7]);
    }

    #[rstest]
    fn test_read_failures_respect_skip_failures() {
        let tasks = vec![
            Ok(point_task(0, true)),
            Err(anyhow!("unreadable feature")),
            Ok(point_task(2, true)),
        ];
        let fids = collect_fids(tasks, 1, true).unwrap();
        assert_eq!(fids, vec![0, 2]);

        let tasks = vec![
            Ok(point_task(0, false)),
            Err(anyhow!("unreadable feature")),
            Ok(point_task(2, false)),
        ];
        assert!(collect_fids(tasks, 1, false).is_err());
    }

    #[rstest]
    fn test_write_failures_abort_without_skip_failures() {
        let tasks: Vec<_> = (0..4).map(|fid| Ok(point_task(fid, false))).collect();
        let mut written = 0;
        let result = dispatch(tasks.into_iter(), 1, false, |_feature| {
            written += 1;
            if written == 2 {
                Err(anyhow!("disk full"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
    }

    #[rstest]
    fn test_write_failures_are_suppressed_with_skip_failures() {
        let tasks: Vec<_> = (0..4).map(|fid| Ok(point_task(fid, true))).collect();
        let mut written = 0;
        dispatch(tasks.into_iter(), 1, true, |_feature| {
            written += 1;
            if written == 2 {
                Err(anyhow!("disk full"))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(written, 4);
    }
}
