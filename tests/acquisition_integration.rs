//! Integration tests for the acquisition worker
//!
//! These tests run a real worker thread against test sources:
//! - Pause and resume semantics
//! - Measured frame rate against a paced source
//! - Ordering and uniqueness under overflow

mod common;

use common::mock_helpers::{EndlessSource, ScriptedSource};
use common::{assert_float_eq, wait_until};
use framepipe::pipeline::{AcquisitionWorker, FrameChannel};
use framepipe::source::SyntheticSource;
use framepipe::WorkerState;
use std::time::Duration;

#[test]
fn test_pause_stops_delivery_and_resume_restarts_it() {
    let output = FrameChannel::shared(8, 1);
    let mut worker = AcquisitionWorker::new(Box::new(EndlessSource::new()), output.clone());
    worker.start().unwrap();
    assert!(wait_until(|| output.len() > 0));

    worker.pause();
    assert_eq!(worker.state(), WorkerState::Paused);
    let acquired = worker.frames_acquired();
    let depth = output.len();
    std::thread::sleep(Duration::from_millis(50));
    assert!(output.len() <= depth, "output grew while paused");
    assert_eq!(worker.frames_acquired(), acquired);

    worker.resume();
    assert!(wait_until(|| worker.frames_acquired() > acquired));
    worker.stop();
    assert_eq!(worker.state(), WorkerState::Stopped);
}

#[test]
fn test_measured_rate_matches_paced_source() {
    let source = SyntheticSource::new(4, 4).with_fps(50.0);
    let output = FrameChannel::shared(4, 1);
    let mut worker = AcquisitionWorker::new(Box::new(source), output);
    worker.start().unwrap();
    assert!(wait_until(|| worker.frames_acquired() >= 3));

    // Individual intervals jitter with the idle poll; the median is stable
    let mut samples = Vec::new();
    for _ in 0..15 {
        std::thread::sleep(Duration::from_millis(25));
        samples.push(worker.measured_fps());
    }
    worker.stop();

    samples.sort_by(|a, b| a.total_cmp(b));
    let median = samples[samples.len() / 2];
    assert_float_eq(median, 50.0, 15.0);
}

#[test]
fn test_overflow_delivers_newest_frames_once() {
    let frames = (1..=20).map(common::builders::numbered);
    let output = FrameChannel::shared(5, 2);
    let mut worker = AcquisitionWorker::new(Box::new(ScriptedSource::new(frames)), output.clone());
    worker.start().unwrap();
    assert!(wait_until(|| worker.frames_acquired() == 20));
    worker.stop();

    let seqs: Vec<u64> = output.drain_all().iter().map(|f| f.seq()).collect();
    assert!(seqs.len() <= 5);
    // Sequence numbers are assigned on acquisition, starting at 0
    assert_eq!(seqs.last(), Some(&19));
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "not strictly increasing: {:?}", seqs);
    assert_eq!(worker.dropped_frames() as usize + seqs.len(), 20);
}

#[test]
fn test_manual_drain_while_running() {
    let output = FrameChannel::shared(4, 1);
    let source = EndlessSource::new();
    let exhausted = source.exhausted.clone();
    let mut worker = AcquisitionWorker::new(Box::new(source), output);
    worker.start().unwrap();

    let mut seqs = Vec::new();
    while seqs.len() < 50 {
        if let Some(frame) = worker.next_frame_timeout(Duration::from_millis(100)) {
            seqs.push(frame.seq());
        }
    }
    exhausted.store(true, std::sync::atomic::Ordering::Relaxed);
    worker.stop();

    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_auxiliary_channel_sees_every_frame() {
    let frames = (1..=3).map(common::builders::numbered);
    let output = FrameChannel::shared(8, 1);
    let mut worker = AcquisitionWorker::new(Box::new(ScriptedSource::new(frames)), output.clone())
        .with_auxiliary_capacity(8);
    worker.set_use_auxiliary(true);
    worker.start().unwrap();
    assert!(wait_until(|| worker.frames_acquired() == 3));
    worker.stop();

    let main: Vec<u64> = output.drain_all().iter().map(|f| f.seq()).collect();
    let aux: Vec<u64> = worker.auxiliary().drain_all().iter().map(|f| f.seq()).collect();
    assert_eq!(main, vec![0, 1, 2]);
    assert_eq!(aux, main);
}
