//! Capture session tests against the synthetic device.
//!
//! Covers negotiation substitution, would-block recovery, end-of-image
//! truncation, the driver-safety floor, fatal read handling, frame budgets,
//! the timeout policies and the stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use mjpeg_grab::device::synthetic::{synthetic_jpeg, Exhausted};
use mjpeg_grab::device::{Capabilities, ReadStep, SyntheticProbe};
use mjpeg_grab::{
    CaptureConfig, CaptureError, CaptureLoop, DeviceHandle, FrameBudget, FrameSink,
    NegotiateError, OpenError, PixelFormat, ReadError, SessionParams, SessionState,
    SyntheticDevice, TimeoutPolicy,
};

const DEVICE: &str = "stub://session";

fn params(budget: FrameBudget) -> SessionParams {
    SessionParams {
        device: DEVICE.to_string(),
        capture: CaptureConfig::mjpeg(64, 48, 30),
        budget,
        timeout_policy: TimeoutPolicy::default(),
    }
}

fn output(dir: &TempDir, truncate: bool) -> FrameSink {
    FrameSink::new(dir.path().join("out.mjpg"), truncate)
}

fn read_output(sink: &FrameSink) -> Vec<u8> {
    std::fs::read(sink.path()).unwrap_or_default()
}

/// Run a session on `device`, returning the result, final state and probe.
fn run(
    params: &SessionParams,
    device: SyntheticDevice,
    sink: &FrameSink,
) -> (Result<mjpeg_grab::CaptureReport, CaptureError>, SessionState, SyntheticProbe) {
    let probe = device.probe();
    let mut session = CaptureLoop::new(params);
    let result = session.run_with(move |_| Ok(DeviceHandle::from_device(device)), sink);
    (result, session.state(), probe)
}

#[test]
fn negotiated_size_replaces_requested_size() {
    let mut handle =
        DeviceHandle::from_device(SyntheticDevice::new(DEVICE).accepting_size(320, 240));
    let negotiated = handle
        .negotiate_format(&CaptureConfig::mjpeg(1280, 720, 30))
        .expect("negotiate");

    assert_eq!((negotiated.width, negotiated.height), (320, 240));
    assert_eq!(handle.config(), Some(&negotiated));
    assert_eq!(handle.frame_size(), Some(320 * 240 * 2));
}

#[test]
fn would_block_reads_do_not_consume_the_budget() {
    for n in [0usize, 1, 5] {
        let dir = TempDir::new().unwrap();
        let sink = output(&dir, true);
        let frame = synthetic_jpeg(1);
        let mut script = vec![ReadStep::WouldBlock; n];
        script.push(ReadStep::Frame(frame.clone()));
        let device = SyntheticDevice::new(DEVICE)
            .with_script(script)
            .then(Exhausted::Stall);

        let (result, state, probe) = run(&params(FrameBudget::Bounded(1)), device, &sink);
        let report = result.expect("capture");

        assert_eq!(state, SessionState::Closed);
        assert_eq!(report.frames_written, 1);
        assert_eq!(report.would_blocks, n as u64);
        let probe = probe.state();
        assert_eq!(probe.polls, n as u32 + 1);
        assert_eq!(probe.reads, n as u32 + 1);
        drop(probe);
        assert_eq!(read_output(&sink), frame);
    }
}

#[test]
fn truncation_drops_bytes_after_end_of_image() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let frame = vec![0xFF, 0xD8, 0x42, 0x43, 0xFF, 0xD9, 0xDE, 0xAD, 0xBE, 0xEF];
    let device = SyntheticDevice::new(DEVICE).with_script([ReadStep::Frame(frame.clone())]);

    let (result, _, _) = run(&params(FrameBudget::Bounded(1)), device, &sink);
    let report = result.expect("capture");

    assert_eq!(read_output(&sink), &frame[..6]);
    assert_eq!(report.bytes_written, 6);
}

#[test]
fn disabled_truncation_writes_full_read_length() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, false);
    let frame = vec![0xFF, 0xD8, 0x42, 0xFF, 0xD9, 0x01, 0x02];
    let device = SyntheticDevice::new(DEVICE).with_script([ReadStep::Frame(frame.clone())]);

    let (result, _, _) = run(&params(FrameBudget::Bounded(1)), device, &sink);
    result.expect("capture");

    assert_eq!(read_output(&sink), frame);
}

#[test]
fn under_reported_image_size_is_raised_to_the_floor() {
    let mut handle =
        DeviceHandle::from_device(SyntheticDevice::new(DEVICE).reporting_sizes(0, 100));
    handle
        .negotiate_format(&CaptureConfig::mjpeg(640, 480, 30))
        .expect("negotiate");
    handle.init_read().expect("allocate");

    let format = handle.format().copied().unwrap();
    assert_eq!(format.bytes_per_line, 1280);
    assert_eq!(format.size_image, 1280 * 480);
    assert_eq!(handle.buffer().map(|b| b.len()), Some(1280 * 480));
}

#[test]
fn fatal_read_stops_the_session_and_releases_the_device() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).with_script([
        ReadStep::Frame(synthetic_jpeg(1)),
        ReadStep::Frame(synthetic_jpeg(2)),
        ReadStep::Fail(5),
        ReadStep::Frame(synthetic_jpeg(4)),
    ]);

    let (result, state, probe) = run(&params(FrameBudget::Bounded(5)), device, &sink);

    assert!(matches!(
        result,
        Err(CaptureError::Read(ReadError::Stream(_)))
    ));
    assert_eq!(state, SessionState::Failed);
    let mut expected = synthetic_jpeg(1);
    expected.extend(synthetic_jpeg(2));
    assert_eq!(read_output(&sink), expected);
    let probe = probe.state();
    assert_eq!(probe.reads, 3);
    assert!(probe.closed);
}

#[test]
fn bounded_count_writes_exactly_that_many_frames() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE);

    let (result, state, probe) = run(&params(FrameBudget::Bounded(7)), device, &sink);
    let report = result.expect("capture");

    assert_eq!(state, SessionState::Closed);
    assert_eq!(report.frames_written, 7);
    let expected: Vec<u8> = (1..=7).flat_map(synthetic_jpeg).collect();
    assert_eq!(read_output(&sink), expected);
    assert!(probe.state().closed);
}

#[test]
fn zero_length_read_counts_as_a_frame() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).with_script([ReadStep::Frame(Vec::new())]);

    let (result, _, _) = run(&params(FrameBudget::Bounded(1)), device, &sink);
    let report = result.expect("capture");

    assert_eq!(report.frames_written, 1);
    assert_eq!(report.bytes_written, 0);
}

#[test]
fn single_timeout_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).with_script([
        ReadStep::Timeout,
        ReadStep::Frame(synthetic_jpeg(1)),
        ReadStep::Timeout,
        ReadStep::Frame(synthetic_jpeg(2)),
    ]);

    let (result, state, _) = run(&params(FrameBudget::Bounded(2)), device, &sink);
    let report = result.expect("capture");

    assert_eq!(state, SessionState::Closed);
    assert_eq!(report.frames_written, 2);
    assert_eq!(report.timeouts, 2);
}

#[test]
fn second_consecutive_timeout_stalls_the_session() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE)
        .with_script([ReadStep::Frame(synthetic_jpeg(1))])
        .then(Exhausted::Stall);
    let mut params = params(FrameBudget::Bounded(3));
    params.timeout_policy = TimeoutPolicy::Bounded {
        timeout: Duration::from_millis(10),
        tolerated: 1,
    };

    let (result, state, probe) = run(&params, device, &sink);

    assert!(matches!(result, Err(CaptureError::Stalled { timeouts: 2 })));
    assert_eq!(state, SessionState::Failed);
    assert_eq!(read_output(&sink), synthetic_jpeg(1));
    assert!(probe.state().closed);
}

#[test]
fn indefinite_policy_keeps_waiting_through_timeouts() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).with_script([
        ReadStep::Timeout,
        ReadStep::Timeout,
        ReadStep::Timeout,
        ReadStep::Frame(synthetic_jpeg(1)),
    ]);
    let mut params = params(FrameBudget::Bounded(1));
    params.timeout_policy = TimeoutPolicy::Indefinite;

    let (result, state, _) = run(&params, device, &sink);

    assert_eq!(result.expect("capture").frames_written, 1);
    assert_eq!(state, SessionState::Closed);
}

#[test]
fn stop_flag_ends_unbounded_capture_cleanly() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let params = params(FrameBudget::Unbounded);
    let stop = Arc::new(AtomicBool::new(false));
    let device = SyntheticDevice::new(DEVICE);
    let probe = device.probe();

    let flag = Arc::clone(&stop);
    let mut session = CaptureLoop::new(&params)
        .with_stop(Arc::clone(&stop))
        .with_progress(move |report| {
            if report.frames_written == 4 {
                flag.store(true, Ordering::SeqCst);
            }
        });
    let report = session
        .run_with(move |_| Ok(DeviceHandle::from_device(device)), &sink)
        .expect("capture");

    assert!(report.stopped);
    assert_eq!(report.frames_written, 4);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(probe.state().closed);
}

#[test]
fn refused_mjpeg_format_is_fatal_before_capture() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).accepting_pixel_format(PixelFormat(*b"YUYV"));

    let (result, state, probe) = run(&params(FrameBudget::Bounded(1)), device, &sink);

    match result {
        Err(CaptureError::Negotiate(NegotiateError::FormatRefused { accepted, .. })) => {
            assert_eq!(accepted, "YUYV")
        }
        other => panic!("expected refused format, got {other:?}"),
    }
    assert_eq!(state, SessionState::Failed);
    assert_eq!(probe.state().reads, 0);
    assert!(probe.state().closed);
    assert!(!sink.path().exists());
}

#[test]
fn missing_read_io_capability_is_unsupported() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).with_capabilities(Capabilities {
        video_capture: true,
        read_write: false,
    });

    let (result, _, _) = run(&params(FrameBudget::Bounded(1)), device, &sink);

    assert!(matches!(
        result,
        Err(CaptureError::Negotiate(NegotiateError::Unsupported { .. }))
    ));
}

#[test]
fn non_v4l2_node_is_reported() {
    let mut handle = DeviceHandle::from_device(SyntheticDevice::new(DEVICE).not_v4l2());
    let err = handle
        .negotiate_format(&CaptureConfig::mjpeg(64, 48, 30))
        .unwrap_err();
    assert!(matches!(err, NegotiateError::NotV4l2 { .. }));
}

#[test]
fn crop_and_frame_interval_failures_are_not_fatal() {
    let device = SyntheticDevice::new(DEVICE)
        .without_crop()
        .without_frame_interval();
    let probe = device.probe();
    let mut handle = DeviceHandle::from_device(device);

    let negotiated = handle
        .negotiate_format(&CaptureConfig::mjpeg(64, 48, 25))
        .expect("negotiate");

    // A refused interval leaves the device default in place.
    assert_eq!(negotiated.fps, 0);
    let probe = probe.state();
    assert_eq!(probe.crop_resets, 1);
    assert_eq!(probe.frame_interval_requests, vec![25]);
    assert_eq!(probe.format_requests[0].pixel_format, PixelFormat::MJPEG);
}

#[test]
fn negotiated_rate_is_the_one_the_device_applied() {
    let mut handle = DeviceHandle::from_device(SyntheticDevice::new(DEVICE).accepting_fps(15));
    let negotiated = handle
        .negotiate_format(&CaptureConfig::mjpeg(64, 48, 30))
        .expect("negotiate");

    assert_eq!(negotiated.fps, 15);
    assert_eq!(handle.config().map(|c| c.fps), Some(15));
}

#[test]
fn zero_rate_skips_the_frame_interval_request() {
    let device = SyntheticDevice::new(DEVICE);
    let probe = device.probe();
    let mut handle = DeviceHandle::from_device(device);
    let negotiated = handle
        .negotiate_format(&CaptureConfig::mjpeg(64, 48, 0))
        .expect("negotiate");

    assert_eq!(negotiated.fps, 0);
    assert!(probe.state().frame_interval_requests.is_empty());
}

#[test]
fn unavailable_sink_fails_and_closes_the_device() {
    let dir = TempDir::new().unwrap();
    let sink = FrameSink::new(dir.path().join("missing").join("out.mjpg"), true);
    let device = SyntheticDevice::new(DEVICE);

    let (result, state, probe) = run(&params(FrameBudget::Bounded(1)), device, &sink);

    assert!(matches!(
        result,
        Err(CaptureError::Sink(mjpeg_grab::SinkError::Unavailable { .. }))
    ));
    assert_eq!(state, SessionState::Failed);
    assert!(probe.state().closed);
}

#[test]
fn open_failure_never_reaches_configuration() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let params = params(FrameBudget::Bounded(1));
    let mut session = CaptureLoop::new(&params);

    let result = session.run_with(
        |path| -> Result<DeviceHandle<SyntheticDevice>, OpenError> {
            Err(OpenError::NotADevice {
                path: path.to_string(),
            })
        },
        &sink,
    );

    assert!(matches!(
        result,
        Err(CaptureError::Open(OpenError::NotADevice { .. }))
    ));
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn close_failure_after_capture_is_reported() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let device = SyntheticDevice::new(DEVICE).failing_close();

    let (result, state, _) = run(&params(FrameBudget::Bounded(1)), device, &sink);

    assert!(matches!(result, Err(CaptureError::Close(_))));
    assert_eq!(state, SessionState::Failed);
}

#[test]
fn stub_paths_open_the_synthetic_backend() {
    let dir = TempDir::new().unwrap();
    let sink = output(&dir, true);
    let params = params(FrameBudget::Bounded(3));

    let report = CaptureLoop::new(&params).run(&sink).expect("capture");

    assert_eq!(report.frames_written, 3);
    assert_eq!(report.negotiated, Some(CaptureConfig::mjpeg(64, 48, 30)));
}

#[cfg(target_os = "linux")]
#[test]
fn regular_file_is_not_a_device() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap().to_string();
    match DeviceHandle::open(&path) {
        Err(OpenError::NotADevice { .. }) => {}
        #[cfg(not(feature = "device-v4l2"))]
        Err(OpenError::Io { .. }) => {}
        other => panic!("expected NotADevice, got {:?}", other.err()),
    }
}

#[test]
fn missing_node_is_not_found() {
    match DeviceHandle::open("/nonexistent/video99") {
        Err(OpenError::NotFound { .. }) => {}
        #[cfg(not(all(target_os = "linux", feature = "device-v4l2")))]
        Err(OpenError::Io { .. }) => {}
        other => panic!("expected NotFound, got {:?}", other.err()),
    }
}
