use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use argus::capture::{BufferStatus, FrameDescriptor, SimulatedIsp, StreamType};
use argus::display::{PixelFormat, SimulatedDisplay};
use argus::error::InferenceError;
use argus::inference::{
    BrightSpotDetector, DetectionRegion, GrayFrame, InferenceEngine, ResultPublisher,
};
use argus::pipeline::{
    Pipeline, PipelineState, StreamController, StreamGovernor, StreamTiming, SystemEvents,
};
use argus::Config;

/// Reports the same boxes for every frame and counts its calls
#[derive(Clone, Default)]
struct Scripted {
    boxes: Vec<DetectionRegion>,
    calls: Arc<AtomicUsize>,
}

impl InferenceEngine for Scripted {
    fn run_inference(
        &mut self,
        _frame: GrayFrame<'_>,
        regions: &mut [DetectionRegion],
    ) -> Result<usize, InferenceError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        for (slot, region) in regions.iter_mut().zip(&self.boxes) {
            *slot = *region;
        }
        Ok(self.boxes.len())
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.display.scanout_timeout_ms = 20;
    config
}

/// Hand one frame to the pipeline the way the ISP firmware does
fn deliver(
    pipeline: &mut Pipeline<SimulatedDisplay, Scripted>,
    stream: StreamType,
    frame_id: u32,
) {
    let (width, height) = match stream {
        StreamType::FullResolution => (576, 576),
        StreamType::Downscaled => (192, 192),
    };
    let mut planes = [FrameDescriptor::default(); 1];
    if pipeline.acquire(stream, &mut planes) == BufferStatus::Ready {
        planes[0].size = width as usize * height as usize * 2;
    }
    planes[0].width = width;
    planes[0].height = height;
    planes[0].frame_id = frame_id;
    pipeline.release(stream, &mut planes);
}

#[test]
fn test_capture_display_infer_cycle() {
    let surface = Arc::new(SimulatedDisplay::new());
    let engine = Scripted {
        boxes: vec![DetectionRegion::new(10, 10, 20, 20)],
        ..Scripted::default()
    };
    let (publisher, results) = ResultPublisher::channel(4);
    let mut pipeline = Pipeline::new(&config(), surface.clone(), engine, Some(publisher)).unwrap();

    let irq = pipeline.interrupt_line();
    let _scanout = surface.spawn_scanout(Duration::from_millis(1), move || irq.handle());

    deliver(&mut pipeline, StreamType::FullResolution, 1);
    assert_eq!(pipeline.frame_state().last_displayed, 1);
    assert_eq!(pipeline.state().get(), PipelineState::Streaming);

    deliver(&mut pipeline, StreamType::Downscaled, 1);
    assert_eq!(pipeline.frame_state().last_inferred, 1);
    assert_eq!(results.try_recv().unwrap(), "Detected faces: 1");

    // 192 -> 576: the box lands at (30, 30) and is 60 wide
    let frame = pipeline.displayed_frame().unwrap();
    let yellow = PixelFormat::Rgb565.descriptor().default_highlight_color;
    assert_eq!(frame.get(30, 30), Some(yellow));
    assert_eq!(frame.get(89, 89), Some(yellow));
    assert_eq!(frame.get(60, 60), Some(0));
    assert_eq!(frame.get(90, 90), Some(0));

    deliver(&mut pipeline, StreamType::FullResolution, 2);
    assert_eq!(pipeline.frame_state().last_displayed, 2);
}

#[test]
fn test_display_throttle_under_any_interleaving() {
    let mut config = config();
    // No scan-out thread, every overlay handshake times out
    config.display.scanout_timeout_ms = 1;
    let surface = Arc::new(SimulatedDisplay::new());
    let mut pipeline = Pipeline::new(&config, surface, Scripted::default(), None).unwrap();

    // xorshift keeps the interleaving reproducible
    let mut seed = 0x2545_F491u32;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        seed
    };

    let (mut full_id, mut down_id) = (0u32, 0u32);
    for _ in 0..400 {
        let before = pipeline.frame_state();
        if next() % 2 == 0 {
            full_id += 1 + next() % 2;
            deliver(&mut pipeline, StreamType::FullResolution, full_id);

            let after = pipeline.frame_state();
            if before.last_displayed == before.last_inferred {
                assert_eq!(after.last_displayed, full_id);
            } else {
                assert_eq!(after.last_displayed, before.last_displayed);
            }
        } else {
            down_id = down_id.max(before.last_inferred) + next() % 2;
            deliver(&mut pipeline, StreamType::Downscaled, down_id);
            assert_eq!(pipeline.frame_state().last_inferred, down_id);
        }
        assert_ne!(pipeline.state().get(), PipelineState::Halted);
    }
}

#[test]
fn test_stale_frames_are_ignored() {
    let surface = Arc::new(SimulatedDisplay::new());
    let mut pipeline = Pipeline::new(&config(), surface, Scripted::default(), None).unwrap();

    deliver(&mut pipeline, StreamType::FullResolution, 5);
    deliver(&mut pipeline, StreamType::Downscaled, 5);
    deliver(&mut pipeline, StreamType::FullResolution, 3);
    deliver(&mut pipeline, StreamType::Downscaled, 4);

    let state = pipeline.frame_state();
    assert_eq!((state.last_displayed, state.last_inferred), (5, 5));
    assert_eq!(pipeline.state().get(), PipelineState::Streaming);
}

#[test]
fn test_display_failure_halts_pipeline() {
    let surface = Arc::new(SimulatedDisplay::new());
    surface.reject_configuration(true);
    let engine = Scripted::default();
    let calls = engine.calls.clone();
    let mut pipeline = Pipeline::new(&config(), surface.clone(), engine, None).unwrap();

    deliver(&mut pipeline, StreamType::FullResolution, 1);
    assert_eq!(pipeline.state().get(), PipelineState::Halted);

    deliver(&mut pipeline, StreamType::Downscaled, 1);
    deliver(&mut pipeline, StreamType::FullResolution, 2);
    assert_eq!(calls.load(Ordering::Acquire), 0);
    assert!(!surface.registers().enabled);

    pipeline.shutdown();
    assert_eq!(pipeline.state().get(), PipelineState::Halted);
}

#[test]
fn test_pool_wraps_every_buffer_count_frames() {
    let surface = Arc::new(SimulatedDisplay::new());
    let mut pipeline = Pipeline::new(&config(), surface, Scripted::default(), None).unwrap();
    let capacity = pipeline
        .source()
        .pools()
        .capacity(StreamType::Downscaled);

    let mut addresses = Vec::new();
    for _ in 0..capacity * 2 {
        let mut planes = [FrameDescriptor::default(); 1];
        pipeline.acquire(StreamType::Downscaled, &mut planes);
        addresses.push(planes[0].address.unwrap());
        pipeline.release(StreamType::Downscaled, &mut planes);
    }

    for i in 0..capacity {
        assert_eq!(addresses[i], addresses[i + capacity]);
        assert_ne!(addresses[i], addresses[(i + 1) % capacity]);
    }
}

#[test]
fn test_mismatched_downscaled_format_falls_back() {
    let surface = Arc::new(SimulatedDisplay::new());
    let config = config();
    let engine = BrightSpotDetector::new(8, 160, 192, 192);
    let (publisher, results) = ResultPublisher::channel(4);
    let mut pipeline = Pipeline::new(&config, surface, engine, Some(publisher)).unwrap();

    let mut isp = SimulatedIsp::new(&config.capture)
        .with_objects(1)
        .with_downscaled_bytes_per_pixel(4);
    isp.capture(&mut pipeline);

    assert_eq!(pipeline.frame_state().last_inferred, 1);
    assert_eq!(results.try_recv().unwrap(), "Detected faces: 1");
    assert!(!pipeline.state().is_halted());
}

#[test]
fn test_extra_planes_are_purged() {
    let surface = Arc::new(SimulatedDisplay::new());
    let config = config();
    let mut pipeline = Pipeline::new(&config, surface, Scripted::default(), None).unwrap();

    let mut planes = [FrameDescriptor::default(); 3];
    assert_eq!(
        pipeline.acquire(StreamType::FullResolution, &mut planes),
        BufferStatus::Ready
    );
    assert!(planes[0].address.is_some());
    assert!(planes[1..].iter().all(|p| p.status == BufferStatus::Purge && p.address.is_none()));

    let mut isp = SimulatedIsp::new(&config.capture).with_planes(3);
    isp.capture(&mut pipeline);
    isp.capture(&mut pipeline);
    assert_eq!(pipeline.frame_state().last_displayed, 2);
}

#[test]
fn test_threads_stream_until_stopped() {
    let mut config = config();
    config.display.scanout_timeout_ms = 100;
    let surface = Arc::new(SimulatedDisplay::new());
    let (publisher, results) = ResultPublisher::channel(64);
    let engine = BrightSpotDetector::new(8, 160, 192, 192);
    let pipeline = Pipeline::new(&config, surface.clone(), engine, Some(publisher)).unwrap();

    let irq = pipeline.interrupt_line();
    let mut scanout = surface.spawn_scanout(Duration::from_millis(1), move || irq.handle());

    let events = Arc::new(SystemEvents::new());
    let state = pipeline.state();
    let consumed = pipeline.consumed();
    let (trigger, isp) = SimulatedIsp::new(&config.capture).spawn(pipeline).unwrap();

    let controller = StreamController::new(
        trigger,
        events.clone(),
        consumed,
        Arc::new(StreamGovernor::new(true)),
        state.clone(),
        StreamTiming::from_config(&config.pipeline),
    );
    let controller = thread::spawn(move || controller.run());
    events.request_start();

    thread::sleep(Duration::from_millis(300));
    events.request_stop();
    let triggered = controller.join().unwrap();
    assert_eq!(state.get(), PipelineState::Stopped);

    let mut pipeline = isp.join().unwrap();
    pipeline.shutdown();
    scanout.stop();

    assert!(triggered >= 2, "only {triggered} triggers");
    let frames = pipeline.frame_state();
    assert!(frames.last_displayed >= 1);
    assert!(frames.last_inferred >= 1);
    assert_eq!(state.get(), PipelineState::Stopped);
    assert!(!surface.registers().enabled);
    assert!(results.try_iter().count() >= 1);
}
