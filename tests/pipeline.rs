use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::Result;

use fallwatch::detect::{
    StubBackend, Tensor, YoloV8Detector, YoloV8PoseDetector, POSE_KEYPOINTS,
};
use fallwatch::{
    BackendKind, DetectionPipeline, DetectionThresholds, DetectorHandle, Error, Frame,
    ModelSettings, PixelFormat, Stage,
};

const INPUT: u32 = 32;
const POSE_CHANNELS: usize = 5 + POSE_KEYPOINTS * 3;

fn rgb_frame(width: u32, height: u32) -> Frame {
    Frame::new(
        vec![128; (width * height * 3) as usize],
        width,
        height,
        PixelFormat::Rgb24,
        1,
    )
}

/// One person centered in the model input, all keypoints at the center.
fn pose_output() -> Tensor {
    let mut row = vec![0f32; POSE_CHANNELS];
    row[..5].copy_from_slice(&[16.0, 16.0, 8.0, 16.0, 0.9]);
    for p in 0..POSE_KEYPOINTS {
        row[5 + p * 3] = 16.0;
        row[5 + p * 3 + 1] = 16.0;
        row[5 + p * 3 + 2] = 1.0;
    }
    Tensor::from_f32(vec![1, POSE_CHANNELS, 1], row).unwrap()
}

fn pose_pipeline_with(stub: StubBackend) -> Result<DetectionPipeline<YoloV8PoseDetector>> {
    let handle = DetectorHandle::from_backend(Box::new(stub), Path::new("pose.onnx"), None)?;
    Ok(DetectionPipeline::new(
        handle,
        YoloV8PoseDetector::new(INPUT, INPUT, DetectionThresholds::default()),
    ))
}

#[test]
fn runs_all_stages_in_order() -> Result<()> {
    let stub = StubBackend::default().with_outputs(vec![pose_output()]);
    let runs = stub.run_counter();
    let mut pipeline = pose_pipeline_with(stub)?;

    let poses = pipeline.infer(&rgb_frame(INPUT, INPUT))?;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(poses.len(), 1);
    assert!((poses[0].keypoints[0].x - 0.5).abs() < 1e-6);
    assert!((poses[0].keypoints[0].y - 0.5).abs() < 1e-6);
    assert_eq!(pipeline.handle().kind(), BackendKind::Portable);
    Ok(())
}

#[test]
fn preprocess_failure_skips_inference() -> Result<()> {
    let stub = StubBackend::default().with_outputs(vec![pose_output()]);
    let runs = stub.run_counter();
    let mut pipeline = pose_pipeline_with(stub)?;

    let gray = Frame::new(vec![0; 16], 4, 4, PixelFormat::Gray8, 1);
    let err = pipeline.infer(&gray).unwrap_err();
    assert_eq!(err.stage, Stage::Preprocess);
    assert!(matches!(err.kind(), Error::Preprocess(_)));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let truncated = Frame::new(vec![0; 10], 4, 4, PixelFormat::Rgb24, 2);
    assert_eq!(pipeline.infer(&truncated).unwrap_err().stage, Stage::Preprocess);
    Ok(())
}

#[test]
fn malformed_outputs_fail_in_postprocess() -> Result<()> {
    let garbage = Tensor::from_f32(vec![1, 7, 3], vec![0.0; 21])?;
    let mut pipeline = pose_pipeline_with(StubBackend::default().with_outputs(vec![garbage]))?;

    let err = pipeline.infer(&rgb_frame(INPUT, INPUT)).unwrap_err();
    assert_eq!(err.stage, Stage::Postprocess);
    assert!(matches!(err.kind(), Error::Postprocess(_)));
    Ok(())
}

#[test]
fn released_pipeline_fails_in_inference() -> Result<()> {
    let mut pipeline = pose_pipeline_with(StubBackend::default().with_outputs(vec![pose_output()]))?;
    pipeline.release();
    pipeline.release();

    let err = pipeline.infer(&rgb_frame(INPUT, INPUT)).unwrap_err();
    assert_eq!(err.stage, Stage::Inference);
    assert!(matches!(err.kind(), Error::HandleReleased));
    Ok(())
}

#[test]
fn object_pipeline_restores_letterboxed_coordinates() -> Result<()> {
    // Single-tensor layout: one box centered in the 32x32 input, class 0.
    let output = Tensor::from_f32(vec![1, 5, 1], vec![16.0, 16.0, 8.0, 8.0, 0.8])?;
    let handle = DetectorHandle::from_backend(
        Box::new(StubBackend::default().with_outputs(vec![output])),
        Path::new("det.onnx"),
        None,
    )?;
    let mut pipeline = DetectionPipeline::new(
        handle,
        YoloV8Detector::new(INPUT, INPUT, DetectionThresholds::default()),
    );

    // 64x32 source: scale 0.5, pad_y 8.
    let detections = pipeline.infer(&rgb_frame(64, 32))?;
    assert_eq!(detections.len(), 1);
    let bbox = detections[0].bbox;
    assert!((bbox.x1 - 24.0).abs() < 1e-4);
    assert!((bbox.x2 - 40.0).abs() < 1e-4);
    assert!((bbox.y1 - 8.0).abs() < 1e-4);
    assert!((bbox.y2 - 24.0).abs() < 1e-4);
    assert_eq!(detections[0].class_name(), "person");
    Ok(())
}

#[test]
fn failed_model_load_is_reported() {
    let stub = StubBackend::default().failing_load();
    let result = DetectorHandle::from_backend(Box::new(stub), Path::new("broken.onnx"), None);
    assert!(matches!(result, Err(Error::ModelLoadFailure { .. })));

    let unknown = ModelSettings::new("models/yolov8n.tflite");
    assert!(matches!(
        DetectorHandle::open(&unknown),
        Err(Error::ModelLoadFailure { .. })
    ));
}

#[cfg(feature = "backend-tract")]
#[test]
fn missing_onnx_model_is_a_load_failure() {
    let settings = ModelSettings::new("/nonexistent/fallwatch/yolov8n-pose.onnx");
    assert!(matches!(
        DetectorHandle::open(&settings),
        Err(Error::ModelLoadFailure { .. })
    ));
}
