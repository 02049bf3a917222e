use std::time::{Duration, SystemTime};

use anyhow::Result;

use fallwatch::fall::{HEAD, LEFT_HIP, RIGHT_HIP};
use fallwatch::{body_angle, FallJudge, FallJudgeConfig, Keypoint};

fn kp(x: f32, y: f32) -> Keypoint {
    Keypoint {
        x,
        y,
        confidence: 0.9,
    }
}

/// 17 keypoints with the head at `head` and both hips at `hip`.
fn pose(head: (f32, f32), hip: (f32, f32)) -> Vec<Keypoint> {
    let mut kps = vec![kp(0.0, 0.0); 17];
    kps[HEAD] = kp(head.0, head.1);
    kps[LEFT_HIP] = kp(hip.0 - 10.0, hip.1);
    kps[RIGHT_HIP] = kp(hip.0 + 10.0, hip.1);
    kps
}

fn upright() -> Vec<Keypoint> {
    pose((100.0, 50.0), (100.0, 150.0))
}

fn lying() -> Vec<Keypoint> {
    pose((200.0, 150.0), (100.0, 150.0))
}

#[test]
fn angles_follow_image_orientation() {
    let vertical = body_angle(&upright(), 0.0).unwrap();
    assert!(vertical.abs() < 1e-4);
    let horizontal = body_angle(&lying(), 0.0).unwrap();
    assert!((horizontal - 90.0).abs() < 1e-4);
    let inverted = body_angle(&pose((100.0, 250.0), (100.0, 150.0)), 0.0).unwrap();
    assert!((inverted - 180.0).abs() < 1e-4);
    let mirrored = body_angle(&pose((0.0, 150.0), (100.0, 150.0)), 0.0).unwrap();
    assert!((mirrored - 90.0).abs() < 1e-4);
}

#[test]
fn angle_is_translation_invariant() {
    let base = body_angle(&pose((130.0, 60.0), (100.0, 150.0)), 0.0).unwrap();
    let shifted = body_angle(&pose((530.0, 360.0), (500.0, 450.0)), 0.0).unwrap();
    assert!((base - shifted).abs() < 1e-4);
}

#[test]
fn never_confirms_before_window_fills() -> Result<()> {
    let mut judge = FallJudge::new(FallJudgeConfig::default())?;
    for _ in 0..14 {
        let obs = judge.observe(Some(&lying()));
        assert!(!obs.confirmed);
        assert!(obs.angle > 60.0);
    }
    assert!(judge.observe(Some(&lying())).confirmed);
    Ok(())
}

#[test]
fn twelve_of_fifteen_confirms_in_any_order() -> Result<()> {
    let orders: [&[bool]; 3] = [
        &[true, true, true, true, true, true, true, true, true, true, true, true, false, false, false],
        &[false, false, false, true, true, true, true, true, true, true, true, true, true, true, true],
        &[true, false, true, true, false, true, true, true, true, false, true, true, true, true, true],
    ];
    for order in orders {
        let mut judge = FallJudge::new(FallJudgeConfig::default())?;
        let mut last = None;
        for &abnormal in order {
            let kps = if abnormal { lying() } else { upright() };
            last = Some(judge.observe(Some(&kps)));
        }
        assert!(last.unwrap().confirmed, "order {:?}", order);
    }
    Ok(())
}

#[test]
fn eleven_of_fifteen_never_confirms() -> Result<()> {
    let orders: [&[bool]; 3] = [
        &[true, true, true, true, true, true, true, true, true, true, true, false, false, false, false],
        &[false, false, false, false, true, true, true, true, true, true, true, true, true, true, true],
        &[true, false, true, true, false, true, true, true, false, true, true, false, true, true, true],
    ];
    for order in orders {
        assert_eq!(order.iter().filter(|&&a| a).count(), 11);
        let mut judge = FallJudge::new(FallJudgeConfig::default())?;
        for &abnormal in order {
            let kps = if abnormal { lying() } else { upright() };
            assert!(!judge.observe(Some(&kps)).confirmed, "order {:?}", order);
        }
        assert!(judge.last_event().is_none(), "order {:?}", order);
    }
    Ok(())
}

#[test]
fn window_slides_past_old_observations() -> Result<()> {
    let mut judge = FallJudge::new(FallJudgeConfig::default())?;
    for _ in 0..15 {
        judge.observe(Some(&lying()));
    }
    // Four upright frames push the abnormal count to 11.
    let mut confirmed = true;
    for _ in 0..4 {
        confirmed = judge.observe(Some(&upright())).confirmed;
    }
    assert!(!confirmed);
    assert_eq!(judge.window_len(), 15);
    Ok(())
}

#[test]
fn invalid_observations_leave_the_window_untouched() -> Result<()> {
    let mut judge = FallJudge::new(FallJudgeConfig {
        min_keypoint_confidence: 0.5,
        ..FallJudgeConfig::default()
    })?;
    judge.observe(Some(&lying()));
    assert_eq!(judge.window_len(), 1);

    let mut low_confidence = lying();
    low_confidence[LEFT_HIP].confidence = 0.1;
    let mut non_finite = lying();
    non_finite[HEAD].x = f32::NAN;
    let coincident = pose((100.0, 150.0), (100.0, 150.0));
    let too_short = lying()[..12].to_vec();

    for kps in [low_confidence, non_finite, coincident, too_short] {
        let obs = judge.observe(Some(&kps));
        assert!(!obs.confirmed);
        assert_eq!(obs.angle, 0.0);
    }
    let missing = judge.observe(None);
    assert_eq!((missing.confirmed, missing.angle), (false, 0.0));
    assert_eq!(judge.window_len(), 1);
    Ok(())
}

#[test]
fn confirmed_fall_records_event_time() -> Result<()> {
    let mut judge = FallJudge::new(FallJudgeConfig {
        window: 3,
        confirm_ratio: 1.0,
        ..FallJudgeConfig::default()
    })?;
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for i in 0..3 {
        judge.observe_at(Some(&lying()), t0 + Duration::from_secs(i));
    }
    let event = judge.last_event().expect("fall event");
    assert_eq!(event.at, t0 + Duration::from_secs(2));
    assert!((event.angle - 90.0).abs() < 1e-4);

    judge.reset();
    assert!(judge.last_event().is_none());
    assert!(!judge.observe(Some(&lying())).confirmed);
    Ok(())
}
