use pitrac_cal_core::synthetic::{board_views, covering_board_views, pitrac_like_camera};
use pitrac_cal_core::{CharucoBoard, ImageSize, PlanarView, Pt2, SensorSpec};
use pitrac_cal_linear::{PlanarIntrinsicsOptions, PlanarIntrinsicsSolver, SolveError};

fn frame() -> ImageSize {
    SensorSpec::default().resolution()
}

#[test]
fn three_views_produce_a_complete_result() {
    let cam = pitrac_like_camera();
    let views = board_views(&cam, &CharucoBoard::default(), 3, 350.0).unwrap();

    let result = PlanarIntrinsicsSolver::default()
        .solve(&views, frame())
        .unwrap();

    assert!(result.rms_error >= 0.0);
    assert!(result.rms_error.is_finite());
    assert_eq!(result.camera_matrix.shape(), (3, 3));
    assert_eq!(result.distortion.len(), 5);
    assert_eq!(result.camera_matrix[(2, 2)], 1.0);
    assert_eq!(result.camera_matrix[(0, 1)], 0.0);
}

#[test]
fn fifteen_views_are_accurate() {
    let cam = pitrac_like_camera();
    let views = covering_board_views(&cam, &CharucoBoard::default(), 15, 400.0).unwrap();

    let result = PlanarIntrinsicsSolver::default()
        .solve(&views, frame())
        .unwrap();

    let k = result.camera_matrix;
    let gt = cam.intrinsics;
    assert!((k[(0, 0)] - gt.fx).abs() < 1.0, "fx {}", k[(0, 0)]);
    assert!((k[(1, 1)] - gt.fy).abs() < 1.0, "fy {}", k[(1, 1)]);
    assert!((k[(0, 2)] - gt.cx).abs() < 1.0, "cx {}", k[(0, 2)]);
    assert!((k[(1, 2)] - gt.cy).abs() < 1.0, "cy {}", k[(1, 2)]);
    assert!(result.rms_error < 0.01, "rms {}", result.rms_error);

    // [k1, k2, p1, p2, k3]
    let d = &result.distortion;
    assert!((d[0] - cam.distortion.k1).abs() < 0.005, "k1 {}", d[0]);
    assert!((d[1] - cam.distortion.k2).abs() < 0.01, "k2 {}", d[1]);
    assert!((d[2] - cam.distortion.p1).abs() < 1e-4, "p1 {}", d[2]);
    assert!((d[3] - cam.distortion.p2).abs() < 1e-4, "p2 {}", d[3]);
    assert_eq!(d[4], 0.0);
}

#[test]
fn centered_views_hold_k2() {
    let cam = pitrac_like_camera();
    let views = board_views(&cam, &CharucoBoard::default(), 15, 350.0).unwrap();

    let result = PlanarIntrinsicsSolver::default()
        .solve(&views, frame())
        .unwrap();

    let d = &result.distortion;
    assert_eq!(d[1], 0.0, "k2 should be held");
    assert!((d[0] - cam.distortion.k1).abs() < 0.01, "k1 {}", d[0]);
    let k = result.camera_matrix;
    assert!((k[(0, 0)] - cam.intrinsics.fx).abs() < 2.0, "fx {}", k[(0, 0)]);
    assert!(result.rms_error < 0.1, "rms {}", result.rms_error);
}

#[test]
fn refinement_beats_the_closed_form() {
    let cam = pitrac_like_camera();
    let views = covering_board_views(&cam, &CharucoBoard::default(), 15, 400.0).unwrap();

    let closed_form = PlanarIntrinsicsSolver::new(PlanarIntrinsicsOptions {
        closed_form_only: true,
        ..Default::default()
    })
    .solve(&views, frame())
    .unwrap();
    let refined = PlanarIntrinsicsSolver::default()
        .solve(&views, frame())
        .unwrap();

    assert_eq!(closed_form.distortion[1], 0.0);
    assert!(
        refined.rms_error < closed_form.rms_error,
        "refined {} closed form {}",
        refined.rms_error,
        closed_form.rms_error
    );
}

#[test]
fn two_views_are_insufficient() {
    let cam = pitrac_like_camera();
    let views = board_views(&cam, &CharucoBoard::default(), 2, 350.0).unwrap();

    let err = PlanarIntrinsicsSolver::default()
        .solve(&views, frame())
        .unwrap_err();
    assert_eq!(err, SolveError::InsufficientData { got: 2, need: 3 });
    assert!(err.is_insufficient_data());
}

#[test]
fn sparse_views_do_not_count() {
    let cam = pitrac_like_camera();
    let mut views = board_views(&cam, &CharucoBoard::default(), 3, 350.0).unwrap();
    let sparse = PlanarView::new(
        views[0].board_points[..3].to_vec(),
        views[0].pixel_points[..3].to_vec(),
    )
    .unwrap();
    views[2] = sparse;
    views.push(PlanarView::new(vec![Pt2::origin()], vec![Pt2::origin()]).unwrap());

    let err = PlanarIntrinsicsSolver::default()
        .solve(&views, frame())
        .unwrap_err();
    assert_eq!(err, SolveError::InsufficientData { got: 2, need: 3 });
}
