//! Pointer coordinate mapping from the viewer's display area onto the
//! agent's output frame.
//!
//! The frame is drawn scaled to fit the view with its aspect ratio kept
//! and centred, leaving bars on two sides:
//!
//! ```text
//! ┌──────────── view ────────────┐
//! │ bar │      frame       │ bar │
//! │     │ (scaled,centred) │     │
//! └──────────────────────────────┘
//! ```
//!
//! Coordinates sent to the agent always refer to the output frame, so the
//! agent can map them onto the real display without knowing the view.

/// Map a point in view space onto the output frame.
///
/// Points over the bars clamp to the nearest frame edge. Returns `None`
/// when either area is empty.
pub fn scale_to_frame(
    view_x: i32,
    view_y: i32,
    view_w: u32,
    view_h: u32,
    frame_w: u32,
    frame_h: u32,
) -> Option<(u32, u32)> {
    if view_w == 0 || view_h == 0 || frame_w == 0 || frame_h == 0 {
        return None;
    }

    let scale = f64::min(
        f64::from(view_w) / f64::from(frame_w),
        f64::from(view_h) / f64::from(frame_h),
    );
    let offset_x = (f64::from(view_w) - f64::from(frame_w) * scale) / 2.0;
    let offset_y = (f64::from(view_h) - f64::from(frame_h) * scale) / 2.0;

    let fx = ((f64::from(view_x) - offset_x) / scale).floor();
    let fy = ((f64::from(view_y) - offset_y) / scale).floor();

    Some((
        fx.clamp(0.0, f64::from(frame_w - 1)) as u32,
        fy.clamp(0.0, f64::from(frame_h - 1)) as u32,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_view_matches_frame() {
        assert_eq!(scale_to_frame(100, 250, 1920, 1080, 1920, 1080), Some((100, 250)));
    }

    #[test]
    fn half_size_view_doubles_coordinates() {
        assert_eq!(scale_to_frame(480, 270, 960, 540, 1920, 1080), Some((960, 540)));
    }

    #[test]
    fn letterbox_offset_is_removed() {
        // 960x740 view: frame drawn at 960x540 with 100px bars top and bottom.
        assert_eq!(scale_to_frame(0, 100, 960, 740, 1920, 1080), Some((0, 0)));
        assert_eq!(scale_to_frame(480, 370, 960, 740, 1920, 1080), Some((960, 540)));
    }

    #[test]
    fn points_outside_the_frame_clamp() {
        assert_eq!(scale_to_frame(-50, 5, 960, 740, 1920, 1080), Some((0, 0)));
        assert_eq!(scale_to_frame(5000, 5000, 960, 540, 1920, 1080), Some((1919, 1079)));
    }

    #[test]
    fn empty_areas_do_not_map() {
        assert_eq!(scale_to_frame(1, 1, 0, 540, 1920, 1080), None);
        assert_eq!(scale_to_frame(1, 1, 960, 540, 1920, 0), None);
    }
}
