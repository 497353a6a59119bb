//! Conversion of sensor-frame offsets into east/north offsets.
//!
//! A sensor's x and y axes are described by their compass azimuths. The two
//! axes are not always mounted exactly perpendicular, so the y azimuth is
//! first corrected by half the deviation from 90 degrees, then the polar form
//! of `(dx, dy)` is rotated into the compass frame.

use crate::model::{Offsets, ResolvedOffsets};

/// Clockwise angle from the y axis to the x axis, in degrees.
fn axis_separation(x_azimuth: f64, y_azimuth: f64) -> f64 {
    if y_azimuth < x_azimuth {
        x_azimuth - y_azimuth
    } else {
        360.0 - y_azimuth + x_azimuth
    }
}

/// The y azimuth after splitting the non-orthogonality between both axes,
/// wrapped into `[0, 360)`.
pub fn corrected_y_azimuth(x_azimuth: f64, y_azimuth: f64) -> f64 {
    let diff = axis_separation(x_azimuth, y_azimuth);
    let corrected = if diff > 90.0 {
        y_azimuth + 0.5 * (diff - 90.0)
    } else if diff < 90.0 {
        y_azimuth - 0.5 * (90.0 - diff)
    } else {
        y_azimuth
    };
    corrected.rem_euclid(360.0)
}

/// Polar angle of `(dx, dy)` in degrees, in `[0, 360)`.
fn polar_angle(dx: f64, dy: f64) -> f64 {
    if dx == 0.0 {
        return 90.0;
    }
    let theta = (dy / dx).atan().to_degrees();
    if dx < 0.0 {
        theta + 180.0
    } else if dy < 0.0 {
        theta + 360.0
    } else {
        theta
    }
}

/// East and north offsets of a point `(dx, dy)` in the sensor frame.
pub fn east_north(dx: f64, dy: f64, x_azimuth: f64, y_azimuth: f64) -> (f64, f64) {
    let r = dx.hypot(dy);
    let theta = polar_angle(dx, dy);
    let phi = (theta - corrected_y_azimuth(x_azimuth, y_azimuth)).to_radians();
    (r * phi.cos(), r * phi.sin())
}

/// Resolve raw offsets. Without both azimuths the x and y offsets are taken
/// to be east and north already.
pub fn resolve(offsets: &Offsets) -> ResolvedOffsets {
    let (east, north) = match (offsets.x_azimuth, offsets.y_azimuth) {
        (Some(x_az), Some(y_az)) => east_north(offsets.x, offsets.y, x_az, y_az),
        _ => (offsets.x, offsets.y),
    };
    ResolvedOffsets {
        east,
        north,
        z: offsets.z,
        alpha: offsets.alpha,
        beta: offsets.beta,
        gamma: offsets.gamma,
    }
}
