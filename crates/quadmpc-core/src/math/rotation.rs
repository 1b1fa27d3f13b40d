//! Rotation utilities
//!
//! Conversions from the vehicle's Euler-angle attitude and from segment
//! directions to unit quaternions, as consumed by scene sinks.

use nalgebra::{UnitQuaternion, Vector3};

/// Attitude quaternion for the vehicle's Euler angles
///
/// The model integrates yaw-pitch-roll angles ordered (phi, theta, psi) where
/// `phi` is the heading, `theta` tilts thrust along x and `psi` tilts it
/// along -y. In roll/pitch/yaw terms that is roll = psi, pitch = theta,
/// yaw = phi:
///
/// ```text
/// R = Rz(phi) · Ry(theta) · Rx(psi)
/// ```
pub fn vehicle_attitude(phi: f64, theta: f64, psi: f64) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(psi, theta, phi)
}

/// Rotation taking the body z-axis onto `direction`
///
/// Used to orient cylinders and arrows whose local axis is z. A zero-length
/// direction yields the identity; an antiparallel direction is handled with a
/// half turn about x.
pub fn align_z_axis(direction: &Vector3<f64>) -> UnitQuaternion<f64> {
    let norm = direction.norm();
    if norm < 1e-12 {
        return UnitQuaternion::identity();
    }

    let target = direction / norm;
    UnitQuaternion::rotation_between(&Vector3::z(), &target).unwrap_or_else(|| {
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    })
}
