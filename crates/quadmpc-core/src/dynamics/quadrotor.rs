//! Quadrotor dynamics
//!
//! 16-state rigid-body model with rotor speeds as states and rotor
//! accelerations as inputs:
//!
//! ```text
//! ṗ = v
//! v̇ = (Cf Σuᵢ²/m) · [sinθ, -sinψ cosθ, cosψ cosθ] - g e₃ - (Cx/m) v
//! φ̇ = -cosφ tanθ p + sinφ tanθ q + r
//! θ̇ = sinφ p + cosφ q
//! ψ̇ = (cosφ p - sinφ q) / cosθ
//! ṗ = (d Cf (u₁² - u₂²) + (Jy - Jz) q r) / Jx
//! q̇ = (d Cf (u₄² - u₃²) + (Jz - Jx) p r) / Jy
//! ṙ = (c (u₁² + u₂² - u₃² - u₄²) + (Jx - Jy) p q) / Jz
//! u̇ᵢ = vuᵢ
//! ```
//!
//! The angle kinematics divide by cos θ. The model has no error path; the
//! controller keeps |θ| within a hard bound well inside (-π/2, π/2).

use nalgebra::{UnitQuaternion, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::math::vehicle_attitude;
use crate::{CommandVector, StateVector, GRAVITY};

/// Component offsets into [`StateVector`]
pub mod index {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const Z: usize = 2;
    pub const VX: usize = 3;
    pub const VY: usize = 4;
    pub const VZ: usize = 5;
    pub const PHI: usize = 6;
    pub const THETA: usize = 7;
    pub const PSI: usize = 8;
    pub const P: usize = 9;
    pub const Q: usize = 10;
    pub const R: usize = 11;
    /// First rotor speed; u1..u4 occupy `U1..U1 + 4`
    pub const U1: usize = 12;
}

/// Vehicle state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Position [m] (world frame, z up)
    pub position: Vector3<f64>,
    /// Velocity [m/s] (world frame)
    pub velocity: Vector3<f64>,
    /// Euler angles (phi, theta, psi) [rad]
    pub euler: Vector3<f64>,
    /// Body rates (p, q, r) [rad/s]
    pub angular_velocity: Vector3<f64>,
    /// Rotor speeds u1..u4
    pub actuators: Vector4<f64>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            euler: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            actuators: Vector4::zeros(),
        }
    }
}

impl VehicleState {
    /// Equilibrium state at `position`: level, at rest, rotors at hover speed
    pub fn hover(position: Vector3<f64>, params: &QuadrotorParams) -> Self {
        Self {
            position,
            actuators: Vector4::repeat(params.hover_rotor_speed()),
            ..Default::default()
        }
    }

    pub fn phi(&self) -> f64 {
        self.euler.x
    }

    pub fn theta(&self) -> f64 {
        self.euler.y
    }

    pub fn psi(&self) -> f64 {
        self.euler.z
    }

    /// Attitude as a quaternion for display
    pub fn attitude(&self) -> UnitQuaternion<f64> {
        vehicle_attitude(self.phi(), self.theta(), self.psi())
    }

    /// Pack into the solver's state ordering
    pub fn to_vector(&self) -> StateVector {
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<3>(index::X).copy_from(&self.position);
        x.fixed_rows_mut::<3>(index::VX).copy_from(&self.velocity);
        x.fixed_rows_mut::<3>(index::PHI).copy_from(&self.euler);
        x.fixed_rows_mut::<3>(index::P).copy_from(&self.angular_velocity);
        x.fixed_rows_mut::<4>(index::U1).copy_from(&self.actuators);
        x
    }

    /// Unpack from the solver's state ordering
    pub fn from_vector(x: &StateVector) -> Self {
        Self {
            position: x.fixed_rows::<3>(index::X).into_owned(),
            velocity: x.fixed_rows::<3>(index::VX).into_owned(),
            euler: x.fixed_rows::<3>(index::PHI).into_owned(),
            angular_velocity: x.fixed_rows::<3>(index::P).into_owned(),
            actuators: x.fixed_rows::<4>(index::U1).into_owned(),
        }
    }

    /// All components finite
    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}

/// Rotor acceleration command (vu1..vu4)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub rotor_rates: CommandVector,
}

impl Default for Command {
    fn default() -> Self {
        Self::zero()
    }
}

impl Command {
    pub fn new(vu1: f64, vu2: f64, vu3: f64, vu4: f64) -> Self {
        Self {
            rotor_rates: Vector4::new(vu1, vu2, vu3, vu4),
        }
    }

    /// Hold rotor speeds constant
    pub fn zero() -> Self {
        Self {
            rotor_rates: Vector4::zeros(),
        }
    }

    pub fn from_vector(v: CommandVector) -> Self {
        Self { rotor_rates: v }
    }

    pub fn as_vector(&self) -> &CommandVector {
        &self.rotor_rates
    }
}

/// Quadrotor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadrotorParams {
    /// Mass [kg]
    pub mass: f64,
    /// Principal inertia (Jx, Jy, Jz) [kg·m²]
    pub inertia: Vector3<f64>,
    /// Arm length d [m]
    pub arm_length: f64,
    /// Thrust coefficient Cf (thrust per rotor = Cf u²)
    pub thrust_coefficient: f64,
    /// Drag torque coefficient c (yaw torque per rotor = c u²)
    pub drag_torque_coefficient: f64,
    /// Linear translational drag Cx [kg/s]
    pub linear_drag: f64,
    /// Gravity magnitude [m/s²]
    pub gravity: f64,
}

impl Default for QuadrotorParams {
    fn default() -> Self {
        Self {
            mass: 0.9,
            inertia: Vector3::new(0.018, 0.018, 0.026),
            arm_length: 0.25,
            thrust_coefficient: 0.00065,
            drag_torque_coefficient: 0.00001,
            linear_drag: 0.0, // model mismatch studies set this on the plant only
            gravity: GRAVITY,
        }
    }
}

impl QuadrotorParams {
    /// Rotor speed at which four rotors carry the weight
    pub fn hover_rotor_speed(&self) -> f64 {
        (self.mass * self.gravity / (4.0 * self.thrust_coefficient)).sqrt()
    }

    /// Total thrust for the given rotor speeds [N]
    pub fn total_thrust(&self, actuators: &Vector4<f64>) -> f64 {
        self.thrust_coefficient * actuators.norm_squared()
    }

    /// Physically meaningful parameters
    pub fn is_valid(&self) -> bool {
        let positive = [self.mass, self.arm_length, self.thrust_coefficient, self.gravity];
        positive.iter().all(|v| v.is_finite() && *v > 0.0)
            && self.inertia.iter().all(|v| v.is_finite() && *v > 0.0)
            && self.drag_torque_coefficient.is_finite()
            && self.drag_torque_coefficient >= 0.0
            && self.linear_drag.is_finite()
            && self.linear_drag >= 0.0
    }
}

/// Quadrotor dynamics model
#[derive(Debug, Clone, Default)]
pub struct QuadrotorDynamics {
    pub params: QuadrotorParams,
}

impl QuadrotorDynamics {
    pub fn new(params: QuadrotorParams) -> Self {
        Self { params }
    }

    /// State derivative for packed state and command
    pub fn derivative(&self, x: &StateVector, vu: &CommandVector) -> StateVector {
        let p = &self.params;

        let (phi, theta, psi) = (x[index::PHI], x[index::THETA], x[index::PSI]);
        let (wp, wq, wr) = (x[index::P], x[index::Q], x[index::R]);
        let u = x.fixed_rows::<4>(index::U1);
        let u_sq = Vector4::new(u[0] * u[0], u[1] * u[1], u[2] * u[2], u[3] * u[3]);

        let (sin_phi, cos_phi) = phi.sin_cos();
        let (sin_theta, cos_theta) = theta.sin_cos();
        let (sin_psi, cos_psi) = psi.sin_cos();
        let tan_theta = sin_theta / cos_theta;

        let specific_thrust = p.thrust_coefficient * u_sq.sum() / p.mass;
        let drag = p.linear_drag / p.mass;
        let (jx, jy, jz) = (p.inertia.x, p.inertia.y, p.inertia.z);

        let mut dx = StateVector::zeros();

        dx[index::X] = x[index::VX];
        dx[index::Y] = x[index::VY];
        dx[index::Z] = x[index::VZ];

        dx[index::VX] = specific_thrust * sin_theta - drag * x[index::VX];
        dx[index::VY] = -specific_thrust * sin_psi * cos_theta - drag * x[index::VY];
        dx[index::VZ] = specific_thrust * cos_psi * cos_theta - p.gravity - drag * x[index::VZ];

        dx[index::PHI] = -cos_phi * tan_theta * wp + sin_phi * tan_theta * wq + wr;
        dx[index::THETA] = sin_phi * wp + cos_phi * wq;
        dx[index::PSI] = (cos_phi * wp - sin_phi * wq) / cos_theta;

        let arm_thrust = p.arm_length * p.thrust_coefficient;
        dx[index::P] = (arm_thrust * (u_sq[0] - u_sq[1]) + (jy - jz) * wq * wr) / jx;
        dx[index::Q] = (arm_thrust * (u_sq[3] - u_sq[2]) + (jz - jx) * wp * wr) / jy;
        dx[index::R] = (p.drag_torque_coefficient * (u_sq[0] + u_sq[1] - u_sq[2] - u_sq[3])
            + (jx - jy) * wp * wq)
            / jz;

        dx.fixed_rows_mut::<4>(index::U1).copy_from(vu);
        dx
    }

    /// Derivative for structured state and command
    pub fn state_derivative(&self, state: &VehicleState, command: &Command) -> StateVector {
        self.derivative(&state.to_vector(), command.as_vector())
    }
}
