//! Quantum gate kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gates the kernel IR can apply.
///
/// Controls are not part of the kind: any gate may be applied with an
/// arbitrary set of scalar or vector controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateKind {
    /// Hadamard gate.
    H,
    /// Pauli-X gate.
    X,
    /// Pauli-Y gate.
    Y,
    /// Pauli-Z gate.
    Z,
    /// S gate (sqrt(Z)).
    S,
    /// T gate (fourth root of Z).
    T,
    /// Rotation around X axis.
    Rx,
    /// Rotation around Y axis.
    Ry,
    /// Rotation around Z axis.
    Rz,
    /// Phase rotation.
    R1,
    /// SWAP gate.
    Swap,
    /// Universal single-qubit gate U3(θ, φ, λ).
    U3,
}

impl GateKind {
    /// Get the name of this gate.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            GateKind::H => "h",
            GateKind::X => "x",
            GateKind::Y => "y",
            GateKind::Z => "z",
            GateKind::S => "s",
            GateKind::T => "t",
            GateKind::Rx => "rx",
            GateKind::Ry => "ry",
            GateKind::Rz => "rz",
            GateKind::R1 => "r1",
            GateKind::Swap => "swap",
            GateKind::U3 => "u3",
        }
    }

    /// Number of target qubits.
    #[inline]
    pub fn num_targets(&self) -> u32 {
        match self {
            GateKind::Swap => 2,
            _ => 1,
        }
    }

    /// Number of rotation parameters.
    #[inline]
    pub fn num_params(&self) -> u32 {
        match self {
            GateKind::Rx | GateKind::Ry | GateKind::Rz | GateKind::R1 => 1,
            GateKind::U3 => 3,
            _ => 0,
        }
    }

    /// Check if the gate is its own inverse.
    #[inline]
    pub fn is_self_adjoint(&self) -> bool {
        matches!(
            self,
            GateKind::H | GateKind::X | GateKind::Y | GateKind::Z | GateKind::Swap
        )
    }

    /// All gate kinds, in declaration order.
    pub fn all() -> &'static [GateKind] {
        &[
            GateKind::H,
            GateKind::X,
            GateKind::Y,
            GateKind::Z,
            GateKind::S,
            GateKind::T,
            GateKind::Rx,
            GateKind::Ry,
            GateKind::Rz,
            GateKind::R1,
            GateKind::Swap,
            GateKind::U3,
        ]
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
