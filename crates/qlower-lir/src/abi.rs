//! The external quantum runtime ABI.
//!
//! Lowering never hard-codes runtime symbol names: it asks an [`AbiTable`]
//! for the name and signature of each entry point it needs. The default
//! table follows the QIR naming convention. A JSON table names only the
//! entries it changes: every runtime function and gate it leaves out keeps
//! its QIR entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{FnSig, LirType};

/// Runtime entry points other than per-gate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFn {
    /// Allocate an array of `n` qubits.
    QubitAllocateArray,
    /// Allocate an array of `n` qubits prepared in a given state.
    QubitAllocateArrayWithState,
    /// Release an array of qubits.
    QubitReleaseArray,
    /// Allocate one qubit.
    QubitAllocate,
    /// Release one qubit.
    QubitRelease,
    /// Element of a one-dimensional array.
    ArrayGetElementPtr1d,
    /// Strided slice of an array.
    ArraySlice,
    /// Number of elements of a one-dimensional array.
    ArrayGetSize1d,
    /// Z-basis measurement returning a result handle.
    Measure,
    /// Read a result handle as a boolean.
    ReadResult,
    /// Reset a qubit to |0⟩.
    Reset,
    /// Generalized controlled-gate dispatch.
    GeneralizedInvoke,
}

impl RuntimeFn {
    /// QIR symbol name.
    pub fn default_name(self) -> &'static str {
        match self {
            RuntimeFn::QubitAllocateArray => "__quantum__rt__qubit_allocate_array",
            RuntimeFn::QubitAllocateArrayWithState => {
                "__quantum__rt__qubit_allocate_array_with_state_fp64"
            }
            RuntimeFn::QubitReleaseArray => "__quantum__rt__qubit_release_array",
            RuntimeFn::QubitAllocate => "__quantum__rt__qubit_allocate",
            RuntimeFn::QubitRelease => "__quantum__rt__qubit_release",
            RuntimeFn::ArrayGetElementPtr1d => "__quantum__rt__array_get_element_ptr_1d",
            RuntimeFn::ArraySlice => "__quantum__rt__array_slice",
            RuntimeFn::ArrayGetSize1d => "__quantum__rt__array_get_size_1d",
            RuntimeFn::Measure => "__quantum__qis__mz",
            RuntimeFn::ReadResult => "__quantum__rt__read_result",
            RuntimeFn::Reset => "__quantum__qis__reset",
            RuntimeFn::GeneralizedInvoke => "generalizedInvokeWithRotationsControlsTargets",
        }
    }

    /// Signature of the entry point.
    pub fn signature(self) -> FnSig {
        use LirType::{Ptr, Void};
        match self {
            RuntimeFn::QubitAllocateArray => FnSig::new([LirType::I64], Ptr),
            RuntimeFn::QubitAllocateArrayWithState => FnSig::new([LirType::I64, Ptr], Ptr),
            RuntimeFn::QubitReleaseArray | RuntimeFn::QubitRelease | RuntimeFn::Reset => {
                FnSig::new([Ptr], Void)
            }
            RuntimeFn::QubitAllocate => FnSig::new([], Ptr),
            RuntimeFn::ArrayGetElementPtr1d => FnSig::new([Ptr, LirType::I64], Ptr),
            RuntimeFn::ArraySlice => FnSig::new(
                [Ptr, LirType::I32, LirType::I64, LirType::I64, LirType::I64],
                Ptr,
            ),
            RuntimeFn::ArrayGetSize1d => FnSig::new([Ptr], LirType::I64),
            RuntimeFn::Measure => FnSig::new([Ptr], Ptr),
            RuntimeFn::ReadResult => FnSig::new([Ptr], LirType::I1),
            // (rotations, vector groups, scalar controls, targets, base fn, ...)
            RuntimeFn::GeneralizedInvoke => FnSig::variadic(
                [LirType::I64, LirType::I64, LirType::I64, LirType::I64, Ptr],
                Void,
            ),
        }
    }

    /// All runtime entry points.
    pub fn all() -> &'static [RuntimeFn] {
        &[
            RuntimeFn::QubitAllocateArray,
            RuntimeFn::QubitAllocateArrayWithState,
            RuntimeFn::QubitReleaseArray,
            RuntimeFn::QubitAllocate,
            RuntimeFn::QubitRelease,
            RuntimeFn::ArrayGetElementPtr1d,
            RuntimeFn::ArraySlice,
            RuntimeFn::ArrayGetSize1d,
            RuntimeFn::Measure,
            RuntimeFn::ReadResult,
            RuntimeFn::Reset,
            RuntimeFn::GeneralizedInvoke,
        ]
    }
}

/// What "get element" returns on an array of qubits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementAccess {
    /// The qubit handle itself.
    Direct,
    /// A pointer to the qubit handle, loaded once more.
    #[default]
    Indirect,
}

/// Entry points of one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEntryPoints {
    /// Uncontrolled entry point.
    pub base: String,
    /// Single-control entry point, if the runtime has one.
    #[serde(default)]
    pub controlled: Option<String>,
    /// Adjoint entry point, for gates that are neither self-adjoint nor
    /// rotations.
    #[serde(default)]
    pub adjoint: Option<String>,
}

impl GateEntryPoints {
    fn qir(gate: &str, controlled: bool, adjoint: bool) -> Self {
        let base = format!("__quantum__qis__{gate}");
        Self {
            controlled: controlled.then(|| format!("{base}__ctl")),
            adjoint: adjoint.then(|| format!("{base}__adj")),
            base,
        }
    }
}

/// Read-only table of runtime entry points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AbiOverrides")]
pub struct AbiTable {
    /// Convention of the "get element" entry point.
    pub element_access: ElementAccess,
    /// Symbol overrides for runtime entry points.
    pub runtime: BTreeMap<RuntimeFn, String>,
    /// Gate entry points by gate name.
    pub gates: BTreeMap<String, GateEntryPoints>,
}

/// Deserialized form of an [`AbiTable`]: only the entries that differ from
/// QIR.
#[derive(Deserialize)]
struct AbiOverrides {
    #[serde(default)]
    element_access: Option<ElementAccess>,
    #[serde(default)]
    runtime: BTreeMap<RuntimeFn, String>,
    #[serde(default)]
    gates: BTreeMap<String, GateEntryPoints>,
}

impl From<AbiOverrides> for AbiTable {
    fn from(overrides: AbiOverrides) -> Self {
        let mut table = AbiTable::qir();
        if let Some(access) = overrides.element_access {
            table.element_access = access;
        }
        table.runtime.extend(overrides.runtime);
        table.gates.extend(overrides.gates);
        table
    }
}

impl Default for AbiTable {
    fn default() -> Self {
        Self::qir()
    }
}

impl AbiTable {
    /// The QIR table.
    pub fn qir() -> Self {
        let mut gates = BTreeMap::new();
        for gate in ["h", "x", "y", "z", "rx", "ry", "rz", "r1", "swap"] {
            gates.insert(gate.to_string(), GateEntryPoints::qir(gate, true, false));
        }
        for gate in ["s", "t"] {
            gates.insert(gate.to_string(), GateEntryPoints::qir(gate, true, true));
        }
        gates.insert("u3".to_string(), GateEntryPoints::qir("u3", false, false));
        Self {
            element_access: ElementAccess::default(),
            runtime: BTreeMap::new(),
            gates,
        }
    }

    /// Load a table from JSON, merging its entries over the QIR table.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Symbol name of a runtime entry point.
    pub fn runtime_name(&self, f: RuntimeFn) -> &str {
        self.runtime
            .get(&f)
            .map_or_else(|| f.default_name(), String::as_str)
    }

    /// Entry points of a gate.
    pub fn gate(&self, name: &str) -> Option<&GateEntryPoints> {
        self.gates.get(name)
    }

    /// Signature of a direct gate call: control and target handles, then
    /// rotation angles.
    pub fn gate_signature(controls: usize, targets: usize, params: usize) -> FnSig {
        let params = std::iter::repeat_n(LirType::Ptr, controls + targets)
            .chain(std::iter::repeat_n(LirType::F64, params));
        FnSig::new(params, LirType::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qir_gate_names() {
        let abi = AbiTable::qir();
        let x = abi.gate("x").unwrap();
        assert_eq!(x.base, "__quantum__qis__x");
        assert_eq!(x.controlled.as_deref(), Some("__quantum__qis__x__ctl"));
        assert_eq!(
            abi.gate("t").and_then(|g| g.adjoint.as_deref()),
            Some("__quantum__qis__t__adj")
        );
        assert!(abi.gate("u3").unwrap().controlled.is_none());
    }

    #[test]
    fn test_override_from_json() {
        let abi = AbiTable::from_json(
            r#"{"element_access": "direct", "runtime": {"qubit_allocate": "rt_alloc"}}"#,
        )
        .unwrap();
        assert_eq!(abi.element_access, ElementAccess::Direct);
        assert_eq!(abi.runtime_name(RuntimeFn::QubitAllocate), "rt_alloc");
        assert_eq!(
            abi.runtime_name(RuntimeFn::QubitRelease),
            "__quantum__rt__qubit_release"
        );
        assert!(abi.gate("h").is_some());
    }

    #[test]
    fn test_gate_override_keeps_other_gates() {
        let abi = AbiTable::from_json(
            r#"{"gates": {"x": {"base": "rt_x", "controlled": "rt_cnot"}}}"#,
        )
        .unwrap();
        let x = abi.gate("x").unwrap();
        assert_eq!(x.base, "rt_x");
        assert_eq!(x.controlled.as_deref(), Some("rt_cnot"));
        assert_eq!(abi.gate("h"), AbiTable::qir().gate("h"));
        assert_eq!(abi.gates.len(), AbiTable::qir().gates.len());
        assert_eq!(abi.element_access, ElementAccess::Indirect);
    }

    #[test]
    fn test_new_gate_from_json() {
        let abi = AbiTable::from_json(r#"{"gates": {"ccx": {"base": "rt_toffoli"}}}"#).unwrap();
        assert_eq!(abi.gate("ccx").map(|g| g.base.as_str()), Some("rt_toffoli"));
        assert!(abi.gate("swap").is_some());
    }

    #[test]
    fn test_runtime_signatures() {
        assert_eq!(
            RuntimeFn::ArraySlice.signature().to_string(),
            "ptr (ptr, i32, i64, i64, i64)"
        );
        assert_eq!(RuntimeFn::ReadResult.signature().to_string(), "i1 (ptr)");
        assert_eq!(
            RuntimeFn::GeneralizedInvoke.signature().to_string(),
            "void (i64, i64, i64, i64, ptr, ...)"
        );
        assert_eq!(RuntimeFn::QubitAllocate.signature().to_string(), "ptr ()");
    }

    #[test]
    fn test_gate_signature() {
        let sig = AbiTable::gate_signature(1, 1, 1);
        assert_eq!(sig.to_string(), "void (ptr, ptr, double)");
    }
}
