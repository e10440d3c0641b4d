//! Golden-vector conformance for [`HashFunction`] implementations.
//!
//! A hasher may only be used to commit snapshots for a circuit after it
//! reproduces that circuit's published vectors exactly.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::field::FieldElement;
use crate::hash::HashFunction;

/// Input shape of one vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GoldenInput {
    Pair { left: FieldElement, right: FieldElement },
    Single { value: FieldElement },
    Four { inputs: [FieldElement; 4] },
    String { value: String },
}

/// One published input/output pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenVector {
    pub name: String,
    #[serde(flatten)]
    pub input: GoldenInput,
    pub expected: FieldElement,
}

/// Vectors published for one hash function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenVectorSet {
    pub hash_function_id: String,
    pub vectors: Vec<GoldenVector>,
}

impl GoldenVectorSet {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceFailure {
    pub name: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConformanceReport {
    pub hash_function_id: String,
    pub passed: usize,
    pub failures: Vec<ConformanceFailure>,
}

impl ConformanceReport {
    pub fn is_conformant(&self) -> bool {
        self.failures.is_empty() && self.passed > 0
    }
}

/// Evaluate one vector.
pub fn evaluate(hasher: &dyn HashFunction, input: &GoldenInput) -> FieldElement {
    match input {
        GoldenInput::Pair { left, right } => hasher.hash_pair(left, right),
        GoldenInput::Single { value } => hasher.hash_single(value),
        GoldenInput::Four { inputs } => {
            hasher.hash_four([&inputs[0], &inputs[1], &inputs[2], &inputs[3]])
        }
        GoldenInput::String { value } => hasher.hash_string(value),
    }
}

/// Run every vector in the set against `hasher`.
///
/// A set published for a different hash function id is reported as a
/// failure rather than silently compared.
pub fn check_conformance(hasher: &dyn HashFunction, set: &GoldenVectorSet) -> ConformanceReport {
    let mut report = ConformanceReport {
        hash_function_id: hasher.id().to_string(),
        passed: 0,
        failures: Vec::new(),
    };

    if set.hash_function_id != hasher.id() {
        report.failures.push(ConformanceFailure {
            name: "hash_function_id".to_string(),
            expected: set.hash_function_id.clone(),
            actual: hasher.id().to_string(),
        });
    }

    for vector in &set.vectors {
        let actual = evaluate(hasher, &vector.input);
        if actual == vector.expected {
            report.passed += 1;
        } else {
            warn!(
                vector = %vector.name,
                expected = %vector.expected,
                actual = %actual,
                "Golden vector mismatch"
            );
            report.failures.push(ConformanceFailure {
                name: vector.name.clone(),
                expected: vector.expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
    }

    info!(
        hash_function = %report.hash_function_id,
        passed = report.passed,
        failed = report.failures.len(),
        "Conformance check complete"
    );

    report
}
