//! Quality gate serialization for the stage job config
//!
//! The release job template reads `QG_STAGES` as a list of parallel blocks:
//! adjacent gates of the same type run in parallel and are bracketed, a gate
//! with no same-type neighbour runs on its own and is emitted bare. Grouping
//! is by adjacency only, so `[A, M, A]` yields three bare records.

use serde::Serialize;

use conveyor_common::crd::QualityGate;
use conveyor_common::Error;

#[derive(Serialize)]
struct GateRecord<'a> {
    name: &'a str,
    step_name: &'a str,
}

impl<'a> From<&'a QualityGate> for GateRecord<'a> {
    fn from(gate: &'a QualityGate) -> Self {
        Self {
            name: &gate.quality_gate_type,
            step_name: &gate.step_name,
        }
    }
}

/// Render `gates` as the `QG_STAGES` job parameter, `None` when there are none
pub fn serialize_quality_gates(gates: &[QualityGate]) -> Result<Option<String>, Error> {
    if gates.is_empty() {
        return Ok(None);
    }

    let fragments = gates
        .chunk_by(|a, b| a.quality_gate_type == b.quality_gate_type)
        .map(render_run)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(fragments.join(",")))
}

fn render_run(run: &[QualityGate]) -> Result<String, Error> {
    match run {
        [single] => Ok(serde_json::to_string(&GateRecord::from(single))?),
        _ => {
            let records: Vec<GateRecord<'_>> = run.iter().map(GateRecord::from).collect();
            Ok(serde_json::to_string(&records)?)
        }
    }
}
