//! # Snapshot Export
//!
//! Deterministic, bit-exact serialization of a driver's last completed
//! generation: root inputs, per-stage table sizes, host outputs and
//! diagnostics. Two drivers that reached the same state export identical
//! bytes, which makes the snapshot usable as a regression fixture.
//!
//! Format:
//! ```text
//! [header_len: u32 LE] [SnapshotHeader (postcard)] [Snapshot (postcard)]
//! ```

use crate::driver::Driver;
use crate::stage::StageKind;
use crate::table::AnyTable;
use crate::types::{Diagnostic, HostOutput, PipelineError};
use serde::{Deserialize, Serialize};

// =============================================================================
// FORMAT
// =============================================================================

/// Magic bytes of the snapshot format.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RPLX";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Maximum number of host outputs accepted on import.
pub const MAX_IMPORT_OUTPUT_COUNT: u64 = 1_000_000;

/// Maximum number of diagnostics accepted on import.
pub const MAX_IMPORT_DIAGNOSTIC_COUNT: u64 = 1_000_000;

/// Header of a snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub generation: u64,
    pub output_count: u64,
    pub diagnostic_count: u64,
    /// FNV-1a checksum of the snapshot body.
    pub checksum: u64,
}

impl SnapshotHeader {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(PipelineError::SerializationError("Invalid file format".to_string()));
        }
        if self.version != SNAPSHOT_VERSION {
            return Err(PipelineError::SerializationError("Unsupported file version".to_string()));
        }
        if self.output_count > MAX_IMPORT_OUTPUT_COUNT {
            return Err(PipelineError::SerializationError(format!(
                "Output count {} exceeds maximum allowed {}",
                self.output_count, MAX_IMPORT_OUTPUT_COUNT
            )));
        }
        if self.diagnostic_count > MAX_IMPORT_DIAGNOSTIC_COUNT {
            return Err(PipelineError::SerializationError(format!(
                "Diagnostic count {} exceeds maximum allowed {}",
                self.diagnostic_count, MAX_IMPORT_DIAGNOSTIC_COUNT
            )));
        }
        Ok(())
    }
}

/// Size of one stage table in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotStage {
    pub name: String,
    pub kind: StageKind,
    pub live_entries: u64,
    pub faults: u64,
}

/// The committed state of a driver in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub generation: u64,
    pub input_version: u64,
    /// Root inputs sorted by key.
    pub roots: Vec<(String, String)>,
    /// Stages in evaluation order.
    pub stages: Vec<SnapshotStage>,
    pub host_outputs: Vec<HostOutput>,
    pub diagnostics: Vec<Diagnostic>,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

struct Fnv(u64);

impl Fnv {
    fn bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 = (self.0 ^ u64::from(*byte)).wrapping_mul(FNV_PRIME);
        }
        // Length suffix keeps ("ab", "c") apart from ("a", "bc").
        self.number(bytes.len() as u64);
    }

    fn number(&mut self, n: u64) {
        for byte in n.to_le_bytes() {
            self.0 = (self.0 ^ u64::from(byte)).wrapping_mul(FNV_PRIME);
        }
    }
}

impl Snapshot {
    /// Capture the last completed generation of a driver.
    pub fn from_driver(driver: &Driver) -> Option<Self> {
        let report = driver.last_report()?;
        let roots = driver.committed_roots()?;
        let tables = driver.committed_tables()?;
        let pipeline = driver.pipeline();

        let stages = pipeline
            .topological_order()
            .filter_map(|id| {
                let table = tables.get(id.index())?;
                let counts = table.counts();
                Some(SnapshotStage {
                    name: pipeline.stage_name(id)?.to_string(),
                    kind: pipeline.stage_kind(id)?,
                    live_entries: (counts.added + counts.modified + counts.cached) as u64,
                    faults: table.fault_list().len() as u64,
                })
            })
            .collect();

        Some(Self {
            generation: report.generation,
            input_version: roots.version(),
            roots: roots
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            stages,
            host_outputs: report.outputs.host_outputs.clone(),
            diagnostics: report.outputs.diagnostics.clone(),
        })
    }

    /// Deterministic checksum of the snapshot content.
    ///
    /// Detects accidental corruption; it is not a cryptographic hash.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash = Fnv(FNV_OFFSET);
        hash.number(self.generation);
        hash.number(self.input_version);
        for (key, value) in &self.roots {
            hash.bytes(key.as_bytes());
            hash.bytes(value.as_bytes());
        }
        for stage in &self.stages {
            hash.bytes(stage.name.as_bytes());
            hash.number(stage.live_entries);
            hash.number(stage.faults);
        }
        for output in &self.host_outputs {
            hash.bytes(output.key.as_bytes());
            hash.bytes(output.value.as_bytes());
        }
        for diagnostic in &self.diagnostics {
            hash.bytes(diagnostic.stage.as_bytes());
            hash.bytes(diagnostic.message.as_bytes());
            for root in &diagnostic.roots {
                hash.bytes(root.as_bytes());
            }
        }
        hash.0
    }
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

fn no_generation() -> PipelineError {
    PipelineError::SerializationError("no completed generation to export".to_string())
}

/// Serialize the last completed generation of a driver.
pub fn export_snapshot(driver: &Driver) -> Result<Vec<u8>, PipelineError> {
    let snapshot = Snapshot::from_driver(driver).ok_or_else(no_generation)?;
    let header = SnapshotHeader {
        magic: SNAPSHOT_MAGIC,
        version: SNAPSHOT_VERSION,
        generation: snapshot.generation,
        output_count: snapshot.host_outputs.len() as u64,
        diagnostic_count: snapshot.diagnostics.len() as u64,
        checksum: snapshot.checksum(),
    };

    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| PipelineError::SerializationError(format!("Header: {}", e)))?;
    let data_bytes = postcard::to_allocvec(&snapshot)
        .map_err(|e| PipelineError::SerializationError(format!("Data: {}", e)))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Parse and verify a snapshot.
pub fn import_snapshot(data: &[u8]) -> Result<Snapshot, PipelineError> {
    let too_short = || PipelineError::SerializationError("Data too short".to_string());
    let len_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(too_short)?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_bytes = data.get(4..4 + header_len).ok_or_else(too_short)?;
    let body = data.get(4 + header_len..).ok_or_else(too_short)?;

    let header: SnapshotHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| PipelineError::SerializationError(format!("Header: {}", e)))?;
    header.validate()?;

    let snapshot: Snapshot = postcard::from_bytes(body)
        .map_err(|e| PipelineError::SerializationError(format!("Data: {}", e)))?;

    let computed = snapshot.checksum();
    if computed != header.checksum {
        return Err(PipelineError::SerializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }
    if snapshot.host_outputs.len() as u64 != header.output_count
        || snapshot.diagnostics.len() as u64 != header.diagnostic_count
        || snapshot.generation != header.generation
    {
        return Err(PipelineError::SerializationError(
            "Header does not match data".to_string(),
        ));
    }
    Ok(snapshot)
}

/// Checksum of the driver's committed state, if there is one.
pub fn snapshot_checksum(driver: &Driver) -> Option<u64> {
    Snapshot::from_driver(driver).map(|s| s.checksum())
}

/// BLAKE3 hash (hex) of the exported snapshot bytes.
#[cfg(feature = "crypto-hash")]
pub fn snapshot_crypto_hash(driver: &Driver) -> Result<String, PipelineError> {
    let data = export_snapshot(driver)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CancellationToken;
    use crate::graph::GraphBuilder;
    use crate::inputs::RootInputs;

    fn driver_with(pairs: &[(&str, &str)]) -> Driver {
        let mut graph = GraphBuilder::new();
        let roots = graph.roots();
        let lengths = graph.select("len", roots, |s: &String| s.len());
        graph.host_output("emit", lengths, |ctx, n: &usize| {
            let key = ctx.input_key().to_string();
            ctx.add_output(key, n.to_string());
            Ok(())
        });
        let mut driver = Driver::new(graph.build().expect("build"));
        let roots = RootInputs::from_pairs(pairs.iter().copied()).expect("roots");
        driver
            .run_generation(&roots, &CancellationToken::new())
            .expect("generation");
        driver
    }

    #[test]
    fn export_requires_a_generation() {
        let mut graph = GraphBuilder::new();
        graph.roots();
        let driver = Driver::new(graph.build().expect("build"));
        assert!(export_snapshot(&driver).is_err());
        assert_eq!(snapshot_checksum(&driver), None);
    }

    #[test]
    fn snapshot_roundtrip() {
        let driver = driver_with(&[("a", "xyz"), ("b", "")]);
        let bytes = export_snapshot(&driver).expect("export");
        let snapshot = import_snapshot(&bytes).expect("import");
        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.host_outputs, vec![HostOutput::new("a", "3"), HostOutput::new("b", "0")]);
        assert_eq!(snapshot.stages.len(), 3);
        assert_eq!(snapshot.stages[1].live_entries, 2);
    }

    #[test]
    fn export_is_bit_identical_across_drivers() {
        let a = driver_with(&[("a", "1"), ("b", "22")]);
        let b = driver_with(&[("b", "22"), ("a", "1")]);
        assert_eq!(
            export_snapshot(&a).expect("export"),
            export_snapshot(&b).expect("export")
        );
    }

    #[test]
    fn corruption_is_detected() {
        let driver = driver_with(&[("a", "hello")]);
        let mut bytes = export_snapshot(&driver).expect("export");
        if let Some(last) = bytes.last_mut() {
            *last ^= 0xFF;
        }
        assert!(import_snapshot(&bytes).is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let driver = driver_with(&[("a", "hello")]);
        let mut bytes = export_snapshot(&driver).expect("export");
        bytes[4] ^= 0xFF;
        assert!(import_snapshot(&bytes).is_err());
    }

    #[test]
    fn truncated_data_is_rejected() {
        assert!(import_snapshot(&[1, 0]).is_err());
        assert!(import_snapshot(&[200, 0, 0, 0, 1]).is_err());
    }
}
