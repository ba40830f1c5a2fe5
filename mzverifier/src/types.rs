//! Input and output records for batch runs
use serde::{Deserialize, Serialize};

use mzverify::evidence::SiteEvidence;
use mzverify::peptide::Peptide;
use mzverify::solution::SiteReport;

use crate::progress::ProgressRecord;

/// One identified scan as delivered by the upstream search, with the
/// fields this core consumes. Precursor fields left `None` by the caller
/// are resolved from the fetched spectrum during the batch.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub sample_name: String,
    /// Stripped peptide sequence.
    pub sequence: String,
    /// Annotated sequence carrying dynamic modification symbols.
    pub full_sequence: String,
    pub charge: i32,
    pub precursor_file: String,
    pub scan_number: usize,
    pub parent_protein_id: String,
    #[serde(default)]
    pub retention_time: Option<f64>,
    #[serde(default)]
    pub precursor_mz: Option<f64>,
}

impl Scan {
    /// Identity used to merge per-site evidence rows of the same peptide.
    pub fn peptide_id(&self) -> String {
        format!("{}/{}", self.full_sequence, self.charge)
    }
}

/// The verification outcome for one non-skipped scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// Index of the originating scan in [`BatchOutput::scans`].
    pub scan_index: usize,
    pub peptide: Peptide,
    /// One evidence row per modification site.
    pub sites: Vec<SiteEvidence>,
    /// The per-peptide aggregate, when roll-up was requested and the
    /// peptide carries more than one site.
    pub rolled_up: Option<SiteEvidence>,
}

/// Everything a finished batch hands back to the caller.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchOutput {
    /// All input scans in chunk-major order, skipped ones included.
    pub scans: Vec<Scan>,
    pub results: Vec<ScanResult>,
    pub progress: ProgressRecord,
}

impl BatchOutput {
    /// Flatten results into sink-ready rows, one per evidence row.
    pub fn reports(&self) -> Vec<SiteReport> {
        let mut reports = Vec::new();
        for result in &self.results {
            let scan = &self.scans[result.scan_index];
            let rows = result
                .sites
                .iter()
                .chain(result.rolled_up.as_ref());
            for evidence in rows {
                let mut report = SiteReport::from_evidence(evidence);
                report.sample_name = scan.sample_name.clone();
                report.precursor_file = scan.precursor_file.clone();
                report.scan_number = scan.scan_number;
                report.sequence = scan.sequence.clone();
                report.full_sequence = scan.full_sequence.clone();
                report.charge = scan.charge;
                report.protein_id = scan.parent_protein_id.clone();
                reports.push(report);
            }
        }
        reports
    }
}
