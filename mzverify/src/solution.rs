//! The per-site result row handed to output sinks
use std::collections::BTreeMap;
use std::fmt;

use crate::evidence::{Confidence, IonClass, SiteEvidence};

/// One verified modification site with the identifying fields of its scan,
/// flattened for whatever serialized layout the caller owns.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteReport {
    pub sample_name: String,
    pub precursor_file: String,
    pub scan_number: usize,
    pub sequence: String,
    pub full_sequence: String,
    pub charge: i32,
    pub protein_id: String,
    /// 0-based residue index of the site within the peptide.
    pub site: usize,
    /// Protein-coordinate residue label, when known (e.g. `R141`).
    pub site_label: Option<String>,
    pub confidence: Confidence,
    /// Label-keyed intensities per evidence class.
    pub ions: BTreeMap<IonClass, BTreeMap<String, f32>>,
}

impl SiteReport {
    /// Collect the labels recorded under `class`, in label order.
    pub fn labels(&self, class: IonClass) -> Vec<&str> {
        self.ions
            .get(&class)
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn from_evidence(evidence: &SiteEvidence) -> Self {
        Self {
            site: evidence.site,
            site_label: evidence.site_label.clone(),
            confidence: evidence.confidence,
            ions: evidence.classes.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Display for SiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} scan {} site {} -> {}",
            self.full_sequence, self.charge, self.scan_number, self.site, self.confidence
        )
    }
}
