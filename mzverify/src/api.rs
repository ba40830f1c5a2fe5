//! * High level API for running site verification on single scans
use crate::evidence::SiteEvidence;
use crate::masses::{ResidueMasses, HNCO};
use crate::matching::{label_peptide, MatchParams};
use crate::peptide::{Peptide, PeptideError};
use crate::spectrum::Spectrum;

/// Classification policy applied after matching.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClassifyParams {
    /// Residues that can explain the evidence isobarically (deamidated
    /// asparagine/glutamine mimic citrulline's mass shift).
    pub ambiguous_residues: String,
    /// Target artifact fraction for the intensity cutoff.
    pub target_artifact_fraction: f32,
    /// Whether a site on the final residue may still be scored.
    pub include_cterm_mod: bool,
}

impl Default for ClassifyParams {
    fn default() -> Self {
        Self {
            ambiguous_residues: "NQ".to_string(),
            target_artifact_fraction: 0.01,
            include_cterm_mod: false,
        }
    }
}

/// The per-scan verification pipeline with its parameters bound once.
///
/// Holds everything needed to turn an annotated sequence plus an observed
/// spectrum into per-site evidence: fragment charge policy, the neutral
/// loss under scrutiny, the matching tolerance, and the classification
/// policy. Reused across scans; construction is cheap but keeping one
/// engine per run keeps configuration in a single place.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VerificationEngine {
    pub match_params: MatchParams,
    pub classify_params: ClassifyParams,
    pub min_fragment_charge: i32,
    /// Upper bound on fragment charge; the per-scan range is further capped
    /// below the precursor charge.
    pub max_fragment_charge: i32,
    /// The diagnostic neutral loss to expand the catalog with, if any.
    pub neutral_loss: Option<f64>,
    /// Force labels onto chemically unexplainable loss variants too, for
    /// debugging and visualization runs.
    pub label_artifacts: bool,
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self {
            match_params: MatchParams::default(),
            classify_params: ClassifyParams::default(),
            min_fragment_charge: 1,
            max_fragment_charge: 2,
            neutral_loss: Some(HNCO),
            label_artifacts: false,
        }
    }
}

impl VerificationEngine {
    pub fn new(match_params: MatchParams, classify_params: ClassifyParams) -> Self {
        Self {
            match_params,
            classify_params,
            ..Default::default()
        }
    }

    /// Fragment charges considered for a precursor of charge `charge`.
    fn fragment_charge_range(&self, charge: i32) -> (i32, i32) {
        let cap = (charge - 1).max(1).min(self.max_fragment_charge);
        (self.min_fragment_charge, cap.max(self.min_fragment_charge))
    }

    /// Parse an annotated sequence and build its full fragment catalog.
    pub fn build_peptide(
        &self,
        full_sequence: &str,
        charge: i32,
        masses: &impl ResidueMasses,
    ) -> Result<Peptide, PeptideError> {
        let mut peptide = Peptide::parse(full_sequence, charge, masses)?;
        let (min_charge, max_charge) = self.fragment_charge_range(charge);
        peptide.generate_fragments(min_charge, max_charge);
        if let Some(loss) = self.neutral_loss {
            peptide.add_neutral_loss(loss, self.label_artifacts);
        }
        Ok(peptide)
    }

    /// Assign theoretical fragments to observed peaks, annotating both.
    pub fn match_spectrum(&self, peptide: &mut Peptide, spectrum: &mut Spectrum) {
        label_peptide(peptide, spectrum, &self.match_params);
    }

    /// Classify the matched fragments of `peptide` against each of its
    /// modification sites: bucket, de-noise, decide.
    ///
    /// An unmodified peptide still yields one row so every scan shows up in
    /// the output: matched fragments are recorded, the verdict is `False`,
    /// and no site-relative class can be populated.
    pub fn classify(
        &self,
        peptide: &Peptide,
        peptide_id: &str,
        scan_index: usize,
    ) -> Vec<SiteEvidence> {
        if peptide.mod_locs.is_empty() {
            let mut evidence = SiteEvidence::new(peptide_id, scan_index, 0);
            for fragment in peptide.found_fragments() {
                evidence.record_unsited(fragment);
            }
            evidence.decide_confidence(
                &peptide.mod_locs,
                peptide.len(),
                self.classify_params.include_cterm_mod,
            );
            return vec![evidence];
        }
        let mut sites = Vec::with_capacity(peptide.mod_locs.len());
        for &site in &peptide.mod_locs {
            let mut evidence = SiteEvidence::new(peptide_id, scan_index, site);
            for fragment in peptide.found_fragments() {
                evidence.add_match(
                    fragment,
                    peptide,
                    &self.classify_params.ambiguous_residues,
                );
            }
            if let Some(cutoff) =
                evidence.intensity_cutoff(self.classify_params.target_artifact_fraction)
            {
                evidence.remove_below(cutoff);
            }
            evidence.decide_confidence(
                &peptide.mod_locs,
                peptide.len(),
                self.classify_params.include_cterm_mod,
            );
            sites.push(evidence);
        }
        sites
    }

    /// One-shot convenience: build, match, and classify a single scan.
    pub fn verify(
        &self,
        full_sequence: &str,
        charge: i32,
        masses: &impl ResidueMasses,
        spectrum: &mut Spectrum,
    ) -> Result<(Peptide, Vec<SiteEvidence>), PeptideError> {
        let mut peptide = self.build_peptide(full_sequence, charge, masses)?;
        self.match_spectrum(&mut peptide, spectrum);
        let id = format!("{full_sequence}/{charge}");
        let sites = self.classify(&peptide, &id, 0);
        Ok((peptide, sites))
    }
}
