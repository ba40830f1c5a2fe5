//! Per-site evidence buckets and the confidence decision
use std::cmp;
use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::ions::FragmentIon;
use crate::peptide::Peptide;

/// The closed set of evidence classes a matched fragment lands in.
///
/// Every matched fragment is recorded under [`IonClass::Frag`] plus exactly
/// one of the other classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IonClass {
    /// Any matched fragment.
    Frag,
    /// Determining: conclusive evidence for the site.
    Det,
    /// Ambiguous: consistent with the site without proving it.
    Amb,
    /// Determining neutral-loss ion.
    DetNl,
    /// Artifact neutral-loss ion; presumed chemical noise.
    ArtNl,
}

impl IonClass {
    /// Every class, in reporting order.
    pub const ALL: [IonClass; 5] = [
        IonClass::Frag,
        IonClass::Det,
        IonClass::Amb,
        IonClass::DetNl,
        IonClass::ArtNl,
    ];
}

impl fmt::Display for IonClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IonClass::Frag => write!(f, "frag"),
            IonClass::Det => write!(f, "det"),
            IonClass::Amb => write!(f, "amb"),
            IonClass::DetNl => write!(f, "detNL"),
            IonClass::ArtNl => write!(f, "artNL"),
        }
    }
}

/// The verdict for one modification site, ordered weakest to strongest so
/// that consolidation can take the minimum.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Confidence {
    #[default]
    False,
    Ambiguous,
    Likely,
    True,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::False => write!(f, "false"),
            Confidence::Ambiguous => write!(f, "ambiguous"),
            Confidence::Likely => write!(f, "likely"),
            Confidence::True => write!(f, "true"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot consolidate evidence for different peptides ('{left}' vs '{right}')")]
pub struct ConsolidationError {
    pub left: String,
    pub right: String,
}

/// Evidence collected for one (peptide, modification site) pair.
///
/// Each class holds a label-keyed intensity map; keying on the label is
/// what deduplicates repeated observations of the same ion.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiteEvidence {
    /// Identity used to merge several per-site results for one peptide.
    pub peptide_id: String,
    /// Index of the originating scan in the batch-owned scan list.
    pub scan_index: usize,
    /// 0-based index of the modification site under scrutiny.
    pub site: usize,
    /// Protein-coordinate residue label, when a sequence provider knows it.
    pub site_label: Option<String>,
    pub confidence: Confidence,
    pub classes: BTreeMap<IonClass, BTreeMap<String, f32>>,
}

impl SiteEvidence {
    pub fn new(peptide_id: impl Into<String>, scan_index: usize, site: usize) -> Self {
        Self {
            peptide_id: peptide_id.into(),
            scan_index,
            site,
            site_label: None,
            confidence: Confidence::False,
            classes: BTreeMap::new(),
        }
    }

    fn insert(&mut self, class: IonClass, label: &str, intensity: f32) {
        self.classes
            .entry(class)
            .or_default()
            .entry(label.to_string())
            .or_insert(intensity);
    }

    /// Number of distinct ions recorded under `class`.
    pub fn class_len(&self, class: IonClass) -> usize {
        self.classes.get(&class).map_or(0, BTreeMap::len)
    }

    fn class_intensities(&self, class: IonClass) -> impl Iterator<Item = f32> + '_ {
        self.classes
            .get(&class)
            .into_iter()
            .flat_map(|map| map.values().copied())
    }

    /// Record a matched fragment for a peptide with no modification sites:
    /// it counts as matched evidence but no site-relative class applies.
    pub fn record_unsited(&mut self, fragment: &FragmentIon) {
        if !fragment.found {
            return;
        }
        self.insert(IonClass::Frag, &fragment.label(), fragment.found_intensity);
    }

    /// Record one matched fragment against this site.
    ///
    /// The fragment always lands in [`IonClass::Frag`]; the second class
    /// depends on whether its span covers the site, whether it carries a
    /// neutral loss, and whether its sequence could explain the evidence
    /// some other way (`ambiguous_residues`).
    pub fn add_match(
        &mut self,
        fragment: &FragmentIon,
        peptide: &Peptide,
        ambiguous_residues: &str,
    ) {
        if !fragment.found {
            return;
        }
        let label = fragment.label();
        let intensity = fragment.found_intensity;
        self.insert(IonClass::Frag, &label, intensity);

        let total_mods = peptide.n_mods();
        let class = if fragment.contains(self.site) {
            if fragment.kind.is_nl() {
                if fragment.num_nl as usize == total_mods {
                    IonClass::DetNl
                } else {
                    IonClass::Amb
                }
            } else if peptide
                .span_sequence(fragment.span)
                .chars()
                .any(|residue| ambiguous_residues.contains(residue))
            {
                IonClass::Amb
            } else {
                IonClass::Det
            }
        } else if fragment.kind.is_nl() {
            if total_mods > 0 && fragment.num_nl as usize <= total_mods {
                IonClass::Amb
            } else {
                // loss unexplained by any modification the fragment spans
                IonClass::ArtNl
            }
        } else {
            IonClass::Amb
        };
        self.insert(class, &label, intensity);
    }

    /// Find the smallest intensity cutoff keeping the artifact fraction at
    /// or below `target_fraction`.
    ///
    /// Candidates are the artifact intensities in ascending order behind a
    /// zero sentinel; for each, the fraction is the artifact intensity sum
    /// over the intensity sum of every class but [`IonClass::Frag`], both
    /// restricted to entries strictly above the candidate. `None` means no
    /// candidate satisfied the target: everything is kept and a warning is
    /// emitted.
    pub fn intensity_cutoff(&self, target_fraction: f32) -> Option<f32> {
        let mut candidates: Vec<f32> = Vec::new();
        candidates.push(0.0);
        candidates.extend(self.class_intensities(IonClass::ArtNl));
        candidates.sort_by(f32::total_cmp);

        for cutoff in candidates {
            let artifact: f32 = self
                .class_intensities(IonClass::ArtNl)
                .filter(|&i| i > cutoff)
                .sum();
            let all: f32 = IonClass::ALL
                .iter()
                .filter(|&&class| class != IonClass::Frag)
                .flat_map(|&class| self.class_intensities(class))
                .filter(|&i| i > cutoff)
                .sum();
            if all == 0.0 || artifact / all <= target_fraction {
                return Some(cutoff);
            }
        }
        warn!(
            "no intensity cutoff reaches an artifact fraction of {target_fraction} \
             for {}; keeping all ions",
            self.peptide_id
        );
        None
    }

    /// Drop every entry with intensity at or below `cutoff`, in all classes.
    pub fn remove_below(&mut self, cutoff: f32) {
        for map in self.classes.values_mut() {
            map.retain(|_, &mut intensity| intensity > cutoff);
        }
    }

    /// Evaluate the confidence state machine top-down and store the verdict.
    ///
    /// `mod_locs` and `sequence_len` describe the peptide; a C-terminal
    /// modification site is rejected outright unless `include_cterm_mod`.
    pub fn decide_confidence(
        &mut self,
        mod_locs: &[usize],
        sequence_len: usize,
        include_cterm_mod: bool,
    ) -> Confidence {
        let cterm_site = mod_locs.last() == Some(&(sequence_len - 1));
        self.confidence = if mod_locs.is_empty() || (!include_cterm_mod && cterm_site) {
            Confidence::False
        } else if self.class_len(IonClass::DetNl) >= 2 {
            Confidence::True
        } else if self.class_len(IonClass::DetNl) >= 1 || self.class_len(IonClass::Det) >= 1 {
            Confidence::Likely
        } else if self.class_len(IonClass::Amb) >= 1 {
            Confidence::Ambiguous
        } else {
            Confidence::False
        };
        self.confidence
    }

    /// Merge two per-site results for the same peptide into one aggregate:
    /// the weaker verdict wins and the class maps take their label union.
    pub fn consolidate(mut self, other: SiteEvidence) -> Result<SiteEvidence, ConsolidationError> {
        if self.peptide_id != other.peptide_id {
            return Err(ConsolidationError {
                left: self.peptide_id,
                right: other.peptide_id,
            });
        }
        self.confidence = cmp::min(self.confidence, other.confidence);
        self.site = cmp::min(self.site, other.site);
        self.site_label = match (self.site_label.take(), other.site_label) {
            (Some(a), Some(b)) if a != b => Some(format!("{a};{b}")),
            (Some(a), _) => Some(a),
            (None, b) => b,
        };
        for (class, map) in other.classes {
            let target = self.classes.entry(class).or_default();
            for (label, intensity) in map {
                target.entry(label).or_insert(intensity);
            }
        }
        Ok(self)
    }
}
