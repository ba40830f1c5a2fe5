//! Peptides and theoretical fragment catalog generation
use std::fmt;

use thiserror::Error;

use crate::ions::{FragmentIon, IonKind};
use crate::masses::{ResidueMasses, PROTON, WATER};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeptideError {
    #[error("empty peptide sequence")]
    Empty,
    #[error("unknown residue '{0}'")]
    UnknownResidue(char),
    #[error("unknown modification symbol '{0}'")]
    UnknownModification(char),
    #[error("modification symbol '{0}' precedes any residue")]
    DanglingModification(char),
    #[error("invalid precursor charge {0}")]
    InvalidCharge(i32),
}

/// One residue of a peptide with its accumulated modification state.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Residue {
    pub symbol: char,
    /// Base monoisotopic mass plus any static modification from the table.
    pub mass: f64,
    /// Accumulated dynamic modification delta; `0` when unmodified.
    pub mod_mass: f64,
    pub mod_symbol: Option<char>,
}

impl Residue {
    /// The mass this residue contributes to a fragment span.
    pub fn total_mass(&self) -> f64 {
        self.mass + self.mod_mass
    }

    pub fn is_modified(&self) -> bool {
        self.mod_symbol.is_some()
    }
}

/// A peptide identified for one scan, carrying its theoretical fragment
/// catalog. Built once per scan, annotated in place by the matcher, and
/// consumed by evidence classification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peptide {
    /// The stripped residue sequence.
    pub sequence: String,
    /// The annotated sequence the peptide was parsed from.
    pub full_sequence: String,
    /// Precursor charge state.
    pub charge: i32,
    pub residues: Vec<Residue>,
    /// 0-based indices of dynamically modified residues, ascending.
    pub mod_locs: Vec<usize>,
    pub fragments: Vec<FragmentIon>,
}

impl Peptide {
    /// Parse an annotated sequence such as `ACDR*EF` where a registered
    /// dynamic modification symbol follows the residue it sits on.
    pub fn parse(
        full_sequence: &str,
        charge: i32,
        masses: &impl ResidueMasses,
    ) -> Result<Peptide, PeptideError> {
        if charge < 1 {
            return Err(PeptideError::InvalidCharge(charge));
        }
        let mut residues: Vec<Residue> = Vec::with_capacity(full_sequence.len());
        let mut mod_locs = Vec::new();
        for symbol in full_sequence.chars() {
            if symbol.is_ascii_alphabetic() {
                let mass = masses
                    .residue_mass(symbol)
                    .ok_or(PeptideError::UnknownResidue(symbol))?;
                residues.push(Residue {
                    symbol,
                    mass,
                    mod_mass: 0.0,
                    mod_symbol: None,
                });
            } else {
                let delta = masses
                    .modification_mass(symbol)
                    .ok_or(PeptideError::UnknownModification(symbol))?;
                let index = residues.len().checked_sub(1)
                    .ok_or(PeptideError::DanglingModification(symbol))?;
                let residue = &mut residues[index];
                residue.mod_mass += delta;
                residue.mod_symbol = Some(symbol);
                if mod_locs.last() != Some(&index) {
                    mod_locs.push(index);
                }
            }
        }
        if residues.is_empty() {
            return Err(PeptideError::Empty);
        }
        Ok(Peptide {
            sequence: residues.iter().map(|r| r.symbol).collect(),
            full_sequence: full_sequence.to_string(),
            charge,
            residues,
            mod_locs,
            fragments: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Total number of dynamically modified residues.
    pub fn n_mods(&self) -> usize {
        self.mod_locs.len()
    }

    /// The stripped sequence slice a fragment span covers.
    pub fn span_sequence(&self, span: (usize, usize)) -> &str {
        &self.sequence[span.0..=span.1]
    }

    fn span_mass(&self, span: (usize, usize)) -> f64 {
        self.residues[span.0..=span.1]
            .iter()
            .map(Residue::total_mass)
            .sum()
    }

    fn span_mod_symbols(&self, span: (usize, usize)) -> String {
        self.residues[span.0..=span.1]
            .iter()
            .filter_map(|r| r.mod_symbol)
            .collect()
    }

    /// Count of modified residues inside a span.
    pub fn mods_in_span(&self, span: (usize, usize)) -> usize {
        self.mod_locs
            .iter()
            .filter(|&&loc| span.0 <= loc && loc <= span.1)
            .count()
    }

    /// Rebuild the fragment catalog for each charge in
    /// `[min_charge, max_charge]`: the parent ion spanning the whole
    /// sequence, then b/y pairs for every internal split point.
    ///
    /// A span that carries the C-terminus gains the terminal water once;
    /// m/z is `(neutral + z * PROTON) / z`.
    pub fn generate_fragments(&mut self, min_charge: i32, max_charge: i32) {
        let length = self.len();
        self.fragments.clear();
        for charge in min_charge..=max_charge {
            let z = f64::from(charge);
            let whole = (0, length - 1);
            let parent_mass = self.span_mass(whole) + WATER;
            let mut parent = FragmentIon::new(
                IonKind::M,
                0,
                charge,
                (parent_mass + z * PROTON) / z,
                whole,
            );
            parent.mod_symbols = self.span_mod_symbols(whole);
            self.fragments.push(parent);

            for split in 1..length {
                let b_span = (0, split - 1);
                let mut b = FragmentIon::new(
                    IonKind::B,
                    split,
                    charge,
                    (self.span_mass(b_span) + z * PROTON) / z,
                    b_span,
                );
                b.mod_symbols = self.span_mod_symbols(b_span);
                self.fragments.push(b);

                let y_span = (split, length - 1);
                let mut y = FragmentIon::new(
                    IonKind::Y,
                    length - split,
                    charge,
                    (self.span_mass(y_span) + WATER + z * PROTON) / z,
                    y_span,
                );
                y.mod_symbols = self.span_mod_symbols(y_span);
                self.fragments.push(y);
            }
        }
    }

    /// Expand the catalog with neutral-loss variants of every base
    /// fragment, one per loss multiplicity `1..=n_mods`.
    ///
    /// A variant is marked for labeling only when its span contains exactly
    /// as many modified residues as losses it carries; `label_artifacts`
    /// overrides that for debugging and visualization runs.
    pub fn add_neutral_loss(&mut self, loss_mass: f64, label_artifacts: bool) {
        let n_mods = self.n_mods() as u32;
        let base_count = self.fragments.len();
        for index in 0..base_count {
            if self.fragments[index].kind.is_nl() {
                continue;
            }
            for multiplicity in 1..=n_mods {
                let mut variant = self.fragments[index].clone();
                variant.kind = variant.kind.nl_counterpart();
                variant.num_nl = multiplicity;
                variant.nl_mass = loss_mass;
                variant.mz -= f64::from(multiplicity) * loss_mass / f64::from(variant.charge);
                let explained = self.mods_in_span(variant.span) == multiplicity as usize;
                variant.include_label = explained || label_artifacts;
                self.fragments.push(variant);
            }
        }
    }

    /// Iterate the fragments the matcher assigned to observed peaks.
    pub fn found_fragments(&self) -> impl Iterator<Item = &FragmentIon> {
        self.fragments.iter().filter(|f| f.found)
    }
}

impl fmt::Display for Peptide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}+)", self.full_sequence, self.charge)?;
        for fragment in &self.fragments {
            writeln!(f, "  {fragment}")?;
        }
        Ok(())
    }
}
