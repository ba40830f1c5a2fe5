//! Assignment of theoretical fragments to observed peaks
use std::str::FromStr;

use itertools::Itertools;
use mzpeaks::Tolerance;
use thiserror::Error;
use tracing::{debug, trace};

use crate::peptide::Peptide;
use crate::spectrum::{IonAnnotation, Spectrum};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchConfigError {
    #[error("unknown tie-break mode '{0}', expected 'intensity' or 'mz'")]
    UnknownTieBreak(String),
    #[error("unknown tolerance unit in '{0}', expected 'ppm', 'da' or 'th'")]
    UnknownToleranceUnit(String),
    #[error("malformed tolerance magnitude in '{0}'")]
    MalformedTolerance(String),
}

/// How to resolve multiple candidate peaks inside the tolerance window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TieBreak {
    /// Keep the most intense candidate.
    #[default]
    MostIntense,
    /// Keep the candidate with the smallest m/z error.
    NearestMz,
}

impl FromStr for TieBreak {
    type Err = MatchConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "intensity" | "most-intense" => Ok(Self::MostIntense),
            "mz" | "nearest-mz" => Ok(Self::NearestMz),
            _ => Err(MatchConfigError::UnknownTieBreak(s.to_string())),
        }
    }
}

/// Parse a tolerance expression such as `10ppm`, `0.25da` or `0.25th` into
/// a [`Tolerance`]. Thomson and Dalton widths are interchangeable here.
pub fn parse_tolerance(s: &str) -> Result<Tolerance, MatchConfigError> {
    let lowered = s.trim().to_ascii_lowercase();
    let (magnitude, unit): (&str, fn(f64) -> Tolerance) =
        if let Some(prefix) = lowered.strip_suffix("ppm") {
            (prefix, Tolerance::PPM)
        } else if let Some(prefix) = lowered.strip_suffix("da") {
            (prefix, Tolerance::Da)
        } else if let Some(prefix) = lowered.strip_suffix("th") {
            (prefix, Tolerance::Da)
        } else {
            return Err(MatchConfigError::UnknownToleranceUnit(s.to_string()));
        };
    magnitude
        .trim()
        .parse::<f64>()
        .map(unit)
        .map_err(|_| MatchConfigError::MalformedTolerance(s.to_string()))
}

/// Matching policy for one labeling pass.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatchParams {
    /// Half-width tolerance, fixed (Th) or scaled by the fragment m/z (ppm).
    pub tolerance: Tolerance,
    /// Only this many most-intense peaks are candidates for labeling.
    pub top_n: usize,
    /// Optional m/z window candidates are clipped to.
    pub mz_window: Option<(f64, f64)>,
    pub tie_break: TieBreak,
    /// When false the matcher still records found-state on every fragment
    /// but writes no labels back onto the spectrum.
    pub write_labels: bool,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::PPM(10.0),
            top_n: 200,
            mz_window: None,
            tie_break: TieBreak::default(),
            write_labels: true,
        }
    }
}

/// Assign each theoretical fragment of `peptide` to the best observed peak
/// of `spectrum` under `params`.
///
/// Fragments are visited in catalog order. Whatever the labeling outcome,
/// a fragment whose tolerance window holds at least one eligible peak gets
/// its found-state set. Labels follow first-writer-wins, except that
/// neutral-loss fragments may co-label an already labeled peak.
pub fn label_peptide(peptide: &mut Peptide, spectrum: &mut Spectrum, params: &MatchParams) {
    let n = spectrum.ions.len();
    let mut candidates: Vec<usize> = if n > params.top_n {
        let mut keep: Vec<usize> = (0..n)
            .sorted_by(|&a, &b| {
                spectrum.ions[b]
                    .intensity
                    .total_cmp(&spectrum.ions[a].intensity)
            })
            .take(params.top_n)
            .collect();
        // back into ascending m/z order
        keep.sort_unstable();
        keep
    } else {
        (0..n).collect()
    };
    if let Some((low, high)) = params.mz_window {
        candidates.retain(|&i| {
            let mz = spectrum.ions[i].mz;
            low <= mz && mz <= high
        });
    }

    for fragment in peptide.fragments.iter_mut() {
        let (low, high) = params.tolerance.bounds(fragment.mz);
        let start = candidates.partition_point(|&i| spectrum.ions[i].mz < low);
        let stop = candidates.partition_point(|&i| spectrum.ions[i].mz <= high);
        if start == stop {
            continue;
        }

        let mut chosen = candidates[start];
        for &i in &candidates[start + 1..stop] {
            let better = match params.tie_break {
                TieBreak::MostIntense => {
                    spectrum.ions[i].intensity > spectrum.ions[chosen].intensity
                }
                TieBreak::NearestMz => {
                    (spectrum.ions[i].mz - fragment.mz).abs()
                        < (spectrum.ions[chosen].mz - fragment.mz).abs()
                }
            };
            if better {
                chosen = i;
            }
        }

        let ion = &mut spectrum.ions[chosen];
        fragment.found = true;
        fragment.found_mz = ion.mz;
        fragment.found_intensity = ion.intensity;
        trace!(
            "{} matched {:.4} -> {:.4}",
            fragment.label(),
            fragment.mz,
            ion.mz
        );

        if !(params.write_labels && fragment.include_label) {
            continue;
        }
        if !ion.is_labeled() {
            ion.annotations.push(IonAnnotation {
                text: fragment.label(),
                kind: fragment.kind,
                number: fragment.number,
            });
        } else if fragment.kind.is_nl() {
            debug!(
                "co-labeling {:.4} ({}) with {}",
                ion.mz,
                ion.annotations[0].text,
                fragment.label()
            );
            ion.annotations.push(IonAnnotation {
                text: fragment.label(),
                kind: fragment.kind,
                number: fragment.number,
            });
        }
        // an already labeled peak is never overwritten by a later
        // non-neutral-loss fragment
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ions::IonKind;
    use crate::masses::MonoisotopicTable;
    use crate::spectrum::PrecursorInfo;

    fn peptide(full: &str, charge: i32) -> Peptide {
        let table = MonoisotopicTable::for_citrullination();
        let mut peptide = Peptide::parse(full, charge, &table).unwrap();
        peptide.generate_fragments(1, 1);
        peptide
    }

    fn spectrum(points: &[(f64, f32)]) -> Spectrum {
        let mzs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let intensities: Vec<f32> = points.iter().map(|p| p.1).collect();
        Spectrum::from_arrays(&mzs, &intensities, PrecursorInfo::default())
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("intensity".parse::<TieBreak>().unwrap(), TieBreak::MostIntense);
        assert_eq!("mz".parse::<TieBreak>().unwrap(), TieBreak::NearestMz);
        assert!(matches!(
            "flux".parse::<TieBreak>(),
            Err(MatchConfigError::UnknownTieBreak(_))
        ));

        assert!(matches!(
            parse_tolerance("10ppm").unwrap(),
            Tolerance::PPM(v) if (v - 10.0).abs() < 1e-9
        ));
        assert!(matches!(
            parse_tolerance("0.25 da").unwrap(),
            Tolerance::Da(v) if (v - 0.25).abs() < 1e-9
        ));
        assert!(matches!(
            parse_tolerance("0.25Th").unwrap(),
            Tolerance::Da(v) if (v - 0.25).abs() < 1e-9
        ));
        assert!(matches!(
            parse_tolerance("0.25 mz"),
            Err(MatchConfigError::UnknownToleranceUnit(_))
        ));
        assert!(matches!(
            parse_tolerance("xppm"),
            Err(MatchConfigError::MalformedTolerance(_))
        ));
    }

    #[test]
    fn test_exact_match_sets_found_state() {
        let mut pep = peptide("PEPTIDE", 2);
        let y3 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 3)
            .unwrap()
            .mz;
        let mut spec = spectrum(&[(y3, 250.0), (y3 + 5.0, 80.0)]);

        label_peptide(&mut pep, &mut spec, &MatchParams::default());

        let y3 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 3)
            .unwrap();
        assert!(y3.found);
        assert!((y3.found_mz - y3.mz).abs() < 1e-6);
        assert!((y3.found_intensity - 250.0).abs() < 1e-6);
        assert_eq!(spec.labeled_ions().count(), 1);
        assert_eq!(spec.ions[0].annotations[0].text, "y3");

        for other in pep.fragments.iter().filter(|f| f.number != 3 || f.kind != IonKind::Y) {
            assert!(!other.found, "{}", other.label());
        }
    }

    #[test]
    fn test_no_peak_in_tolerance() {
        let mut pep = peptide("AAK", 1);
        let mut spec = spectrum(&[(50.0, 10.0), (1200.0, 10.0)]);
        label_peptide(&mut pep, &mut spec, &MatchParams::default());
        assert_eq!(pep.found_fragments().count(), 0);
        assert_eq!(spec.labeled_ions().count(), 0);
    }

    #[test]
    fn test_tie_break_modes() {
        let mut pep = peptide("PEPTIDE", 2);
        let b2 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::B && f.number == 2)
            .unwrap()
            .mz;
        // Two candidates inside a wide window: nearer one is weaker.
        let points = [(b2 + 0.02, 40.0), (b2 + 0.10, 400.0)];

        let mut params = MatchParams {
            tolerance: Tolerance::Da(0.25),
            ..Default::default()
        };
        let mut spec = spectrum(&points);
        label_peptide(&mut pep, &mut spec, &params);
        let frag = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::B && f.number == 2)
            .unwrap();
        assert!((frag.found_mz - (b2 + 0.10)).abs() < 1e-6);

        params.tie_break = TieBreak::NearestMz;
        let mut pep = peptide("PEPTIDE", 2);
        let mut spec = spectrum(&points);
        label_peptide(&mut pep, &mut spec, &params);
        let frag = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::B && f.number == 2)
            .unwrap();
        assert!((frag.found_mz - (b2 + 0.02)).abs() < 1e-6);
    }

    #[test]
    fn test_top_n_suppresses_noise() {
        let mut pep = peptide("PEPTIDE", 2);
        let y2 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 2)
            .unwrap()
            .mz;
        // The matching peak is the weakest of three.
        let mut spec = spectrum(&[(150.0, 500.0), (900.0, 400.0), (y2, 5.0)]);
        let params = MatchParams {
            top_n: 2,
            ..Default::default()
        };
        label_peptide(&mut pep, &mut spec, &params);
        assert!(!pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 2)
            .unwrap()
            .found);
    }

    #[test]
    fn test_mz_window_clips_candidates() {
        let mut pep = peptide("PEPTIDE", 2);
        let b2 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::B && f.number == 2)
            .unwrap()
            .mz;
        let mut spec = spectrum(&[(b2, 100.0)]);
        let params = MatchParams {
            mz_window: Some((300.0, 2000.0)),
            ..Default::default()
        };
        label_peptide(&mut pep, &mut spec, &params);
        // b2 of PEPTIDE sits near 227 Th, outside the window.
        assert!(!pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::B && f.number == 2)
            .unwrap()
            .found);
    }

    #[test]
    fn test_first_writer_wins_and_nl_colabels() {
        let table = MonoisotopicTable::for_citrullination();
        let mut pep = Peptide::parse("AR*K", 1, &table).unwrap();
        pep.generate_fragments(1, 1);
        pep.add_neutral_loss(43.0058, false);

        // Place one peak exactly on y2 and a second exactly on the y2
        // neutral-loss variant so both fragments match something.
        let y2 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 2)
            .unwrap()
            .mz;
        let y2_nl = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::YNl && f.number == 2)
            .unwrap()
            .mz;
        let mut spec = spectrum(&[(y2, 100.0), (y2_nl, 90.0)]);
        let params = MatchParams {
            tolerance: Tolerance::Da(0.01),
            ..Default::default()
        };
        label_peptide(&mut pep, &mut spec, &params);

        let labels: Vec<String> = spec
            .labeled_ions()
            .flat_map(|ion| ion.annotations.iter().map(|a| a.text.clone()))
            .collect();
        assert!(labels.contains(&"y2*".to_string()));
        assert!(labels.contains(&"y2*-43.0058".to_string()));
    }

    #[test_log::test]
    fn test_conflicts_on_a_shared_peak() {
        let table = MonoisotopicTable::for_citrullination();
        let mut pep = Peptide::parse("AR*K", 1, &table).unwrap();
        pep.generate_fragments(1, 1);
        pep.add_neutral_loss(43.0058, false);

        let y2 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 2)
            .unwrap()
            .mz;
        // Force a neutral-loss variant and a later base fragment onto the
        // same coordinate as y2 so all three claim one peak.
        for fragment in pep.fragments.iter_mut() {
            if fragment.kind == IonKind::YNl && fragment.number == 2 {
                fragment.mz = y2;
            }
            if fragment.kind == IonKind::B && fragment.number == 2 {
                fragment.mz = y2;
            }
        }
        let mut spec = spectrum(&[(y2, 100.0)]);
        let params = MatchParams {
            tolerance: Tolerance::Da(0.01),
            ..Default::default()
        };
        label_peptide(&mut pep, &mut spec, &params);

        // y2 writes first, the neutral-loss variant co-labels, and the
        // displaced b2 does not overwrite; everything is still found.
        let texts: Vec<&str> = spec.ions[0]
            .annotations
            .iter()
            .map(|a| a.text.as_str())
            .collect();
        assert_eq!(texts[0], "y2*");
        assert!(texts.contains(&"y2*-43.0058"));
        assert!(!texts.iter().any(|t| t.starts_with('b')));
        let b2 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::B && f.number == 2)
            .unwrap();
        assert!(b2.found);
        assert!((b2.found_intensity - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_label_writing_disabled_still_tracks_matches() {
        let mut pep = peptide("PEPTIDE", 2);
        let y4 = pep
            .fragments
            .iter()
            .find(|f| f.kind == IonKind::Y && f.number == 4)
            .unwrap()
            .mz;
        let mut spec = spectrum(&[(y4, 75.0)]);
        let params = MatchParams {
            write_labels: false,
            ..Default::default()
        };
        label_peptide(&mut pep, &mut spec, &params);
        assert_eq!(pep.found_fragments().count(), 1);
        assert_eq!(spec.labeled_ions().count(), 0);
    }
}
