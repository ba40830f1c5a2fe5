//! Observed MS2 spectra as seen by the matcher
use mzpeaks::{CentroidPeak, CoordinateLike, IntensityMeasurement, MZ};

use crate::ions::IonKind;

/// Identity and precursor metadata for the scan a spectrum came from.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrecursorInfo {
    pub file: String,
    pub scan_number: usize,
    pub charge: i32,
    pub retention_time: f64,
    pub mz: f64,
}

/// A label the matcher assigned to an observed ion.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IonAnnotation {
    pub text: String,
    pub kind: IonKind,
    pub number: usize,
}

/// One observed (m/z, intensity) pair. The first annotation is the primary
/// label; later entries are neutral-loss co-labels.
#[derive(Debug, Default, Clone, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObservedIon {
    pub mz: f64,
    pub intensity: f32,
    pub annotations: Vec<IonAnnotation>,
}

impl ObservedIon {
    pub fn new(mz: f64, intensity: f32) -> Self {
        Self {
            mz,
            intensity,
            annotations: Vec::new(),
        }
    }

    pub fn is_labeled(&self) -> bool {
        !self.annotations.is_empty()
    }
}

impl From<CentroidPeak> for ObservedIon {
    fn from(peak: CentroidPeak) -> Self {
        Self::new(peak.mz, peak.intensity)
    }
}

impl CoordinateLike<MZ> for ObservedIon {
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for ObservedIon {
    fn intensity(&self) -> f32 {
        self.intensity
    }
}

/// The peak list for one scan, held in ascending m/z order.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Spectrum {
    pub ions: Vec<ObservedIon>,
    pub precursor: PrecursorInfo,
}

impl Spectrum {
    pub fn new(mut ions: Vec<ObservedIon>, precursor: PrecursorInfo) -> Self {
        ions.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        Self { ions, precursor }
    }

    /// Build a spectrum from parallel m/z and intensity arrays.
    pub fn from_arrays(mzs: &[f64], intensities: &[f32], precursor: PrecursorInfo) -> Self {
        let ions = mzs
            .iter()
            .zip(intensities.iter())
            .map(|(mz, intensity)| ObservedIon::new(*mz, *intensity))
            .collect();
        Self::new(ions, precursor)
    }

    pub fn len(&self) -> usize {
        self.ions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ions.is_empty()
    }

    /// Iterate the ions the matcher labeled.
    pub fn labeled_ions(&self) -> impl Iterator<Item = &ObservedIon> {
        self.ions.iter().filter(|ion| ion.is_labeled())
    }

    /// Summed intensity, used for relative annotation reporting.
    pub fn total_ion_current(&self) -> f32 {
        self.ions.iter().map(|ion| ion.intensity).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sorted_on_construction() {
        let spectrum = Spectrum::from_arrays(
            &[500.0, 100.0, 300.0],
            &[1.0, 2.0, 3.0],
            PrecursorInfo::default(),
        );
        let mzs: Vec<f64> = spectrum.ions.iter().map(|i| i.mz).collect();
        assert_eq!(mzs, vec![100.0, 300.0, 500.0]);
        assert_eq!(spectrum.len(), 3);
        assert!((spectrum.total_ion_current() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_coordinate_traits() {
        let ion = ObservedIon::new(244.1656, 1200.0);
        assert!((CoordinateLike::<MZ>::coordinate(&ion) - 244.1656).abs() < 1e-9);
        assert!((IntensityMeasurement::intensity(&ion) - 1200.0).abs() < 1e-6);
    }
}
