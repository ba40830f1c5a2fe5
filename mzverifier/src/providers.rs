//! Collaborator contracts the batch driver consumes
use std::collections::HashMap;

use thiserror::Error;

use mzverify::masses::MonoisotopicTable;
use mzverify::spectrum::Spectrum;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MassTableError(pub String);

/// Retrieves the peak list for a (file, scan number) pair. Implementations
/// wrap whatever MS2/mzXML/mzML decoders the caller uses; a worker blocks
/// on this call while a scan is read.
pub trait SpectrumProvider: Send + Sync {
    fn get_scan(&self, file: &str, scan_number: usize) -> Option<Spectrum>;
}

/// Derives the residue mass table for one sample, static and dynamic
/// modifications already applied. Called only when a worker crosses a
/// sample boundary in its chunk.
pub trait MassTableSource: Send + Sync {
    fn table_for(&self, sample_name: &str) -> Result<MonoisotopicTable, MassTableError>;
}

/// Maps a peptide-relative modification site onto protein coordinates for
/// output annotation. Never influences classification.
pub trait ProteinSequenceProvider {
    fn resolve_modified_residue(
        &self,
        protein_id: &str,
        peptide_sequence: &str,
        mod_location: usize,
    ) -> Option<String>;
}

/// An in-memory [`SpectrumProvider`], used by tests and embedders that
/// already decoded their spectra.
#[derive(Debug, Default, Clone)]
pub struct InMemorySpectra {
    spectra: HashMap<(String, usize), Spectrum>,
}

impl InMemorySpectra {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: impl Into<String>, scan_number: usize, spectrum: Spectrum) {
        self.spectra.insert((file.into(), scan_number), spectrum);
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
}

impl SpectrumProvider for InMemorySpectra {
    fn get_scan(&self, file: &str, scan_number: usize) -> Option<Spectrum> {
        self.spectra
            .get(&(file.to_string(), scan_number))
            .cloned()
    }
}

/// A [`MassTableSource`] serving the same table for every sample.
#[derive(Debug, Default, Clone)]
pub struct StaticMassTables {
    table: MonoisotopicTable,
}

impl StaticMassTables {
    pub fn new(table: MonoisotopicTable) -> Self {
        Self { table }
    }
}

impl MassTableSource for StaticMassTables {
    fn table_for(&self, _sample_name: &str) -> Result<MonoisotopicTable, MassTableError> {
        Ok(self.table.clone())
    }
}

/// The no-op [`ProteinSequenceProvider`]: sites stay unannotated.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProteinInfo;

impl ProteinSequenceProvider for NoProteinInfo {
    fn resolve_modified_residue(
        &self,
        _protein_id: &str,
        _peptide_sequence: &str,
        _mod_location: usize,
    ) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mzverify::spectrum::PrecursorInfo;

    #[test]
    fn test_in_memory_spectra() {
        let mut provider = InMemorySpectra::new();
        provider.insert(
            "run_a.ms2",
            4211,
            Spectrum::from_arrays(&[100.0], &[1.0], PrecursorInfo::default()),
        );
        assert!(provider.get_scan("run_a.ms2", 4211).is_some());
        assert!(provider.get_scan("run_a.ms2", 4212).is_none());
        assert!(provider.get_scan("run_b.ms2", 4211).is_none());
    }

    #[test]
    fn test_static_tables_ignore_sample() {
        let source = StaticMassTables::new(MonoisotopicTable::for_citrullination());
        let a = source.table_for("sample_a").unwrap();
        let b = source.table_for("sample_b").unwrap();
        assert_eq!(a, b);
    }
}
