//! The concurrent batch driver
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, tick, unbounded};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzverify::api::VerificationEngine;
use mzverify::evidence::ConsolidationError;
use mzverify::matching::MatchConfigError;
use mzverify::peptide::Peptide;

use crate::progress::{ProgressRecord, StallGuard};
use crate::providers::{
    MassTableError, MassTableSource, ProteinSequenceProvider, SpectrumProvider,
};
use crate::types::{BatchOutput, Scan, ScanResult};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("spectrum {scan_number} from '{file}' was not found")]
    SpectrumNotFound { file: String, scan_number: usize },
    #[error("failed to derive residue masses for sample '{sample}': {source}")]
    MassTable {
        sample: String,
        #[source]
        source: MassTableError,
    },
    #[error("no progress after {polls} polls ({processed}/{total} scans); aborting")]
    Stalled {
        polls: u32,
        processed: usize,
        total: usize,
    },
    #[error("invalid matcher configuration: {0}")]
    Config(#[from] MatchConfigError),
    #[error("worker thread for chunk {chunk} terminated abnormally")]
    WorkerPanic { chunk: usize },
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
}

/// Scheduling parameters for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of worker threads; the scan list is split into this many
    /// contiguous chunks up front.
    pub threads: usize,
    /// Interval between progress polls.
    pub poll_interval_millis: u64,
    /// Consecutive no-progress polls before the batch aborts; `0` disables
    /// stall detection.
    pub max_stalled_polls: u32,
    /// Also emit one consolidated evidence row per multi-site peptide.
    pub rollup_sites: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            poll_interval_millis: 1000,
            max_stalled_polls: 30,
            rollup_sites: false,
        }
    }
}

/// What one worker hands back per scan: skipped scans come home without a
/// peptide so the output keeps the full input ordering.
#[derive(Debug)]
struct ScanOutcome {
    scan: Scan,
    peptide: Option<Peptide>,
}

type ChunkResult = Result<(Vec<ScanOutcome>, ProgressRecord), BatchError>;

/// Verify every scan in `scans` across `config.threads` workers.
///
/// Scans are split into contiguous `ceil(N/threads)` chunks; each chunk is
/// owned by one worker thread which walks it in order, re-deriving the
/// residue mass table only at sample boundaries. The receiving loop doubles
/// as the progress monitor: it renders the shared counter every poll
/// interval and aborts the batch when progress stalls. Results come back
/// chunk-major, then in input order within each chunk.
///
/// A malformed scan is skipped with a warning; a missing spectrum fails the
/// whole batch, discarding every worker's output.
pub fn run_batch(
    scans: Vec<Scan>,
    engine: VerificationEngine,
    spectra: Arc<dyn SpectrumProvider>,
    tables: Arc<dyn MassTableSource>,
    proteins: &dyn ProteinSequenceProvider,
    config: &BatchConfig,
) -> Result<BatchOutput, BatchError> {
    let total = scans.len();
    if total == 0 {
        return Ok(BatchOutput::default());
    }
    let threads = config.threads.max(1).min(total);
    let chunk_size = total.div_ceil(threads);
    let mut chunks: Vec<Vec<Scan>> = Vec::with_capacity(threads);
    let mut rest = scans;
    while rest.len() > chunk_size {
        let tail = rest.split_off(chunk_size);
        chunks.push(rest);
        rest = tail;
    }
    chunks.push(rest);
    let n_chunks = chunks.len();
    info!("verifying {total} scans across {n_chunks} workers");

    let engine = Arc::new(engine);
    let counter = Arc::new(AtomicUsize::new(0));
    let (sender, receiver) = unbounded();
    for (index, chunk) in chunks.into_iter().enumerate() {
        let sender = sender.clone();
        let engine = Arc::clone(&engine);
        let spectra = Arc::clone(&spectra);
        let tables = Arc::clone(&tables);
        let counter = Arc::clone(&counter);
        thread::spawn(move || {
            let result = process_chunk(chunk, &engine, spectra.as_ref(), tables.as_ref(), &counter);
            if sender.send((index, result)).is_err() {
                debug!("chunk {index} finished after the batch was abandoned");
            }
        });
    }
    drop(sender);

    let ticker = tick(Duration::from_millis(config.poll_interval_millis));
    let mut guard = StallGuard::new(config.max_stalled_polls);
    let mut slots: Vec<Option<Vec<ScanOutcome>>> = (0..n_chunks).map(|_| None).collect();
    let mut progress = ProgressRecord::default();
    let mut outstanding = n_chunks;
    while outstanding > 0 {
        select! {
            recv(receiver) -> message => match message {
                Ok((index, Ok((outcomes, record)))) => {
                    debug!("chunk {index} finished ({} scans)", outcomes.len());
                    slots[index] = Some(outcomes);
                    progress += record;
                    outstanding -= 1;
                }
                Ok((index, Err(error))) => {
                    warn!("chunk {index} failed: {error}");
                    return Err(error);
                }
                Err(_) => {
                    let chunk = slots.iter().position(Option::is_none).unwrap_or(0);
                    return Err(BatchError::WorkerPanic { chunk });
                }
            },
            recv(ticker) -> _ => {
                let processed = counter.load(Ordering::Relaxed);
                info!("processed {processed}/{total} scans");
                if config.max_stalled_polls > 0 && guard.observe(processed) {
                    return Err(BatchError::Stalled {
                        polls: guard.stalled_polls(),
                        processed,
                        total,
                    });
                }
            }
        }
    }

    let mut output = BatchOutput {
        scans: Vec::with_capacity(total),
        results: Vec::new(),
        progress,
    };
    for outcomes in slots.into_iter().flatten() {
        for outcome in outcomes {
            let scan_index = output.scans.len();
            output.scans.push(outcome.scan);
            if let Some(peptide) = outcome.peptide {
                output.results.push(ScanResult {
                    scan_index,
                    peptide,
                    sites: Vec::new(),
                    rolled_up: None,
                });
            }
        }
    }

    for result in &mut output.results {
        let scan = &output.scans[result.scan_index];
        result.sites = engine.classify(&result.peptide, &scan.peptide_id(), result.scan_index);
        if !result.peptide.mod_locs.is_empty() {
            for evidence in &mut result.sites {
                evidence.site_label = proteins.resolve_modified_residue(
                    &scan.parent_protein_id,
                    &scan.sequence,
                    evidence.site,
                );
            }
        }
        if config.rollup_sites && result.sites.len() > 1 {
            let mut merged = result.sites[0].clone();
            for other in &result.sites[1..] {
                merged = merged.consolidate(other.clone())?;
            }
            result.rolled_up = Some(merged);
        }
    }
    info!(
        "batch complete: {} results from {} scans ({} skipped)",
        output.results.len(),
        total,
        output.progress.scans_skipped
    );
    Ok(output)
}

fn process_chunk(
    chunk: Vec<Scan>,
    engine: &VerificationEngine,
    spectra: &dyn SpectrumProvider,
    tables: &dyn MassTableSource,
    counter: &AtomicUsize,
) -> ChunkResult {
    let mut record = ProgressRecord::default();
    let mut cache = None;
    let mut outcomes = Vec::with_capacity(chunk.len());
    for mut scan in chunk {
        // the table is re-derived only when the sample identity changes
        // from the previous scan in this chunk
        let table = match cache.take() {
            Some((sample, table)) if sample == scan.sample_name => table,
            _ => {
                debug!("deriving residue masses for sample '{}'", scan.sample_name);
                record.table_reloads += 1;
                tables
                    .table_for(&scan.sample_name)
                    .map_err(|source| BatchError::MassTable {
                        sample: scan.sample_name.clone(),
                        source,
                    })?
            }
        };
        let built = engine.build_peptide(&scan.full_sequence, scan.charge, &table);
        cache = Some((scan.sample_name.clone(), table));

        match built {
            Err(error) => {
                warn!(
                    "skipping scan {} from '{}': {error}",
                    scan.scan_number, scan.precursor_file
                );
                record.scans_skipped += 1;
                outcomes.push(ScanOutcome {
                    scan,
                    peptide: None,
                });
            }
            Ok(mut peptide) => {
                let Some(mut spectrum) =
                    spectra.get_scan(&scan.precursor_file, scan.scan_number)
                else {
                    return Err(BatchError::SpectrumNotFound {
                        file: scan.precursor_file,
                        scan_number: scan.scan_number,
                    });
                };
                record.spectra_fetched += 1;
                scan.retention_time = Some(spectrum.precursor.retention_time);
                scan.precursor_mz = Some(spectrum.precursor.mz);
                engine.match_spectrum(&mut peptide, &mut spectrum);
                record.fragments_matched += peptide.found_fragments().count();
                record.scans_processed += 1;
                outcomes.push(ScanOutcome {
                    scan,
                    peptide: Some(peptide),
                });
            }
        }
        counter.fetch_add(1, Ordering::Relaxed);
    }
    Ok((outcomes, record))
}
