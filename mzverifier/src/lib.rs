pub mod driver;
pub mod progress;
pub mod providers;
pub mod types;

pub use driver::{run_batch, BatchConfig, BatchError};
pub use progress::ProgressRecord;
pub use providers::{
    InMemorySpectra, MassTableSource, NoProteinInfo, ProteinSequenceProvider, SpectrumProvider,
    StaticMassTables,
};
pub use types::{BatchOutput, Scan, ScanResult};
