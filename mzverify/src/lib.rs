pub mod api;
pub mod evidence;
pub mod ions;
pub mod masses;
pub mod matching;
pub mod peptide;
pub mod solution;
pub mod spectrum;

pub use api::{ClassifyParams, VerificationEngine};
pub use evidence::{Confidence, IonClass, SiteEvidence};
pub use matching::{MatchParams, TieBreak};
pub use peptide::Peptide;
pub use spectrum::Spectrum;
