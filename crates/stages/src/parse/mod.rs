//! Adapters that pull structure out of free-form model output.
//!
//! Each parser is narrow and replaceable: it looks for the structural
//! markers its prompt asks for and reports what it could not find instead of
//! failing the stage.

pub mod analysis;
pub mod variants;
pub mod verdict;

pub use analysis::{parse_analysis, AnalysisFields, NOT_PARSED};
pub use variants::{parse_variants, ParsedVariants, Variant};
pub use verdict::{parse_evaluation, Verdict};
