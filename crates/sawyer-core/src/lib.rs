pub mod config;
pub mod error;
pub mod gapfill;
pub mod pipeline;
pub mod qa;
pub mod registry;
pub mod rules;
pub mod store;
pub mod table;

pub use error::{Result, SawyerError};
pub use gapfill::{fill_dataframe, GapfillEngine, GapfillOutcome};
pub use qa::{apply_qa_flags, apply_qa_flags_at, QaEngine, QaOutcome};
pub use registry::{all_gapfill_functions, all_qa_functions};
pub use table::{FlagTable, MaskTable, SeriesTable, Table};
