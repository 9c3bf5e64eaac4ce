//! Normalisation of third-party database exports into [`StudyRow`]s.
//!
//! - `ris`: RIS exports (CINAHL, Web of Science, ...) → rows
//! - `pubmed`: raw PubMed JSONL from a search run → rows
//!
//! RIS rows are written one CSV per input file under `<out_dir>/<source>/`;
//! PubMed rows go to `<out_dir>/pubmed.csv`. Both feed the merge step.
//!
//! [`StudyRow`]: crate::models::StudyRow

pub mod pubmed;
pub mod ris;

pub use pubmed::{normalize_pubmed_jsonl, pubmed_rows};
pub use ris::{normalize_ris_dir, normalize_ris_file, parse_ris, source_query_id};
