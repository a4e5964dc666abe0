//! Library for Beacon CLI commands and shared output helpers.

pub mod commands;
pub mod corpus;
pub mod output;

pub use commands::*;
pub use corpus::{Corpus, CorpusEdge, CorpusGraph, CorpusItem};
pub use output::OutputFormat;
