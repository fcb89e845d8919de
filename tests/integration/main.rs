//! Integration tests: full scan → gate → execute pipeline against
//! deterministic in-process collaborators.

mod mock_advisory;
mod simulation;
