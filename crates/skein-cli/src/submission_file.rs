//! Reads a submission request from a JSON file on disk, matching the wire
//! format in spec §6.

use anyhow::{Context, Result};

use skein_core::planner::Submission;

pub fn load(path: &str) -> Result<Submission> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read submission file {path}"))?;
    let submission: Submission = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse submission file {path}"))?;
    Ok(submission)
}
