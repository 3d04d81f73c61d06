//! Step File Parser
//!
//! Loads step lists from YAML or JSON files. Both a titled document
//! (`title` + `steps`) and a bare array of steps are accepted.

use std::error::Error;
use std::fs;

use log::{debug, info};
use serde::Deserialize;

use super::model::{StepDescriptor, StepList};
use super::validator::validate_steps;

/// Accepted top-level shapes of a step file.
#[derive(Deserialize)]
#[serde(untagged)]
enum StepFile {
    Titled(StepList),
    Bare(Vec<StepDescriptor>),
}

/// Parses step list content. JSON is accepted since it is valid YAML.
pub fn parse_steps(content: &str) -> Result<StepList, Box<dyn Error>> {
    let parsed: StepFile = serde_yaml::from_str(content).map_err(|e| {
        format!("Failed to parse step file: {}. Check the file format.", e)
    })?;

    let list = match parsed {
        StepFile::Titled(list) => list,
        StepFile::Bare(steps) => StepList::from_steps(steps),
    };

    validate_steps(&list.steps)?;
    Ok(list)
}

/// Loads and validates a step list from a file.
///
/// # Example
///
/// ```rust,no_run
/// use flowtrack::workflow::load_steps;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let list = load_steps("audit.yaml")?;
///     println!("Loaded {} steps", list.len());
///     Ok(())
/// }
/// ```
pub fn load_steps(path: &str) -> Result<StepList, Box<dyn Error>> {
    info!("Loading steps from: {}", path);

    let content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read step file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("Step file loaded ({} bytes)", content.len());

    let list = parse_steps(&content)?;
    info!("Parsed {} steps", list.len());
    Ok(list)
}

/// Saves a step list to a YAML file.
pub fn save_steps(list: &StepList, path: &str) -> Result<(), Box<dyn Error>> {
    let yaml_content = serde_yaml::to_string(list)?;
    fs::write(path, yaml_content)?;
    info!("Steps saved to: {}", path);
    Ok(())
}
