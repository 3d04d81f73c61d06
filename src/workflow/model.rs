//! Workflow Step Model
//!
//! Step descriptors are the payload sent to the workflow backend when an
//! instance is triggered, and the unit the tracker reports progress on.
//!
//! # Example YAML Format
//!
//! ```yaml
//! title: Compliance audit
//! steps:
//!   - step: 1
//!     action: read
//!     heading: Read input business list
//!     element_type: file
//!     element_description: Read the provided list of businesses for audit
//!     url: https://example.com/businesses.json
//!
//!   - step: 2
//!     action: validate
//!     heading: Validate business data
//!     element_type: validation
//! ```
//!
//! A bare list of steps (no `title`) is accepted as well, which is the shape
//! the backend trigger endpoint receives.

use serde::{Deserialize, Serialize};

/// A single step of a workflow.
///
/// `step` is the 1-based sequence number; it is the identity used by
/// completion signals and must be unique within an instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    /// 1-based sequence number
    pub step: u32,

    /// Short verb describing what the step does (e.g. "read", "notify")
    #[serde(default)]
    pub action: String,

    /// Human-readable title shown in progress displays
    #[serde(default)]
    pub heading: String,

    /// Kind of element the step operates on (e.g. "file", "api")
    #[serde(default)]
    pub element_type: String,

    /// Longer description of the element
    #[serde(default)]
    pub element_description: String,

    /// Optional resource the step touches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl StepDescriptor {
    /// Creates a new step descriptor.
    ///
    /// # Example
    ///
    /// ```
    /// use flowtrack::workflow::StepDescriptor;
    ///
    /// let step = StepDescriptor::new(1, "read", "Read input business list")
    ///     .with_element("file", "Read the provided list of businesses")
    ///     .with_url("https://example.com/businesses.json");
    /// assert_eq!(step.step, 1);
    /// ```
    pub fn new(step: u32, action: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            step,
            action: action.into().trim().to_string(),
            heading: heading.into().trim().to_string(),
            element_type: String::new(),
            element_description: String::new(),
            url: None,
        }
    }

    /// Sets the element type and description.
    pub fn with_element(
        mut self,
        element_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.element_type = element_type.into();
        self.element_description = description.into();
        self
    }

    /// Sets the resource URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Returns the heading, or a generic label when none is set.
    pub fn label(&self) -> String {
        if self.heading.is_empty() {
            format!("Step {}", self.step)
        } else {
            self.heading.clone()
        }
    }
}

/// A titled list of steps as stored in a step file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepList {
    /// Display name for runs of this workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Ordered step descriptors
    #[serde(default)]
    pub steps: Vec<StepDescriptor>,
}

impl StepList {
    /// Creates an untitled list from steps.
    pub fn from_steps(steps: Vec<StepDescriptor>) -> Self {
        Self { title: None, steps }
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The eight-step compliance audit used when no step file is given.
pub fn sample_steps() -> StepList {
    let steps = vec![
        StepDescriptor::new(1, "read", "Read input business list")
            .with_element("file", "Read the provided list of businesses for audit")
            .with_url("https://my-json-server.typicode.com/typicode/demo/comments"),
        StepDescriptor::new(2, "validate", "Validate business data")
            .with_element("validation", "Check business data completeness and format"),
        StepDescriptor::new(3, "analyze", "Analyze compliance status")
            .with_element("analysis", "Review compliance requirements for each business"),
        StepDescriptor::new(4, "fetch", "Fetch regulatory data")
            .with_element("api", "Retrieve latest regulatory requirements")
            .with_url("https://api.example.com/regulations"),
        StepDescriptor::new(5, "compare", "Compare against standards")
            .with_element("comparison", "Match business practices with regulatory standards"),
        StepDescriptor::new(6, "generate", "Generate compliance report")
            .with_element("report", "Create detailed compliance assessment report"),
        StepDescriptor::new(7, "review", "AI review and recommendations")
            .with_element("ai", "Generate AI-powered recommendations for compliance"),
        StepDescriptor::new(8, "notify", "Send notifications")
            .with_element("notification", "Notify relevant stakeholders of audit results"),
    ];

    StepList {
        title: Some("Compliance audit".to_string()),
        steps,
    }
}
