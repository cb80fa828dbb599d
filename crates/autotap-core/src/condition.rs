//! Condition types and evaluation for trigger rules.
//!
//! Provides:
//! - Condition enum (variable comparison or template match)
//! - ConditionLogic for combining condition lists
//! - ConditionEvaluator, a side-effect free evaluator over one poll cycle's inputs

use image::imageops;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::device::{Frame, TemplateMatcher};
use crate::template::TemplateLibrary;
use crate::variables::VariableStore;

/// Accepted range for image match thresholds.
pub const MIN_THRESHOLD: f64 = 0.5;
pub const MAX_THRESHOLD: f64 = 1.0;

/// Comparison operators for variable conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
}

impl CompareOp {
    /// Evaluate the comparison.
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
            CompareOp::Gt => left > right,
            CompareOp::Lt => left < right,
            CompareOp::Gte => left >= right,
            CompareOp::Lte => left <= right,
        }
    }
}

/// How a list of conditions combines into one verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
    /// True only if every condition is false.
    Not,
}

/// Rectangle in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Intersection with a `width` x `height` frame as `(x, y, w, h)`.
    /// `None` when the two do not overlap.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let (x0, y0) = (i64::from(self.x).max(0), i64::from(self.y).max(0));
        let x1 = (i64::from(self.x) + i64::from(self.w)).min(i64::from(width));
        let y1 = (i64::from(self.y) + i64::from(self.h)).min(i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

fn default_expect_exist() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.8
}

/// A condition that can be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare a session variable against a literal.
    Variable {
        name: String,
        operator: CompareOp,
        value: f64,
    },
    /// Template match inside a frame region (whole frame when `region` is absent).
    Image {
        #[serde(default)]
        region: Option<Rect>,
        template_ref: String,
        #[serde(default = "default_expect_exist")]
        expect_exist: bool,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
}

impl Condition {
    pub fn variable(name: &str, operator: CompareOp, value: f64) -> Self {
        Condition::Variable {
            name: name.to_string(),
            operator,
            value,
        }
    }

    pub fn needs_frame(&self) -> bool {
        matches!(self, Condition::Image { .. })
    }
}

/// Evaluates conditions against one poll cycle's inputs.
///
/// Any failed lookup (missing variable, template or frame, empty crop) makes
/// the condition false. A missing variable is false on every path, whatever
/// the task mode.
pub struct ConditionEvaluator<'a> {
    variables: &'a VariableStore,
    frame: Option<&'a Frame>,
    templates: &'a TemplateLibrary,
    matcher: &'a dyn TemplateMatcher,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(
        variables: &'a VariableStore,
        frame: Option<&'a Frame>,
        templates: &'a TemplateLibrary,
        matcher: &'a dyn TemplateMatcher,
    ) -> Self {
        Self {
            variables,
            frame,
            templates,
            matcher,
        }
    }

    /// Evaluate a single condition.
    pub fn evaluate(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Variable {
                name,
                operator,
                value,
            } => match self.variables.get(name) {
                Some(actual) => operator.evaluate(actual.as_f64(), *value),
                None => {
                    debug!(variable = %name, "variable not set, condition is false");
                    false
                }
            },
            Condition::Image {
                region,
                template_ref,
                expect_exist,
                threshold,
            } => {
                let Some(frame) = self.frame else {
                    debug!(template = %template_ref, "no frame this cycle, condition is false");
                    return false;
                };
                let Some(template) = self.templates.get(template_ref) else {
                    debug!(template = %template_ref, "template not found, condition is false");
                    return false;
                };
                let threshold = threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD);

                let found = match region {
                    None => self.matcher.matches(frame, template, threshold),
                    Some(rect) => match rect.clamp_to(frame.width(), frame.height()) {
                        Some((x, y, w, h)) => {
                            let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
                            self.matcher.matches(&crop, template, threshold)
                        }
                        None => {
                            debug!(?rect, "region outside frame, condition is false");
                            return false;
                        }
                    },
                };
                found == *expect_exist
            }
        }
    }

    /// Combine a list of conditions.
    ///
    /// A single condition bypasses `logic` and returns its own result. An
    /// empty list is true.
    pub fn evaluate_all(&self, conditions: &[Condition], logic: ConditionLogic) -> bool {
        match conditions {
            [] => true,
            [only] => self.evaluate(only),
            _ => match logic {
                ConditionLogic::And => conditions.iter().all(|c| self.evaluate(c)),
                ConditionLogic::Or => conditions.iter().any(|c| self.evaluate(c)),
                ConditionLogic::Not => !conditions.iter().any(|c| self.evaluate(c)),
            },
        }
    }
}
