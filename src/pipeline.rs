// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Ordered step lists with a per-step failure policy.

use crate::error::{Error, Result};
use crate::privileged::{Executor, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Abort the pipeline on failure and surface the error.
    Strict,
    /// Log the failure and carry on.
    BestEffort,
}

#[derive(Debug)]
pub struct StepFailure {
    pub step: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub executed: usize,
    pub failures: Vec<StepFailure>,
}

impl PipelineReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
pub struct Pipeline {
    name: String,
    steps: Vec<(Step, Policy)>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn strict(&mut self, step: Step) -> &mut Self {
        self.steps.push((step, Policy::Strict));
        self
    }

    pub fn best_effort(&mut self, step: Step) -> &mut Self {
        self.steps.push((step, Policy::BestEffort));
        self
    }

    pub fn extend_with(&mut self, steps: impl IntoIterator<Item = Step>, policy: Policy) -> &mut Self {
        self.steps
            .extend(steps.into_iter().map(|step| (step, policy)));
        self
    }

    pub fn append(&mut self, other: Pipeline) -> &mut Self {
        self.steps.extend(other.steps);
        self
    }

    pub fn steps(&self) -> &[(Step, Policy)] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run steps in order. The first strict failure stops the pipeline;
    /// best-effort failures are collected in the report.
    pub fn run(&self, exec: &dyn Executor) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        tracing::debug!(pipeline = %self.name, steps = self.steps.len(), "starting pipeline");

        for (step, policy) in &self.steps {
            let outcome = exec.execute(step);
            report.executed += 1;

            if let Err(error) = outcome {
                match policy {
                    Policy::Strict => {
                        tracing::debug!(pipeline = %self.name, step = %step, "strict step failed");
                        return Err(Error::Step {
                            step: step.to_string(),
                            source: Box::new(error),
                        });
                    }
                    Policy::BestEffort => {
                        tracing::warn!(
                            pipeline = %self.name,
                            step = %step,
                            error = %error,
                            "step failed, continuing"
                        );
                        report.failures.push(StepFailure {
                            step: step.to_string(),
                            error,
                        });
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Fails any step whose rendering contains `fail_on`.
    struct Scripted {
        fail_on: &'static str,
        seen: RefCell<Vec<String>>,
    }

    impl Executor for Scripted {
        fn execute(&self, step: &Step) -> Result<()> {
            let line = step.to_string();
            self.seen.borrow_mut().push(line.clone());
            if line.contains(self.fail_on) {
                Err(Error::Command {
                    command: line,
                    stderr: "boom".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn rm(path: &str) -> Step {
        Step::RemoveFile { path: path.into() }
    }

    #[test]
    fn test_strict_stops_at_first_failure() {
        let exec = Scripted {
            fail_on: "/b",
            seen: RefCell::new(Vec::new()),
        };
        let mut pipeline = Pipeline::new("test");
        pipeline.strict(rm("/a")).strict(rm("/b")).strict(rm("/c"));

        let err = pipeline.run(&exec).unwrap_err();
        assert!(matches!(err, Error::Step { .. }));
        assert_eq!(*exec.seen.borrow(), vec!["rm -f /a", "rm -f /b"]);
    }

    #[test]
    fn test_best_effort_continues() {
        let exec = Scripted {
            fail_on: "/b",
            seen: RefCell::new(Vec::new()),
        };
        let mut pipeline = Pipeline::new("test");
        pipeline
            .best_effort(rm("/a"))
            .best_effort(rm("/b"))
            .best_effort(rm("/c"));

        let report = pipeline.run(&exec).unwrap();
        assert_eq!(report.executed, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, "rm -f /b");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_mixed_policies_surface_terminal_strict_failure() {
        let exec = Scripted {
            fail_on: "nginx",
            seen: RefCell::new(Vec::new()),
        };
        let mut pipeline = Pipeline::new("delete");
        pipeline
            .best_effort(rm("/a"))
            .strict(Step::Run(crate::privileged::CommandSpec::elevated("nginx", ["-t"])));

        assert!(pipeline.run(&exec).is_err());
        assert_eq!(exec.seen.borrow().len(), 2);
    }
}
