//! Fake analyzers for driving the worker pool through specific outcomes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use fileai::{AnalysisError, AnalysisResult, Analyzer};

/// What one analyzer call does.
#[derive(Debug, Clone)]
pub enum Step {
    Succeed(AnalysisResult),
    Fail(String),
    /// Sleeps, then succeeds with the given result. Used to trip the job
    /// timeout.
    Hang(Duration, AnalysisResult),
}

/// Replays a script of steps, one per call, then repeats `fallback`.
pub struct ScriptedAnalyzer {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedAnalyzer {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing(message: &str) -> Self {
        Self::new(vec![], Step::Fail(message.to_string()))
    }

    pub fn always_succeeding(tags: &[&str], summary: &str) -> Self {
        Self::new(vec![], Step::Succeed(AnalysisResult::new(tags, summary)))
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Instants at which each call started.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    /// Time between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        self.call_times()
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        _path: &Path,
        _mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.calls.lock().unwrap().push(Instant::now());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Succeed(result) => Ok(result),
            Step::Fail(message) => Err(AnalysisError::Failed(message)),
            Step::Hang(duration, result) => {
                tokio::time::sleep(duration).await;
                Ok(result)
            }
        }
    }
}

/// Fails for every path containing `marker`, succeeds otherwise.
pub struct PathFilterAnalyzer {
    pub marker: String,
}

impl PathFilterAnalyzer {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
        }
    }
}

#[async_trait]
impl Analyzer for PathFilterAnalyzer {
    async fn analyze(
        &self,
        path: &Path,
        _mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        if path.to_string_lossy().contains(&self.marker) {
            Err(AnalysisError::Failed(format!(
                "cannot analyze {}",
                path.display()
            )))
        } else {
            Ok(AnalysisResult::new(&["ok"], "Analyzed."))
        }
    }
}
