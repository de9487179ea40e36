use crate::retry::{CancelFlag, InvokeError, ProgressEvent, RetryingInvoker};
use crate::script::Analyzer;
use crate::state::{AnalysisResult, DeckReview, SlideInput};
use anyhow::anyhow;
use log::{debug, info};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

/// Receives batch progress. Called synchronously on the batch task, so it must return promptly.
pub trait ProgressSink {
    fn on_item_started(&self, _index: usize, _total: usize) {}
    fn on_wait(&self, event: &ProgressEvent);
    fn on_item_done(&self, result: &AnalysisResult);
    fn on_item_failed(&self, index: usize, error: &InvokeError);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideFailure {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successful analyses in ascending slide order. Failed slides are absent.
    pub results: Vec<AnalysisResult>,
    pub failures: Vec<SlideFailure>,
    /// Backoff waits performed across the whole batch.
    pub retries: usize,
    pub cancelled: bool,
}

pub struct BatchOrchestrator {
    invoker: RetryingInvoker,
    pacing: Duration,
}

impl BatchOrchestrator {
    pub fn new(invoker: RetryingInvoker, pacing: Duration) -> Self {
        Self { invoker, pacing }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.invoker.cancel_flag().clone()
    }

    fn cancelled(&self) -> bool {
        self.invoker.cancel_flag().is_cancelled()
    }

    /// Analyzes `slides` in order, one at a time.
    ///
    /// Slides whose index already appears in `seed` are skipped and the seeded
    /// results are carried into the report. A failing slide is reported to the
    /// sink and left out of the results; the batch always moves on.
    pub async fn process(
        &self,
        slides: &[SlideInput],
        analyzer: &dyn Analyzer,
        seed: Vec<AnalysisResult>,
        sink: &dyn ProgressSink,
    ) -> BatchReport {
        let mut report = BatchReport {
            results: seed,
            ..BatchReport::default()
        };
        report.results.sort_by_key(|r| r.index);
        report.results.dedup_by_key(|r| r.index);

        let done: HashSet<usize> = report.results.iter().map(|r| r.index).collect();
        let total = slides.len();

        for (pos, slide) in slides.iter().enumerate() {
            if done.contains(&slide.index) {
                debug!("Skipping already analyzed slide {}", slide.index);
                continue;
            }
            if self.cancelled() {
                report.cancelled = true;
                break;
            }

            info!("Analyzing slide {}/{}", slide.index, total);
            sink.on_item_started(slide.index, total);

            let mut waits = 0;
            let outcome = self
                .invoker
                .invoke(
                    slide.index,
                    || analyzer.analyze_slide(slide),
                    |event| {
                        waits += 1;
                        sink.on_wait(&event);
                    },
                )
                .await;
            report.retries += waits;

            match outcome {
                Ok(result) => {
                    let at = report.results.partition_point(|r| r.index < result.index);
                    report.results.insert(at, result);
                    sink.on_item_done(&report.results[at]);

                    let more_pending = slides[pos + 1..].iter().any(|s| !done.contains(&s.index));
                    if more_pending && !self.pacing.is_zero() {
                        if self.cancelled() {
                            report.cancelled = true;
                            break;
                        }
                        sleep(self.pacing).await;
                    }
                }
                Err(InvokeError::Cancelled { .. }) => {
                    report.cancelled = true;
                    break;
                }
                Err(err) => {
                    sink.on_item_failed(slide.index, &err);
                    report.failures.push(SlideFailure {
                        index: slide.index,
                        message: err.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch finished: {} analyzed, {} failed, {} retries{}",
            report.results.len(),
            report.failures.len(),
            report.retries,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    /// One deck-level call through the same retry machinery, reported under index 0.
    pub async fn review(
        &self,
        results: &[AnalysisResult],
        analyzer: &dyn Analyzer,
        sink: &dyn ProgressSink,
    ) -> Result<DeckReview, InvokeError> {
        if results.is_empty() {
            return Err(InvokeError::Fatal {
                index: 0,
                cause: anyhow!("No analyzed slides to review"),
            });
        }
        info!("Reviewing deck narrative across {} slides", results.len());
        self.invoker
            .invoke(0, || analyzer.review_deck(results), |event| sink.on_wait(&event))
            .await
    }
}
