use crate::retry::{InvokeError, ProgressEvent};
use crate::state::AnalysisResult;
use crate::workflow::ProgressSink;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Index 0 is the deck review, which runs after every slide.
fn wait_message(event: &ProgressEvent) -> String {
    let subject = match event.slide_index {
        0 => "deck review".to_string(),
        index => format!("slide {index}"),
    };
    format!(
        "{} throttled, waiting {}s (attempt {}/{})",
        subject, event.wait_seconds, event.attempt, event.max_attempts
    )
}

/// Terminal sink: one bar for the deck, one printed line per slide outcome.
pub struct ConsoleSink {
    pb: ProgressBar,
}

impl ConsoleSink {
    pub fn new(total: usize) -> Result<Self> {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { pb })
    }

    pub fn hidden(total: usize) -> Self {
        let pb = ProgressBar::hidden();
        pb.set_length(total as u64);
        Self { pb }
    }

    pub fn position(&self) -> u64 {
        self.pb.position()
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl ProgressSink for ConsoleSink {
    fn on_item_started(&self, index: usize, total: usize) {
        self.pb.set_message(format!("analyzing slide {index}/{total}"));
    }

    fn on_wait(&self, event: &ProgressEvent) {
        self.pb.set_message(wait_message(event));
    }

    fn on_item_done(&self, result: &AnalysisResult) {
        self.pb.inc(1);
        self.pb
            .println(format!("✅ Slide {}: {}", result.index, result.visual_summary));
    }

    fn on_item_failed(&self, index: usize, error: &InvokeError) {
        self.pb.inc(1);
        self.pb.println(format!("❌ Slide {index} failed: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Knowledge, Scripts};
    use anyhow::anyhow;

    #[test]
    fn test_outcomes_advance_the_bar() {
        let sink = ConsoleSink::hidden(3);
        let result = AnalysisResult {
            index: 1,
            visual_summary: "s".to_string(),
            scripts: Scripts {
                beginner: "b".to_string(),
                standard: "s".to_string(),
                expert: "e".to_string(),
            },
            knowledge: Knowledge {
                entity: "x".to_string(),
                trivia: "y".to_string(),
            },
        };

        sink.on_item_started(1, 3);
        sink.on_item_done(&result);
        sink.on_wait(&ProgressEvent {
            slide_index: 2,
            wait_seconds: 5,
            attempt: 1,
            max_attempts: 3,
        });
        assert_eq!(sink.position(), 1);

        sink.on_item_failed(
            2,
            &InvokeError::Fatal {
                index: 2,
                cause: anyhow!("bad request"),
            },
        );
        assert_eq!(sink.position(), 2);
        sink.finish();
    }

    #[test]
    fn test_review_waits_are_not_labelled_as_a_slide() {
        let mut event = ProgressEvent {
            slide_index: 0,
            wait_seconds: 10,
            attempt: 2,
            max_attempts: 3,
        };
        assert_eq!(wait_message(&event), "deck review throttled, waiting 10s (attempt 2/3)");

        event.slide_index = 4;
        assert_eq!(wait_message(&event), "slide 4 throttled, waiting 10s (attempt 2/3)");

        let sink = ConsoleSink::hidden(1);
        event.slide_index = 0;
        sink.on_wait(&event);
        assert!(sink.pb.message().starts_with("deck review"));
    }

    #[test]
    fn test_styled_bar_builds() {
        assert!(ConsoleSink::new(2).is_ok());
    }
}
