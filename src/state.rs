use serde::{Deserialize, Serialize};

/// One slide as extracted from the deck. `index` is 1-based and follows deck order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideInput {
    pub index: usize,
    pub text: String,
    pub image: Option<SlideImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl SlideInput {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.image = Some(SlideImage {
            mime_type: mime_type.into(),
            data,
        });
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Scripts {
    pub beginner: String,
    pub standard: String,
    pub expert: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Knowledge {
    pub entity: String,
    pub trivia: String,
}

/// Structured analysis of a single slide.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AnalysisResult {
    pub index: usize,
    pub visual_summary: String,
    pub scripts: Scripts,
    pub knowledge: Knowledge,
}

/// Narrative review of the whole deck, built from the per-slide results.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeckReview {
    pub executive_summary: String,
    pub logic_diagnosis: String,
    pub strengths: String,
    pub weaknesses: String,
    pub closing_remark: String,
}
