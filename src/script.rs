use crate::llm::{LlmClient, ModelInput};
use crate::state::{AnalysisResult, DeckReview, Knowledge, Scripts, SlideInput};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

const SLIDE_PROMPT: &str = r#"Analyze this slide. Output valid JSON only:
{
    "visual_summary": "1 sentence summary",
    "scripts": {
        "beginner": "Simple tone script",
        "standard": "Business tone script",
        "expert": "Technical tone script"
    },
    "knowledge_extension": {
        "entity": "Keyword",
        "trivia": "Did you know fact"
    }
}"#;

const REVIEW_PROMPT: &str = r#"You are reviewing a whole presentation deck. Below is one line per slide with its summary and key entity.
Judge how well the narrative flows from slide to slide. Output valid JSON only:
{
    "executive_summary": "2-3 sentence summary of the deck",
    "logic_diagnosis": "How coherent the storyline is and where it breaks",
    "strengths": "What works well",
    "weaknesses": "What should be improved",
    "closing_remark": "One encouraging closing sentence"
}"#;

const NO_IMAGE: &str = "(No image)";

/// The model answered, but not with the object we asked for.
#[derive(Debug, Error)]
#[error("malformed model response for slide {index}: {reason}")]
pub struct MalformedResponse {
    pub index: usize,
    pub reason: String,
    pub raw: String,
}

/// Text between the first opening fence and the last closing fence; prose around
/// the fences is dropped. Unfenced input is only trimmed.
pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    let Some(start) = s.find("```") else {
        return s.to_string();
    };
    // drop the language tag, if any, up to the first newline
    let body = s[start + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim().to_string()
}

#[derive(Deserialize)]
struct RawAnalysis {
    visual_summary: String,
    scripts: Scripts,
    #[serde(alias = "knowledge")]
    knowledge_extension: Knowledge,
}

pub fn build_request(slide: &SlideInput) -> ModelInput {
    let input = ModelInput::default()
        .text(SLIDE_PROMPT)
        .text(format!("Context: {}", slide.text));
    match &slide.image {
        Some(image) => input.image(image.mime_type.clone(), image.data.clone()),
        None => input.text(NO_IMAGE),
    }
}

pub fn parse_response(raw: &str, index: usize) -> Result<AnalysisResult, MalformedResponse> {
    let clean_json = strip_code_blocks(raw);
    let parsed: RawAnalysis =
        serde_json::from_str(&clean_json).map_err(|e| MalformedResponse {
            index,
            reason: e.to_string(),
            raw: raw.to_string(),
        })?;

    Ok(AnalysisResult {
        index,
        visual_summary: parsed.visual_summary,
        scripts: parsed.scripts,
        knowledge: parsed.knowledge_extension,
    })
}

pub fn build_review_request(results: &[AnalysisResult]) -> ModelInput {
    let outline = results
        .iter()
        .map(|r| {
            format!(
                "Slide {}: {} (key entity: {})",
                r.index, r.visual_summary, r.knowledge.entity
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    ModelInput::default().text(REVIEW_PROMPT).text(outline)
}

fn text_or_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrList {
        Text(String),
        List(Vec<String>),
    }

    Ok(match TextOrList::deserialize(deserializer)? {
        TextOrList::Text(s) => s,
        TextOrList::List(items) => items.join("\n"),
    })
}

#[derive(Deserialize)]
struct RawReview {
    executive_summary: String,
    logic_diagnosis: String,
    #[serde(deserialize_with = "text_or_list")]
    strengths: String,
    #[serde(deserialize_with = "text_or_list")]
    weaknesses: String,
    closing_remark: String,
}

/// Review responses carry no slide; they are reported under index 0.
pub fn parse_review(raw: &str) -> Result<DeckReview, MalformedResponse> {
    let clean_json = strip_code_blocks(raw);
    let parsed: RawReview = serde_json::from_str(&clean_json).map_err(|e| MalformedResponse {
        index: 0,
        reason: e.to_string(),
        raw: raw.to_string(),
    })?;

    Ok(DeckReview {
        executive_summary: parsed.executive_summary,
        logic_diagnosis: parsed.logic_diagnosis,
        strengths: parsed.strengths,
        weaknesses: parsed.weaknesses,
        closing_remark: parsed.closing_remark,
    })
}

/// What the batch needs from an analysis backend: one slide at a time, then the deck.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze_slide(&self, slide: &SlideInput) -> Result<AnalysisResult>;
    async fn review_deck(&self, results: &[AnalysisResult]) -> Result<DeckReview>;
}

/// Builds requests, calls the model once, and parses the answer.
#[derive(Debug, Clone, Copy)]
pub struct SlideAnalyzer<'a> {
    llm: &'a dyn LlmClient,
}

impl<'a> SlideAnalyzer<'a> {
    pub fn new(llm: &'a dyn LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Analyzer for SlideAnalyzer<'_> {
    async fn analyze_slide(&self, slide: &SlideInput) -> Result<AnalysisResult> {
        let raw = self
            .llm
            .generate(&build_request(slide))
            .await
            .with_context(|| format!("Generating analysis for slide {}", slide.index))?;
        Ok(parse_response(&raw, slide.index)?)
    }

    async fn review_deck(&self, results: &[AnalysisResult]) -> Result<DeckReview> {
        let raw = self
            .llm
            .generate(&build_review_request(results))
            .await
            .context("Generating deck review")?;
        Ok(parse_review(&raw)?)
    }
}
