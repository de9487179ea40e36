use crate::state::{AnalysisResult, DeckReview};
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const SECTION_DELIMITER: &str = "\n---\n\n";

fn slide_section(result: &AnalysisResult) -> String {
    format!(
        "## Slide {}\n\n**Summary:** {}\n\n**Script:**\n{}\n\n> 💡 **{}**: {}\n",
        result.index,
        result.visual_summary,
        result.scripts.standard,
        result.knowledge.entity,
        result.knowledge.trivia
    )
}

fn review_section(review: &DeckReview) -> String {
    let mut out = String::from("## Deck Review\n\n");
    for (heading, body) in [
        ("Executive summary", &review.executive_summary),
        ("Logic diagnosis", &review.logic_diagnosis),
        ("Strengths", &review.strengths),
        ("Weaknesses", &review.weaknesses),
        ("Closing remark", &review.closing_remark),
    ] {
        let _ = write!(out, "### {heading}\n\n{body}\n\n");
    }
    out.truncate(out.trim_end().len());
    out.push('\n');
    out
}

/// Per-slide summary, standard script and trivia, then the optional review.
pub fn render_markdown(title: &str, results: &[AnalysisResult], review: Option<&DeckReview>) -> String {
    let mut sections: Vec<String> = results.iter().map(slide_section).collect();
    if let Some(review) = review {
        sections.push(review_section(review));
    }
    format!("# {}\n\n{}", title, sections.join(SECTION_DELIMITER))
}

pub fn write_markdown(
    path: &Path,
    title: &str,
    results: &[AnalysisResult],
    review: Option<&DeckReview>,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_markdown(title, results, review))
        .with_context(|| format!("Failed to write report {}", path.display()))
}

pub fn write_json(path: &Path, results: &[AnalysisResult]) -> Result<()> {
    let content = serde_json::to_string_pretty(results)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
