//! Slide extraction from `.pptx` packages.
//!
//! Slide order comes from `ppt/presentation.xml` (`p:sldIdLst`) resolved through
//! `ppt/_rels/presentation.xml.rels`. Per slide, text is every `a:t` run grouped
//! by paragraph, and the image is the first picture whose media type a model
//! endpoint accepts.

use crate::state::SlideInput;
use anyhow::{anyhow, Context, Result};
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use zip::result::ZipError;
use zip::ZipArchive;

const SLIDE_REL_TYPE: &str = "/relationships/slide";
const IMAGE_REL_TYPE: &str = "/relationships/image";

pub fn load_slides(path: &Path) -> Result<Vec<SlideInput>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    read_slides(BufReader::new(file)).with_context(|| format!("Failed to read slides from {}", path.display()))
}

pub fn read_slides<R: Read + Seek>(reader: R) -> Result<Vec<SlideInput>> {
    let mut archive = ZipArchive::new(reader).context("Not a zip package")?;
    let slide_paths = slide_order(&mut archive)?;

    let mut slides = Vec::with_capacity(slide_paths.len());
    for (i, slide_path) in slide_paths.iter().enumerate() {
        let index = i + 1;
        let xml = read_text(&mut archive, slide_path)?
            .ok_or_else(|| anyhow!("Missing slide part {slide_path}"))?;
        let content = parse_slide(&xml).with_context(|| format!("Failed to parse {slide_path}"))?;

        let mut slide = SlideInput::new(index, content.paragraphs.join("\n"));
        if let Some((mime_type, data)) = first_usable_image(&mut archive, slide_path, &content.picture_rel_ids)? {
            debug!("Slide {} carries a {} image ({} bytes)", index, mime_type, data.len());
            slide = slide.with_image(mime_type, data);
        }
        slides.push(slide);
    }
    Ok(slides)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn read_text<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>> {
    match read_entry(archive, name)? {
        Some(bytes) => Ok(Some(String::from_utf8(bytes).with_context(|| format!("{name} is not UTF-8"))?)),
        None => Ok(None),
    }
}

/// Slide part paths in presentation order.
fn slide_order<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<String>> {
    let presentation = read_text(archive, "ppt/presentation.xml")?;
    let rels = read_text(archive, "ppt/_rels/presentation.xml.rels")?;

    if let (Some(presentation), Some(rels)) = (presentation, rels) {
        let targets: HashMap<String, String> = parse_relationships(&rels)?
            .into_iter()
            .filter(|r| r.rel_type.ends_with(SLIDE_REL_TYPE))
            .map(|r| (r.id, resolve_target("ppt", &r.target)))
            .collect();
        let ids = parse_slide_ids(&presentation)?;
        let ordered: Vec<String> = ids.iter().filter_map(|id| targets.get(id).cloned()).collect();
        if !ordered.is_empty() {
            return Ok(ordered);
        }
    }

    // No usable slide list: fall back to slideN.xml numbering.
    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let number = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((number, name.to_string()))
        })
        .collect();
    numbered.sort();
    Ok(numbered.into_iter().map(|(_, name)| name).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Relationship {
    id: String,
    rel_type: String,
    target: String,
    external: bool,
}

fn attr_value(e: &BytesStart<'_>, reader: &Reader<&[u8]>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.decode_and_unescape_value(reader).ok())
        .map(|v| v.into_owned())
}

/// Value of a namespaced attribute such as `r:id` or `r:embed`, whatever the prefix.
fn prefixed_attr_value(e: &BytesStart<'_>, reader: &Reader<&[u8]>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == local)
        .and_then(|a| a.decode_and_unescape_value(reader).ok())
        .map(|v| v.into_owned())
}

fn parse_relationships(xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rels = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (
                    attr_value(&e, &reader, b"Id"),
                    attr_value(&e, &reader, b"Target"),
                ) {
                    rels.push(Relationship {
                        id,
                        target,
                        rel_type: attr_value(&e, &reader, b"Type").unwrap_or_default(),
                        external: attr_value(&e, &reader, b"TargetMode").as_deref() == Some("External"),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("XML parse error in relationships: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn parse_slide_ids(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut ids = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) if e.local_name().as_ref() == b"sldId" => {
                if let Some(id) = prefixed_attr_value(&e, &reader, b"id") {
                    ids.push(id);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("XML parse error in presentation.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(ids)
}

/// Resolves a relationship target against the directory of the part that owns it.
fn resolve_target(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SlideContent {
    paragraphs: Vec<String>,
    picture_rel_ids: Vec<String>,
}

fn parse_slide(xml: &str) -> Result<SlideContent> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut content = SlideContent::default();

    let mut paragraph = String::new();
    let mut in_text = false;
    let mut pic_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => paragraph.clear(),
                b"t" => in_text = true,
                b"pic" => pic_depth += 1,
                b"blip" if pic_depth > 0 => {
                    if let Some(id) = prefixed_attr_value(&e, &reader, b"embed") {
                        content.picture_rel_ids.push(id);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" => paragraph.push('\n'),
                b"blip" if pic_depth > 0 => {
                    if let Some(id) = prefixed_attr_value(&e, &reader, b"embed") {
                        content.picture_rel_ids.push(id);
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e.unescape().map_err(|e| anyhow!("Bad text run: {e}"))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"pic" => pic_depth = pic_depth.saturating_sub(1),
                b"p" => {
                    let text = paragraph.trim();
                    if !text.is_empty() {
                        content.paragraphs.push(text.to_string());
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("XML parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(content)
}

/// MIME type for media the inference endpoints accept inline; `None` for anything else.
pub fn image_mime_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn first_usable_image<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    slide_path: &str,
    rel_ids: &[String],
) -> Result<Option<(String, Vec<u8>)>> {
    if rel_ids.is_empty() {
        return Ok(None);
    }

    let (dir, file) = slide_path.rsplit_once('/').unwrap_or(("", slide_path));
    let rels_path = format!("{dir}/_rels/{file}.rels");
    let Some(rels_xml) = read_text(archive, &rels_path)? else {
        return Ok(None);
    };
    let images: HashMap<String, Relationship> = parse_relationships(&rels_xml)?
        .into_iter()
        .filter(|r| r.rel_type.ends_with(IMAGE_REL_TYPE) && !r.external)
        .map(|r| (r.id.clone(), r))
        .collect();

    for id in rel_ids {
        let Some(rel) = images.get(id) else { continue };
        let media_path = resolve_target(dir, &rel.target);
        let Some(mime_type) = image_mime_type(&media_path) else {
            debug!("Not attaching {}: unsupported image type", media_path);
            continue;
        };
        match read_entry(archive, &media_path)? {
            Some(data) if !data.is_empty() => return Ok(Some((mime_type.to_string(), data))),
            _ => debug!("Image {} missing from package", media_path),
        }
    }
    Ok(None)
}
