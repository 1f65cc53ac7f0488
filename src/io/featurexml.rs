//! Minimal featureXML reader and writer.
//!
//! Covers the subset of featureXML that the tools in this crate exchange:
//! positions, intensity, charge, quality, the RT extent of the first convex
//! hull and best-hit peptide sequences. Anything else in a full featureXML
//! document is skipped on read and never produced on write.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::model::{Feature, FeatureMap};

/// Errors raised by featureXML I/O.
#[derive(Debug, thiserror::Error)]
pub enum FeatureXmlError {
    /// XML-level failure
    #[error("xml error: {0}")]
    Xml(String),

    /// Underlying I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Attribute or text content was not valid UTF-8
    #[error("utf-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl From<quick_xml::Error> for FeatureXmlError {
    fn from(e: quick_xml::Error) -> Self {
        FeatureXmlError::Xml(e.to_string())
    }
}

/// Read a feature map from a featureXML file.
pub fn load_feature_map(path: impl AsRef<Path>) -> Result<FeatureMap, FeatureXmlError> {
    let file = File::open(path.as_ref())?;
    read_feature_map(BufReader::new(file))
}

/// Read a feature map from any buffered source.
pub fn read_feature_map<R: BufRead>(source: R) -> Result<FeatureMap, FeatureXmlError> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);

    let mut map = FeatureMap::default();
    let mut buf = Vec::new();

    let mut current: Option<Feature> = None;
    let mut fallback_id = 0u64;
    let mut position_dim: Option<u8> = None;
    let mut text_target: Option<TextTarget> = None;
    let mut hull_depth = 0usize;
    let mut hull_rts: Vec<f64> = Vec::new();

    loop {
        buf.clear();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(FeatureXmlError::from)?;
        match event {
            Event::Start(ref e) => match e.name().as_ref() {
                b"feature" => {
                    let mut feature = Feature::default();
                    feature.id = get_attribute(e, "id")?
                        .and_then(|id| parse_feature_id(&id))
                        .unwrap_or(fallback_id);
                    fallback_id = feature.id + 1;
                    current = Some(feature);
                    hull_rts.clear();
                }
                b"position" => {
                    position_dim = get_attribute(e, "dim")?.and_then(|d| d.parse().ok());
                    text_target = Some(TextTarget::Position);
                }
                b"intensity" => text_target = Some(TextTarget::Intensity),
                b"charge" => text_target = Some(TextTarget::Charge),
                b"overallquality" => text_target = Some(TextTarget::Quality),
                b"convexhull" => hull_depth += 1,
                _ => {}
            },
            Event::Empty(ref e) => match e.name().as_ref() {
                b"pt" => {
                    // Only the first hull defines the RT extent.
                    if hull_depth == 1 {
                        if let Some(x) = get_attribute(e, "x")?.and_then(|x| x.parse().ok()) {
                            hull_rts.push(x);
                        }
                    }
                }
                b"PeptideHit" => {
                    if let (Some(feature), Some(seq)) =
                        (current.as_mut(), get_attribute(e, "sequence")?)
                    {
                        if !feature.peptide_sequences.contains(&seq) {
                            feature.peptide_sequences.push(seq);
                        }
                    }
                }
                _ => {}
            },
            Event::Text(ref t) => {
                if let (Some(target), Some(feature)) = (text_target, current.as_mut()) {
                    let text = std::str::from_utf8(t)?.trim().to_string();
                    if let Ok(value) = text.parse::<f64>() {
                        match target {
                            TextTarget::Position => match position_dim {
                                Some(0) => feature.rt = value,
                                Some(1) => feature.mz = value,
                                _ => {}
                            },
                            TextTarget::Intensity => feature.intensity = value,
                            TextTarget::Charge => feature.charge = value as i32,
                            TextTarget::Quality => feature.quality = value,
                        }
                    }
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"feature" => {
                    if let Some(mut feature) = current.take() {
                        feature.rt_range = hull_extent(&hull_rts, feature.rt);
                        map.features.push(feature);
                    }
                }
                b"position" | b"intensity" | b"charge" | b"overallquality" => {
                    text_target = None;
                    position_dim = None;
                }
                b"convexhull" => hull_depth = hull_depth.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(map)
}

#[derive(Debug, Clone, Copy)]
enum TextTarget {
    Position,
    Intensity,
    Charge,
    Quality,
}

fn parse_feature_id(id: &str) -> Option<u64> {
    id.strip_prefix("f_").unwrap_or(id).parse().ok()
}

fn hull_extent(rts: &[f64], fallback: f64) -> (f64, f64) {
    if rts.is_empty() {
        return (fallback, fallback);
    }
    let min = rts.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = rts.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

/// Write a feature map to a featureXML file.
pub fn store_feature_map(
    path: impl AsRef<Path>,
    map: &FeatureMap,
) -> Result<(), FeatureXmlError> {
    let file = File::create(path.as_ref())?;
    write_feature_map(BufWriter::new(file), map)
}

/// Write a feature map to any byte sink.
pub fn write_feature_map<W: Write>(sink: W, map: &FeatureMap) -> Result<(), FeatureXmlError> {
    let mut writer = Writer::new(sink);
    let w = &mut writer;

    write_event(w, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut root = BytesStart::new("featureMap");
    root.push_attribute(("version", "1.9"));
    write_event(w, Event::Start(root))?;

    let mut list = BytesStart::new("featureList");
    let count = map.features.len().to_string();
    list.push_attribute(("count", count.as_str()));
    write_event(w, Event::Start(list))?;

    for feature in &map.features {
        let mut elem = BytesStart::new("feature");
        let id = format!("f_{}", feature.id);
        elem.push_attribute(("id", id.as_str()));
        write_event(w, Event::Start(elem))?;

        write_text_element_attr(w, "position", &[("dim", "0")], &format!("{:.6}", feature.rt))?;
        write_text_element_attr(w, "position", &[("dim", "1")], &format!("{:.10}", feature.mz))?;
        write_text_element_attr(w, "intensity", &[], &format!("{:.4}", feature.intensity))?;
        write_text_element_attr(w, "charge", &[], &feature.charge.to_string())?;
        write_text_element_attr(w, "overallquality", &[], &format!("{:.6}", feature.quality))?;

        let mut hull = BytesStart::new("convexhull");
        hull.push_attribute(("nr", "0"));
        write_event(w, Event::Start(hull))?;
        for rt in [feature.rt_range.0, feature.rt_range.1] {
            let mut pt = BytesStart::new("pt");
            let x = format!("{rt:.6}");
            let y = format!("{:.10}", feature.mz);
            pt.push_attribute(("x", x.as_str()));
            pt.push_attribute(("y", y.as_str()));
            write_event(w, Event::Empty(pt))?;
        }
        write_event(w, Event::End(BytesEnd::new("convexhull")))?;

        if !feature.peptide_sequences.is_empty() {
            write_event(w, Event::Start(BytesStart::new("PeptideIdentification")))?;
            for sequence in &feature.peptide_sequences {
                let mut hit = BytesStart::new("PeptideHit");
                hit.push_attribute(("sequence", sequence.as_str()));
                write_event(w, Event::Empty(hit))?;
            }
            write_event(w, Event::End(BytesEnd::new("PeptideIdentification")))?;
        }

        write_event(w, Event::End(BytesEnd::new("feature")))?;
    }

    write_event(w, Event::End(BytesEnd::new("featureList")))?;
    write_event(w, Event::End(BytesEnd::new("featureMap")))?;
    Ok(())
}

fn write_event<W: Write>(writer: &mut Writer<W>, event: Event) -> Result<(), FeatureXmlError> {
    writer
        .write_event(event)
        .map_err(|e| FeatureXmlError::Xml(format!("{e}")))
}

fn write_text_element_attr<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<(), FeatureXmlError> {
    let mut start = BytesStart::new(name);
    for (key, value) in attrs {
        start.push_attribute((*key, *value));
    }
    write_event(writer, Event::Start(start))?;
    write_event(writer, Event::Text(BytesText::new(text)))?;
    write_event(writer, Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn get_attribute(e: &BytesStart, name: &str) -> Result<Option<String>, FeatureXmlError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|a| FeatureXmlError::Xml(a.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let decoded = std::str::from_utf8(&attr.value)
                .map_err(|e| FeatureXmlError::Xml(e.to_string()))?;
            let value = quick_xml::escape::unescape(decoded)
                .map_err(|e| FeatureXmlError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
