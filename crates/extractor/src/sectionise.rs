use once_cell::sync::Lazy;
use regex::Regex;

use contextd_core::{OutlineEntry, Section, Sectionised};

/// Greedy packing cap per section, in characters.
const SECTION_MAX_CHARS: usize = 2000;
const BLURB_MAX_CHARS: usize = 160;

static PARAGRAPH_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").unwrap());

/// Split extracted text into ranked sections with stable `sXX` ids.
///
/// Paragraphs are packed greedily: the buffer flushes when adding the next
/// paragraph would push it past the cap. A single oversized paragraph still
/// becomes its own section. Section ids are 1-based and zero-padded so that
/// `section_id == "s" + pad2(rank)` always holds.
pub fn sectionise(text: &str) -> Sectionised {
    let paragraphs: Vec<&str> = PARAGRAPH_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut out = Sectionised::default();
    let mut buffer: Vec<&str> = Vec::new();
    let mut rank: i32 = 1;

    for para in paragraphs {
        let buffered: usize = buffer.iter().map(|p| p.chars().count()).sum();
        if !buffer.is_empty() && buffered + para.chars().count() > SECTION_MAX_CHARS {
            flush(&mut out, &mut buffer, &mut rank);
        }
        buffer.push(para);
    }
    flush(&mut out, &mut buffer, &mut rank);

    out
}

fn flush(out: &mut Sectionised, buffer: &mut Vec<&str>, rank: &mut i32) {
    if buffer.is_empty() {
        return;
    }
    let content = buffer.join("\n\n");
    let section_id = format!("s{:02}", rank);
    let heading = format!("Section {rank}");
    let blurb = content
        .chars()
        .take(BLURB_MAX_CHARS)
        .collect::<String>()
        .trim()
        .to_string();

    out.sections.push(Section {
        section_id: section_id.clone(),
        heading: heading.clone(),
        content,
        rank: *rank,
    });
    out.outline.push(OutlineEntry {
        section_id,
        heading,
        blurb,
    });

    *rank += 1;
    buffer.clear();
}
