//! Doc comment parsing
//!
//! Recognizes both Google/NumPy-style section headers (`Args:`, `Returns:`,
//! `Raises:`) and the Rust markdown convention (`# Arguments`, `# Errors`).
//! The first line is the summary; lines before any section header extend
//! the description.

use serde::{Deserialize, Serialize};

/// Parsed documentation for one function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocInfo {
    pub summary: String,
    pub description: String,
    /// `name: description` pairs from the arguments section.
    pub params: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
    /// `ERROR: description` pairs from the raises/errors section.
    pub raises: Vec<(String, String)>,
    pub examples: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    Description,
    Params,
    Returns,
    Raises,
    Examples,
    Notes,
}

fn classify_header(line: &str) -> Option<Section> {
    let trimmed = line.trim().trim_end_matches(':');
    let lowered = trimmed.trim_start_matches('#').trim().to_ascii_lowercase();
    match lowered.as_str() {
        "args" | "arguments" | "parameters" => Some(Section::Params),
        "returns" | "return" => Some(Section::Returns),
        "raises" | "errors" => Some(Section::Raises),
        "example" | "examples" => Some(Section::Examples),
        "notes" | "note" => Some(Section::Notes),
        _ => None,
    }
}

/// Parse a doc comment body. Empty input yields empty fields.
pub fn parse(doc: &str) -> DocInfo {
    let mut info = DocInfo::default();
    let mut section = Section::Description;
    let mut description_lines: Vec<String> = Vec::new();
    let mut returns_lines: Vec<String> = Vec::new();
    let mut notes_lines: Vec<String> = Vec::new();
    let mut saw_summary = false;

    for raw in doc.lines() {
        let line = raw.trim();

        if let Some(next) = classify_header(line) {
            section = next;
            continue;
        }

        if !saw_summary {
            if line.is_empty() {
                continue;
            }
            info.summary = line.to_string();
            saw_summary = true;
            continue;
        }

        match section {
            Section::Description => {
                if !line.is_empty() || !description_lines.is_empty() {
                    description_lines.push(line.to_string());
                }
            }
            Section::Params => {
                if let Some((name, desc)) = split_item_line(line) {
                    info.params.push((name, desc));
                } else if let Some(last) = info.params.last_mut() {
                    // Continuation of the previous parameter description.
                    if !line.is_empty() {
                        if !last.1.is_empty() {
                            last.1.push(' ');
                        }
                        last.1.push_str(line);
                    }
                }
            }
            Section::Returns => {
                if !line.is_empty() {
                    returns_lines.push(line.to_string());
                }
            }
            Section::Raises => {
                if let Some((name, desc)) = split_item_line(line) {
                    info.raises.push((name, desc));
                } else if let Some(last) = info.raises.last_mut() {
                    if !line.is_empty() {
                        if !last.1.is_empty() {
                            last.1.push(' ');
                        }
                        last.1.push_str(line);
                    }
                }
            }
            Section::Examples => {
                info.examples.push(raw.trim_end().to_string());
            }
            Section::Notes => {
                if !line.is_empty() {
                    notes_lines.push(line.to_string());
                }
            }
        }
    }

    while description_lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        description_lines.pop();
    }
    info.description = description_lines.join("\n");
    if !returns_lines.is_empty() {
        info.returns = Some(returns_lines.join(" "));
    }
    if !notes_lines.is_empty() {
        info.notes = Some(notes_lines.join(" "));
    }
    // Trim leading blank lines from examples.
    while info.examples.first().map(|l| l.is_empty()).unwrap_or(false) {
        info.examples.remove(0);
    }
    info
}

/// Match a `NAME: description` item line. The name must be a single
/// identifier-ish token, which keeps prose containing colons out.
fn split_item_line(line: &str) -> Option<(String, String)> {
    let (name, desc) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '*')
    {
        return None;
    }
    Some((name.to_string(), desc.trim().to_string()))
}
