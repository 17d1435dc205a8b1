use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    AnnotatedCollection, BIBLIOGRAPHY_LABEL, BIBLIOGRAPHY_PART, DocumentOutput,
    EMPTY_BIBLIOGRAPHY_LABEL, EMPTY_BIBLIOGRAPHY_PART, Identifier, PART_KEY, SelectionMode, Unit,
};

/// Result of running one document's text through the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub output: DocumentOutput,
    /// Set when bibliography mode found no heading and emitted a placeholder.
    pub missing_bibliography: bool,
}

/// Locate the bibliography in extracted document text.
///
/// A heading is a line that starts (case-insensitively) with "biblio" or
/// "ref"/"réf" and contains nothing but that word and punctuation, e.g.
/// "References", "Bibliography:", "RÉFÉRENCES". The first such heading wins
/// and everything from it to the end of the text is returned, including one
/// blank line directly above the heading.
pub fn find_bibliography(text: &str) -> Option<&str> {
    static HEADING_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)(?:\A|\n)(\n?(?:biblio|r[eé]f)\w*\W*\n)").unwrap());

    let caps = HEADING_RE.captures(text)?;
    let start = caps.get(1)?.start();
    Some(&text[start..])
}

/// Turn a document's full text into the units it contributes to the run.
///
/// Every produced unit is annotated `identifier_key → identifier`.
pub fn select_section(
    text: String,
    identifier: &Identifier,
    mode: SelectionMode,
    identifier_key: &str,
) -> Selection {
    match mode {
        SelectionMode::Plain => Selection {
            output: DocumentOutput::Unit(
                Unit::new(text).with_annotation(identifier_key, identifier.as_str()),
            ),
            missing_bibliography: false,
        },
        SelectionMode::Bibliography => match find_bibliography(&text) {
            Some(section) => {
                let unit = Unit::new(section)
                    .with_annotation(PART_KEY, BIBLIOGRAPHY_PART)
                    .with_annotation(identifier_key, identifier.as_str());
                Selection {
                    output: DocumentOutput::Collection(AnnotatedCollection::new(
                        BIBLIOGRAPHY_LABEL,
                        vec![unit],
                    )),
                    missing_bibliography: false,
                }
            }
            None => {
                tracing::debug!(%identifier, "no bibliography heading found");
                Selection {
                    output: DocumentOutput::Unit(missing_placeholder(identifier, identifier_key)),
                    missing_bibliography: true,
                }
            }
        },
    }
}

fn missing_placeholder(identifier: &Identifier, identifier_key: &str) -> Unit {
    Unit::new(format!("Empty search Bib for DOI: {identifier}"))
        .with_label(EMPTY_BIBLIOGRAPHY_LABEL)
        .with_annotation(PART_KEY, EMPTY_BIBLIOGRAPHY_PART)
        .with_annotation(identifier_key, identifier.as_str())
}
