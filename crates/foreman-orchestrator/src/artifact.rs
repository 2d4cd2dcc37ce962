//! Structured artifact extraction and archive packaging.
//!
//! The refiner's consolidated text carries three kinds of markers:
//!
//! - `<project_name>NAME</project_name>`
//! - `<folder_structure>{JSON}</folder_structure>`, where nested objects are
//!   folders and `null` or string leaves are files
//! - `<file name="PATH">CONTENT</file>` for each declared file
//!
//! Extraction is tolerant: the first matching tag pair wins, and duplicate,
//! unterminated or missing markers are collected as [`ExtractionIssue`]s
//! instead of aborting. Packaging turns an [`Extraction`] into a zip archive
//! whose bytes depend only on its inputs.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::Result;

/// Archive entry holding the raw folder-structure JSON.
pub const FOLDER_STRUCTURE_ENTRY: &str = "folder_structure.json";

/// Archive entry holding the full consolidated text.
pub const FINAL_OUTPUT_ENTRY: &str = "final_output.txt";

/// Archive entry holding the run's JSON-lines trace.
pub const LOG_ENTRY: &str = "exec_log.jsonl";

const COMPANION_ENTRIES: [&str; 3] = [FOLDER_STRUCTURE_ENTRY, FINAL_OUTPUT_ENTRY, LOG_ENTRY];

const PROJECT_NAME_TAG: &str = "project_name";
const FOLDER_STRUCTURE_TAG: &str = "folder_structure";
const FILE_OPEN: &str = "<file name=";
const FILE_CLOSE: &str = "</file>";

/// A structured-output problem found during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionIssue {
    /// No `<project_name>` marker; the fallback name was used.
    MissingProjectName,
    /// A single-use marker appeared more than once; the first was used.
    DuplicateTag { tag: String, count: usize },
    /// A start marker had no matching end marker.
    UnterminatedTag { tag: String },
    /// No `<folder_structure>` marker.
    MissingFolderStructure,
    /// The folder structure was not valid JSON.
    MalformedFolderStructure { error: String },
    /// The folder structure was valid JSON but not an object.
    FolderStructureNotObject,
    /// A declared file had no `<file name=...>` block.
    MissingFile { path: String },
    /// More than one block named the same file; the first was used.
    DuplicateFile { path: String },
    /// A declared path escapes the archive root or collides with a companion entry.
    RejectedPath { path: String },
    /// A folder-structure value that is neither an object, `null` nor a string.
    InvalidStructureEntry { path: String },
}

impl fmt::Display for ExtractionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProjectName => write!(f, "project name not found"),
            Self::DuplicateTag { tag, count } => write!(f, "<{tag}> appears {count} times, using the first"),
            Self::UnterminatedTag { tag } => write!(f, "<{tag}> has no closing tag"),
            Self::MissingFolderStructure => write!(f, "folder structure not found"),
            Self::MalformedFolderStructure { error } => write!(f, "folder structure is not valid JSON: {error}"),
            Self::FolderStructureNotObject => write!(f, "folder structure is not a JSON object"),
            Self::MissingFile { path } => write!(f, "missing file contents for {path}"),
            Self::DuplicateFile { path } => write!(f, "file {path} appears more than once, using the first"),
            Self::RejectedPath { path } => write!(f, "rejected file path {path}"),
            Self::InvalidStructureEntry { path } => {
                write!(f, "folder structure entry {path} is neither a folder nor a file")
            }
        }
    }
}

/// Everything recovered from one consolidated text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Extracted project name, if present.
    pub project_name: Option<String>,
    /// Body of the `<folder_structure>` marker as written, trimmed.
    pub raw_folder_structure: Option<String>,
    /// Parsed folder structure, if present and valid.
    pub folder_structure: Option<Value>,
    /// Declared files that had content, path to content.
    pub files: BTreeMap<String, String>,
    /// Problems found.
    pub issues: Vec<ExtractionIssue>,
}

impl Extraction {
    /// Parses `text`.
    pub fn parse(text: &str) -> Self {
        let mut extraction = Self::default();

        extraction.project_name = find_tag(text, PROJECT_NAME_TAG, &mut extraction.issues)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        if extraction.project_name.is_none() {
            extraction.issues.push(ExtractionIssue::MissingProjectName);
        }

        let Some(raw_structure) = find_tag(text, FOLDER_STRUCTURE_TAG, &mut extraction.issues) else {
            extraction.issues.push(ExtractionIssue::MissingFolderStructure);
            return extraction;
        };

        let raw_structure = raw_structure.trim();
        extraction.raw_folder_structure = Some(raw_structure.to_string());

        let structure: Value = match serde_json::from_str(raw_structure) {
            Ok(value) => value,
            Err(err) => {
                extraction
                    .issues
                    .push(ExtractionIssue::MalformedFolderStructure { error: err.to_string() });
                return extraction;
            }
        };
        if !structure.is_object() {
            extraction.issues.push(ExtractionIssue::FolderStructureNotObject);
            extraction.folder_structure = Some(structure);
            return extraction;
        }

        let mut declared = Leaves::default();
        walk("", &structure, &mut declared);
        for path in declared.invalid {
            extraction.issues.push(ExtractionIssue::InvalidStructureEntry { path });
        }
        let blocks = file_blocks(text);

        for path in declared.files {
            if !is_safe_path(&path) {
                extraction.issues.push(ExtractionIssue::RejectedPath { path });
                continue;
            }
            match blocks.get(path.as_str()) {
                Some(contents) => {
                    if contents.len() > 1 {
                        extraction.issues.push(ExtractionIssue::DuplicateFile { path: path.clone() });
                    }
                    extraction.files.insert(path, contents[0].to_string());
                }
                None => extraction.issues.push(ExtractionIssue::MissingFile { path }),
            }
        }

        extraction.folder_structure = Some(structure);
        extraction
    }

    /// Paths of the files that made it into the extraction.
    pub fn file_paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    /// Declared files that had no content block.
    pub fn missing_files(&self) -> Vec<&str> {
        self.issues
            .iter()
            .filter_map(|issue| match issue {
                ExtractionIssue::MissingFile { path } => Some(path.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Packages the extracted files and the three companion entries.
    ///
    /// The same inputs always produce the same bytes: entries are written in
    /// a fixed order with a fixed timestamp and fixed permissions.
    pub fn to_archive(&self, raw_text: &str, log: &str) -> Result<Vec<u8>> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for (path, content) in &self.files {
            zip.start_file(path.as_str(), options)?;
            zip.write_all(content.as_bytes())?;
        }

        let structure = self.raw_folder_structure.as_deref().unwrap_or("null");
        zip.start_file(FOLDER_STRUCTURE_ENTRY, options)?;
        zip.write_all(structure.as_bytes())?;

        zip.start_file(FINAL_OUTPUT_ENTRY, options)?;
        zip.write_all(raw_text.as_bytes())?;

        zip.start_file(LOG_ENTRY, options)?;
        zip.write_all(log.as_bytes())?;

        Ok(zip.finish()?.into_inner())
    }
}

/// Body of the first `<tag>...</tag>` pair. Repeats and a missing end tag are
/// reported into `issues`.
fn find_tag<'t>(text: &'t str, tag: &str, issues: &mut Vec<ExtractionIssue>) -> Option<&'t str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let count = text.matches(open.as_str()).count();
    if count > 1 {
        issues.push(ExtractionIssue::DuplicateTag { tag: tag.to_string(), count });
    }

    let start = text.find(open.as_str())? + open.len();
    match text[start..].find(close.as_str()) {
        Some(end) => Some(&text[start..start + end]),
        None => {
            issues.push(ExtractionIssue::UnterminatedTag { tag: tag.to_string() });
            None
        }
    }
}

/// Appends the path of every file leaf under `node` to `acc`, depth first.
///
/// Objects are folders; `null` and string values mark files. Any other value
/// is recorded in `acc.invalid`.
pub fn walk(path: &str, node: &Value, acc: &mut Leaves) {
    match node {
        Value::Object(entries) => {
            for (name, child) in entries {
                let child_path =
                    if path.is_empty() { name.clone() } else { format!("{path}/{name}") };
                walk(&child_path, child, acc);
            }
        }
        _ if path.is_empty() => {}
        Value::Null | Value::String(_) => acc.files.push(path.to_string()),
        _ => acc.invalid.push(path.to_string()),
    }
}

/// Paths collected by [`walk`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Leaves {
    /// File leaves, depth first.
    pub files: Vec<String>,
    /// Values that are neither folders nor files.
    pub invalid: Vec<String>,
}

/// Every `<file name="PATH">CONTENT</file>` block, keyed by normalised path.
/// Both quote styles are accepted.
fn file_blocks(text: &str) -> BTreeMap<String, Vec<&str>> {
    let mut blocks: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    let mut rest = text;

    while let Some(pos) = rest.find(FILE_OPEN) {
        let after = &rest[pos + FILE_OPEN.len()..];
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            rest = after;
            continue;
        };
        let after_quote = &after[1..];
        let Some(name_end) = after_quote.find(quote) else { break };
        let name = &after_quote[..name_end];

        let tail = after_quote[name_end + 1..].trim_start();
        let Some(body_start) = tail.strip_prefix('>') else {
            rest = after_quote;
            continue;
        };
        let Some(body_end) = body_start.find(FILE_CLOSE) else { break };

        blocks.entry(normalise_path(name)).or_default().push(&body_start[..body_end]);
        rest = &body_start[body_end + FILE_CLOSE.len()..];
    }

    blocks
}

fn normalise_path(name: &str) -> String {
    let mut path = name.trim();
    while let Some(stripped) = path.strip_prefix("./").or_else(|| path.strip_prefix('/')) {
        path = stripped;
    }
    path.to_string()
}

fn is_safe_path(path: &str) -> bool {
    !path.starts_with('/')
        && !path.split('/').any(|part| part.is_empty() || part == "..")
        && !COMPANION_ENTRIES.contains(&path)
}
