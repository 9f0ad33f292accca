
use anyhow::Result;
use roxmltree::{Document, Node};
use crate::errors::ExportError;
use crate::util::SvnRev;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathAction {
    Add,
    Modify,
    Delete,
    Replace,
}

impl PathAction {
    fn from_code(code: &str) -> Option<PathAction> {
        match code {
            "A" => Some(PathAction::Add),
            "M" => Some(PathAction::Modify),
            "D" => Some(PathAction::Delete),
            "R" => Some(PathAction::Replace),
            _ => None,
        }
    }

    pub fn is_add(self) -> bool {
        matches!(self, PathAction::Add | PathAction::Replace)
    }

    pub fn is_delete(self) -> bool {
        matches!(self, PathAction::Delete | PathAction::Replace)
    }
}

#[derive(Debug, Clone)]
pub struct PathChange {
    /// Absolute repository path with a leading slash.
    pub path: String,
    pub action: PathAction,
    pub copyfrom_rev: Option<SvnRev>,
    pub copyfrom_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub revision: SvnRev,
    pub author: Option<String>,
    pub date: String,
    /// Empty when the entry carries no <paths> element.
    pub paths: Vec<PathChange>,
}

fn get_text(n: &Node) -> String {
    match n.first_child() {
        Some(node) => node.text().unwrap_or("").to_owned(),
        None => "".to_owned(),
    }
}

fn get_child_text(parent: &Node, name: &str) -> Option<String> {
    parent
        .children()
        .find(|n| n.has_tag_name(name))
        .map(|n| get_text(&n))
}

fn get_entry_paths(log_entry: &Node) -> Result<Vec<PathChange>> {
    let mut paths = Vec::new();
    for path_node in log_entry.descendants().filter(|n| n.has_tag_name("path")) {
        let code = path_node.attribute("action").unwrap_or("");
        let action = PathAction::from_code(code).ok_or_else(|| {
            ExportError::MalformedLog(format!("unknown path action '{}'", code))
        })?;
        let copyfrom_rev = match path_node.attribute("copyfrom-rev") {
            Some(rev) => Some(rev.parse::<SvnRev>().map_err(|_| {
                ExportError::MalformedLog(format!("bad copyfrom-rev '{}'", rev))
            })?),
            None => None,
        };
        paths.push(PathChange {
            path: get_text(&path_node),
            action,
            copyfrom_rev,
            copyfrom_path: path_node.attribute("copyfrom-path").map(|p| p.to_owned()),
        });
    }
    Ok(paths)
}

/// Parse the output of `svn log --xml --verbose` into owned entries,
/// sorted by ascending revision number.
pub fn parse_log(xml: &str) -> Result<Vec<LogEntry>> {
    let doc = Document::parse(xml)
        .map_err(|e| ExportError::MalformedLog(e.to_string()))?;
    let mut entries = Vec::new();
    for log_entry in doc.descendants().filter(|n| n.has_tag_name("logentry")) {
        let revision = log_entry
            .attribute("revision")
            .and_then(|r| r.parse::<SvnRev>().ok())
            .ok_or_else(|| {
                ExportError::MalformedLog("logentry without a revision number".to_string())
            })?;
        let entry = LogEntry {
            revision,
            author: get_child_text(&log_entry, "author"),
            date: get_child_text(&log_entry, "date").ok_or_else(|| {
                ExportError::MalformedLog(format!("logentry r{} without a date", revision))
            })?,
            paths: get_entry_paths(&log_entry)?,
        };
        entries.push(entry);
    }
    entries.sort_by_key(|e| e.revision);
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSegment {
    pub start: SvnRev,
    pub end: SvnRev,
    /// Repository-relative path without a leading slash.
    pub path: String,
}

/// Walks a branch location backwards through history, youngest segment
/// first, following branch copies via copyfrom records in the log.
pub struct LocationSegments<'a> {
    log: &'a [LogEntry],
    path: String,
    rev: SvnRev,
    done: bool,
}

pub fn location_segments<'a>(
    log: &'a [LogEntry],
    path: &str,
    peg: Option<SvnRev>,
) -> LocationSegments<'a> {
    let rev = peg.unwrap_or_else(|| log.last().map_or(0, |e| e.revision));
    LocationSegments {
        log,
        path: path.trim_start_matches('/').to_owned(),
        rev,
        done: false,
    }
}

impl<'a> LocationSegments<'a> {
    //  The most specific added ancestor wins when a single revision
    //  creates several directories above the location.
    fn find_origin(&self, abs: &str) -> Option<(&'a LogEntry, &'a PathChange)> {
        let log: &'a [LogEntry] = self.log;
        for entry in log.iter().rev() {
            if entry.revision > self.rev {
                continue;
            }
            let origin = entry
                .paths
                .iter()
                .filter(|p| p.action.is_add())
                .filter(|p| abs == p.path || abs.starts_with(&format!("{}/", p.path)))
                .max_by_key(|p| p.path.len());
            if let Some(p) = origin {
                return Some((entry, p));
            }
        }
        None
    }
}

impl Iterator for LocationSegments<'_> {
    type Item = Result<LocationSegment, ExportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let abs = format!("/{}", self.path);
        match self.find_origin(&abs) {
            Some((entry, origin)) => {
                let segment = LocationSegment {
                    start: entry.revision,
                    end: self.rev,
                    path: self.path.clone(),
                };
                match (&origin.copyfrom_path, origin.copyfrom_rev) {
                    (Some(from_path), Some(from_rev)) => {
                        let remainder = &abs[origin.path.len()..];
                        self.path = format!("{}{}", from_path, remainder)
                            .trim_start_matches('/')
                            .to_owned();
                        self.rev = from_rev;
                    }
                    _ => self.done = true,
                }
                Some(Ok(segment))
            }
            None if self.path.is_empty() => {
                //  The repository root was never "added"; its history
                //  covers everything up to the peg.
                self.done = true;
                Some(Ok(LocationSegment {
                    start: 0,
                    end: self.rev,
                    path: String::new(),
                }))
            }
            None => {
                self.done = true;
                Some(Err(ExportError::UnknownLocation {
                    path: self.path.clone(),
                    rev: self.rev,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<log>
<logentry revision="3">
<author>carol</author>
<date>1970-01-03T00:00:00.000000Z</date>
<paths><path action="M">/branches/feature/file</path></paths>
</logentry>
<logentry revision="2">
<date>1970-01-02T00:00:00.000000Z</date>
<paths><path action="A" copyfrom-path="/trunk" copyfrom-rev="1">/branches/feature</path></paths>
</logentry>
<logentry revision="1">
<author>alice</author>
<date>1970-01-01T00:00:00.000000Z</date>
<paths><path action="A">/trunk</path><path action="A">/trunk/file</path></paths>
</logentry>
</log>"#;

    #[test]
    fn parses_entries_ascending() {
        let entries = parse_log(SAMPLE).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].revision, 1);
        assert_eq!(entries[0].author.as_deref(), Some("alice"));
        assert_eq!(entries[1].author, None);
        let copy = &entries[1].paths[0];
        assert_eq!(copy.copyfrom_path.as_deref(), Some("/trunk"));
        assert_eq!(copy.copyfrom_rev, Some(1));
        assert!(copy.action.is_add());
    }

    #[test]
    fn rejects_unknown_actions() {
        let xml = r#"<log><logentry revision="1">
            <date>1970-01-01T00:00:00.000000Z</date>
            <paths><path action="X">/trunk</path></paths>
            </logentry></log>"#;
        assert!(parse_log(xml).is_err());
    }

    #[test]
    fn segments_follow_branch_copies() {
        let entries = parse_log(SAMPLE).unwrap();
        let segments: Vec<_> = location_segments(&entries, "branches/feature", None)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            segments,
            vec![
                LocationSegment { start: 2, end: 3, path: "branches/feature".to_string() },
                LocationSegment { start: 1, end: 1, path: "trunk".to_string() },
            ]
        );
    }

    #[test]
    fn segments_follow_copies_of_parent_directories() {
        let xml = r#"<log>
<logentry revision="2">
<date>1970-01-02T00:00:00.000000Z</date>
<paths><path action="A" copyfrom-path="/proj1" copyfrom-rev="1">/proj2</path></paths>
</logentry>
<logentry revision="1">
<date>1970-01-01T00:00:00.000000Z</date>
<paths><path action="A">/proj1</path><path action="A">/proj1/trunk</path></paths>
</logentry>
</log>"#;
        let entries = parse_log(xml).unwrap();
        let segments: Vec<_> = location_segments(&entries, "proj2/trunk", None)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            segments,
            vec![
                LocationSegment { start: 2, end: 2, path: "proj2/trunk".to_string() },
                LocationSegment { start: 1, end: 1, path: "proj1/trunk".to_string() },
            ]
        );
    }

    #[test]
    fn root_history_reaches_revision_zero() {
        let entries = parse_log(SAMPLE).unwrap();
        let segments: Vec<_> = location_segments(&entries, "", Some(2))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            segments,
            vec![LocationSegment { start: 0, end: 2, path: String::new() }]
        );
    }

    #[test]
    fn missing_locations_are_reported() {
        let entries = parse_log(SAMPLE).unwrap();
        let result: Result<Vec<_>, _> =
            location_segments(&entries, "tags/1.0", None).collect();
        assert!(result.is_err());
    }
}
