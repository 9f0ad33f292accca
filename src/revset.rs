
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use crate::errors::ExportError;
use crate::svnlog::{location_segments, LogEntry};
use crate::util::SvnRev;

/// Closed range of revisions plus the mergeinfo "inheritable" flag.
pub type RevRange = (SvnRev, SvnRev, bool);

/// Per-branch sets of revision ranges, keyed by `/`-prefixed branch path.
/// Ranges are kept sorted, non-overlapping and non-abutting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionSet {
    branches: BTreeMap<String, Vec<RevRange>>,
}

impl RevisionSet {
    pub fn new() -> RevisionSet {
        RevisionSet::default()
    }

    /// Insert `[start, end]`, coalescing with either neighbour when the
    /// gap between them is at most one revision.
    pub fn add_segment(&mut self, branch: &str, start: SvnRev, end: SvnRev) {
        let ranges = self.branches.entry(branch.to_owned()).or_default();
        let i = ranges.partition_point(|r| r.0 < start);

        let mut start = start;
        let mut end = end;
        let mut lo = i;
        let mut hi = i;
        if i > 0 {
            let (rstart, rend, _) = ranges[i - 1];
            if rend + 1 >= start {
                start = rstart;
                end = end.max(rend);
                lo = i - 1;
            }
        }
        if i < ranges.len() {
            let (rstart, rend, _) = ranges[i];
            if rstart <= end + 1 {
                end = end.max(rend);
                hi = i + 1;
            }
        }
        ranges.splice(lo..hi, [(start, end, true)]);
    }

    /// Overwrite this set's branches with the other's ranges.
    pub fn update(&mut self, other: &RevisionSet) {
        for (branch, ranges) in &other.branches {
            self.branches.insert(branch.clone(), ranges.clone());
        }
    }
}

/// A `RevisionSet` filled in from natural branch history: every segment
/// the location oracle reports for a head, transitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ancestors {
    set: RevisionSet,
}

impl Ancestors {
    pub fn new() -> Ancestors {
        Ancestors::default()
    }

    pub fn as_set(&self) -> &RevisionSet {
        &self.set
    }

    /// Record the full natural history of `branch@rev`.  Walking stops
    /// early when a segment's start is already present: the older chain
    /// has been recorded by a previous head.
    pub fn add_natural(
        &mut self,
        log: &[LogEntry],
        branch: &str,
        rev: SvnRev,
    ) -> Result<(), ExportError> {
        let branch = branch.trim_start_matches('/');
        for segment in location_segments(log, branch, Some(rev)) {
            let segment = segment?;
            if let ControlFlow::Break(()) =
                self.on_segment(segment.start, segment.end, &segment.path)
            {
                break;
            }
        }
        Ok(())
    }

    fn on_segment(&mut self, start: SvnRev, end: SvnRev, path: &str) -> ControlFlow<()> {
        let ranges = self.set.branches.entry(format!("/{}", path)).or_default();
        let i = ranges.partition_point(|r| r.0 < start);
        if i < ranges.len() {
            let (rstart, rend, inheritable) = ranges[i];
            if rstart == start {
                ranges[i] = (rstart, rend.max(end), inheritable);
                return ControlFlow::Break(());
            }
        }
        ranges.insert(i, (start, end, true));
        ControlFlow::Continue(())
    }
}

/// Parse an `svn:mergeinfo` property value: one `PATH:RANGES` entry per
/// line, ranges comma-separated `N` or `N-M`, a trailing `*` marking a
/// non-inheritable range.
pub fn parse_mergeinfo(value: &str) -> Result<Vec<(String, Vec<RevRange>)>, ExportError> {
    fn parse_rev(text: &str) -> Result<SvnRev, ExportError> {
        text.parse::<SvnRev>().map_err(|_| {
            ExportError::MalformedDump(format!("bad mergeinfo revision '{}'", text))
        })
    }

    let mut entries = Vec::new();
    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (path, range_list) = line.rsplit_once(':').ok_or_else(|| {
            ExportError::MalformedDump(format!("bad mergeinfo line '{}'", line))
        })?;
        let mut ranges = Vec::new();
        for part in range_list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (body, inheritable) = match part.strip_suffix('*') {
                Some(body) => (body, false),
                None => (part, true),
            };
            let (start, end) = match body.split_once('-') {
                Some((a, b)) => (parse_rev(a)?, parse_rev(b)?),
                None => {
                    let rev = parse_rev(body)?;
                    (rev, rev)
                }
            };
            ranges.push((start, end, inheritable));
        }
        entries.push((path.to_owned(), ranges));
    }
    Ok(entries)
}
