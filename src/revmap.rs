
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use anyhow::{Context, Result};
use regex::Regex;
use crate::util::SvnRev;

/// Contiguous runs of already-exported revisions for one branch:
/// `starts[i]` begins a run of `refs[i].len()` consecutive revisions,
/// each paired with the Git revision it produced.
#[derive(Debug, Clone, Default)]
struct BranchRuns {
    starts: Vec<SvnRev>,
    refs: Vec<Vec<String>>,
}

/// Index of everything exported so far, per branch path.
#[derive(Debug, Clone, Default)]
pub struct BranchIndex {
    branches: HashMap<String, BranchRuns>,
}

impl BranchIndex {
    pub fn new() -> BranchIndex {
        BranchIndex::default()
    }

    /// Build the index from a parsed rev-map file.
    pub fn from_seed(seed: &HashMap<String, BTreeMap<SvnRev, String>>) -> BranchIndex {
        let mut index = BranchIndex::new();
        for (branch, revs) in seed {
            let branch = branch.trim_start_matches('/');
            let runs = index.branches.entry(branch.to_owned()).or_default();
            for (&rev, gitref) in revs {
                let extends = runs
                    .starts
                    .last()
                    .map(|&start| start + runs.refs.last().unwrap().len() as SvnRev == rev)
                    .unwrap_or(false);
                if extends {
                    runs.refs.last_mut().unwrap().push(gitref.clone());
                } else {
                    runs.starts.push(rev);
                    runs.refs.push(vec![gitref.clone()]);
                }
            }
        }
        index
    }

    /// Record a newly exported revision, extending the preceding run when
    /// contiguous with it.
    pub fn remember(&mut self, branch: &str, rev: SvnRev, gitref: &str) {
        let runs = self.branches.entry(branch.to_owned()).or_default();
        let i = runs.starts.partition_point(|&s| s < rev);
        if i > 0 && runs.starts[i - 1] + runs.refs[i - 1].len() as SvnRev == rev {
            runs.refs[i - 1].push(gitref.to_owned());
        } else {
            runs.starts.insert(i, rev);
            runs.refs.insert(i, vec![gitref.to_owned()]);
        }
    }

    /// The last exported revision (and its Git ref) of the youngest run
    /// starting at or before `end`, if any.
    pub fn resume_point(&self, branch: &str, end: SvnRev) -> Option<(SvnRev, &str)> {
        let runs = self.branches.get(branch)?;
        let i = runs.starts.partition_point(|&s| s <= end);
        if i == 0 {
            return None;
        }
        let run = &runs.refs[i - 1];
        let last = runs.starts[i - 1] + run.len() as SvnRev - 1;
        Some((last, run.last().unwrap().as_str()))
    }
}

fn rev_map_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*)@(\d+) (.+)$").expect("Error parsing rev-map regular expression")
    })
}

/// Parse rev-map lines of the form `PATH@SVN-REV GIT-REV`.
pub fn parse_rev_map(text: &str) -> Result<HashMap<String, BTreeMap<SvnRev, String>>> {
    let mut map: HashMap<String, BTreeMap<SvnRev, String>> = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let caps = rev_map_re()
            .captures(line)
            .with_context(|| format!("bad rev-map line {}: '{}'", lineno + 1, line))?;
        let rev = caps[2].parse::<SvnRev>()?;
        map.entry(caps[1].to_owned())
            .or_default()
            .insert(rev, caps[3].to_owned());
    }
    Ok(map)
}

pub fn read_rev_map(path: &Path) -> Result<HashMap<String, BTreeMap<SvnRev, String>>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read rev-map file {}", path.display()))?;
    parse_rev_map(&text)
}

/// Parse authors-file lines `SVN-NAME = GIT-IDENTITY`.  Only the first
/// ` = ` separates; identities are free to contain the separator.
pub fn parse_authors(text: &str) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (svn, git) = line
            .split_once(" = ")
            .with_context(|| format!("bad authors line {}: '{}'", lineno + 1, line))?;
        map.insert(svn.to_owned(), git.to_owned());
    }
    Ok(map)
}

pub fn read_authors(path: &Path) -> Result<HashMap<String, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read authors file {}", path.display()))?;
    parse_authors(&text)
}
