
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, Seek};
use anyhow::{Context, Result};
use colored::*;
use uuid::Uuid;
use crate::errors::ExportError;
use crate::revmap::BranchIndex;
use crate::revset::{parse_mergeinfo, Ancestors, RevRange};
use crate::sink::{FastExportSink, FileMode};
use crate::svndiff;
use crate::svndump::{self, DumpReader, PropEntry, Record};
use crate::svndump::{PROP_EXECUTABLE, PROP_LOG, PROP_MERGEINFO};
use crate::svnlog::{location_segments, LogEntry};
use crate::util::{self, SvnRev};

/// Configuration for an export session.
#[derive(Debug, Default)]
pub struct ExportOptions {
    /// Seed for the known-branch index, from a rev-map file.
    pub rev_map: HashMap<String, BTreeMap<SvnRev, String>>,
    /// SVN user name to Git identity.  When set, every author must map.
    pub author_map: Option<HashMap<String, String>>,
    /// Prefix stored in `git-svn-id` trailers.
    pub root: String,
    /// Branch-relative paths excluded from the export.
    pub ignore: Vec<String>,
    pub git_svn: bool,
    pub export_copies: bool,
    pub quiet: bool,
}

/// The segments of a branch's history that still need exporting, plus
/// the anchor where already-exported history resumes.
struct PendingSegments {
    //  (base, end, path) youngest to oldest; the revisions to export in
    //  each segment are (base, end].
    segments: Vec<(SvnRev, SvnRev, String)>,
    base: (SvnRev, String),
    git_base: Option<String>,
}

impl PendingSegments {
    fn plan(
        known: &BranchIndex,
        log: &[LogEntry],
        branch: &str,
        peg: Option<SvnRev>,
    ) -> Result<PendingSegments, ExportError> {
        let mut plan = PendingSegments {
            segments: Vec::new(),
            base: (0, String::new()),
            git_base: None,
        };
        for segment in location_segments(log, branch, peg) {
            let segment = segment?;
            if let Some((base, gitref)) = known.resume_point(&segment.path, segment.end) {
                if base >= segment.start {
                    //  Exported history reaches into this segment; only
                    //  the part younger than `base` is left to do, and
                    //  everything older is already covered.
                    if base < segment.end {
                        plan.segments.push((base, segment.end, segment.path.clone()));
                    }
                    plan.base = (base, segment.path);
                    plan.git_base = Some(gitref.to_owned());
                    return Ok(plan);
                }
            }
            plan.segments
                .push((segment.start.saturating_sub(1), segment.end, segment.path));
        }
        Ok(plan)
    }

    fn iter(&self) -> impl Iterator<Item = &(SvnRev, SvnRev, String)> + '_ {
        self.segments.iter().rev()
    }
}

struct CommitCtx<'a> {
    init_export: bool,
    base_rev: SvnRev,
    base_path: &'a str,
    gitrev: Option<&'a str>,
    /// Absolute segment path, e.g. `/trunk` (`/` for the root branch).
    path: &'a str,
    /// `path` with a trailing slash.
    prefix: &'a str,
}

/// Drives the whole conversion: walks pending segments, replays dump
/// records revision by revision and writes the fast-import stream.
pub struct Exporter<'a, R> {
    dump: DumpReader<R>,
    sink: &'a mut FastExportSink,
    log: Vec<LogEntry>,
    known: BranchIndex,
    author_map: Option<HashMap<String, String>>,
    root: String,
    ignore: Vec<String>,
    git_svn: bool,
    export_copies: bool,
    quiet: bool,
    uuid: String,
    pending: Option<Record>,
}

impl<'a, R: BufRead + Seek> Exporter<'a, R> {
    /// Read the dump preamble and get ready to export.  `log` is the
    /// parsed output of `svn log --xml --verbose` for the repository.
    pub fn new(
        mut dump: DumpReader<R>,
        sink: &'a mut FastExportSink,
        log: Vec<LogEntry>,
        options: ExportOptions,
    ) -> Result<Exporter<'a, R>> {
        let header = dump
            .read_record()?
            .ok_or_else(|| ExportError::MalformedDump("empty dump stream".to_string()))?;
        if !header.is_only("SVN-fs-dump-format-version") {
            return Err(ExportError::MalformedDump(
                "dump does not start with SVN-fs-dump-format-version".to_string(),
            )
            .into());
        }
        let version = header
            .get("SVN-fs-dump-format-version")
            .unwrap()
            .parse::<u32>()
            .map_err(|_| ExportError::MalformedDump("bad dump format version".to_string()))?;

        let mut uuid = String::new();
        let mut pending = None;
        if let Some(record) = dump.read_record()? {
            if record.is_only("UUID") {
                uuid = record.get("UUID").unwrap().to_owned();
                if version < 2 {
                    eprintln!(
                        "{} UUID record only expected in dump version >= 2",
                        "warning:".yellow()
                    );
                }
                if Uuid::parse_str(&uuid).is_err() {
                    eprintln!("{} repository UUID '{}' is not a UUID", "warning:".yellow(), uuid);
                }
            } else {
                pending = Some(record);
            }
        }

        let exporter = Exporter {
            dump,
            sink,
            log,
            known: BranchIndex::from_seed(&options.rev_map),
            author_map: options.author_map,
            root: options.root,
            ignore: options.ignore,
            git_svn: options.git_svn,
            export_copies: options.export_copies,
            quiet: options.quiet,
            uuid,
            pending,
        };
        if let (Some(first), Some(last)) = (exporter.log.first(), exporter.log.last()) {
            exporter.note(&format!(
                "loaded log r{}:{}",
                first.revision, last.revision
            ));
        }
        Ok(exporter)
    }

    fn note(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", message);
        }
    }

    /// Export `branch` (at `peg`, or its latest revision) onto `git_ref`,
    /// returning the Git revision of the branch head, if any exists.
    pub fn export(
        &mut self,
        git_ref: &str,
        branch: &str,
        peg: Option<SvnRev>,
    ) -> Result<Option<String>> {
        let branch = branch.trim_start_matches('/').to_owned();
        let plan = PendingSegments::plan(&self.known, &self.log, &branch, peg)?;

        let (mut base_rev, mut base_path) = plan.base.clone();
        let mut gitrev: Option<String> = if base_rev != 0 {
            plan.git_base.clone()
        } else {
            None
        };
        let mut init_export = true;

        for (seg_base, seg_end, seg_path) in plan.iter() {
            let abs_path = format!("/{}", seg_path);
            let prefix = if seg_path.is_empty() {
                "/".to_string()
            } else {
                format!("{}/", abs_path)
            };
            self.note(&format!(
                "exporting {} r{}:{}",
                abs_path.cyan(),
                seg_base + 1,
                seg_end
            ));

            let rev_indices: Vec<usize> = self
                .log
                .iter()
                .enumerate()
                .filter(|(_, e)| e.revision > *seg_base && e.revision <= *seg_end)
                .filter(|(_, e)| e.paths.iter().any(|p| util::touches_branch(&p.path, seg_path)))
                .map(|(i, _)| i)
                .collect();

            for i in rev_indices {
                let entry = self.log[i].clone();
                let svnrev = entry.revision;

                //  A revision is worth a commit when copies are exported
                //  unconditionally, when anything strictly below the
                //  branch changed, or when the branch itself changed
                //  other than by a pure copy.
                let mut commit = self.export_copies;
                if !commit {
                    commit = entry
                        .paths
                        .iter()
                        .any(|p| p.path.starts_with(&prefix) && p.path.len() > prefix.len());
                }
                if !commit {
                    commit = match entry.paths.iter().find(|p| p.path == abs_path) {
                        Some(p) => p.copyfrom_path.is_none(),
                        None => true,
                    };
                }

                if commit {
                    let ctx = CommitCtx {
                        init_export,
                        base_rev,
                        base_path: &base_path,
                        gitrev: gitrev.as_deref(),
                        path: &abs_path,
                        prefix: &prefix,
                    };
                    let mark = self
                        .commit(git_ref, &entry, ctx)
                        .with_context(|| format!("exporting {}@{}", abs_path, svnrev))?;
                    self.note(&format!("{}@{}: commit {}", abs_path.cyan(), svnrev, mark));
                    gitrev = Some(mark);
                    init_export = false;
                } else {
                    self.note(&format!("{}@{}: no changes", abs_path.cyan(), svnrev));
                    if let Some(prior) = &gitrev {
                        self.sink.putline(&format!("reset {}", git_ref))?;
                        self.sink.putline(&format!("from {}", prior))?;
                    }
                }

                base_rev = svnrev;
                base_path = seg_path.clone();
                if let Some(prior) = &gitrev {
                    self.known.remember(seg_path, svnrev, prior);
                }
            }
        }
        Ok(gitrev)
    }

    fn take_record(&mut self) -> Result<Option<Record>> {
        match self.pending.take() {
            Some(record) => Ok(Some(record)),
            None => self.dump.read_record(),
        }
    }

    //  Advance the dump stream to the given revision record.  Merge
    //  recursion can need a revision the forward scan already passed;
    //  one rewind covers that before the revision counts as missing.
    fn seek_revision(&mut self, rev: SvnRev) -> Result<Record> {
        if let Some(record) = self.scan_to_revision(rev)? {
            return Ok(record);
        }
        self.rewind()?;
        self.scan_to_revision(rev)?
            .ok_or_else(|| ExportError::MissingRevision(rev).into())
    }

    fn rewind(&mut self) -> Result<()> {
        self.pending = None;
        self.dump.rewind()?;
        //  Skim back over the preamble records.
        if let Some(record) = self.dump.read_record()? {
            if record.is_only("SVN-fs-dump-format-version") {
                if let Some(next) = self.dump.read_record()? {
                    if !next.is_only("UUID") {
                        self.pending = Some(next);
                    }
                }
            } else {
                self.pending = Some(record);
            }
        }
        Ok(())
    }

    //  Scan forward for a revision record, skipping node records and
    //  tolerating concatenated dumps.  `None` when the stream ends or
    //  the scan overtakes the target.
    fn scan_to_revision(&mut self, rev: SvnRev) -> Result<Option<Record>> {
        loop {
            let record = match self.take_record()? {
                Some(record) => record,
                None => return Ok(None),
            };
            if record.is_only("SVN-fs-dump-format-version") {
                if let Some(next) = self.take_record()? {
                    if next.is_only("UUID") {
                        let inner = next.get("UUID").unwrap();
                        if inner != self.uuid {
                            eprintln!(
                                "{} conflicting UUID {}; expected {}",
                                "warning:".yellow(),
                                inner,
                                self.uuid
                            );
                        }
                    } else {
                        self.pending = Some(next);
                    }
                }
                continue;
            }
            if record.has("Node-path") {
                continue;
            }
            let found = record
                .get("Revision-number")
                .ok_or_else(|| {
                    ExportError::MalformedDump(
                        "record is neither a revision nor a node".to_string(),
                    )
                })?
                .parse::<SvnRev>()
                .map_err(|_| {
                    ExportError::MalformedDump("bad Revision-number".to_string())
                })?;
            if found == rev {
                return Ok(Some(record));
            }
            if found > rev {
                self.pending = Some(record);
                return Ok(None);
            }
        }
    }

    fn identity(&self, author: &str) -> Result<String> {
        match &self.author_map {
            Some(map) => map
                .get(author)
                .cloned()
                .ok_or_else(|| ExportError::UnknownAuthor(author.to_owned()).into()),
            None => Ok(format!("{} <{}@{}>", author, author, self.uuid)),
        }
    }

    fn commit(&mut self, git_ref: &str, entry: &LogEntry, ctx: CommitCtx) -> Result<String> {
        let rev = entry.revision;
        let mut edits: Vec<String> = Vec::new();
        let mut deleted: HashSet<String> = HashSet::new();
        let mut mergeinfo: Vec<(String, Vec<RevRange>)> = Vec::new();

        //  Deletions below the branch, as reported by the log.  The dump
        //  repeats most of these as delete node records; the set keeps
        //  each relative path to a single `D` line.
        for change in &entry.paths {
            if !change.action.is_delete() || !change.path.starts_with(ctx.prefix) {
                continue;
            }
            let rel = &change.path[ctx.prefix.len()..];
            if rel.is_empty() || util::is_ignored(rel, &self.ignore) {
                continue;
            }
            if deleted.insert(rel.to_owned()) {
                edits.push(format!("D {}", rel));
            }
        }

        let revision_record = self.seek_revision(rev)?;
        let (revprops, _) = svndump::split_body(&revision_record)?;
        let mut message: Vec<u8> = Vec::new();
        for prop in &revprops {
            if let PropEntry::Set(key, value) = prop {
                if key == PROP_LOG {
                    message = value.clone();
                }
            }
        }

        //  Node records belonging to this revision.
        loop {
            let record = match self.take_record()? {
                Some(record) => record,
                None => break,
            };
            let node_path = match record.get("Node-path") {
                Some(path) => path.to_owned(),
                None => {
                    self.pending = Some(record);
                    break;
                }
            };
            let abs = format!("/{}", node_path.trim_start_matches('/'));
            if !abs.starts_with(ctx.prefix) && abs != ctx.path {
                continue;
            }
            match record.get("Node-action") {
                Some("delete") => {
                    if abs == ctx.path {
                        continue;
                    }
                    let rel = &abs[ctx.prefix.len()..];
                    if util::is_ignored(rel, &self.ignore) {
                        continue;
                    }
                    if deleted.insert(rel.to_owned()) {
                        edits.push(format!("D {}", rel));
                    }
                }
                Some("add") | Some("change") | Some("replace") => {
                    if record.get("Node-kind") == Some("file") {
                        self.file_edit(&record, &abs, &ctx, &mut edits)?;
                    } else if abs == ctx.path {
                        //  Only the branch root's properties matter for a
                        //  directory: they carry the merge tracking.
                        let (props, _) = svndump::split_body(&record)?;
                        for prop in props {
                            if let PropEntry::Set(key, value) = prop {
                                if key == PROP_MERGEINFO {
                                    let text = String::from_utf8(value).map_err(|_| {
                                        ExportError::MalformedDump(
                                            "svn:mergeinfo is not UTF-8".to_string(),
                                        )
                                    })?;
                                    mergeinfo = parse_mergeinfo(&text)?
                                        .into_iter()
                                        .filter_map(|(path, ranges)| {
                                            let inheritable: Vec<RevRange> = ranges
                                                .into_iter()
                                                .filter(|r| r.2)
                                                .collect();
                                            if inheritable.is_empty() {
                                                None
                                            } else {
                                                Some((path, inheritable))
                                            }
                                        })
                                        .collect();
                                }
                            }
                        }
                    }
                }
                Some(other) => {
                    return Err(ExportError::MalformedDump(format!(
                        "unknown node action '{}'",
                        other
                    ))
                    .into())
                }
                None => {
                    return Err(ExportError::MalformedDump(
                        "node record without Node-action".to_string(),
                    )
                    .into())
                }
            }
        }

        //  Mergeinfo becomes Git parents only when it describes a clean,
        //  complete ancestry extension: everything merged is natural
        //  history of the listed branch heads, and something new is
        //  actually merged.
        let mut merges: Vec<String> = Vec::new();
        if !mergeinfo.is_empty() {
            let mut basehist = Ancestors::new();
            if ctx.base_rev != 0 {
                basehist.add_natural(&self.log, ctx.base_path, ctx.base_rev)?;
            }
            let mut merged = basehist.as_set().clone();
            let mut ancestors = Ancestors::new();
            for (branch, ranges) in &mergeinfo {
                for &(start, end, _) in ranges {
                    merged.add_segment(branch, start, end);
                    ancestors.add_natural(&self.log, branch, end)?;
                }
            }
            if merged != *basehist.as_set() && *ancestors.as_set() == merged {
                for (branch, ranges) in &mergeinfo {
                    for &(_, end, _) in ranges {
                        if let Some(ancestor) = self.export(git_ref, branch, Some(end))? {
                            merges.push(ancestor);
                        }
                    }
                }
            }
        }

        self.sink.putline(&format!("commit {}", git_ref))?;
        let mark = self.sink.new_mark();
        self.sink.putline(&format!("mark {}", mark))?;

        let date = util::svn_time_to_unix(&entry.date)?;
        let author = entry.author.as_deref().unwrap_or("(no author)");
        let identity = self.identity(author)?;
        self.sink
            .putline(&format!("committer {} {} +0000", identity, date))?;

        if self.git_svn {
            message.extend_from_slice(
                format!(
                    "\n\ngit-svn-id: {}{}@{} {}\n",
                    self.root,
                    ctx.path.trim_end_matches('/'),
                    rev,
                    self.uuid
                )
                .as_bytes(),
            );
        }
        self.sink.putline(&format!("data {}", message.len()))?;
        self.sink.write_raw(&message)?;
        self.sink.putline("")?;

        if ctx.init_export || !merges.is_empty() {
            if let Some(prior) = ctx.gitrev {
                self.sink.putline(&format!("from {}", prior))?;
            }
        }
        for merge in &merges {
            self.sink.putline(&format!("merge {}", merge))?;
        }
        for edit in &edits {
            self.sink.putline(edit)?;
        }
        self.sink.putline("")?;

        Ok(mark)
    }

    //  One file node record: resolve mode and contents, emit the blob
    //  and the `M` edit line.
    fn file_edit(
        &mut self,
        record: &Record,
        abs: &str,
        ctx: &CommitCtx,
        edits: &mut Vec<String>,
    ) -> Result<()> {
        let rel = match abs.strip_prefix(ctx.prefix) {
            Some(rel) if !rel.is_empty() => rel.to_owned(),
            _ => return Ok(()),
        };
        if util::is_ignored(&rel, &self.ignore) {
            return Ok(());
        }

        let is_change = record.get("Node-action") == Some("change");
        let existing = self.sink.file_entry(&rel).cloned();

        //  A copy source inside the branch seeds both contents and mode.
        let copy_source = record
            .get("Node-copyfrom-path")
            .map(|p| format!("/{}", p.trim_start_matches('/')))
            .and_then(|p| p.strip_prefix(ctx.prefix).map(|r| r.to_owned()))
            .and_then(|r| self.sink.file_entry(&r).cloned());

        let mut mode = if is_change {
            existing.as_ref().map(|e| e.mode).unwrap_or(FileMode::Normal)
        } else {
            copy_source
                .as_ref()
                .map(|e| e.mode)
                .unwrap_or(FileMode::Normal)
        };
        if record.has("Prop-content-length") {
            let (props, _) = svndump::split_body(record)?;
            if record.get("Prop-delta") == Some("true") {
                for prop in &props {
                    match prop {
                        PropEntry::Set(key, _) if key == PROP_EXECUTABLE => {
                            mode = FileMode::Executable
                        }
                        PropEntry::Delete(key) if key == PROP_EXECUTABLE => {
                            mode = FileMode::Normal
                        }
                        _ => {}
                    }
                }
            } else {
                //  A full property list replaces whatever was there.
                mode = if props
                    .iter()
                    .any(|p| matches!(p, PropEntry::Set(key, _) if key == PROP_EXECUTABLE))
                {
                    FileMode::Executable
                } else {
                    FileMode::Normal
                };
            }
        }

        let (_, text) = svndump::split_body(record)?;
        let mark = if record.get("Text-delta") == Some("true") {
            let source = if is_change {
                let entry = existing.as_ref().ok_or_else(|| {
                    ExportError::MalformedDump(format!("text delta against unknown file {}", rel))
                })?;
                let data = self.sink.cat_blob(&entry.mark)?;
                if let Some(hash) = record.get("Text-delta-base-md5") {
                    svndiff::verify_md5(&data, hash, "delta base")?;
                }
                data
            } else {
                Vec::new()
            };
            let contents = svndiff::apply(text, &source)?;
            if let Some(hash) = record.get("Text-content-md5") {
                svndiff::verify_md5(&contents, hash, "text content")?;
            }
            self.sink.blob(&rel, &contents)?
        } else if record.has("Text-content-length") {
            if let Some(hash) = record.get("Text-content-md5") {
                svndiff::verify_md5(text, hash, "text content")?;
            }
            self.sink.blob(&rel, text)?
        } else if let Some(entry) = existing.filter(|_| is_change) {
            //  Property-only change: contents carry over.
            entry.mark
        } else if let Some(source) = copy_source {
            source.mark
        } else if is_change {
            //  A change to a file this session never exported; its
            //  contents live in Git already and stay untouched.
            return Ok(());
        } else {
            self.sink.blob(&rel, b"")?
        };

        self.sink.set_file(&rel, &mark, mode);
        edits.push(format!("M {} {} {}", mode, mark, rel));
        Ok(())
    }
}
