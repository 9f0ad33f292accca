
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::sync::OnceLock;
use anyhow::{bail, Context, Result};
use clap::Parser;
use regex::Regex;
use svnex::exporter::{ExportOptions, Exporter};
use svnex::revmap::{read_authors, read_rev_map};
use svnex::sink::FastExportSink;
use svnex::svndump::DumpReader;
use svnex::svnlog;
use svnex::util::SvnRev;

/// Convert a Subversion branch history into a git fast-import stream
///
/// Follows branch copies, produces commits compatible with git-svn,
/// replays svn:mergeinfo as merge commits and can be run incrementally
/// against a rev-map file written for a previous export.
#[derive(Debug, Parser)]
#[command(
    author,
    help_template = crate::app::HELP_TEMPLATE,
    after_help = "\
    The output of 'svn log --xml --verbose' for the repository is read from\n\
    standard input unless --log is given.  One of --file or an IMPORTER\n\
    command (e.g. 'git fast-import') must be supplied."
)]
pub struct Export {
    /// Subversion dump filename
    #[arg(value_name = "DUMP")]
    dump: PathBuf,

    /// Subversion branch, optionally pegged at a revision
    #[arg(value_name = "/path[@rev]")]
    branch: String,

    /// Command to pipe the fast-import stream to
    #[arg(
        value_name = "IMPORTER",
        num_args = 0..,
        conflicts_with = "file",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    importer: Vec<String>,

    /// Write the fast-import stream to a file instead of an importer
    #[arg(long, value_name = "FILENAME")]
    file: Option<PathBuf>,

    /// Git ref name to export to (e.g. refs/remotes/svn/trunk)
    #[arg(long, value_name = "REFNAME")]
    git_ref: String,

    /// File of PATH@SVN-REV GIT-REV lines mapping already-exported revisions
    #[arg(long, value_name = "FILENAME")]
    rev_map: Option<PathBuf>,

    /// File mapping Subversion user names to Git authors, like "git-svn"
    #[arg(short = 'A', long, value_name = "FILENAME")]
    authors_file: Option<PathBuf>,

    /// Subversion URL to store in the metadata
    #[arg(long, value_name = "URL", default_value = "")]
    rewrite_root: String,

    /// Include git-svn-id lines in commit messages
    #[arg(long)]
    git_svn: bool,

    /// Read the svn log XML from a file instead of standard input
    #[arg(long, value_name = "FILENAME")]
    log: Option<PathBuf>,

    /// Add a path to be excluded from the export
    #[arg(long, value_name = "PATH")]
    ignore: Vec<String>,

    /// Export simple branch copies even when no files were modified
    #[arg(long)]
    export_copies: bool,

    /// Suppress progress messages
    #[arg(short, long)]
    quiet: bool,
}

fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.*)@(\d*)$").expect("Error parsing branch regular expression")
    })
}

//  A branch argument may carry a peg revision after the last '@'.
//  An empty peg ("/trunk@") means the latest revision.
fn parse_branch(spec: &str) -> (String, Option<SvnRev>) {
    match branch_re().captures(spec) {
        Some(caps) => {
            let peg = caps[2].parse::<SvnRev>().ok();
            (caps[1].trim_start_matches('/').to_owned(), peg)
        }
        None => (spec.trim_start_matches('/').to_owned(), None),
    }
}

impl Export {
    pub fn run(&mut self) -> Result<()> {
        if self.file.is_none() && self.importer.is_empty() {
            bail!("either --file or an IMPORTER command is required");
        }

        let (branch, peg) = parse_branch(&self.branch);

        let options = ExportOptions {
            rev_map: match &self.rev_map {
                Some(path) => read_rev_map(path)?,
                None => Default::default(),
            },
            author_map: match &self.authors_file {
                Some(path) => Some(read_authors(path)?),
                None => None,
            },
            root: self.rewrite_root.clone(),
            ignore: self.ignore.clone(),
            git_svn: self.git_svn,
            export_copies: self.export_copies,
            quiet: self.quiet,
        };

        let xml = match &self.log {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("cannot read log file {}", path.display()))?,
            None => {
                let mut xml = String::new();
                io::stdin().read_to_string(&mut xml).context("reading log from stdin")?;
                xml
            }
        };
        let log = svnlog::parse_log(&xml)?;

        let dump = DumpReader::new(BufReader::new(
            File::open(&self.dump)
                .with_context(|| format!("cannot open dump file {}", self.dump.display()))?,
        ));

        let mut sink = match &self.file {
            Some(path) => FastExportSink::to_file(path)?,
            None => FastExportSink::to_importer(&self.importer)?,
        };

        let result = Exporter::new(dump, &mut sink, log, options)
            .and_then(|mut exporter| exporter.export(&self.git_ref, &branch, peg));
        match result {
            Ok(_) => sink.close(),
            Err(e) => {
                //  The importer is going to fail on the truncated
                //  stream; the export error is the one to report.
                let _ = sink.close();
                Err(e)
            }
        }
    }
}
