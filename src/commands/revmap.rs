
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::*;
use uuid::Uuid;

/// Generate a rev-map file from an existing Git repository
///
/// Reads Git revision ids from standard input (such as the output of
/// "git rev-list --all"), resolves them through "git cat-file --batch"
/// and prints a PATH@SVN-REV GIT-REV line for every git-svn-id trailer
/// whose URL matches one of the given repository roots.  The output is
/// suitable for "svnex export --rev-map".
#[derive(Debug, Parser)]
#[command(
    author,
    help_template = crate::app::HELP_TEMPLATE,
)]
pub struct Revmap {
    /// Repository root URLs to match git-svn-id trailers against
    #[arg(value_name = "ROOT", required = true)]
    roots: Vec<String>,

    /// Only match trailers carrying one of these repository UUIDs
    #[arg(long, value_name = "UUID")]
    uuid: Vec<Uuid>,
}

impl Revmap {
    pub fn run(&mut self) -> Result<()> {
        let mut child = Command::new("git")
            .args(["cat-file", "--batch"])
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .spawn()
            .context("cannot run git cat-file")?;
        let mut stdout = BufReader::new(child.stdout.take().expect("piped stdout"));

        let mut fail = false;
        loop {
            let mut header = String::new();
            if stdout.read_line(&mut header)? == 0 {
                break;
            }
            let mut fields = header.split_whitespace();
            let rev = fields.next().unwrap_or("").to_owned();
            let kind = fields.next().unwrap_or("");
            let length: usize = fields
                .next()
                .and_then(|n| n.parse().ok())
                .with_context(|| format!("bad cat-file header '{}'", header.trim_end()))?;
            if kind != "commit" {
                bail!("unexpected Git object type '{}'", kind);
            }

            let mut object = vec![0u8; length];
            stdout.read_exact(&mut object)?;
            let mut trailing = String::new();
            stdout.read_line(&mut trailing)?;
            if !trailing.trim().is_empty() {
                bail!("no blank line following Git object");
            }

            if !self.scan_message(&object, &rev) {
                fail = true;
            }
        }

        let status = child.wait()?;
        if !status.success() {
            bail!("git cat-file exited with {}", status);
        }
        if fail {
            bail!("some git-svn-id URLs did not match any root");
        }
        Ok(())
    }

    //  Returns false when a trailer's URL matched no root.
    fn scan_message(&self, object: &[u8], rev: &str) -> bool {
        let body_start = object
            .windows(2)
            .position(|w| w == b"\n\n")
            .map(|i| i + 2)
            .unwrap_or(object.len());
        let mut ok = true;
        for line in object[body_start..].split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(line).into_owned();
            if !line.to_lowercase().starts_with("git-svn-id:") {
                continue;
            }
            let rest = line["git-svn-id:".len()..].trim().to_owned();
            let mut fields = rest.split_whitespace();
            let (url, trailer_uuid) = match (fields.next(), fields.next()) {
                (Some(url), Some(uuid)) => (url, uuid),
                _ => continue,
            };
            if !self.uuid.is_empty() {
                match Uuid::parse_str(trailer_uuid) {
                    Ok(parsed) if self.uuid.contains(&parsed) => {}
                    _ => continue,
                }
            }
            match self.roots.iter().find(|root| url.starts_with(root.as_str())) {
                Some(root) => {
                    let path = &url[root.len()..];
                    match path.rfind('@') {
                        //  The root itself maps to the root branch.
                        Some(0) => println!("/{} {}", path, rev),
                        Some(_) => println!("{} {}", path, rev),
                        None => {
                            eprintln!(
                                "{} git-svn-id URL without a revision: {}",
                                "warning:".yellow(),
                                url
                            );
                        }
                    }
                }
                None => {
                    eprintln!("Cannot determine root: {}", url);
                    ok = false;
                }
            }
        }
        ok
    }
}
