
use anyhow::Result;
use chrono::NaiveDateTime;
use crate::errors::ExportError;

pub type SvnRev = u64;

//  Absolute changed paths from the log carry a leading slash.
//  A path "touches" a branch when it is the branch directory itself
//  or lies anywhere below it.  The root branch ("") touches everything.
pub fn touches_branch(abs_path: &str, branch: &str) -> bool {
    if branch.is_empty() {
        return abs_path.starts_with('/');
    }
    let rest = match abs_path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(branch))
    {
        Some(rest) => rest,
        None => return false,
    };
    rest.is_empty() || rest.starts_with('/')
}

//  Ignore entries are branch-relative paths or prefixes.
pub fn is_ignored(rel: &str, ignores: &[String]) -> bool {
    ignores.iter().any(|p| {
        let p = p.trim_matches('/');
        !p.is_empty() && (rel == p || rel.starts_with(&format!("{}/", p)))
    })
}

//  SVN timestamps are ISO-8601 with fractional seconds and a Z suffix.
//  git fast-import wants unix seconds.
pub fn svn_time_to_unix(date: &str) -> Result<i64> {
    let parsed = NaiveDateTime::parse_from_str(date, "%Y-%m-%dT%H:%M:%S%.fZ")
        .map_err(|e| ExportError::MalformedLog(format!("bad date '{}': {}", date, e)))?;
    Ok(parsed.and_utc().timestamp())
}
