
//  End-to-end scenarios: synthesized dump + log in, byte-exact
//  fast-import stream out.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use svnex::exporter::{ExportOptions, Exporter};
use svnex::sink::FastExportSink;
use svnex::svndump::DumpReader;
use svnex::svnlog;
use svnex::util::SvnRev;

const UUID: &str = "00000000-0000-0000-0000-000000000000";
const EPOCH: &str = "1970-01-01T00:00:00.000000Z";

#[derive(Default, Clone)]
struct Node {
    action: &'static str,
    kind: Option<&'static str>,
    path: &'static str,
    copyfrom: Option<(&'static str, u64)>,
    props: Vec<(&'static str, &'static str)>,
    content: Option<Vec<u8>>,
    text_delta: bool,
    text_md5: Option<&'static str>,
    base_md5: Option<&'static str>,
}

struct Rev {
    author: Option<&'static str>,
    nodes: Vec<Node>,
}

fn rev(nodes: Vec<Node>) -> Rev {
    Rev { author: None, nodes }
}

fn rev_by(author: &'static str, nodes: Vec<Node>) -> Rev {
    Rev { author: Some(author), nodes }
}

fn add_dir(path: &'static str) -> Node {
    Node { action: "add", kind: Some("dir"), path, ..Default::default() }
}

fn add_file(path: &'static str, content: &[u8]) -> Node {
    Node {
        action: "add",
        kind: Some("file"),
        path,
        content: Some(content.to_vec()),
        ..Default::default()
    }
}

fn change_file(path: &'static str, content: &[u8]) -> Node {
    Node {
        action: "change",
        kind: Some("file"),
        path,
        content: Some(content.to_vec()),
        ..Default::default()
    }
}

fn change_props(path: &'static str, props: &[(&'static str, &'static str)]) -> Node {
    Node { action: "change", path, props: props.to_vec(), ..Default::default() }
}

fn delete(path: &'static str) -> Node {
    Node { action: "delete", path, ..Default::default() }
}

fn copy_dir(path: &'static str, from: &'static str, from_rev: u64) -> Node {
    Node { action: "add", path, copyfrom: Some((from, from_rev)), ..Default::default() }
}

fn props_block(props: &[(String, String)]) -> Vec<u8> {
    let mut block = Vec::new();
    for (key, value) in props {
        block.extend_from_slice(
            format!("K {}\n{}\nV {}\n{}\n", key.len(), key, value.len(), value).as_bytes(),
        );
    }
    block.extend_from_slice(b"PROPS-END\n");
    block
}

fn record(
    out: &mut Vec<u8>,
    headers: &[(String, String)],
    props: Option<&[(String, String)]>,
    content: Option<&[u8]>,
) {
    let mut headers = headers.to_vec();
    let mut payload = Vec::new();
    if let Some(props) = props {
        let block = props_block(props);
        headers.push(("Prop-content-length".to_string(), block.len().to_string()));
        payload.extend_from_slice(&block);
    }
    if let Some(content) = content {
        headers.push(("Text-content-length".to_string(), content.len().to_string()));
        payload.extend_from_slice(content);
    }
    if props.is_some() || content.is_some() {
        headers.push(("Content-length".to_string(), payload.len().to_string()));
    }
    for (name, value) in &headers {
        out.extend_from_slice(format!("{}: {}\n", name, value).as_bytes());
    }
    out.extend_from_slice(b"\n");
    out.extend_from_slice(&payload);
}

fn make_dump(revs: &[Rev]) -> Vec<u8> {
    let mut dump = Vec::new();
    record(
        &mut dump,
        &[("SVN-fs-dump-format-version".to_string(), "2".to_string())],
        None,
        None,
    );
    record(&mut dump, &[("UUID".to_string(), UUID.to_string())], None, None);

    for (i, rev) in revs.iter().enumerate() {
        let mut props = vec![
            ("svn:date".to_string(), EPOCH.to_string()),
            ("svn:log".to_string(), String::new()),
        ];
        if let Some(author) = rev.author {
            props.push(("svn:author".to_string(), author.to_string()));
        }
        record(
            &mut dump,
            &[("Revision-number".to_string(), (i + 1).to_string())],
            Some(&props),
            None,
        );

        for node in &rev.nodes {
            let mut headers = vec![("Node-action".to_string(), node.action.to_string())];
            if let Some(kind) = node.kind {
                headers.push(("Node-kind".to_string(), kind.to_string()));
            }
            headers.push(("Node-path".to_string(), node.path.to_string()));
            if let Some((from, from_rev)) = node.copyfrom {
                headers.push(("Node-copyfrom-path".to_string(), from.to_string()));
                headers.push(("Node-copyfrom-rev".to_string(), from_rev.to_string()));
            }
            if node.text_delta {
                headers.push(("Text-delta".to_string(), "true".to_string()));
            }
            if let Some(md5) = node.text_md5 {
                headers.push(("Text-content-md5".to_string(), md5.to_string()));
            }
            if let Some(md5) = node.base_md5 {
                headers.push(("Text-delta-base-md5".to_string(), md5.to_string()));
            }
            let props: Option<Vec<(String, String)>> = if node.props.is_empty() {
                None
            } else {
                Some(
                    node.props
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            };
            record(&mut dump, &headers, props.as_deref(), node.content.as_deref());
        }
    }
    dump
}

fn make_log(revs: &[Rev]) -> String {
    let mut xml = String::from("<log>");
    for (i, rev) in revs.iter().enumerate().rev() {
        xml += &format!("<logentry revision=\"{}\">", i + 1);
        if let Some(author) = rev.author {
            xml += &format!("<author>{}</author>", author);
        }
        xml += &format!("<date>{}</date><paths>", EPOCH);
        for node in &rev.nodes {
            let action = match node.action {
                "add" => "A",
                "change" => "M",
                "delete" => "D",
                "replace" => "R",
                other => panic!("unknown action {}", other),
            };
            match node.copyfrom {
                Some((from, from_rev)) => {
                    xml += &format!(
                        "<path action=\"{}\" copyfrom-path=\"/{}\" copyfrom-rev=\"{}\">/{}</path>",
                        action, from, from_rev, node.path
                    )
                }
                None => xml += &format!("<path action=\"{}\">/{}</path>", action, node.path),
            }
        }
        xml += "</paths></logentry>";
    }
    xml += "</log>";
    xml
}

fn quiet() -> ExportOptions {
    ExportOptions { quiet: true, ..Default::default() }
}

fn rev_map(entries: &[(&str, SvnRev, &str)]) -> HashMap<String, BTreeMap<SvnRev, String>> {
    let mut map: HashMap<String, BTreeMap<SvnRev, String>> = HashMap::new();
    for (branch, rev, gitref) in entries {
        map.entry(branch.to_string())
            .or_default()
            .insert(*rev, gitref.to_string());
    }
    map
}

fn run_export(revs: &[Rev], options: ExportOptions, git_ref: &str, branch: &str) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream");
    let mut sink = FastExportSink::to_file(&path).unwrap();
    let log = svnlog::parse_log(&make_log(revs)).unwrap();
    let dump = DumpReader::new(Cursor::new(make_dump(revs)));
    let mut exporter = Exporter::new(dump, &mut sink, log, options).unwrap();
    exporter.export(git_ref, branch, None).unwrap();
    sink.close().unwrap();
    std::fs::read_to_string(&path).unwrap()
}

//  Property-only changes to the branch directory still produce commits.
#[test]
fn modify_branch() {
    let revs = [
        rev(vec![add_dir("trunk")]),
        rev(vec![change_props("trunk", &[("name", "value")])]),
    ];
    let options = ExportOptions { git_svn: true, ..quiet() };
    let output = run_export(&revs, options, "refs/ref", "trunk");
    assert_eq!(
        output,
        "commit refs/ref\n\
         mark :1\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@1 00000000-0000-0000-0000-000000000000\n\
         \n\
         \n\
         commit refs/ref\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@2 00000000-0000-0000-0000-000000000000\n\
         \n\
         \n"
    );
}

#[test]
fn authors_mapping() {
    let revs = [rev_by("user", vec![add_file("file", b"")])];
    let mut authors = HashMap::new();
    authors.insert("user".to_string(), "user <user>".to_string());
    let options = ExportOptions { author_map: Some(authors), ..quiet() };
    let output = run_export(&revs, options, "refs/ref", "");
    assert!(output.contains("committer user <user> 0 +0000\n"));
}

#[test]
fn unmapped_authors_are_fatal() {
    let revs = [rev_by("stranger", vec![add_file("file", b"")])];
    let options = ExportOptions { author_map: Some(HashMap::new()), ..quiet() };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream");
    let mut sink = FastExportSink::to_file(&path).unwrap();
    let log = svnlog::parse_log(&make_log(&revs)).unwrap();
    let dump = DumpReader::new(Cursor::new(make_dump(&revs)));
    let mut exporter = Exporter::new(dump, &mut sink, log, options).unwrap();
    let err = exporter.export("refs/ref", "", None).unwrap_err();
    assert!(err.to_string().contains("exporting /@1"));
    assert!(format!("{:?}", err).contains("stranger"));
}

//  An incremental run picking up at a revision that deletes files: the
//  deletion must be stated explicitly and chained onto the seeded ref.
#[test]
fn first_delete() {
    let revs = [
        rev(vec![
            add_file("file", b""),
            add_file("igfile", b""),
            add_dir("igdir"),
            add_file("igdir/file", b""),
        ]),
        rev(vec![delete("file"), delete("igfile"), delete("igdir/file")]),
    ];
    let options = ExportOptions {
        rev_map: rev_map(&[("", 1, "refs/ref")]),
        ignore: vec!["igfile".to_string(), "igdir".to_string()],
        git_svn: true,
        ..quiet()
    };
    let output = run_export(&revs, options, "refs/ref", "");
    assert_eq!(
        output,
        "commit refs/ref\n\
         mark :1\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 54\n\
         \n\
         \n\
         git-svn-id: @2 00000000-0000-0000-0000-000000000000\n\
         \n\
         from refs/ref\n\
         D file\n\
         \n"
    );
}

//  With --export-copies a bare branch copy becomes a contentless commit
//  between the trunk history and the branch modifications.
#[test]
fn export_copies() {
    let revs = [
        rev(vec![add_dir("trunk"), add_file("trunk/file", b"")]),
        rev(vec![copy_dir("branch", "trunk", 1)]),
        rev(vec![change_file("branch/file", b"mod\n")]),
    ];
    let options = ExportOptions { git_svn: true, export_copies: true, ..quiet() };
    let output = run_export(&revs, options, "refs/branch", "branch");
    assert_eq!(
        output,
        "blob\n\
         mark :1\n\
         data 0\n\
         \n\
         commit refs/branch\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@1 00000000-0000-0000-0000-000000000000\n\
         \n\
         M 644 :1 file\n\
         \n\
         commit refs/branch\n\
         mark :3\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 61\n\
         \n\
         \n\
         git-svn-id: /branch@2 00000000-0000-0000-0000-000000000000\n\
         \n\
         \n\
         blob\n\
         mark :1\n\
         data 4\n\
         mod\n\
         \n\
         commit refs/branch\n\
         mark :4\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 61\n\
         \n\
         \n\
         git-svn-id: /branch@3 00000000-0000-0000-0000-000000000000\n\
         \n\
         M 644 :1 file\n\
         \n"
    );
}

//  A branch copy with no file changes collapses to a reset onto the
//  already-exported source revision.
#[test]
fn bare_copy_resets() {
    let revs = [
        rev(vec![add_dir("trunk"), add_dir("branches"), add_file("trunk/file", b"")]),
        rev(vec![copy_dir("branches/branch", "trunk", 1)]),
    ];
    let options = ExportOptions { rev_map: rev_map(&[("trunk", 1, "trunk")]), ..quiet() };
    let output = run_export(&revs, options, "refs/heads/branch", "branches/branch");
    assert_eq!(output, "reset refs/heads/branch\nfrom trunk\n");
}

//  Mergeinfo naming the complete natural history of another branch
//  becomes a merge parent; unrelated later commits do not repeat it.
#[test]
fn merge_parents() {
    let revs = [
        rev(vec![add_dir("trunk"), add_file("trunk/file", b"original\n")]),
        rev(vec![
            copy_dir("branch", "trunk", 1),
            change_file("branch/file", b"branched\n"),
        ]),
        rev(vec![
            change_props("trunk", &[("svn:mergeinfo", "/branch:2")]),
            change_file("trunk/file", b"branched\n"),
        ]),
        rev(vec![change_file("trunk/file", b"normal\n")]),
    ];
    let options = ExportOptions { git_svn: true, ..quiet() };
    let output = run_export(&revs, options, "refs/trunk", "trunk");
    assert_eq!(
        output,
        "blob\n\
         mark :1\n\
         data 9\n\
         original\n\
         \n\
         commit refs/trunk\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@1 00000000-0000-0000-0000-000000000000\n\
         \n\
         M 644 :1 file\n\
         \n\
         blob\n\
         mark :1\n\
         data 9\n\
         branched\n\
         \n\
         blob\n\
         mark :1\n\
         data 9\n\
         branched\n\
         \n\
         commit refs/trunk\n\
         mark :3\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 61\n\
         \n\
         \n\
         git-svn-id: /branch@2 00000000-0000-0000-0000-000000000000\n\
         \n\
         from :2\n\
         M 644 :1 file\n\
         \n\
         commit refs/trunk\n\
         mark :4\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@3 00000000-0000-0000-0000-000000000000\n\
         \n\
         from :2\n\
         merge :3\n\
         M 644 :1 file\n\
         \n\
         blob\n\
         mark :1\n\
         data 7\n\
         normal\n\
         \n\
         commit refs/trunk\n\
         mark :5\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@4 00000000-0000-0000-0000-000000000000\n\
         \n\
         M 644 :1 file\n\
         \n"
    );
}

//  Mergeinfo already covered by the seeded history produces no merge
//  parents when the export resumes after it.
#[test]
fn first_mergeinfo() {
    let revs = [
        rev(vec![add_dir("trunk"), add_file("trunk/file", b"original\n")]),
        rev(vec![
            copy_dir("branch", "trunk", 1),
            change_file("branch/file", b"branched\n"),
        ]),
        rev(vec![
            change_props("trunk", &[("svn:mergeinfo", "/branch:2")]),
            change_file("trunk/file", b"branched\n"),
        ]),
        rev(vec![change_file("trunk/file", b"new\n")]),
    ];
    let options = ExportOptions {
        rev_map: rev_map(&[("/trunk", 3, "refs/trunk")]),
        git_svn: true,
        ..quiet()
    };
    let output = run_export(&revs, options, "refs/trunk", "trunk");
    assert_eq!(
        output,
        "blob\n\
         mark :1\n\
         data 4\n\
         new\n\
         \n\
         commit refs/trunk\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 60\n\
         \n\
         \n\
         git-svn-id: /trunk@4 00000000-0000-0000-0000-000000000000\n\
         \n\
         from refs/trunk\n\
         M 644 :1 file\n\
         \n"
    );
}

//  A branch whose first revision is a bare copy: the reset points at the
//  seeded trunk ref and the following commit chains onto it.
#[test]
fn first_branch() {
    let revs = [
        rev(vec![add_dir("trunk"), add_dir("branches"), add_file("trunk/file", b"initial\n")]),
        rev(vec![copy_dir("branch", "trunk", 1)]),
        rev(vec![change_file("branch/file", b"branched\n")]),
    ];
    let options = ExportOptions {
        rev_map: rev_map(&[("trunk", 1, "trunk")]),
        git_svn: true,
        ..quiet()
    };
    let output = run_export(&revs, options, "refs/branch", "branch");
    assert_eq!(
        output,
        "reset refs/branch\n\
         from trunk\n\
         blob\n\
         mark :1\n\
         data 9\n\
         branched\n\
         \n\
         commit refs/branch\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 61\n\
         \n\
         \n\
         git-svn-id: /branch@3 00000000-0000-0000-0000-000000000000\n\
         \n\
         from trunk\n\
         M 644 :1 file\n\
         \n"
    );
}

//  The executable bit set at add time carries through later content
//  changes that do not touch properties.
#[test]
fn executable_bit_carries() {
    let mut tool = add_file("tool", b"");
    tool.props = vec![("svn:executable", "*")];
    let revs = [rev(vec![tool]), rev(vec![change_file("tool", b"run\n")])];
    let output = run_export(&revs, quiet(), "refs/ref", "");
    assert_eq!(
        output,
        "blob\n\
         mark :1\n\
         data 0\n\
         \n\
         commit refs/ref\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 0\n\
         \n\
         M 755 :1 tool\n\
         \n\
         blob\n\
         mark :1\n\
         data 4\n\
         run\n\
         \n\
         commit refs/ref\n\
         mark :3\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 0\n\
         \n\
         M 755 :1 tool\n\
         \n"
    );
}

//  Text deltas are applied against the previously exported blob, with
//  both checksum headers honoured.
#[test]
fn text_deltas_apply_against_prior_contents() {
    //  one window: copy the 5 source bytes, append "more\n" as new data
    let delta = b"SVN\0\x00\x05\x0a\x03\x05\x05\x00\x85more\n".to_vec();
    let mut change = Node {
        action: "change",
        kind: Some("file"),
        path: "file",
        content: Some(delta),
        text_delta: true,
        ..Default::default()
    };
    change.text_md5 = Some("0edb694b691d5dea51f1d7883950e36d");
    change.base_md5 = Some("ce771bb33a2a445c8e616a88ec29c517");
    let revs = [rev(vec![add_file("file", b"base\n")]), rev(vec![change])];
    let output = run_export(&revs, quiet(), "refs/ref", "");
    assert_eq!(
        output,
        "blob\n\
         mark :1\n\
         data 5\n\
         base\n\
         \n\
         commit refs/ref\n\
         mark :2\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 0\n\
         \n\
         M 644 :1 file\n\
         \n\
         blob\n\
         mark :1\n\
         data 10\n\
         base\n\
         more\n\
         \n\
         commit refs/ref\n\
         mark :3\n\
         committer (no author) <(no author)@00000000-0000-0000-0000-000000000000> 0 +0000\n\
         data 0\n\
         \n\
         M 644 :1 file\n\
         \n"
    );
}

//  A corrupted checksum aborts the export.
#[test]
fn checksum_mismatch_is_fatal() {
    let mut bad = change_file("file", b"contents\n");
    bad.text_md5 = Some("00000000000000000000000000000000");
    let revs = [rev(vec![add_file("file", b"")]), rev(vec![bad])];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream");
    let mut sink = FastExportSink::to_file(&path).unwrap();
    let log = svnlog::parse_log(&make_log(&revs)).unwrap();
    let dump = DumpReader::new(Cursor::new(make_dump(&revs)));
    let mut exporter = Exporter::new(dump, &mut sink, log, quiet()).unwrap();
    let err = exporter.export("refs/ref", "", None).unwrap_err();
    assert!(format!("{:?}", err).contains("checksum mismatch"));
}

//  A revision missing from the dump (but present in the log) aborts.
#[test]
fn missing_revisions_abort() {
    let revs = [rev(vec![add_file("file", b"")]), rev(vec![change_file("file", b"x")])];
    let log_revs = [
        rev(vec![add_file("file", b"")]),
        rev(vec![change_file("file", b"x")]),
        rev(vec![change_file("file", b"y")]),
    ];

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stream");
    let mut sink = FastExportSink::to_file(&path).unwrap();
    let log = svnlog::parse_log(&make_log(&log_revs)).unwrap();
    let dump = DumpReader::new(Cursor::new(make_dump(&revs)));
    let mut exporter = Exporter::new(dump, &mut sink, log, quiet()).unwrap();
    let err = exporter.export("refs/ref", "", None).unwrap_err();
    assert!(format!("{:?}", err).contains("revision 3 not found"));
}
