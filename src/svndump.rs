
use std::io::{BufRead, Read, Seek, SeekFrom};
use anyhow::Result;
use colored::*;
use crate::errors::ExportError;

pub const PROP_LOG: &str = "svn:log";
pub const PROP_EXECUTABLE: &str = "svn:executable";
pub const PROP_MERGEINFO: &str = "svn:mergeinfo";

/// One dump record: RFC-822-style headers plus `Content-length` bytes
/// of body.
#[derive(Debug, Clone, Default)]
pub struct Record {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True when the record consists of exactly one header field.
    pub fn is_only(&self, name: &str) -> bool {
        self.headers.len() == 1 && self.headers[0].0 == name
    }

    pub fn length(&self, name: &str) -> Result<usize, ExportError> {
        match self.get(name) {
            None => Ok(0),
            Some(v) => v.parse::<usize>().map_err(|_| {
                ExportError::MalformedDump(format!("bad {} '{}'", name, v))
            }),
        }
    }
}

/// Pull reader over a Subversion dump stream.
pub struct DumpReader<R> {
    inner: R,
}

impl<R: Seek> DumpReader<R> {
    /// Back to the start of the stream.  Merge-parent discovery exports
    /// ancestor branches whose revisions lie behind the read position.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        self.inner.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(inner: R) -> DumpReader<R> {
        DumpReader { inner }
    }

    /// Read the next record, or `None` at end of stream.  Header lines
    /// that do not parse are reported and skipped; the stream carries on.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        let mut headers: Vec<(String, String)> = Vec::new();
        loop {
            let mut line = Vec::new();
            let n = self.inner.read_until(b'\n', &mut line)?;
            if n == 0 {
                if headers.is_empty() {
                    return Ok(None);
                }
                break;
            }
            while line.last() == Some(&b'\n') || line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                if headers.is_empty() {
                    continue;
                }
                break;
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.to_owned(), value.trim_start().to_owned()));
                }
                None => {
                    eprintln!("{} unparsable dump header line: {}", "warning:".yellow(), line);
                }
            }
        }

        let mut record = Record { headers, body: Vec::new() };
        let length = record.length("Content-length")?;
        if length > 0 {
            record.body = vec![0; length];
            self.inner.read_exact(&mut record.body).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    anyhow::Error::from(ExportError::MalformedDump(format!(
                        "record body truncated ({} bytes expected)",
                        length
                    )))
                } else {
                    e.into()
                }
            })?;
        }
        Ok(Some(record))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropEntry {
    Set(String, Vec<u8>),
    /// Only appears under `Prop-delta: true`.
    Delete(String),
}

fn take_line(data: &[u8]) -> Result<(&str, &[u8]), ExportError> {
    let pos = data
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ExportError::MalformedDump("property block truncated".to_string()))?;
    let line = std::str::from_utf8(&data[..pos])
        .map_err(|_| ExportError::MalformedDump("property block not UTF-8".to_string()))?;
    Ok((line, &data[pos + 1..]))
}

fn take_counted(data: &[u8], tag: &str, line: &str) -> Result<(Vec<u8>, usize), ExportError> {
    let count = line
        .strip_prefix(tag)
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| ExportError::MalformedDump(format!("bad property line '{}'", line)))?;
    if data.len() < count + 1 || data[count] != b'\n' {
        return Err(ExportError::MalformedDump(format!(
            "property value truncated (wanted {} bytes)",
            count
        )));
    }
    Ok((data[..count].to_vec(), count + 1))
}

/// Parse a `K`/`V`/`D` property block terminated by `PROPS-END`.
pub fn parse_props(data: &[u8]) -> Result<Vec<PropEntry>, ExportError> {
    let mut rest = data;
    let mut props = Vec::new();
    loop {
        let (line, after) = take_line(rest)?;
        if line == "PROPS-END" {
            return Ok(props);
        }
        if line.starts_with("K ") {
            let (key, used) = take_counted(after, "K ", line)?;
            let rest2 = &after[used..];
            let (vline, after_v) = take_line(rest2)?;
            let (value, used_v) = take_counted(after_v, "V ", vline)?;
            let key = String::from_utf8(key)
                .map_err(|_| ExportError::MalformedDump("property key not UTF-8".to_string()))?;
            props.push(PropEntry::Set(key, value));
            rest = &after_v[used_v..];
        } else if line.starts_with("D ") {
            let (key, used) = take_counted(after, "D ", line)?;
            let key = String::from_utf8(key)
                .map_err(|_| ExportError::MalformedDump("property key not UTF-8".to_string()))?;
            props.push(PropEntry::Delete(key));
            rest = &after[used..];
        } else {
            return Err(ExportError::MalformedDump(format!(
                "bad property line '{}'",
                line
            )));
        }
    }
}

/// Split a node or revision body into its parsed property block and the
/// remaining text bytes.
pub fn split_body(record: &Record) -> Result<(Vec<PropEntry>, &[u8])> {
    let prop_len = record.length("Prop-content-length")?;
    if prop_len == 0 {
        return Ok((Vec::new(), &record.body[..]));
    }
    if prop_len > record.body.len() {
        return Err(ExportError::MalformedDump(format!(
            "Prop-content-length {} exceeds body of {} bytes",
            prop_len,
            record.body.len()
        ))
        .into());
    }
    let props = parse_props(&record.body[..prop_len])?;
    Ok((props, &record.body[prop_len..]))
}
