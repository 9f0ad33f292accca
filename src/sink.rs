
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use anyhow::Result;
use crate::errors::ExportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Normal,
    Executable,
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FileMode::Normal => write!(f, "644"),
            FileMode::Executable => write!(f, "755"),
        }
    }
}

/// The most recent blob exported for a file, plus its executable bit.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub mark: String,
    pub mode: FileMode,
}

enum Output {
    File {
        file: File,
        //  mark -> (offset, length) of the blob body in the output file
        blobs: HashMap<String, (u64, u64)>,
    },
    Pipe {
        child: Child,
        stdin: BufWriter<ChildStdin>,
        stdout: BufReader<ChildStdout>,
    },
}

/// Writer for a `git fast-import` stream.  Issues marks, buffers blob
/// bodies, and serves them back for later delta application.
pub struct FastExportSink {
    output: Output,
    next_mark: u64,
    files: HashMap<String, FileEntry>,
}

impl FastExportSink {
    /// Write the stream to a regular file.  `cat_blob` is served by
    /// seeking back to the recorded blob body.
    pub fn to_file(path: &Path) -> Result<FastExportSink> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(FastExportSink {
            output: Output::File { file, blobs: HashMap::new() },
            next_mark: 1,
            files: HashMap::new(),
        })
    }

    /// Pipe the stream into an importer process.  `cat_blob` round-trips
    /// through the child, which requires the `cat-blob` feature.
    pub fn to_importer(command: &[String]) -> Result<FastExportSink> {
        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ExportError::ImporterFailed(format!("cannot spawn {}: {}", command[0], e))
            })?;
        let stdin = BufWriter::new(child.stdin.take().expect("piped stdin"));
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        let mut sink = FastExportSink {
            output: Output::Pipe { child, stdin, stdout },
            next_mark: 1,
            files: HashMap::new(),
        };
        sink.putline("feature done")?;
        sink.putline("feature cat-blob")?;
        Ok(sink)
    }

    pub fn new_mark(&mut self) -> String {
        let mark = format!(":{}", self.next_mark);
        self.next_mark += 1;
        mark
    }

    pub fn putline(&mut self, line: &str) -> Result<()> {
        self.write_raw(line.as_bytes())?;
        self.write_raw(b"\n")
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.output {
            Output::File { file, .. } => file.write_all(bytes)?,
            Output::Pipe { stdin, .. } => stdin.write_all(bytes).map_err(pipe_error)?,
        }
        Ok(())
    }

    /// Emit a blob for `path` and return its mark.  Each path keeps one
    /// mark for its lifetime; re-exporting the file redefines it.
    pub fn blob(&mut self, path: &str, data: &[u8]) -> Result<String> {
        let mark = match self.files.get(path) {
            Some(entry) => entry.mark.clone(),
            None => {
                let mark = self.new_mark();
                self.files.insert(
                    path.to_owned(),
                    FileEntry { mark: mark.clone(), mode: FileMode::Normal },
                );
                mark
            }
        };

        let header = format!("blob\nmark {}\ndata {}\n", mark, data.len());
        match &mut self.output {
            Output::File { file, blobs } => {
                file.seek(SeekFrom::End(0))?;
                file.write_all(header.as_bytes())?;
                let offset = file.stream_position()?;
                blobs.insert(mark.clone(), (offset, data.len() as u64));
                file.write_all(data)?;
                file.write_all(b"\n")?;
            }
            Output::Pipe { stdin, .. } => {
                stdin.write_all(header.as_bytes()).map_err(pipe_error)?;
                stdin.write_all(data).map_err(pipe_error)?;
                stdin.write_all(b"\n").map_err(pipe_error)?;
            }
        }
        Ok(mark)
    }

    /// Fetch back the bytes of a previously emitted blob.
    pub fn cat_blob(&mut self, mark: &str) -> Result<Vec<u8>> {
        match &mut self.output {
            Output::File { file, blobs } => {
                let &(offset, length) = blobs.get(mark).ok_or_else(|| {
                    ExportError::MalformedDump(format!("no blob recorded for mark {}", mark))
                })?;
                file.seek(SeekFrom::Start(offset))?;
                let mut data = vec![0; length as usize];
                file.read_exact(&mut data)?;
                file.seek(SeekFrom::End(0))?;
                Ok(data)
            }
            Output::Pipe { stdin, stdout, .. } => {
                stdin
                    .write_all(format!("cat-blob {}\n", mark).as_bytes())
                    .map_err(pipe_error)?;
                stdin.flush().map_err(pipe_error)?;
                let mut header = String::new();
                stdout.read_line(&mut header).map_err(pipe_error)?;
                //  "<sha> blob <size>"
                let size = header
                    .split(' ')
                    .nth(2)
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or_else(|| {
                        ExportError::ImporterFailed(format!(
                            "bad cat-blob response '{}'",
                            header.trim_end()
                        ))
                    })?;
                let mut data = vec![0; size];
                stdout.read_exact(&mut data).map_err(pipe_error)?;
                let mut newline = [0u8; 1];
                stdout.read_exact(&mut newline).map_err(pipe_error)?;
                Ok(data)
            }
        }
    }

    pub fn file_entry(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    pub fn set_file(&mut self, path: &str, mark: &str, mode: FileMode) {
        self.files
            .insert(path.to_owned(), FileEntry { mark: mark.to_owned(), mode });
    }

    /// Finish the stream and release the output.  For the pipe variant
    /// this writes the `done` postamble, closes the child's stdin and
    /// waits for it; a broken pipe is tolerated iff the child exited
    /// cleanly, and a nonzero exit is escalated.
    pub fn close(self) -> Result<()> {
        match self.output {
            Output::File { mut file, .. } => {
                file.flush()?;
                Ok(())
            }
            Output::Pipe { mut child, mut stdin, stdout } => {
                let done = stdin.write_all(b"done\n").and_then(|_| stdin.flush());
                drop(stdin);
                drop(stdout);
                let status = child.wait()?;
                if !status.success() {
                    return Err(
                        ExportError::ImporterFailed(format!("importer exited with {}", status))
                            .into(),
                    );
                }
                if let Err(e) = done {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        return Err(e.into());
                    }
                }
                Ok(())
            }
        }
    }
}

fn pipe_error(e: io::Error) -> anyhow::Error {
    if e.kind() == io::ErrorKind::BrokenPipe {
        ExportError::ImporterFailed("importer closed the pipe".to_string()).into()
    } else {
        e.into()
    }
}
