
use md5::{Digest, Md5};
use crate::errors::ExportError;

//  Instruction selectors, from the top two bits of each instruction byte.
const COPY_FROM_SOURCE: u8 = 0;
const COPY_FROM_TARGET: u8 = 1;
const COPY_FROM_NEW: u8 = 2;

fn malformed(msg: impl Into<String>) -> ExportError {
    ExportError::MalformedDump(msg.into())
}

//  Variable-length base-128 integer, big-endian, continuation in the
//  high bit.
fn read_varint(data: &mut &[u8]) -> Result<usize, ExportError> {
    let mut value: usize = 0;
    loop {
        let (&byte, rest) = data
            .split_first()
            .ok_or_else(|| malformed("truncated svndiff integer"))?;
        *data = rest;
        value = value << 7 | (byte & 0x7f) as usize;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn take<'a>(data: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], ExportError> {
    if data.len() < len {
        return Err(malformed(format!("truncated svndiff {}", what)));
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

/// Apply an svndiff0 delta against `source`, producing the new file
/// contents.
pub fn apply(delta: &[u8], source: &[u8]) -> Result<Vec<u8>, ExportError> {
    let mut rest = delta
        .strip_prefix(b"SVN\0")
        .ok_or_else(|| malformed("svndiff stream lacks SVN\\0 magic"))?;

    let mut target = Vec::new();
    while !rest.is_empty() {
        let source_offset = read_varint(&mut rest)?;
        let source_length = read_varint(&mut rest)?;
        let target_length = read_varint(&mut rest)?;
        let instr_length = read_varint(&mut rest)?;
        let new_length = read_varint(&mut rest)?;

        if source_offset + source_length > source.len() {
            return Err(malformed(format!(
                "svndiff window wants source bytes {}..{} of {}",
                source_offset,
                source_offset + source_length,
                source.len()
            )));
        }
        let sview = &source[source_offset..source_offset + source_length];
        let mut instructions = take(&mut rest, instr_length, "instructions")?;
        let mut new_data = take(&mut rest, new_length, "new data")?;

        let mut tbuf: Vec<u8> = Vec::with_capacity(target_length);
        while !instructions.is_empty() {
            let byte = instructions[0];
            instructions = &instructions[1..];
            let mut length = (byte & 0x3f) as usize;
            if length == 0 {
                length = read_varint(&mut instructions)?;
            }
            match byte >> 6 {
                COPY_FROM_SOURCE => {
                    let offset = read_varint(&mut instructions)?;
                    if offset + length > sview.len() {
                        return Err(malformed("svndiff source copy out of range"));
                    }
                    tbuf.extend_from_slice(&sview[offset..offset + length]);
                }
                COPY_FROM_TARGET => {
                    //  The copied range may overlap what it produces;
                    //  byte-at-a-time gives the run-length behaviour.
                    let offset = read_varint(&mut instructions)?;
                    if length > 0 && offset >= tbuf.len() {
                        return Err(malformed("svndiff target copy out of range"));
                    }
                    for i in 0..length {
                        let b = tbuf[offset + i];
                        tbuf.push(b);
                    }
                }
                COPY_FROM_NEW => {
                    let bytes = take(&mut new_data, length, "new-data copy")?;
                    tbuf.extend_from_slice(bytes);
                }
                _ => return Err(malformed("unknown svndiff instruction")),
            }
        }
        if tbuf.len() != target_length {
            return Err(malformed(format!(
                "svndiff window produced {} bytes, declared {}",
                tbuf.len(),
                target_length
            )));
        }
        if !new_data.is_empty() {
            return Err(malformed("svndiff window left new data unconsumed"));
        }
        target.extend_from_slice(&tbuf);
    }
    Ok(target)
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Check a dump checksum header against the actual bytes.
pub fn verify_md5(data: &[u8], expected: &str, what: &str) -> Result<(), ExportError> {
    let actual = md5_hex(data);
    if actual != expected {
        return Err(malformed(format!(
            "{} checksum mismatch: got {}, header says {}",
            what, actual, expected
        )));
    }
    Ok(())
}
