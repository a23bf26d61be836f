//! Bundle containers.
//!
//! Two container kinds carry a serialized module:
//!
//! ```text
//! HMLC (uncompressed)               HMLB (deflate)
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │ magic  "HMLC"        │          │ magic  "HMLB"        │
//! │ version u16 LE       │          │ version u16 LE       │
//! │ flags   u32 LE       │          │ flags   u32 LE       │
//! │ string table         │          │ deflate( string table │
//! │ statement table      │          │          statement table ) │
//! └──────────────────────┘          └──────────────────────┘
//! ```
//!
//! The string table is a u32 count followed by length-prefixed UTF-8
//! strings; the statement table is a u32 count followed by tag-encoded AST
//! nodes that reference strings by table index.
//!
//! When appended to an interpreter binary, the container is followed by a
//! u64 LE payload length and the 4-byte `HMLP` trailer magic; the
//! interpreter checks its own tail at startup and prefers an embedded
//! payload over a script argument.

mod decoder;
mod encoder;

pub use decoder::decode;
pub use encoder::encode;

use crate::error::RuntimeError;
use std::io::{Read, Write};
use std::path::Path;

/// Magic tag for the uncompressed container.
pub const HMLC_MAGIC: [u8; 4] = *b"HMLC";
/// Magic tag for the deflate-compressed container.
pub const HMLB_MAGIC: [u8; 4] = *b"HMLB";
/// Trailer magic for payloads appended to an interpreter binary.
pub const TRAILER_MAGIC: [u8; 4] = *b"HMLP";
/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;

/// Size of the appended trailer: u64 payload length + magic.
pub const TRAILER_SIZE: usize = 8 + 4;

/// Summary of a bundle container, for `--info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    pub compressed: bool,
    pub version: u16,
    pub flags: u32,
    pub string_count: u32,
    pub statement_count: u32,
    pub byte_len: usize,
}

impl std::fmt::Display for BundleInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "container: {}",
            if self.compressed { "HMLB (deflate)" } else { "HMLC" }
        )?;
        writeln!(f, "version:   {}", self.version)?;
        writeln!(f, "flags:     {:#010x}", self.flags)?;
        writeln!(f, "strings:   {}", self.string_count)?;
        writeln!(f, "statements: {}", self.statement_count)?;
        write!(f, "size:      {} bytes", self.byte_len)
    }
}

/// Inspect a container without fully decoding its AST.
pub fn inspect(bytes: &[u8]) -> Result<BundleInfo, RuntimeError> {
    let (compressed, version, flags, body) = open_container(bytes)?;
    if body.len() < 4 {
        return Err(RuntimeError::Bundle("truncated string table".to_string()));
    }
    let string_count = u32::from_le_bytes(body[0..4].try_into().unwrap());
    // Walk past the string table to the statement count.
    let mut pos = 4usize;
    for _ in 0..string_count {
        if pos + 4 > body.len() {
            return Err(RuntimeError::Bundle("truncated string table".to_string()));
        }
        let len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4 + len;
    }
    if pos + 4 > body.len() {
        return Err(RuntimeError::Bundle("truncated statement table".to_string()));
    }
    let statement_count = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());
    Ok(BundleInfo {
        compressed,
        version,
        flags,
        string_count,
        statement_count,
        byte_len: bytes.len(),
    })
}

/// Split a container into its header and (decompressed) body.
pub(crate) fn open_container(bytes: &[u8]) -> Result<(bool, u16, u32, Vec<u8>), RuntimeError> {
    if bytes.len() < 10 {
        return Err(RuntimeError::Bundle("container too short".to_string()));
    }
    let magic: [u8; 4] = bytes[0..4].try_into().unwrap();
    let compressed = match magic {
        HMLC_MAGIC => false,
        HMLB_MAGIC => true,
        _ => return Err(RuntimeError::Bundle("bad magic tag".to_string())),
    };
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(RuntimeError::Bundle(format!(
            "unsupported container version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }
    let flags = u32::from_le_bytes(bytes[6..10].try_into().unwrap());
    let body = if compressed {
        let mut decoder = flate2::read::DeflateDecoder::new(&bytes[10..]);
        let mut body = Vec::new();
        decoder
            .read_to_end(&mut body)
            .map_err(|e| RuntimeError::Bundle(format!("deflate error: {}", e)))?;
        body
    } else {
        bytes[10..].to_vec()
    };
    Ok((compressed, version, flags, body))
}

/// Assemble a container around an encoded body.
pub(crate) fn seal_container(body: Vec<u8>, compress: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 10);
    out.extend_from_slice(if compress { &HMLB_MAGIC } else { &HMLC_MAGIC });
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    if compress {
        let mut encoder =
            flate2::write::DeflateEncoder::new(&mut out, flate2::Compression::default());
        encoder.write_all(&body).expect("in-memory deflate");
        encoder.finish().expect("in-memory deflate");
    } else {
        out.extend_from_slice(&body);
    }
    out
}

/// Append a payload plus the HMLP trailer to a copy of the interpreter
/// binary, producing a self-contained executable.
pub fn package(interpreter: &Path, payload: &[u8], output: &Path) -> Result<(), RuntimeError> {
    let mut bytes = std::fs::read(interpreter)?;
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&TRAILER_MAGIC);
    std::fs::write(output, &bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(output)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        std::fs::set_permissions(output, perms)?;
    }
    Ok(())
}

/// Check a binary's tail for an embedded payload.
pub fn extract_embedded(binary: &Path) -> Result<Option<Vec<u8>>, RuntimeError> {
    let bytes = std::fs::read(binary)?;
    if bytes.len() < TRAILER_SIZE {
        return Ok(None);
    }
    let tail = &bytes[bytes.len() - TRAILER_SIZE..];
    if tail[8..12] != TRAILER_MAGIC {
        return Ok(None);
    }
    let payload_len = u64::from_le_bytes(tail[0..8].try_into().unwrap()) as usize;
    let end = bytes.len() - TRAILER_SIZE;
    if payload_len > end {
        return Err(RuntimeError::Bundle("corrupt trailer length".to_string()));
    }
    Ok(Some(bytes[end - payload_len..end].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemlock_engine::parser::parse;

    const SOURCE: &str = "fn add(a, b) { return a + b; }\nprint(add(2, 3));";

    #[test]
    fn test_hmlc_round_trip() {
        let program = parse(SOURCE).unwrap();
        let bytes = encode(&program, false);
        assert_eq!(&bytes[0..4], b"HMLC");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_hmlb_round_trip() {
        let program = parse(SOURCE).unwrap();
        let bytes = encode(&program, true);
        assert_eq!(&bytes[0..4], b"HMLB");
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_inspect() {
        let program = parse(SOURCE).unwrap();
        let bytes = encode(&program, false);
        let info = inspect(&bytes).unwrap();
        assert!(!info.compressed);
        assert_eq!(info.version, FORMAT_VERSION);
        assert_eq!(info.statement_count, 2);
        assert!(info.string_count > 0);
    }

    #[test]
    fn test_bad_magic_rejected() {
        assert!(decode(b"NOPExxxxxxxxxx").is_err());
    }

    #[test]
    fn test_package_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let fake_interpreter = dir.path().join("hemlock");
        std::fs::write(&fake_interpreter, b"#!fake interpreter binary").unwrap();
        let program = parse(SOURCE).unwrap();
        let payload = encode(&program, true);
        let output = dir.path().join("app");
        package(&fake_interpreter, &payload, &output).unwrap();

        let embedded = extract_embedded(&output).unwrap().unwrap();
        assert_eq!(embedded, payload);
        let decoded = decode(&embedded).unwrap();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_plain_binary_has_no_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        std::fs::write(&path, b"just a binary with no trailer here").unwrap();
        assert!(extract_embedded(&path).unwrap().is_none());
    }
}
