//! Chunked reading of script sources

use std::io::{self, Read};

/// Reads `reader` to the end in chunks of at most `chunk_size` bytes.
///
/// The bytes are decoded once at the end, so a multi-byte character split
/// across two chunks is reassembled intact. Interrupted reads are retried.
pub fn read_script<R: Read>(mut reader: R, chunk_size: usize) -> io::Result<String> {
    let mut chunk = vec![0u8; chunk_size.max(1)];
    let mut script = Vec::new();

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => script.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    String::from_utf8(script).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
