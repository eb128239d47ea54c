use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// SHA-256 over the first `prefix_bytes` of a file, hex encoded.
///
/// A `prefix_bytes` of 0 hashes the whole file. Files that share a prefix
/// collide, which merges them into one photo; it never splits one photo in two.
pub fn content_hash(path: &Path, prefix_bytes: u64) -> std::io::Result<String> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    if prefix_bytes == 0 {
        hash_reader(reader)
    } else {
        hash_reader(reader.take(prefix_bytes))
    }
}

fn hash_reader(mut reader: impl Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
