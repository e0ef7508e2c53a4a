//! Artifact integrity helpers.
//!
//! All functions here are blocking; async callers wrap them in
//! `tokio::task::spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

const BUF_SIZE: usize = 64 * 1024;

/// SHA-256 of a file, lowercase hex
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::with_capacity(BUF_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Structural check of a gzip stream: decode it fully and discard the output.
///
/// Returns the decompressed length. A truncated or corrupted stream fails
/// with `InvalidData` or `UnexpectedEof`.
pub fn verify_gzip(path: &Path) -> io::Result<u64> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty gzip file"));
    }
    let mut decoder = MultiGzDecoder::new(BufReader::with_capacity(BUF_SIZE, file));
    io::copy(&mut decoder, &mut io::sink())
}

/// Compress `src` into `dst` with gzip, returning the compressed size.
///
/// `dst` is removed again if compression fails part way.
pub fn gzip_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let result = (|| {
        let mut reader = BufReader::with_capacity(BUF_SIZE, File::open(src)?);
        let writer = BufWriter::with_capacity(BUF_SIZE, File::create(dst)?);
        let mut encoder = GzEncoder::new(writer, Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        let mut writer = encoder.finish()?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;
        Ok(fs::metadata(dst)?.len())
    })();

    if result.is_err() {
        let _ = fs::remove_file(dst);
    }
    result
}

/// Size of a file, 0 if it cannot be read
pub fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_known_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_gzip_then_verify() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("dump.sql");
        let dst = dir.path().join("dump.sql.gz");
        fs::write(&src, "CREATE TABLE t (id int);\n".repeat(100)).unwrap();

        let size = gzip_file(&src, &dst).unwrap();
        assert_eq!(size, file_size(&dst));
        assert_eq!(verify_gzip(&dst).unwrap(), 2500);
    }

    #[test]
    fn test_verify_rejects_truncated_stream() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("dump.sql");
        let dst = dir.path().join("dump.sql.gz");
        fs::write(&src, "INSERT INTO t VALUES (1);\n".repeat(1000)).unwrap();
        gzip_file(&src, &dst).unwrap();

        let bytes = fs::read(&dst).unwrap();
        fs::write(&dst, &bytes[..bytes.len() / 2]).unwrap();
        assert!(verify_gzip(&dst).is_err());
    }

    #[test]
    fn test_verify_rejects_plain_text_and_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.gz");
        fs::write(&path, b"not gzip at all").unwrap();
        assert!(verify_gzip(&path).is_err());

        fs::write(&path, b"").unwrap();
        assert!(verify_gzip(&path).is_err());
    }

    #[test]
    fn test_gzip_missing_source_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("out.gz");
        assert!(gzip_file(&dir.path().join("missing"), &dst).is_err());
        assert!(!dst.exists());
    }
}
