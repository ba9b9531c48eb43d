//! Dump decompression and file-archive extraction.
//!
//! Both are blocking and run on the blocking pool.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::BoxError;

/// Gunzips `dump` next to itself (`x.sql.gz` -> `x.sql`) and returns the new path.
/// Uncompressed dumps are returned unchanged.
pub async fn decompress_dump(dump: &Path) -> Result<PathBuf, BoxError> {
    let Some(target) = dump
        .to_str()
        .and_then(|s| s.strip_suffix(".gz"))
        .map(PathBuf::from)
    else {
        return Ok(dump.to_path_buf());
    };

    let source = dump.to_path_buf();
    let out = target.clone();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut decoder = GzDecoder::new(BufReader::new(File::open(&source)?));
        let mut writer = BufWriter::new(File::create(&out)?);
        io::copy(&mut decoder, &mut writer)?;
        writer.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()
    })
    .await??;

    info!("Decompressed {}", target.display());
    Ok(target)
}

/// Extracts a tar archive into `destination`. Entries escaping it are refused by `tar`.
pub async fn extract_tar(archive: &Path, destination: &Path) -> Result<(), BoxError> {
    let source = archive.to_path_buf();
    let dest = destination.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        std::fs::create_dir_all(&dest)?;
        let mut tar = tar::Archive::new(BufReader::new(File::open(&source)?));
        tar.set_preserve_permissions(true);
        tar.unpack(&dest)
    })
    .await??;

    info!("Extracted {} into {}", archive.display(), destination.display());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_decompress_dump() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("20240101_010000-acme-database.sql.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"CREATE TABLE t (id int);\n").unwrap();
        encoder.finish().unwrap();

        let sql = decompress_dump(&gz).await.unwrap();
        assert_eq!(sql, dir.path().join("20240101_010000-acme-database.sql"));
        assert_eq!(std::fs::read_to_string(&sql).unwrap(), "CREATE TABLE t (id int);\n");
        assert!(gz.exists());
    }

    #[tokio::test]
    async fn test_plain_dump_passes_through() {
        let dir = TempDir::new().unwrap();
        let sql = dir.path().join("dump.sql");
        std::fs::write(&sql, "SELECT 1;").unwrap();
        assert_eq!(decompress_dump(&sql).await.unwrap(), sql);
    }

    #[tokio::test]
    async fn test_corrupt_dump_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gz = dir.path().join("dump.sql.gz");
        std::fs::write(&gz, "not gzip").unwrap();
        assert!(decompress_dump(&gz).await.is_err());
    }

    #[tokio::test]
    async fn test_extract_tar() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("files.tar");
        {
            let mut builder = tar::Builder::new(File::create(&archive).unwrap());
            let data = b"hello";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "acme/public/files/hello.txt", &data[..])
                .unwrap();
            builder.finish().unwrap();
        }

        let sites = dir.path().join("sites");
        extract_tar(&archive, &sites).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(sites.join("acme/public/files/hello.txt")).unwrap(),
            "hello"
        );
    }
}
