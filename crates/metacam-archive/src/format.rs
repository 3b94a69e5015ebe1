//! Format detection: magic bytes first, file extension second (spec §4.2).

use std::path::Path;

use tokio::io::AsyncReadExt;

use metacam_types::ArchiveFormat;

use crate::ArchiveError;

const ZIP_MAGICS: [[u8; 4]; 3] = [
    [0x50, 0x4B, 0x03, 0x04],
    [0x50, 0x4B, 0x05, 0x06],
    [0x50, 0x4B, 0x07, 0x08],
];
const RAR4_MAGIC: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];
const RAR5_MAGIC: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];
const SEVENZ_MAGIC: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const TAR_USTAR_OFFSET: usize = 257;
const TAR_USTAR_MAGIC: &[u8] = b"ustar";

pub async fn sniff_format(path: &Path) -> Result<Option<ArchiveFormat>, ArchiveError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let mut header = vec![0u8; 512];
    let read = file
        .read(&mut header)
        .await
        .map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    header.truncate(read);

    if let Some(format) = sniff_magic(&header) {
        return Ok(Some(format));
    }

    Ok(sniff_extension(path))
}

fn sniff_magic(header: &[u8]) -> Option<ArchiveFormat> {
    if header.len() >= 4 && ZIP_MAGICS.iter().any(|m| header.starts_with(m)) {
        return Some(ArchiveFormat::Zip);
    }
    if header.starts_with(&RAR5_MAGIC) || header.starts_with(&RAR4_MAGIC) {
        return Some(ArchiveFormat::Rar);
    }
    if header.starts_with(&SEVENZ_MAGIC) {
        return Some(ArchiveFormat::SevenZip);
    }
    if header.starts_with(&GZIP_MAGIC) {
        return Some(ArchiveFormat::TarGz);
    }
    if header.len() >= TAR_USTAR_OFFSET + 5
        && &header[TAR_USTAR_OFFSET..TAR_USTAR_OFFSET + 5] == TAR_USTAR_MAGIC
    {
        return Some(ArchiveFormat::Tar);
    }
    None
}

fn sniff_extension(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else if name.ends_with(".rar") {
        Some(ArchiveFormat::Rar)
    } else if name.ends_with(".7z") {
        Some(ArchiveFormat::SevenZip)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_zip_magic() {
        assert_eq!(sniff_magic(&[0x50, 0x4B, 0x03, 0x04, 0, 0]), Some(ArchiveFormat::Zip));
    }

    #[test]
    fn recognizes_sevenzip_magic() {
        assert_eq!(sniff_magic(&SEVENZ_MAGIC), Some(ArchiveFormat::SevenZip));
    }

    #[test]
    fn falls_back_to_extension_for_rar() {
        assert_eq!(
            sniff_extension(Path::new("pkg.rar")),
            Some(ArchiveFormat::Rar)
        );
    }
}
