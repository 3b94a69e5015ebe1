//! Per-format extraction. Zip and tar/tar.gz are decoded in-process;
//! rar and 7z are delegated to the `unrar`/`7z` command-line tools the
//! same way the Processing Driver delegates to the reconstruction
//! binaries (spec §1 lists archive decompressors among the external
//! collaborators, not something this core reimplements).

use std::path::{Path, PathBuf};

use tokio::process::Command;

use metacam_types::ArchiveFormat;

use crate::{ArchiveError, ArchiveInspectorConfig};

pub async fn extract(
    archive_path: &Path,
    format: ArchiveFormat,
    dest: &Path,
    config: &ArchiveInspectorConfig,
) -> Result<(Vec<PathBuf>, Option<String>), ArchiveError> {
    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest, &config.default_passwords).await,
        ArchiveFormat::Tar => extract_tar(archive_path, dest, false).await,
        ArchiveFormat::TarGz => extract_tar(archive_path, dest, true).await,
        ArchiveFormat::Rar => {
            extract_via_external_tool(
                &config.unrar_binary,
                archive_path,
                dest,
                &config.default_passwords,
                |password| match password {
                    Some(p) => vec![
                        "x".to_string(),
                        "-y".to_string(),
                        format!("-p{p}"),
                        archive_path.display().to_string(),
                        format!("{}/", dest.display()),
                    ],
                    None => vec![
                        "x".to_string(),
                        "-y".to_string(),
                        archive_path.display().to_string(),
                        format!("{}/", dest.display()),
                    ],
                },
            )
            .await
        }
        ArchiveFormat::SevenZip => {
            extract_via_external_tool(
                &config.sevenzip_binary,
                archive_path,
                dest,
                &config.default_passwords,
                |password| match password {
                    Some(p) => vec![
                        "x".to_string(),
                        format!("-p{p}"),
                        "-y".to_string(),
                        format!("-o{}", dest.display()),
                        archive_path.display().to_string(),
                    ],
                    None => vec![
                        "x".to_string(),
                        "-y".to_string(),
                        format!("-o{}", dest.display()),
                        archive_path.display().to_string(),
                    ],
                },
            )
            .await
        }
    }
}

async fn extract_zip(
    archive_path: &Path,
    dest: &Path,
    passwords: &[String],
) -> Result<(Vec<PathBuf>, Option<String>), ArchiveError> {
    let archive_path = archive_path.to_path_buf();
    let dest = dest.to_path_buf();
    let passwords = passwords.to_vec();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path).map_err(|source| ArchiveError::Io {
            path: archive_path.clone(),
            source,
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|err| ArchiveError::Corrupt {
            path: archive_path.clone(),
            reason: err.to_string(),
        })?;

        let mut candidates: Vec<Option<String>> = vec![None];
        candidates.extend(passwords.into_iter().map(Some));

        let mut last_err = None;
        for candidate in candidates {
            match try_extract_zip(&mut archive, &dest, candidate.as_deref()) {
                Ok(files) => return Ok((files, candidate)),
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or(ArchiveError::PasswordRequired { path: archive_path }))
    })
    .await
    .map_err(|join_err| ArchiveError::Io {
        path: dest.clone(),
        source: std::io::Error::other(join_err.to_string()),
    })?
}

fn try_extract_zip(
    archive: &mut zip::ZipArchive<std::fs::File>,
    dest: &Path,
    password: Option<&str>,
) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut files = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = match password {
            Some(p) => archive
                .by_index_decrypt(index, p.as_bytes())
                .map_err(|err| ArchiveError::Corrupt {
                    path: dest.to_path_buf(),
                    reason: err.to_string(),
                })?
                .map_err(|_| ArchiveError::PasswordRequired {
                    path: dest.to_path_buf(),
                })?,
            None => archive.by_index(index).map_err(|err| ArchiveError::Corrupt {
                path: dest.to_path_buf(),
                reason: err.to_string(),
            })?,
        };

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| ArchiveError::Io {
                path: out_path.clone(),
                source,
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut out_file = std::fs::File::create(&out_path).map_err(|source| ArchiveError::Io {
            path: out_path.clone(),
            source,
        })?;
        std::io::copy(&mut entry, &mut out_file).map_err(|source| ArchiveError::Io {
            path: out_path.clone(),
            source,
        })?;
        files.push(relative);
    }
    Ok(files)
}

async fn extract_tar(
    archive_path: &Path,
    dest: &Path,
    gzipped: bool,
) -> Result<(Vec<PathBuf>, Option<String>), ArchiveError> {
    let archive_path = archive_path.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path).map_err(|source| ArchiveError::Io {
            path: archive_path.clone(),
            source,
        })?;

        let mut files = Vec::new();
        let unpack = |mut archive: tar::Archive<Box<dyn std::io::Read>>| -> Result<(), ArchiveError> {
            for entry in archive.entries().map_err(|err| ArchiveError::Corrupt {
                path: archive_path.clone(),
                reason: err.to_string(),
            })? {
                let mut entry = entry.map_err(|err| ArchiveError::Corrupt {
                    path: archive_path.clone(),
                    reason: err.to_string(),
                })?;
                let relative = entry.path().map_err(|err| ArchiveError::Corrupt {
                    path: archive_path.clone(),
                    reason: err.to_string(),
                })?.to_path_buf();
                entry.unpack_in(&dest).map_err(|source| ArchiveError::Io {
                    path: dest.join(&relative),
                    source,
                })?;
                if entry.header().entry_type().is_file() {
                    files.push(relative);
                }
            }
            Ok(())
        };

        let reader: Box<dyn std::io::Read> = if gzipped {
            Box::new(flate2::read::GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        unpack(tar::Archive::new(reader))?;

        Ok((files, None))
    })
    .await
    .map_err(|join_err| ArchiveError::Io {
        path: dest.clone(),
        source: std::io::Error::other(join_err.to_string()),
    })?
}

async fn extract_via_external_tool(
    binary: &Path,
    archive_path: &Path,
    dest: &Path,
    passwords: &[String],
    build_args: impl Fn(Option<&str>) -> Vec<String>,
) -> Result<(Vec<PathBuf>, Option<String>), ArchiveError> {
    let mut candidates: Vec<Option<String>> = vec![None];
    candidates.extend(passwords.iter().cloned().map(Some));

    let mut last_status = None;
    for candidate in candidates {
        let args = build_args(candidate.as_deref());
        let output = Command::new(binary)
            .args(&args)
            .output()
            .await
            .map_err(|source| ArchiveError::Io {
                path: archive_path.to_path_buf(),
                source,
            })?;

        if output.status.success() {
            let files = list_extracted_files(dest).await?;
            return Ok((files, candidate));
        }
        last_status = Some(output.status);
    }

    match last_status {
        Some(_) => Err(ArchiveError::PasswordRequired {
            path: archive_path.to_path_buf(),
        }),
        None => Err(ArchiveError::UnknownFormat {
            path: archive_path.to_path_buf(),
        }),
    }
}

async fn list_extracted_files(dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        Ok(walkdir::WalkDir::new(&dest)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(&dest).ok().map(Path::to_path_buf))
            .collect())
    })
    .await
    .map_err(|join_err| ArchiveError::Io {
        path: dest.clone(),
        source: std::io::Error::other(join_err.to_string()),
    })?
}
