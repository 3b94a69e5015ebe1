//! Final package assembly (spec §4.13): zips the processing outputs
//! together with files copied from the original package root into
//! `<out>/<package_name>_processed.zip`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::output_search::OutputLocation;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("assembled archive is missing or empty entry: {0}")]
    VerificationFailed(String),
}

/// Builds `<out_dir>/<package_name>_processed.zip` containing exactly
/// the five entries spec §4.13 enumerates, then verifies it.
pub async fn assemble(
    out_dir: &Path,
    package_name: &str,
    package_root: &Path,
    outputs: &OutputLocation,
) -> Result<PathBuf, AssembleError> {
    let archive_path = out_dir.join(format!("{package_name}_processed.zip"));

    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|source| AssembleError::Io {
            path: out_dir.to_path_buf(),
            source,
        })?;

    let archive_path_clone = archive_path.clone();
    let colorized_las = outputs.colorized_las.clone();
    let transforms_json = outputs.transforms_json.clone();
    let metadata_yaml = package_root.join("metadata.yaml");
    let preview_jpg = package_root.join("Preview.jpg");
    let camera_dir = package_root.join("camera");

    tokio::task::spawn_blocking(move || {
        write_zip(
            &archive_path_clone,
            &colorized_las,
            &transforms_json,
            &metadata_yaml,
            &preview_jpg,
            &camera_dir,
        )
    })
    .await
    .map_err(|join_err| AssembleError::Io {
        path: archive_path.clone(),
        source: std::io::Error::other(join_err.to_string()),
    })??;

    verify(&archive_path).await?;
    Ok(archive_path)
}

fn write_zip(
    archive_path: &Path,
    colorized_las: &Path,
    transforms_json: &Path,
    metadata_yaml: &Path,
    preview_jpg: &Path,
    camera_dir: &Path,
) -> Result<(), AssembleError> {
    let file = std::fs::File::create(archive_path).map_err(|source| AssembleError::Io {
        path: archive_path.to_path_buf(),
        source,
    })?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    write_file_entry(&mut writer, "colorized.las", colorized_las, options)?;
    write_file_entry(&mut writer, "transforms.json", transforms_json, options)?;
    write_file_entry(&mut writer, "metadata.yaml", metadata_yaml, options)?;
    write_file_entry(&mut writer, "Preview.jpg", preview_jpg, options)?;

    if camera_dir.is_dir() {
        for entry in walkdir::WalkDir::new(camera_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry.path().strip_prefix(camera_dir.parent().unwrap_or(camera_dir)).unwrap_or(entry.path());
            let entry_name = relative.to_string_lossy().replace('\\', "/");
            write_file_entry(&mut writer, &entry_name, entry.path(), options)?;
        }
    }

    writer.finish()?;
    Ok(())
}

fn write_file_entry(
    writer: &mut zip::ZipWriter<std::fs::File>,
    entry_name: &str,
    source: &Path,
    options: zip::write::FileOptions,
) -> Result<(), AssembleError> {
    use std::io::{Read, Write};

    writer.start_file(entry_name, options)?;
    let mut file = std::fs::File::open(source).map_err(|err| AssembleError::Io {
        path: source.to_path_buf(),
        source: err,
    })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|err| AssembleError::Io {
        path: source.to_path_buf(),
        source: err,
    })?;
    writer.write_all(&buf).map_err(|err| AssembleError::Io {
        path: source.to_path_buf(),
        source: err,
    })?;
    Ok(())
}

/// Lists the archive and checks all five required entries exist and are
/// non-zero (spec §4.13).
async fn verify(archive_path: &Path) -> Result<(), AssembleError> {
    let archive_path = archive_path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive_path).map_err(|source| AssembleError::Io {
            path: archive_path.clone(),
            source,
        })?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut found_camera_entry = false;
        let required = ["colorized.las", "transforms.json", "metadata.yaml", "Preview.jpg"];
        let mut sizes = std::collections::HashMap::new();

        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            let name = entry.name().to_string();
            if name.starts_with("camera/") && entry.size() > 0 {
                found_camera_entry = true;
            }
            sizes.insert(name, entry.size());
        }

        for name in required {
            match sizes.get(name) {
                Some(size) if *size > 0 => continue,
                _ => return Err(AssembleError::VerificationFailed(name.to_string())),
            }
        }
        if !found_camera_entry {
            return Err(AssembleError::VerificationFailed("camera/**".to_string()));
        }
        Ok(())
    })
    .await
    .map_err(|join_err| AssembleError::Io {
        path: archive_path.clone(),
        source: std::io::Error::other(join_err.to_string()),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_source_tree(root: &Path) -> OutputLocation {
        tokio::fs::create_dir_all(root.join("camera/left")).await.unwrap();
        tokio::fs::write(root.join("metadata.yaml"), b"record:\n").await.unwrap();
        tokio::fs::write(root.join("Preview.jpg"), b"jpeg-bytes").await.unwrap();
        tokio::fs::write(root.join("camera/left/frame_0001.jpg"), b"frame").await.unwrap();

        let outputs_dir = root.join("driver_output");
        tokio::fs::create_dir_all(&outputs_dir).await.unwrap();
        let colorized_las = outputs_dir.join("colorized.las");
        let transforms_json = outputs_dir.join("transforms.json");
        tokio::fs::write(&colorized_las, b"las-bytes").await.unwrap();
        tokio::fs::write(&transforms_json, b"{}").await.unwrap();

        OutputLocation {
            dir: outputs_dir,
            colorized_las,
            transforms_json,
        }
    }

    #[tokio::test]
    async fn assembles_and_verifies_archive() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = write_source_tree(dir.path()).await;
        let out_dir = dir.path().join("final");

        let archive_path = assemble(&out_dir, "pkg42", dir.path(), &outputs)
            .await
            .unwrap();
        assert!(archive_path.exists());
    }
}
