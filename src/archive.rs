//! Update archives.
//!
//! An update archive is a zip file wrapping a whole runtime image in a
//! single root directory, for example `my-app/`, `my-app/bin/`,
//! `my-app/bin/my-app`, and so on. The root directory must be the first
//! entry. Entries are processed in the order they appear in the file, which
//! may differ from the order of the central directory.
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, ZipArchive, ZipWriter};

use crate::{
    dir::DirError,
    error::{UpdateError, UpdateErrorKind},
};

/// Error for reading or writing an update archive.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// I/O error on the given path.
    #[error("input/output error on {path:?}")]
    Io {
        /// Path of the file being read or written.
        path: PathBuf,
        /// Source error.
        #[source]
        source: std::io::Error,
    },

    /// Preparing or walking a directory failed.
    #[error(transparent)]
    Dir(#[from] DirError),

    /// The zip data is malformed or unsupported.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// The archive has no entries.
    #[error("at least one entry expected in archive {archive:?}")]
    Empty {
        /// Path of the archive.
        archive: PathBuf,
    },

    /// The destination exists but is not a directory.
    #[error("destination {path:?} is not a directory")]
    DestinationNotDirectory {
        /// Path of the destination.
        path: PathBuf,
    },

    /// The first entry is not a directory.
    #[error("first archive entry {name:?} is not a root directory")]
    MissingRoot {
        /// Name of the first entry.
        name: String,
    },

    /// The entry is outside the root directory or has an unsafe path.
    #[error("invalid archive entry {name:?}")]
    InvalidEntry {
        /// Name of the entry.
        name: String,
    },
}

impl From<ArchiveError> for UpdateError {
    fn from(value: ArchiveError) -> Self {
        UpdateError::new(UpdateErrorKind::Io).with_source(value)
    }
}

/// Counts of what [`unpack`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Number of directories created.
    pub dirs: u64,
    /// Number of files written.
    pub files: u64,
    /// Total bytes written.
    pub bytes: u64,
}

/// Extracts `archive` into `destination` with the root directory stripped.
///
/// Anything already inside `destination` is deleted first, so a staging
/// directory left over by an interrupted run can be reused. The destination
/// is created if it does not exist.
pub fn unpack(archive: &Path, destination: &Path) -> Result<UnpackSummary, ArchiveError> {
    tracing::info!(?archive, ?destination, "unpacking archive");

    prepare_destination(destination)?;

    let file = File::open(archive).map_err(|source| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file)?;
    let order = entry_order(&mut zip)?;

    let root = match order.first() {
        Some(&index) => zip.by_index_raw(index)?.name().to_string(),
        None => {
            return Err(ArchiveError::Empty {
                archive: archive.to_path_buf(),
            })
        }
    };

    if !is_dir_name(&root) {
        return Err(ArchiveError::MissingRoot { name: root });
    }

    tracing::debug!(root, entries = order.len(), "archive root");

    let mut summary = UnpackSummary::default();

    for &index in &order[1..] {
        let mut entry = zip.by_index(index)?;
        let name = entry.name().to_string();
        let relative = relative_entry_path(&root, &name)?;

        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = destination.join(&relative);

        if is_dir_name(&name) {
            tracing::trace!(?target, "create directory");
            std::fs::create_dir_all(&target).map_err(|source| DirError::CreateDir {
                path: target.clone(),
                source,
            })?;
            summary.dirs += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DirError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        tracing::trace!(?target, "write file");
        let map_io = |source| ArchiveError::Io {
            path: target.clone(),
            source,
        };
        let mut output = File::create(&target).map_err(map_io)?;
        summary.bytes += std::io::copy(&mut entry, &mut output).map_err(map_io)?;
        output.flush().map_err(map_io)?;
        summary.files += 1;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            crate::os::unix::set_posix_permission(&target, mode & 0o777).map_err(map_io)?;
        }
    }

    tracing::info!(?summary, "unpacked archive");

    Ok(summary)
}

/// Returns the entry indices sorted by the position of their local headers.
fn entry_order(zip: &mut ZipArchive<File>) -> Result<Vec<usize>, ArchiveError> {
    let mut offsets = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        offsets.push((zip.by_index_raw(index)?.header_start(), index));
    }

    offsets.sort_unstable();

    Ok(offsets.into_iter().map(|(_, index)| index).collect())
}

fn prepare_destination(destination: &Path) -> Result<(), ArchiveError> {
    if destination.is_dir() {
        crate::dir::delete_contents(destination)?;
    } else if destination.symlink_metadata().is_ok() {
        return Err(ArchiveError::DestinationNotDirectory {
            path: destination.to_path_buf(),
        });
    } else {
        std::fs::create_dir_all(destination).map_err(|source| DirError::CreateDir {
            path: destination.to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

fn is_dir_name(name: &str) -> bool {
    name.ends_with('/') || name.ends_with('\\')
}

fn relative_entry_path(root: &str, name: &str) -> Result<PathBuf, ArchiveError> {
    let invalid = || ArchiveError::InvalidEntry {
        name: name.to_string(),
    };
    let rest = name.strip_prefix(root).ok_or_else(invalid)?;

    let mut path = PathBuf::new();

    for component in rest.split(['/', '\\']) {
        match component {
            "" => continue,
            "." | ".." => return Err(invalid()),
            // Drive prefixes such as `C:`.
            _ if cfg!(windows) && component.contains(':') => return Err(invalid()),
            _ => path.push(component),
        }
    }

    Ok(path)
}

/// Writes the contents of `source` into a new archive at `output`.
///
/// The entries are wrapped in a root directory called `root_name` and
/// written in sorted order, directories before their contents. The archive
/// is written to a temporary file first and moved into place when complete.
pub fn pack_dir(source: &Path, root_name: &str, output: &Path) -> Result<(), ArchiveError> {
    tracing::info!(?source, root_name, ?output, "packing archive");

    if root_name.is_empty() || root_name.contains(['/', '\\']) {
        return Err(ArchiveError::InvalidEntry {
            name: root_name.to_string(),
        });
    }

    let output_dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let map_output_io = |source| ArchiveError::Io {
        path: output.to_path_buf(),
        source,
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(&output_dir).map_err(map_output_io)?;

    let mut writer = ZipWriter::new(temp_file.as_file_mut());

    writer.add_directory(format!("{root_name}/"), SimpleFileOptions::default())?;

    for item in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let item = item.map_err(|error| {
            let path = error
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| source.to_path_buf());
            let source = error
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            ArchiveError::Io { path, source }
        })?;

        let name = entry_name(root_name, source, item.path())?;

        if item.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), SimpleFileOptions::default())?;
            continue;
        }

        let map_item_io = |source| ArchiveError::Io {
            path: item.path().to_path_buf(),
            source,
        };

        let options = SimpleFileOptions::default();

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            let metadata = std::fs::metadata(item.path()).map_err(map_item_io)?;
            options.unix_permissions(metadata.permissions().mode() & 0o777)
        };

        writer.start_file(name, options)?;
        let mut input = File::open(item.path()).map_err(map_item_io)?;
        std::io::copy(&mut input, &mut writer).map_err(map_item_io)?;
    }

    writer.finish()?;

    temp_file.persist(output).map_err(|error| map_output_io(error.error))?;

    Ok(())
}

fn entry_name(root_name: &str, source: &Path, path: &Path) -> Result<String, ArchiveError> {
    let invalid = || ArchiveError::InvalidEntry {
        name: path.to_string_lossy().to_string(),
    };
    let relative = path.strip_prefix(source).map_err(|_| invalid())?;

    let mut name = root_name.to_string();

    for component in relative.components() {
        let component = component.as_os_str().to_str().ok_or_else(invalid)?;
        name.push('/');
        name.push_str(component);
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_entry_path() {
        assert_eq!(
            relative_entry_path("app/", "app/bin/app").unwrap(),
            PathBuf::from("bin").join("app")
        );
        assert_eq!(
            relative_entry_path("app/", "app/lib/").unwrap(),
            PathBuf::from("lib")
        );
        assert_eq!(relative_entry_path("app/", "app/").unwrap(), PathBuf::new());
        assert!(relative_entry_path("app/", "other/bin/app").is_err());
        assert!(relative_entry_path("app/", "app/../etc/passwd").is_err());
    }

    #[test]
    fn test_colon_in_entry_name() {
        let result = relative_entry_path("app/", "app/lib/a:b");

        if cfg!(windows) {
            assert!(result.is_err());
            assert!(relative_entry_path("app/", "app/C:/x").is_err());
        } else {
            assert_eq!(result.unwrap(), PathBuf::from("lib").join("a:b"));
        }
    }

    #[test]
    fn test_is_dir_name() {
        assert!(is_dir_name("app/"));
        assert!(is_dir_name("app\\lib\\"));
        assert!(!is_dir_name("app/bin/app"));
    }

    #[test]
    fn test_empty_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        let file = File::create(&archive).unwrap();
        ZipWriter::new(file).finish().unwrap();

        let error = unpack(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(error, ArchiveError::Empty { .. }));
        assert!(error.to_string().contains("at least one entry expected"));
    }

    #[test]
    fn test_destination_is_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir(&source).unwrap();
        std::fs::write(source.join("a.txt"), "a").unwrap();
        let archive = dir.path().join("a.zip");
        pack_dir(&source, "root", &archive).unwrap();

        let destination = dir.path().join("dest");
        std::fs::write(&destination, "not a dir").unwrap();

        let error = unpack(&archive, &destination).unwrap_err();
        assert!(matches!(error, ArchiveError::DestinationNotDirectory { .. }));
    }

    #[test]
    fn test_first_entry_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("flat.zip");
        let mut writer = ZipWriter::new(File::create(&archive).unwrap());
        writer
            .start_file("readme.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hello").unwrap();
        writer.finish().unwrap();

        let error = unpack(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(error, ArchiveError::MissingRoot { .. }));
    }

    #[test]
    fn test_entries_without_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("sparse.zip");
        let mut writer = ZipWriter::new(File::create(&archive).unwrap());
        writer
            .add_directory("app/", SimpleFileOptions::default())
            .unwrap();
        writer
            .start_file("app/lib/deep/data.bin", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(&[1, 2, 3]).unwrap();
        writer.finish().unwrap();

        let destination = dir.path().join("out");
        let summary = unpack(&archive, &destination).unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.bytes, 3);
        assert_eq!(
            std::fs::read(destination.join("lib/deep/data.bin")).unwrap(),
            vec![1, 2, 3]
        );
    }

    fn crc32(data: &[u8]) -> u32 {
        let mut crc = !0u32;

        for byte in data {
            crc ^= u32::from(*byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
            }
        }

        !crc
    }

    /// Builds a stored zip as streaming writers do: sizes and checksums
    /// follow the data in a data descriptor (flag bit 3) and the central
    /// directory lists the entries in reverse.
    fn streamed_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        const DATE: u16 = 0x0021;
        let mut data = Vec::new();
        let mut central = Vec::new();

        for (name, content) in entries {
            let offset = data.len() as u32;
            let crc = crc32(content);
            let size = content.len() as u32;

            data.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            data.extend_from_slice(&20u16.to_le_bytes());
            data.extend_from_slice(&0x0008u16.to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
            data.extend_from_slice(&DATE.to_le_bytes());
            data.extend_from_slice(&[0; 12]);
            data.extend_from_slice(&(name.len() as u16).to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
            data.extend_from_slice(name.as_bytes());
            data.extend_from_slice(content);
            data.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            data.extend_from_slice(&crc.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());
            data.extend_from_slice(&size.to_le_bytes());

            let mode: u32 = if name.ends_with('/') { 0o40755 } else { 0o100644 };
            let mut record = Vec::new();
            record.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            record.extend_from_slice(&0x031Eu16.to_le_bytes());
            record.extend_from_slice(&20u16.to_le_bytes());
            record.extend_from_slice(&0x0008u16.to_le_bytes());
            record.extend_from_slice(&0u16.to_le_bytes());
            record.extend_from_slice(&0u16.to_le_bytes());
            record.extend_from_slice(&DATE.to_le_bytes());
            record.extend_from_slice(&crc.to_le_bytes());
            record.extend_from_slice(&size.to_le_bytes());
            record.extend_from_slice(&size.to_le_bytes());
            record.extend_from_slice(&(name.len() as u16).to_le_bytes());
            record.extend_from_slice(&[0; 8]);
            record.extend_from_slice(&(mode << 16).to_le_bytes());
            record.extend_from_slice(&offset.to_le_bytes());
            record.extend_from_slice(name.as_bytes());
            central.push(record);
        }

        let central_offset = data.len() as u32;
        let mut central_size = 0u32;

        for record in central.iter().rev() {
            central_size += record.len() as u32;
            data.extend_from_slice(record);
        }

        data.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        data.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        data.extend_from_slice(&central_size.to_le_bytes());
        data.extend_from_slice(&central_offset.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());

        data
    }

    #[test]
    fn test_crc32() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_unpack_data_descriptor_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("streamed.zip");
        std::fs::write(
            &archive,
            streamed_zip(&[
                ("app/", b""),
                ("app/bin/", b""),
                ("app/bin/app", b"#!/bin/sh\n"),
                ("app/lib/version.txt", b"v3"),
            ]),
        )
        .unwrap();

        let destination = dir.path().join("out");
        let summary = unpack(&archive, &destination).unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.dirs, 1);
        assert_eq!(
            std::fs::read_to_string(destination.join("lib/version.txt")).unwrap(),
            "v3"
        );
        assert_eq!(
            std::fs::read_to_string(destination.join("bin/app")).unwrap(),
            "#!/bin/sh\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_keeps_unix_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        std::fs::create_dir_all(source.join("bin")).unwrap();
        let launcher = source.join("bin/app");
        std::fs::write(&launcher, "#!/bin/sh\n").unwrap();
        crate::os::unix::set_posix_permission(&launcher, 0o755).unwrap();

        let archive = dir.path().join("a.zip");
        pack_dir(&source, "app", &archive).unwrap();
        let destination = dir.path().join("out");
        unpack(&archive, &destination).unwrap();

        let mode = std::fs::metadata(destination.join("bin/app"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
