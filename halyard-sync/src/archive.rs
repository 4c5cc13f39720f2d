//! Workspace archiver.
//!
//! Packs a component directory into an uncompressed tar. Entry names are
//! relative to the root; directories always get their own header so empty
//! ones survive extraction, and symlinks are stored as links.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use halyard_core::settings::ArchiveSettings;
use wax::{CandidatePath, Glob, Pattern};

use crate::error::{archive_err, SyncError};

/// What to leave out of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Base names skipped among the root's immediate children.
    pub excluded: BTreeSet<String>,
    /// Globs matched against every root-relative path, at any depth.
    pub exclude_globs: Vec<String>,
    /// Skip dot-prefixed immediate children.
    pub skip_hidden: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self::from(&ArchiveSettings::default())
    }
}

impl From<&ArchiveSettings> for ArchiveOptions {
    fn from(settings: &ArchiveSettings) -> Self {
        Self {
            excluded: settings.excluded.clone(),
            exclude_globs: settings.exclude_globs.clone(),
            skip_hidden: settings.skip_hidden,
        }
    }
}

struct Filter<'a> {
    options: &'a ArchiveOptions,
    globs: Vec<Glob<'a>>,
}

impl Filter<'_> {
    fn skips(&self, relative: &str, depth: usize) -> bool {
        if depth == 0 {
            let name = relative;
            if self.options.skip_hidden && name.starts_with('.') {
                return true;
            }
            if self.options.excluded.contains(name) {
                return true;
            }
        }
        let candidate = CandidatePath::from(relative);
        self.globs
            .iter()
            .any(|glob| glob.matched(&candidate).is_some())
    }
}

/// Archive `root` into `destination`.
///
/// The tar is written to `<destination>.partial` first and renamed into place
/// only once complete. On failure the partial file is removed and the error
/// names the path that could not be archived.
pub fn archive(
    root: &Path,
    options: &ArchiveOptions,
    destination: &Path,
) -> Result<PathBuf, SyncError> {
    let globs = options
        .exclude_globs
        .iter()
        .map(|pattern| {
            Glob::new(pattern).map_err(|e| SyncError::ExcludeGlob {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let filter = Filter { options, globs };

    let partial = partial_path(destination);
    match write_archive(root, &filter, &partial) {
        Ok(entries) => {
            if let Err(e) = std::fs::rename(&partial, destination) {
                let _ = std::fs::remove_file(&partial);
                return Err(archive_err(destination, e));
            }
            tracing::debug!(
                root = %root.display(),
                archive = %destination.display(),
                entries,
                "archived workspace"
            );
            Ok(destination.to_path_buf())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            Err(err)
        }
    }
}

/// `<destination>.partial`, byte-exact for names that are not UTF-8.
fn partial_path(destination: &Path) -> PathBuf {
    let mut partial = destination.as_os_str().to_os_string();
    partial.push(".partial");
    PathBuf::from(partial)
}

fn write_archive(root: &Path, filter: &Filter<'_>, partial: &Path) -> Result<usize, SyncError> {
    let file = File::create(partial).map_err(|e| archive_err(partial, e))?;
    let mut builder = tar::Builder::new(file);
    builder.follow_symlinks(false);
    // Timestamps and ownership stay out of the headers so the revision only
    // moves when content, layout or permissions do.
    builder.mode(tar::HeaderMode::Deterministic);

    let mut entries = 0;
    append_children(&mut builder, root, "", 0, filter, &mut entries)?;

    let file = builder.into_inner().map_err(|e| archive_err(partial, e))?;
    file.sync_all().map_err(|e| archive_err(partial, e))?;
    Ok(entries)
}

fn append_children(
    builder: &mut tar::Builder<File>,
    dir: &Path,
    prefix: &str,
    depth: usize,
    filter: &Filter<'_>,
    entries: &mut usize,
) -> Result<(), SyncError> {
    let listing = std::fs::read_dir(dir).map_err(|e| archive_err(dir, e))?;
    for entry in listing {
        let entry = entry.map_err(|e| archive_err(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        if filter.skips(&relative, depth) {
            tracing::trace!(path = %relative, "excluded from archive");
            continue;
        }

        let file_type = entry.file_type().map_err(|e| archive_err(&path, e))?;
        builder
            .append_path_with_name(&path, &relative)
            .map_err(|e| archive_err(&path, e))?;
        *entries += 1;

        if file_type.is_dir() {
            append_children(builder, &path, &relative, depth + 1, filter, entries)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Read;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Eq)]
    enum Entry {
        Dir,
        File(Vec<u8>),
        Link(PathBuf),
    }

    fn read_back(archive: &Path) -> BTreeMap<String, Entry> {
        let mut out = BTreeMap::new();
        let mut tar = tar::Archive::new(File::open(archive).unwrap());
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry
                .path()
                .unwrap()
                .to_string_lossy()
                .trim_end_matches('/')
                .to_owned();
            let kind = entry.header().entry_type();
            let value = if kind.is_dir() {
                Entry::Dir
            } else if kind.is_symlink() {
                Entry::Link(entry.link_name().unwrap().unwrap().into_owned())
            } else {
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).unwrap();
                Entry::File(bytes)
            };
            out.insert(name, value);
        }
        out
    }

    fn workspace() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/main/java")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::create_dir_all(root.join("target/classes")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("pom.xml"), b"<project/>").unwrap();
        std::fs::write(root.join("src/main/java/App.java"), b"class App {}").unwrap();
        std::fs::write(root.join("src/main/app.log"), b"noise").unwrap();
        std::fs::write(root.join("target/app.jar"), b"jar").unwrap();
        std::fs::write(root.join(".git/HEAD"), b"ref").unwrap();
        dir
    }

    #[test]
    fn round_trips_files_and_empty_dirs() {
        let ws = workspace();
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");

        let written = archive(ws.path(), &ArchiveOptions::default(), &dest).expect("archive");
        assert_eq!(written, dest);

        let entries = read_back(&dest);
        assert_eq!(entries.get("empty"), Some(&Entry::Dir));
        assert_eq!(entries.get("src/main/java"), Some(&Entry::Dir));
        assert_eq!(
            entries.get("src/main/java/App.java"),
            Some(&Entry::File(b"class App {}".to_vec()))
        );
        assert_eq!(entries.get("pom.xml"), Some(&Entry::File(b"<project/>".to_vec())));
    }

    #[test]
    fn default_options_skip_target_and_hidden_children() {
        let ws = workspace();
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");
        archive(ws.path(), &ArchiveOptions::default(), &dest).expect("archive");

        let entries = read_back(&dest);
        assert!(entries.keys().all(|k| !k.starts_with("target")));
        assert!(entries.keys().all(|k| !k.starts_with(".git")));
    }

    #[test]
    fn excluded_names_only_apply_at_top_level() {
        let ws = workspace();
        std::fs::create_dir_all(ws.path().join("src/target")).unwrap();
        std::fs::write(ws.path().join("src/target/keep.txt"), b"kept").unwrap();

        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");
        archive(ws.path(), &ArchiveOptions::default(), &dest).expect("archive");
        assert!(read_back(&dest).contains_key("src/target/keep.txt"));
    }

    #[test]
    fn globs_apply_at_every_depth() {
        let ws = workspace();
        let options = ArchiveOptions {
            exclude_globs: vec!["**/*.log".to_owned()],
            ..ArchiveOptions::default()
        };
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");
        archive(ws.path(), &options, &dest).expect("archive");

        let entries = read_back(&dest);
        assert!(!entries.contains_key("src/main/app.log"));
        assert!(entries.contains_key("src/main/java/App.java"));
    }

    #[test]
    fn hidden_children_kept_when_not_skipped() {
        let ws = workspace();
        let options = ArchiveOptions {
            skip_hidden: false,
            ..ArchiveOptions::default()
        };
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");
        archive(ws.path(), &options, &dest).expect("archive");
        assert!(read_back(&dest).contains_key(".git/HEAD"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_keep_their_target() {
        let ws = workspace();
        std::os::unix::fs::symlink("src/main/java/App.java", ws.path().join("link")).unwrap();

        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");
        archive(ws.path(), &ArchiveOptions::default(), &dest).expect("archive");
        assert_eq!(
            read_back(&dest).get("link"),
            Some(&Entry::Link(PathBuf::from("src/main/java/App.java")))
        );
    }

    #[test]
    fn touching_files_keeps_archive_bytes() {
        let ws = workspace();
        let out = TempDir::new().unwrap();
        let first = out.path().join("first.tar");
        let second = out.path().join("second.tar");

        archive(ws.path(), &ArchiveOptions::default(), &first).expect("archive");
        filetime::set_file_mtime(
            ws.path().join("pom.xml"),
            filetime::FileTime::from_unix_time(1_700_000_000, 0),
        )
        .unwrap();
        archive(ws.path(), &ArchiveOptions::default(), &second).expect("archive");

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn invalid_glob_is_reported() {
        let ws = workspace();
        let options = ArchiveOptions {
            exclude_globs: vec!["src/{unclosed".to_owned()],
            ..ArchiveOptions::default()
        };
        let out = TempDir::new().unwrap();
        let err = archive(ws.path(), &options, &out.path().join("ws.tar")).unwrap_err();
        assert!(matches!(err, SyncError::ExcludeGlob { .. }), "got: {err}");
    }

    #[test]
    fn missing_root_leaves_no_partial_file() {
        let out = TempDir::new().unwrap();
        let dest = out.path().join("ws.tar");
        let missing = out.path().join("does-not-exist");

        let err = archive(&missing, &ArchiveOptions::default(), &dest).unwrap_err();
        assert!(err.to_string().contains("does-not-exist"), "got: {err}");
        assert!(!dest.exists());
        assert!(!out.path().join("ws.tar.partial").exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_utf8_destination_is_kept_byte_exact() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let ws = workspace();
        let out = TempDir::new().unwrap();
        let dest = out.path().join(OsStr::from_bytes(b"ws-\xff.tar"));

        let written = archive(ws.path(), &ArchiveOptions::default(), &dest).unwrap();
        assert_eq!(written, dest);
        assert!(dest.exists());
        assert_eq!(
            partial_path(&dest).file_name().unwrap().as_bytes(),
            b"ws-\xff.tar.partial"
        );
        assert!(!partial_path(&dest).exists());
    }
}
