//! Archive unpacking with member path shaping.
//!
//! Zip and tar (optionally gzip-compressed) archives are recognized by their
//! leading magic bytes and extracted on the blocking pool. Before a member
//! is written, its relative path is shaped: a declared `strip` count removes
//! leading segments (members with too few segments are dropped), ordered
//! `s/find/replace/` transforms rewrite what remains (an empty result drops
//! the member), and the final path is sanitized before joining the
//! destination root.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::sanitize_path;
use crate::reporter::Reporter;

/// Member path shaping options for one unpack.
#[derive(Debug, Clone, Default)]
pub struct UnpackOptions {
    /// Remove this many leading path segments from each member.
    pub strip: Option<usize>,
    /// Ordered `s/find/replace/flags` transforms applied to member paths.
    pub transform: Vec<String>,
}

/// Remove `prefix_count` leading path segments, normalizing separators to
/// forward slashes. Returns `None` when the path has too few segments — the
/// member is dropped entirely.
pub fn strip_path(path: &str, prefix_count: usize) -> Option<String> {
    let has_leading = path.starts_with(['/', '\\']);
    let has_trailing = path.ends_with(['/', '\\']);
    let elements: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect();
    if elements.len() <= prefix_count {
        return None;
    }
    let mut result = String::new();
    if has_leading {
        result.push('/');
    }
    result.push_str(&elements[prefix_count..].join("/"));
    if has_trailing {
        result.push('/');
    }
    Some(result)
}

/// One parsed `s/find/replace/flags` expression.
#[derive(Debug, Clone)]
pub struct Transform {
    regex: Regex,
    replacement: String,
    global: bool,
}

impl Transform {
    /// Parse a sed-style substitution expression.
    ///
    /// The delimiter is the character following `s` (conventionally `/`) and
    /// may be escaped inside the pattern with a backslash. Supported flags:
    /// `g` (replace every occurrence) and `i` (case-insensitive).
    /// Replacement backreferences are written `\1`..`\9`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransform`] for anything else.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = || Error::InvalidTransform(expression.to_string());
        let mut chars = expression.chars();
        if chars.next() != Some('s') {
            return Err(invalid());
        }
        let delimiter = chars.next().ok_or_else(invalid)?;

        let mut parts: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut escaped = false;
        for c in chars {
            if escaped {
                if c != delimiter {
                    current.push('\\');
                }
                current.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == delimiter {
                parts.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        parts.push(current);
        if escaped || parts.len() != 3 {
            return Err(invalid());
        }
        let flags = &parts[2];
        if !flags.chars().all(|c| matches!(c, 'g' | 'i')) {
            return Err(invalid());
        }

        let mut pattern = String::new();
        if flags.contains('i') {
            pattern.push_str("(?i)");
        }
        pattern.push_str(&parts[0]);
        let regex = Regex::new(&pattern).map_err(|_| invalid())?;

        // regex replacement syntax: escape literal '$', rewrite \N backrefs
        let mut replacement = String::new();
        let mut source = parts[1].chars().peekable();
        while let Some(c) = source.next() {
            match c {
                '$' => replacement.push_str("$$"),
                '\\' => match source.peek() {
                    Some(d @ '0'..='9') => {
                        replacement.push_str("${");
                        replacement.push(*d);
                        replacement.push('}');
                        source.next();
                    }
                    _ => replacement.push('\\'),
                },
                other => replacement.push(other),
            }
        }

        Ok(Self {
            regex,
            replacement,
            global: flags.contains('g'),
        })
    }

    /// Apply the substitution to one path.
    pub fn apply(&self, path: &str) -> String {
        if self.global {
            self.regex.replace_all(path, self.replacement.as_str()).into_owned()
        } else {
            self.regex.replace(path, self.replacement.as_str()).into_owned()
        }
    }
}

/// Shape one member path: strip, transform, sanitize. `None` drops the
/// member.
fn shape_member_path(
    raw: &str,
    strip: Option<usize>,
    transforms: &[Transform],
) -> Option<String> {
    let mut path = match strip {
        Some(count) if count > 0 => strip_path(raw, count)?,
        _ => raw.to_string(),
    };
    for transform in transforms {
        path = transform.apply(&path);
        if path.is_empty() {
            return None;
        }
    }
    let sanitized = sanitize_path(&path);
    if sanitized.is_empty() {
        return None;
    }
    Some(sanitized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

async fn detect_kind(archive: &Path) -> Result<ArchiveKind> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(archive).await?;
    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).await?;
    if read >= 2 && magic[0] == 0x50 && magic[1] == 0x4b {
        return Ok(ArchiveKind::Zip);
    }
    if read >= 2 && magic[0] == 0x1f && magic[1] == 0x8b {
        return Ok(ArchiveKind::TarGz);
    }
    if read >= 3 && &magic[..3] == b"BZh" {
        return Err(Error::UnsupportedArchive(format!(
            "{}: bzip2 archives are not supported",
            archive.display()
        )));
    }
    Ok(ArchiveKind::Tar)
}

/// Unpack `archive` into `destination`, applying the shaping options to
/// every member path.
///
/// Member writes happen on the blocking pool; destinations are disjoint by
/// construction so ordering among them is not observable.
///
/// # Errors
///
/// Fails on unreadable or unsupported archives, invalid transforms, or any
/// member write failure. Files already extracted are not rolled back.
pub async fn unpack(
    archive: &Path,
    destination: &Path,
    options: &UnpackOptions,
    reporter: &dyn Reporter,
) -> Result<()> {
    let transforms: Vec<Transform> = options
        .transform
        .iter()
        .map(|t| Transform::parse(t))
        .collect::<Result<_>>()?;
    let kind = detect_kind(archive).await?;
    debug!("unpacking {} as {kind:?}", archive.display());

    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();
    let strip = options.strip;
    let written = tokio::task::spawn_blocking(move || match kind {
        ArchiveKind::Zip => unpack_zip(&archive, &destination, strip, &transforms),
        ArchiveKind::Tar => unpack_tar(
            std::fs::File::open(&archive)?,
            &destination,
            strip,
            &transforms,
        ),
        ArchiveKind::TarGz => unpack_tar(
            GzDecoder::new(std::fs::File::open(&archive)?),
            &destination,
            strip,
            &transforms,
        ),
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    for path in &written {
        reporter.unpacked(path);
    }
    Ok(())
}

fn unpack_zip(
    archive: &Path,
    destination: &Path,
    strip: Option<usize>,
    transforms: &[Transform],
) -> Result<Vec<PathBuf>> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| Error::Io(std::io::Error::other(e)))?;
    let mut written = Vec::new();
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let raw = entry.name().to_string();
        let is_dir = raw.ends_with('/') || entry.is_dir();
        let Some(shaped) = shape_member_path(&raw, strip, transforms) else {
            continue;
        };
        let target = destination.join(&shaped);
        if is_dir {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        out.flush()?;
        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
        written.push(target);
    }
    Ok(written)
}

fn unpack_tar<R: Read>(
    reader: R,
    destination: &Path,
    strip: Option<usize>,
    transforms: &[Transform],
) -> Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(reader);
    let mut written = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.to_string_lossy().into_owned();
        let Some(shaped) = shape_member_path(&raw, strip, transforms) else {
            continue;
        };
        let target = destination.join(&shaped);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
        written.push(target);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;

    #[test]
    fn strip_removes_leading_segments() {
        assert_eq!(strip_path("a/b/c", 1).as_deref(), Some("b/c"));
        assert_eq!(strip_path("a\\b\\c", 2).as_deref(), Some("c"));
        assert_eq!(strip_path("a/b", 2), None);
        assert_eq!(strip_path("/a/b", 1).as_deref(), Some("/b"));
        assert_eq!(strip_path("a//b", 1).as_deref(), Some("b"));
    }

    #[test]
    fn transforms_rewrite_and_drop() {
        let t = Transform::parse("s/share\\/doc/doc/").unwrap();
        assert_eq!(t.apply("share/doc/readme"), "doc/readme");

        let t = Transform::parse("s/-v[0-9.]+//").unwrap();
        assert_eq!(t.apply("tool-v1.2.3/bin"), "tool/bin");

        let t = Transform::parse("s/(\\w+)\\.bak/\\1/").unwrap();
        assert_eq!(t.apply("config.bak"), "config");

        let all = Transform::parse("s/o/0/g").unwrap();
        assert_eq!(all.apply("foo/bar"), "f00/bar");

        assert!(Transform::parse("x/a/b/").is_err());
        assert!(Transform::parse("s/a/b").is_err());
        assert!(Transform::parse("s/a/b/q").is_err());
    }

    #[test]
    fn shaping_combines_strip_transform_sanitize() {
        let transforms = vec![Transform::parse("s/docs.*//").unwrap()];
        assert_eq!(
            shape_member_path("pkg-1.0/bin/tool", Some(1), &transforms).as_deref(),
            Some("bin/tool")
        );
        // transform empties the path: member dropped
        assert_eq!(shape_member_path("pkg-1.0/docs/x", Some(1), &transforms), None);
        // too few segments to strip: member dropped
        assert_eq!(shape_member_path("pkg-1.0", Some(1), &transforms), None);
        // traversal squashed by sanitation
        assert_eq!(
            shape_member_path("../../evil", None, &[]).as_deref(),
            Some("evil")
        );
    }

    #[tokio::test]
    async fn zip_roundtrip_with_shaping() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("t.zip");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("pkg-1.0/bin/tool", opts).unwrap();
            zip.write_all(b"#!/bin/sh\n").unwrap();
            zip.start_file("pkg-1.0/docs/readme.txt", opts).unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }

        let dest = dir.path().join("out");
        let options = UnpackOptions {
            strip: Some(1),
            transform: vec!["s/docs.*//".to_string()],
        };
        unpack(&archive, &dest, &options, &NullReporter).await.unwrap();

        assert!(dest.join("bin/tool").is_file());
        assert!(!dest.join("docs").exists());
    }

    #[tokio::test]
    async fn targz_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("t.tar.gz");
        {
            let file = std::fs::File::create(&archive).unwrap();
            let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut tar = tar::Builder::new(enc);
            let payload = b"data";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, "top/inner/file.txt", payload.as_slice())
                .unwrap();
            tar.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        let options = UnpackOptions {
            strip: Some(1),
            transform: Vec::new(),
        };
        unpack(&archive, &dest, &options, &NullReporter).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("inner/file.txt")).unwrap(),
            "data"
        );
    }
}
