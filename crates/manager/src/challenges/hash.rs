// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Component, Path};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

/// Hashes `(relative path, content)` pairs. Entries are sorted by path first, so the result
/// does not depend on the order they were collected in.
pub fn hash_entries(mut entries: Vec<(String, Vec<u8>)>) -> String {
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    let mut hasher = Sha256::new();
    for (path, content) in &entries {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        // Length prefix keeps "ab" + "c" apart from "a" + "bc"
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content);
    }
    format!("{:x}", hasher.finalize())
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Hashes every regular file below `root`. Hidden files count, symlinks are not followed.
pub fn hash_tree(root: &Path) -> Result<String, std::io::Error> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };
        entries.push((relative, std::fs::read(entry.path())?));
    }
    Ok(hash_entries(entries))
}
