// SPDX-FileCopyrightText: 2026 Aaron Dewes
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::Path;

/// Splits a command line into arguments, honouring single and double quotes and backslash escapes.
/// Quotes are removed from the output unless they are escaped.
///
/// ```
/// use chalbox_manager::utils::split_with_quotes;
///
/// let parts = split_with_quotes(r#"podman compose --podman-args "--log-level warn""#);
/// assert_eq!(parts, vec!["podman", "compose", "--podman-args", "--log-level warn"]);
/// ```
pub fn split_with_quotes(input: &str) -> Vec<String> {
    let mut output: Vec<String> = Vec::new();
    let mut current_string = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';
    let mut escaped = false;
    for c in input.chars() {
        if escaped {
            current_string.push(c);
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if c == '"' || c == '\'' {
            if in_quotes && c == quote_char {
                in_quotes = false;
                quote_char = ' ';
            } else if !in_quotes {
                in_quotes = true;
                quote_char = c;
            } else {
                current_string.push(c);
            }
            continue;
        }
        if c.is_whitespace() && !in_quotes {
            if !current_string.is_empty() {
                output.push(std::mem::take(&mut current_string));
            }
            continue;
        }
        current_string.push(c);
    }
    if !current_string.is_empty() {
        output.push(current_string);
    }
    output
}

/// Deep-copies a directory tree. Symlinks and special files are skipped, so the copy never
/// references anything outside of `dst`.
pub fn copy_dir_recursively<'a>(
    src: &'a Path,
    dst: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), std::io::Error>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dst).await?;
        let mut entries = tokio::fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dest_path = dst.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursively(&entry.path(), &dest_path).await?;
            } else if file_type.is_file() {
                tokio::fs::copy(&entry.path(), &dest_path).await?;
            }
        }
        Ok(())
    })
}

/// Removes a directory tree, treating an already missing directory as success.
pub async fn remove_dir_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
