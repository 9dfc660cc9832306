//! Extract decoded attachments from scanned messages.

use std::path::{Path, PathBuf};

use crate::model::attachment::Attachment;

use super::sanitize_filename_part;

/// Write a single decoded attachment into `output_dir`.
///
/// Never overwrites: a counter is appended when the name is taken.
pub fn export_attachment(attachment: &Attachment, output_dir: &Path) -> anyhow::Result<PathBuf> {
    let filename = sanitize_filename_part(&attachment.name, 150);
    let path = unique_path(&output_dir.join(&filename));
    std::fs::write(&path, &attachment.data)?;
    Ok(path)
}

/// Write all attachments of one message.
///
/// Creates a subfolder per message: `{output_dir}/{label}/`. Individual
/// write failures are logged and skipped.
pub fn export_message_attachments(
    label: &str,
    attachments: &[Attachment],
    output_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    if attachments.is_empty() {
        return Ok(Vec::new());
    }

    let subfolder = output_dir.join(sanitize_filename_part(label, 60));
    std::fs::create_dir_all(&subfolder)?;

    let mut paths = Vec::with_capacity(attachments.len());
    for att in attachments {
        match export_attachment(att, &subfolder) {
            Ok(path) => paths.push(path),
            Err(e) => {
                tracing::warn!(
                    filename = %att.name,
                    error = %e,
                    "Failed to export attachment"
                );
            }
        }
    }
    Ok(paths)
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    parent.join(format!("{stem}_dup.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str, data: &[u8]) -> Attachment {
        Attachment {
            name: name.to_string(),
            data: data.to_vec(),
            content_type: None,
            depth: 1,
        }
    }

    #[test]
    fn test_export_writes_decoded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let paths = export_message_attachments(
            "[1] eicar",
            &[attachment("a.txt", b"hello")],
            dir.path(),
        )
        .unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0], dir.path().join("_1__eicar").join("a.txt"));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"hello");
    }

    #[test]
    fn test_duplicate_names_get_counter() {
        let dir = tempfile::tempdir().unwrap();
        let atts = [attachment("a.txt", b"one"), attachment("a.txt", b"two")];
        let paths = export_message_attachments("m", &atts, dir.path()).unwrap();
        assert_eq!(paths[1].file_name().unwrap(), "a_1.txt");
        assert_eq!(std::fs::read(&paths[1]).unwrap(), b"two");
    }

    #[test]
    fn test_no_attachments_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = export_message_attachments("m", &[], dir.path()).unwrap();
        assert!(paths.is_empty());
        assert!(!dir.path().join("m").exists());
    }
}
