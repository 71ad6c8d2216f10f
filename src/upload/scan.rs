//! Header sniffing for executable content.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// Bytes inspected at the start of a file.
pub const SNIFF_LEN: u64 = 20;

const MALICIOUS_SIGNATURES: [(&str, &[u8]); 3] = [
    ("pe", b"MZ"),
    ("elf", b"\x7fELF"),
    ("ar", b"!<arch>"),
];

/// Name of the executable signature `header` starts with, if any.
pub fn detect_signature(header: &[u8]) -> Option<&'static str> {
    MALICIOUS_SIGNATURES
        .iter()
        .find(|(_, magic)| header.starts_with(magic))
        .map(|(name, _)| *name)
}

/// Whether a saved file looks executable. Files that cannot be read are
/// treated as suspicious.
pub async fn check_for_malicious_content(path: &Path) -> bool {
    let mut header = Vec::with_capacity(SNIFF_LEN as usize);
    let read = async {
        File::open(path)
            .await?
            .take(SNIFF_LEN)
            .read_to_end(&mut header)
            .await
    };

    match read.await {
        Ok(_) => match detect_signature(&header) {
            Some(kind) => {
                warn!(path = %path.display(), signature = kind, "executable signature detected");
                true
            }
            None => false,
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not inspect upload");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_signatures() {
        assert_eq!(detect_signature(b"MZ\x90\x00"), Some("pe"));
        assert_eq!(detect_signature(b"\x7fELF\x02\x01"), Some("elf"));
        assert_eq!(detect_signature(b"!<arch>\ndebian"), Some("ar"));
        assert_eq!(detect_signature(b"%PDF-1.7"), None);
        assert_eq!(detect_signature(b"M"), None);
        assert_eq!(detect_signature(b""), None);
    }

    #[tokio::test]
    async fn test_check_saved_files() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("fake.pdf");
        let pdf = dir.path().join("real.pdf");
        tokio::fs::write(&exe, b"MZ this is not a pdf").await.unwrap();
        tokio::fs::write(&pdf, b"%PDF-1.4 hello").await.unwrap();

        assert!(check_for_malicious_content(&exe).await);
        assert!(!check_for_malicious_content(&pdf).await);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_suspicious() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_for_malicious_content(&dir.path().join("missing")).await);
    }
}
