//! Extraction of the dump member from a downloaded geonames archive.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::ServerError;

/// Pull `<CODE>.txt` out of the archive. The zip also carries a readme,
/// which is ignored.
pub(crate) fn extract_country_file(zip_path: &Path, code: &str) -> Result<String, ServerError> {
    let file = File::open(zip_path).map_err(|e| zip_error(zip_path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| zip_error(zip_path, e))?;

    let member = format!("{code}.txt");
    let mut entry = archive
        .by_name(&member)
        .map_err(|e| zip_error(zip_path, format!("no member {member}: {e}")))?;

    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| zip_error(zip_path, e))?;
    Ok(text)
}

fn zip_error(path: &Path, reason: impl std::fmt::Display) -> ServerError {
    ServerError::CountryZipFile {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::zip_archive;
    use std::io::Write;

    #[test]
    fn test_extracts_named_member() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&zip_archive("GB", "hello\tworld\n")).unwrap();

        let text = extract_country_file(file.path(), "GB").unwrap();
        assert_eq!(text, "hello\tworld\n");
    }

    #[test]
    fn test_missing_member_is_a_zip_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&zip_archive("FR", "x\n")).unwrap();

        let err = extract_country_file(file.path(), "GB").unwrap_err();
        assert!(matches!(err, ServerError::CountryZipFile { .. }));
    }

    #[test]
    fn test_garbage_is_a_zip_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a zip").unwrap();

        let err = extract_country_file(file.path(), "GB").unwrap_err();
        assert!(matches!(err, ServerError::CountryZipFile { .. }));
    }
}
