//! Input validation utilities.

use crate::bam_io::MAX_COMPRESSION_LEVEL;
use crate::errors::{FgtrimError, Result};
use std::path::Path;

/// Validate that a file exists
///
/// # Example
/// ```
/// use fgtrim_lib::validation::validate_file_exists;
///
/// let result = validate_file_exists("/nonexistent/file.bam", "Input file");
/// assert!(result.is_err());
/// ```
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(FgtrimError::InvalidFileFormat {
            file_type: description.to_string(),
            path: path_ref.display().to_string(),
            reason: "File does not exist".to_string(),
        });
    }
    Ok(())
}

/// Validate that an input path is a regular file rather than a stream such as `-`.
pub fn validate_not_stream<P: AsRef<Path>>(path: P, parameter: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if path_ref.as_os_str() == "-" || path_ref.starts_with("/dev/") {
        return Err(FgtrimError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: format!(
                "'{}' is not a regular file; streams are not supported",
                path_ref.display()
            ),
        });
    }
    Ok(())
}

/// Validate a BGZF compression level.
pub fn validate_compression_level(level: u32) -> Result<()> {
    if level > MAX_COMPRESSION_LEVEL {
        return Err(FgtrimError::InvalidParameter {
            parameter: "compression-level".to_string(),
            reason: format!("must be between 0 and {MAX_COMPRESSION_LEVEL}, got {level}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_file_exists() {
        let file = NamedTempFile::new().unwrap();
        assert!(validate_file_exists(file.path(), "Input BAM").is_ok());

        let err = validate_file_exists("/nonexistent/in.bam", "Input BAM").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Input BAM"));
        assert!(msg.contains("File does not exist"));
    }

    #[rstest]
    #[case("-", false)]
    #[case("/dev/stdin", false)]
    #[case("reads.bam", true)]
    fn test_validate_not_stream(#[case] path: &str, #[case] ok: bool) {
        assert_eq!(validate_not_stream(path, "input").is_ok(), ok);
    }

    #[rstest]
    #[case(0, true)]
    #[case(1, true)]
    #[case(9, true)]
    #[case(10, false)]
    fn test_validate_compression_level(#[case] level: u32, #[case] ok: bool) {
        assert_eq!(validate_compression_level(level).is_ok(), ok);
    }
}
