//! Custom error types for fgtrim operations.

use thiserror::Error;

/// Result type alias for fgtrim operations
pub type Result<T> = std::result::Result<T, FgtrimError>;

/// Error type for fgtrim operations
#[derive(Error, Debug)]
pub enum FgtrimError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "BAM", "primer table")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// Required reference sequence not found
    #[error("Reference sequence '{ref_name}' not found in header")]
    ReferenceNotFound {
        /// The reference sequence name
        ref_name: String,
    },

    /// The primer table is missing a required column
    #[error("Primer table '{path}' is missing required column '{column}'")]
    MissingColumn {
        /// Path to the primer table
        path: String,
        /// The missing column name
        column: String,
    },

    /// The primer table has a header but no amplicons
    #[error("Primer table '{path}' contains no amplicons")]
    EmptyPrimerTable {
        /// Path to the primer table
        path: String,
    },

    /// An amplicon row failed validation
    #[error("Invalid amplicon on line {line}: {reason}")]
    InvalidAmplicon {
        /// 1-based line number within the primer table (header is line 1)
        line: usize,
        /// Explanation of the problem
        reason: String,
    },

    /// A template contained more than one record in a primary role
    #[error("Template '{name}' contains multiple {role} records")]
    DuplicateRecord {
        /// The template (query) name
        name: String,
        /// The duplicated role, e.g. "primary R1"
        role: String,
    },

    /// A record was added to a template with a different name
    #[error("Record name '{found}' does not match template name '{expected}'")]
    NameMismatch {
        /// Name of the template being built
        expected: String,
        /// Name of the offending record
        found: String,
    },
}
