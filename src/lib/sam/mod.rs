//! SAM/BAM record and header utilities.
//!
//! - Sort order checks against the `@HD` line
//! - Alignment tag regeneration (NM, MD, UQ)
//! - Record-level position helpers
//! - Test builders for records and BAM files

pub mod alignment_tags;
pub mod builder;
pub mod record_utils;

pub use alignment_tags::regenerate_alignment_tags;
pub use record_utils::{
    alignment_end, format_cigar, reference_length, unclipped_end, unclipped_five_prime_position,
    unclipped_start,
};

use noodles::sam::Header;
use noodles::sam::alignment::record_buf::data::field::Value as BufValue;

/// Checks whether the header's `@HD SO` field equals `sort_order`.
///
/// # Examples
///
/// ```rust,ignore
/// use noodles::sam::header::record::value::map::header::sort_order::QUERY_NAME;
///
/// if is_sorted(&header, QUERY_NAME) {
///     // already grouped by name
/// }
/// ```
#[must_use]
pub fn is_sorted(header: &Header, sort_order: &[u8]) -> bool {
    header_field_equals(header, b"SO", sort_order)
}

/// Checks whether the header declares `@HD GO:query`.
#[must_use]
pub fn is_query_grouped(header: &Header) -> bool {
    header_field_equals(header, b"GO", b"query")
}

/// The header's `@HD SO` value, if any.
#[must_use]
pub fn header_sort_order(header: &Header) -> Option<&[u8]> {
    header_field(header, b"SO")
}

fn header_field_equals(header: &Header, key: &[u8; 2], expected: &[u8]) -> bool {
    header_field(header, key).is_some_and(|value| value == expected)
}

fn header_field<'h>(header: &'h Header, key: &[u8; 2]) -> Option<&'h [u8]> {
    header
        .header()
        .and_then(|hdr_map| hdr_map.other_fields().get(key))
        .map(|value| <_ as AsRef<[u8]>>::as_ref(value))
}

/// Encodes an integer tag value in the smallest signed integer type that holds it.
#[must_use]
pub fn to_smallest_signed_int(value: i32) -> BufValue {
    if let Ok(v) = i8::try_from(value) {
        BufValue::Int8(v)
    } else if let Ok(v) = i16::try_from(value) {
        BufValue::Int16(v)
    } else {
        BufValue::Int32(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use noodles::sam::header::record::value::Map;
    use noodles::sam::header::record::value::map::header::sort_order::{
        COORDINATE, QUERY_NAME,
    };
    use noodles::sam::header::record::value::map::header::tag as header_tag;
    use rstest::rstest;

    fn header_with(sort_order: &str, group_order: Option<&str>) -> Header {
        let mut builder = Map::<noodles::sam::header::record::value::map::Header>::builder()
            .insert(header_tag::SORT_ORDER, BString::from(sort_order));
        if let Some(go) = group_order {
            builder = builder.insert(header_tag::GROUP_ORDER, BString::from(go));
        }
        Header::builder().set_header(builder.build().unwrap()).build()
    }

    #[test]
    fn test_is_sorted() {
        let header = header_with("queryname", None);
        assert!(is_sorted(&header, QUERY_NAME));
        assert!(!is_sorted(&header, COORDINATE));
    }

    #[test]
    fn test_is_sorted_without_hd_line() {
        let header = Header::default();
        assert!(!is_sorted(&header, QUERY_NAME));
        assert!(!is_query_grouped(&header));
    }

    #[test]
    fn test_is_query_grouped() {
        let header = header_with("unsorted", Some("query"));
        assert!(is_query_grouped(&header));
        assert!(!is_sorted(&header, QUERY_NAME));
    }

    #[rstest]
    #[case(0, BufValue::Int8(0))]
    #[case(-128, BufValue::Int8(-128))]
    #[case(300, BufValue::Int16(300))]
    #[case(-40_000, BufValue::Int32(-40_000))]
    fn test_to_smallest_signed_int(#[case] value: i32, #[case] expected: BufValue) {
        assert_eq!(to_smallest_signed_int(value), expected);
    }
}
