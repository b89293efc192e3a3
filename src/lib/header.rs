//! Output header updates: the `@PG` record for this run and the `@HD` sort order.

use anyhow::Result;
use bstr::BString;
use noodles::sam::Header;
use noodles::sam::header::record::value::Map;
use noodles::sam::header::record::value::map::Program;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use noodles::sam::header::record::value::map::program::tag;

use crate::sort::SortOrder;

/// The program ID and name written to @PG records.
pub const PROGRAM_NAME: &str = "fgtrim";

/// The first free ID among `fgtrim`, `fgtrim.1`, `fgtrim.2`, ...
fn unique_program_id(header: &Header) -> BString {
    let programs = header.programs();
    let mut id = BString::from(PROGRAM_NAME);
    let mut suffix = 0;
    while programs.as_ref().contains_key(&id) {
        suffix += 1;
        id = BString::from(format!("{PROGRAM_NAME}.{suffix}"));
    }
    id
}

/// Appends a @PG record for this run.
///
/// The record's `PP` points at the end of the last program chain in the header, and its ID
/// gets a numeric suffix when `fgtrim` has already run on the input.
///
/// # Errors
///
/// Returns an error if the existing program chain is malformed or the record cannot be built.
pub fn add_pg_record(mut header: Header, version: &str, command_line: &str) -> Result<Header> {
    let previous = header.programs().leaves()?.last().map(|(id, _)| BString::from(id.to_vec()));

    let mut builder = Map::<Program>::builder()
        .insert(tag::NAME, PROGRAM_NAME)
        .insert(tag::VERSION, version)
        .insert(tag::COMMAND_LINE, command_line);
    if let Some(previous) = previous {
        builder = builder.insert(tag::PREVIOUS_PROGRAM_ID, previous);
    }
    let program = builder.build()?;

    let id = unique_program_id(&header);
    header.programs_mut().as_mut().insert(id, program);
    Ok(header)
}

/// Records `sort_order` in the header's @HD line, creating the line if needed.
///
/// Group order (`GO`) and sub-sort (`SS`) fields describe the input's order and are removed
/// for coordinate and queryname output.
#[must_use]
pub fn set_sort_order(mut header: Header, sort_order: SortOrder) -> Header {
    let hd = header.header_mut().get_or_insert_with(Map::default);
    let fields = hd.other_fields_mut();
    fields.insert(header_tag::SORT_ORDER, BString::from(sort_order.header_so_tag()));
    if sort_order != SortOrder::Unsorted {
        fields.shift_remove(&header_tag::GROUP_ORDER);
        fields.shift_remove(&header_tag::SUBSORT_ORDER);
    }
    header
}
