//! Grouping of query-name ordered records into templates.
//!
//! A [`Template`] holds every record sharing one query name: the primary R1 and R2,
//! their supplementary alignments and any secondary alignments. Records are stored in
//! the order primary R1, primary R2, supplementary, secondary; within each category
//! the input order is kept.
//!
//! [`TemplateIterator`] turns a stream of records whose templates are contiguous into a
//! stream of templates. It peeks at the next record's name to find the template
//! boundary, so no record is consumed past the end of the current template.
//!
//! # Examples
//!
//! ```rust,ignore
//! let templates = TemplateIterator::new(records.into_iter().map(Ok));
//! for template in templates {
//!     let template = template?;
//!     if let Some(r1) = template.r1() {
//!         // ...
//!     }
//! }
//! ```

use std::iter::Peekable;

use bstr::ByteSlice;
use noodles::sam::alignment::record_buf::RecordBuf;

use crate::errors::{FgtrimError, Result};

/// All records sharing one query name.
#[derive(Debug, Clone)]
pub struct Template {
    /// The query name (QNAME) shared by all records in this template
    pub name: Vec<u8>,
    records: Vec<RecordBuf>,
    r1: Option<usize>,
    r2: Option<usize>,
}

/// Accumulates records for one template, sorting them into roles.
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<Vec<u8>>,
    r1: Option<RecordBuf>,
    r2: Option<RecordBuf>,
    supplementals: Vec<RecordBuf>,
    secondaries: Vec<RecordBuf>,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record to this builder.
    ///
    /// Unpaired records and first-of-pair records fill the R1 role; second-of-pair records
    /// fill the R2 role.
    ///
    /// # Errors
    ///
    /// Returns [`FgtrimError::NameMismatch`] if the record's name differs from earlier
    /// records, or [`FgtrimError::DuplicateRecord`] if a primary role is already filled.
    pub fn push(&mut self, record: RecordBuf) -> Result<&mut Builder> {
        let record_name: &[u8] = record.name().map_or(&[], |n| n.as_ref());

        match &self.name {
            Some(name) if name.as_slice() != record_name => {
                return Err(FgtrimError::NameMismatch {
                    expected: name.to_str_lossy().into_owned(),
                    found: record_name.to_str_lossy().into_owned(),
                });
            }
            Some(_) => {}
            None => self.name = Some(record_name.to_vec()),
        }

        let flags = record.flags();
        if flags.is_secondary() {
            self.secondaries.push(record);
        } else if flags.is_supplementary() {
            self.supplementals.push(record);
        } else {
            let (slot, role) = if !flags.is_segmented() {
                (&mut self.r1, "fragment")
            } else if flags.is_first_segment() {
                (&mut self.r1, "primary R1")
            } else {
                (&mut self.r2, "primary R2")
            };
            if slot.is_some() {
                return Err(FgtrimError::DuplicateRecord {
                    name: record_name.to_str_lossy().into_owned(),
                    role: role.to_string(),
                });
            }
            *slot = Some(record);
        }

        Ok(self)
    }

    /// Returns the number of records currently in the builder.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.r1.is_some())
            + usize::from(self.r2.is_some())
            + self.supplementals.len()
            + self.secondaries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a template from the accumulated records, leaving the builder empty.
    ///
    /// Returns `None` if no records were pushed.
    pub fn build(&mut self) -> Option<Template> {
        let name = self.name.take()?;
        let mut records = Vec::with_capacity(self.len());

        let r1 = self.r1.take().map(|rec| {
            records.push(rec);
            records.len() - 1
        });
        let r2 = self.r2.take().map(|rec| {
            records.push(rec);
            records.len() - 1
        });
        records.append(&mut self.supplementals);
        records.append(&mut self.secondaries);

        Some(Template { name, records, r1, r2 })
    }
}

impl Template {
    /// Builds a template from records sharing one name.
    ///
    /// # Errors
    ///
    /// Returns an error if the records have different names or duplicate a primary role,
    /// or [`FgtrimError::InvalidParameter`] if `records` is empty.
    pub fn from_records<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = RecordBuf>,
    {
        let mut builder = Builder::new();
        for record in records {
            builder.push(record)?;
        }
        builder.build().ok_or_else(|| FgtrimError::InvalidParameter {
            parameter: "records".to_string(),
            reason: "a template requires at least one record".to_string(),
        })
    }

    /// The primary R1, or the primary record of an unpaired read.
    #[must_use]
    pub fn r1(&self) -> Option<&RecordBuf> {
        self.r1.map(|i| &self.records[i])
    }

    /// The primary R2.
    #[must_use]
    pub fn r2(&self) -> Option<&RecordBuf> {
        self.r2.map(|i| &self.records[i])
    }

    /// Indices of the primary R1 and R2 when the template has a paired primary of each.
    #[must_use]
    pub fn primary_pair(&self) -> Option<(usize, usize)> {
        let (r1, r2) = (self.r1?, self.r2?);
        let paired = self.records[r1].flags().is_segmented();
        paired.then_some((r1, r2))
    }

    /// Mutable references to two distinct records.
    ///
    /// # Panics
    ///
    /// Panics if `a == b` or either index is out of bounds.
    pub fn two_mut(&mut self, a: usize, b: usize) -> (&mut RecordBuf, &mut RecordBuf) {
        assert_ne!(a, b, "indices must differ");
        if a < b {
            let (head, tail) = self.records.split_at_mut(b);
            (&mut head[a], &mut tail[0])
        } else {
            let (head, tail) = self.records.split_at_mut(a);
            (&mut tail[0], &mut head[b])
        }
    }

    /// Indices of the supplementary alignments.
    pub fn supplementary_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, rec)| rec.flags().is_supplementary())
            .map(|(i, _)| i)
    }

    #[must_use]
    pub fn records(&self) -> &[RecordBuf] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [RecordBuf] {
        &mut self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<RecordBuf> {
        self.records
    }

    /// Number of records in the template. Never zero.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.records.len()
    }
}

/// Groups a stream of records, whose templates are contiguous, into [`Template`]s.
///
/// Errors from the underlying stream are yielded as they are encountered. The iterator
/// is single pass.
pub struct TemplateIterator<I>
where
    I: Iterator<Item = anyhow::Result<RecordBuf>>,
{
    records: Peekable<I>,
    builder: Builder,
}

impl<I> TemplateIterator<I>
where
    I: Iterator<Item = anyhow::Result<RecordBuf>>,
{
    pub fn new(records: I) -> Self {
        TemplateIterator { records: records.peekable(), builder: Builder::new() }
    }

    /// True if the next record in the stream belongs to the template being built.
    fn next_shares_name(&mut self) -> bool {
        let Some(name) = self.builder.name.as_deref() else {
            return false;
        };
        matches!(
            self.records.peek(),
            Some(Ok(next)) if next.name().map_or(&[][..], |n| n.as_ref()) == name
        )
    }
}

impl<I> Iterator for TemplateIterator<I>
where
    I: Iterator<Item = anyhow::Result<RecordBuf>>,
{
    type Item = anyhow::Result<Template>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = self.builder.push(first) {
            return Some(Err(e.into()));
        }

        while self.next_shares_name() {
            if let Some(Ok(record)) = self.records.next() {
                if let Err(e) = self.builder.push(record) {
                    self.builder = Builder::new();
                    return Some(Err(e.into()));
                }
            }
        }

        self.builder.build().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::RecordBuilder;
    use anyhow::anyhow;

    fn read(name: &str) -> RecordBuilder {
        RecordBuilder::mapped_read().name(name).cigar("10M").alignment_start(100)
    }

    fn names(template: &Template) -> Vec<String> {
        template
            .records()
            .iter()
            .map(|r| {
                let flags = r.flags();
                let role = if flags.is_secondary() {
                    "sec"
                } else if flags.is_supplementary() {
                    "supp"
                } else if flags.is_last_segment() {
                    "r2"
                } else {
                    "r1"
                };
                role.to_string()
            })
            .collect()
    }

    #[test]
    fn test_builder_orders_records_by_role() {
        let template = Template::from_records(vec![
            read("q").first_segment(true).secondary(true).build(),
            read("q").first_segment(false).supplementary(true).build(),
            read("q").first_segment(false).build(),
            read("q").first_segment(true).build(),
        ])
        .unwrap();

        assert_eq!(names(&template), vec!["r1", "r2", "supp", "sec"]);
        assert_eq!(template.primary_pair(), Some((0, 1)));
        assert_eq!(template.supplementary_indices().collect::<Vec<_>>(), vec![2]);
        assert_eq!(template.name, b"q".to_vec());
    }

    #[test]
    fn test_fragment_has_no_primary_pair() {
        let template = Template::from_records(vec![read("f").build()]).unwrap();
        assert!(template.r1().is_some());
        assert!(template.r2().is_none());
        assert_eq!(template.primary_pair(), None);
    }

    #[test]
    fn test_duplicate_primary_is_an_error() {
        let result = Template::from_records(vec![
            read("q").first_segment(true).build(),
            read("q").first_segment(true).build(),
        ]);
        assert!(matches!(
            result,
            Err(FgtrimError::DuplicateRecord { ref role, .. }) if role == "primary R1"
        ));
    }

    #[test]
    fn test_name_mismatch_is_an_error() {
        let mut builder = Builder::new();
        builder.push(read("a").build()).unwrap();
        let result = builder.push(read("b").build());
        assert!(matches!(result, Err(FgtrimError::NameMismatch { .. })));
    }

    #[test]
    fn test_two_mut_returns_requested_order() {
        let mut template = Template::from_records(vec![
            read("q").first_segment(true).alignment_start(10).build(),
            read("q").first_segment(false).alignment_start(20).build(),
        ])
        .unwrap();
        let (b, a) = template.two_mut(1, 0);
        assert_eq!(b.alignment_start().map(usize::from), Some(20));
        assert_eq!(a.alignment_start().map(usize::from), Some(10));
    }

    #[test]
    fn test_iterator_groups_contiguous_names() {
        let records = vec![
            read("b").first_segment(true).build(),
            read("b").first_segment(false).build(),
            read("a").first_segment(true).build(),
            read("a").first_segment(false).build(),
            read("a").first_segment(false).supplementary(true).build(),
            read("c").build(),
        ];
        let templates: Vec<Template> = TemplateIterator::new(records.into_iter().map(Ok))
            .collect::<anyhow::Result<_>>()
            .unwrap();

        assert_eq!(templates.len(), 3);
        assert_eq!(templates[0].name, b"b".to_vec());
        assert_eq!(templates[1].read_count(), 3);
        assert_eq!(templates[2].name, b"c".to_vec());
    }

    #[test]
    fn test_iterator_on_empty_stream() {
        let mut templates = TemplateIterator::new(std::iter::empty::<anyhow::Result<RecordBuf>>());
        assert!(templates.next().is_none());
    }

    #[test]
    fn test_iterator_stops_template_at_error() {
        let records: Vec<anyhow::Result<RecordBuf>> = vec![
            Ok(read("a").first_segment(true).build()),
            Err(anyhow!("truncated input")),
            Ok(read("a").first_segment(false).build()),
        ];
        let mut templates = TemplateIterator::new(records.into_iter());

        let first = templates.next().unwrap().unwrap();
        assert_eq!(first.read_count(), 1);
        assert!(templates.next().unwrap().is_err());
    }
}
