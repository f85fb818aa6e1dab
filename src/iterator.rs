use crate::{error::Result, tuple::Tuple};

/// The pull-based iterator contract shared by table scans and operators.
///
/// An iterator yields nothing until [`DbIterator::open`] is called. Outside the open window
/// `has_next` reports `false` and `next_tuple` fails with `IteratorNotOpen`.
/// `rewind` restarts from the beginning without closing.
pub trait DbIterator {
    fn open(&mut self) -> Result<()>;

    fn has_next(&mut self) -> Result<bool>;

    /// Produce the next tuple, failing with `NoSuchElement` once exhausted
    fn next_tuple(&mut self) -> Result<Tuple>;

    fn rewind(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Drain everything that is left into a vector
    fn collect_remaining(&mut self) -> Result<Vec<Tuple>> {
        let mut tuples = Vec::new();
        while self.has_next()? {
            tuples.push(self.next_tuple()?);
        }
        Ok(tuples)
    }
}
