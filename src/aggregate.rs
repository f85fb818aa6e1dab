//! Grouped aggregation over a stream of tuples.
//!
//! Tuples are merged in one at a time, typically drained from a table scan, and the per-group
//! results are read back through the same [`DbIterator`] contract the scan itself offers.

use std::collections::HashMap;

use crate::{
    error::{DbError, Result},
    iterator::DbIterator,
    tuple::{Field, FieldType, Tuple, TupleLayout},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

#[derive(Debug, Default, Clone)]
struct GroupState {
    count: i64,
    sum: i64,
    min: Option<i32>,
    max: Option<i32>,
}

impl GroupState {
    fn merge(&mut self, value: &Field) {
        self.count += 1;
        if let Field::Int(n) = value {
            self.sum += i64::from(*n);
            self.min = Some(self.min.map_or(*n, |m| m.min(*n)));
            self.max = Some(self.max.map_or(*n, |m| m.max(*n)));
        }
    }

    fn value(&self, op: AggregateOp) -> i32 {
        let value = match op {
            AggregateOp::Count => self.count,
            AggregateOp::Sum => self.sum,
            AggregateOp::Avg => self.sum / self.count.max(1),
            AggregateOp::Min => self.min.map_or(0, i64::from),
            AggregateOp::Max => self.max.map_or(0, i64::from),
        };
        i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
    }
}

/// Computes one aggregate over a field, optionally grouped by another field
pub struct Aggregator {
    group_by: Option<(usize, FieldType)>,
    agg_field: usize,
    op: AggregateOp,
    //  groups in the order they were first seen
    groups: Vec<(Option<Field>, GroupState)>,
    index: HashMap<Option<Field>, usize>,
}

impl Aggregator {
    /// String fields can only be counted; any other op on them is rejected here
    pub fn new(
        group_by: Option<(usize, FieldType)>,
        agg_field: usize,
        agg_type: FieldType,
        op: AggregateOp,
    ) -> Result<Self> {
        if matches!(agg_type, FieldType::Str(_)) && op != AggregateOp::Count {
            return Err(DbError::UnsupportedAggregate(format!(
                "{op:?} over a string field"
            )));
        }
        Ok(Self {
            group_by,
            agg_field,
            op,
            groups: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Fold one tuple into its group
    pub fn merge(&mut self, tuple: &Tuple) -> Result<()> {
        let value = tuple.field(self.agg_field).ok_or_else(|| {
            DbError::LayoutMismatch(format!("no aggregate field {}", self.agg_field))
        })?;
        if matches!(value, Field::Str(_)) && self.op != AggregateOp::Count {
            return Err(DbError::UnsupportedAggregate(format!(
                "{:?} over a string field",
                self.op
            )));
        }
        let key = match self.group_by {
            Some((idx, _)) => Some(
                tuple
                    .field(idx)
                    .cloned()
                    .ok_or_else(|| DbError::LayoutMismatch(format!("no group-by field {idx}")))?,
            ),
            None => None,
        };
        let slot = match self.index.get(&key) {
            Some(slot) => *slot,
            None => {
                self.groups.push((key.clone(), GroupState::default()));
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[slot].1.merge(value);
        Ok(())
    }

    /// Merge everything an open iterator has left
    pub fn merge_all(&mut self, source: &mut dyn DbIterator) -> Result<()> {
        while source.has_next()? {
            self.merge(&source.next_tuple()?)?;
        }
        Ok(())
    }

    /// `(group, value)` when grouping, `(value)` otherwise
    pub fn output_layout(&self) -> TupleLayout {
        match self.group_by {
            Some((_, group_type)) => TupleLayout::new(vec![group_type, FieldType::Int]),
            None => TupleLayout::new(vec![FieldType::Int]),
        }
    }

    fn results(&self) -> Vec<Tuple> {
        self.groups
            .iter()
            .map(|(key, state)| {
                let value = Field::Int(state.value(self.op));
                match key {
                    Some(group) => Tuple::new(vec![group.clone(), value]),
                    None => Tuple::new(vec![value]),
                }
            })
            .collect()
    }

    /// An iterator over the results as of the time it is opened
    pub fn iterator(&self) -> AggregateIterator<'_> {
        AggregateIterator {
            aggregator: self,
            results: None,
            position: 0,
        }
    }
}

pub struct AggregateIterator<'a> {
    aggregator: &'a Aggregator,
    results: Option<Vec<Tuple>>,
    position: usize,
}

impl DbIterator for AggregateIterator<'_> {
    fn open(&mut self) -> Result<()> {
        self.results = Some(self.aggregator.results());
        self.position = 0;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        Ok(self
            .results
            .as_ref()
            .is_some_and(|results| self.position < results.len()))
    }

    fn next_tuple(&mut self) -> Result<Tuple> {
        let results = self.results.as_ref().ok_or(DbError::IteratorNotOpen)?;
        let tuple = results
            .get(self.position)
            .cloned()
            .ok_or(DbError::NoSuchElement)?;
        self.position += 1;
        Ok(tuple)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.results = None;
        self.position = 0;
    }
}
