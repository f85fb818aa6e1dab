use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use tempfile::TempDir;

use crate::{
    tuple::{Field, FieldType, Tuple, TupleLayout},
    PAGE_SIZE,
};

/// A scratch directory that is removed when the test finishes
pub struct TestDir {
    dir: TempDir,
}

impl TestDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix("heapdb_test_")
                .tempdir()
                .unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl AsRef<Path> for TestDir {
    fn as_ref(&self) -> &Path {
        self.dir.path()
    }
}

static FILE_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A table file name that is unique within the test process
pub fn generate_filename() -> String {
    format!(
        "table_{}_{:?}.dat",
        FILE_COUNTER.fetch_add(1, Ordering::SeqCst),
        std::thread::current().id()
    )
    .replace(['(', ')'], "")
}

/// Two integer columns
pub fn small_layout() -> Arc<TupleLayout> {
    Arc::new(TupleLayout::new(vec![FieldType::Int, FieldType::Int]))
}

/// A layout wide enough that exactly four tuples fit on a page, whatever the page size.
/// A width of `PAGE_SIZE / 4 - 1` gives `8P / (2P - 7)` slots, which floors to 4.
pub fn four_slot_layout() -> Arc<TupleLayout> {
    Arc::new(TupleLayout::new(vec![
        FieldType::Int,
        FieldType::Str(PAGE_SIZE / 4 - 9),
    ]))
}

pub fn four_slot_tuple(n: i32) -> Tuple {
    Tuple::new(vec![Field::Int(n), Field::Str(format!("row-{n}"))])
}
