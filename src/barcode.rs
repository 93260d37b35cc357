//! Sequential test-kit barcode allocation.
//!
//! Barcodes are issued from a single counter row so two concurrent
//! reconciliations can never mint the same code.

use crate::db::{DatabaseError, RecordStore};

/// Issue the next sequential barcode, e.g. `KIT000017`.
pub fn next_barcode(store: &RecordStore, prefix: &str) -> Result<String, DatabaseError> {
    let n = store.advance_barcode_counter()?;
    Ok(format!("{prefix}{n:06}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barcodes_are_sequential_and_padded() {
        let store = RecordStore::in_memory().unwrap();
        assert_eq!(next_barcode(&store, "KIT").unwrap(), "KIT000001");
        assert_eq!(next_barcode(&store, "KIT").unwrap(), "KIT000002");
    }

    #[test]
    fn prefix_is_caller_supplied() {
        let store = RecordStore::in_memory().unwrap();
        assert_eq!(next_barcode(&store, "SFO-").unwrap(), "SFO-000001");
    }

    #[test]
    fn wide_counter_values_extend_padding() {
        let store = RecordStore::in_memory().unwrap();
        for _ in 0..3 {
            next_barcode(&store, "KIT").unwrap();
        }
        assert_eq!(next_barcode(&store, "KIT").unwrap(), "KIT000004");
    }
}
