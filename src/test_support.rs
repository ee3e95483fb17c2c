//! Table blobs for unit tests, backed by [`SyntheticTable`].

use crate::synthetic::SyntheticTable;
use crate::table::TABLE_BYTES;
use crate::NUM_MODULES;

pub fn encode(synthetic: &SyntheticTable) -> Vec<u8> {
    let mut blob = vec![0; TABLE_BYTES];
    synthetic.write(&mut blob).unwrap();
    blob
}

pub fn table_blob() -> Vec<u8> {
    encode(&SyntheticTable::default())
}

/// Angles stored in the default table for `ratios` and `m`.
pub fn ideal_angles(ratios: [f64; NUM_MODULES], m: f64) -> [f64; NUM_MODULES] {
    SyntheticTable::default().ideal_angles(ratios, m)
}
