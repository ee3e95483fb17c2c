//! Synthetic angle tables for bench runs and tests.
//!
//! Every grid point satisfies `sum(c_i * cos(theta_i)) = pi * m` exactly,
//! so the stored V1 error is zero. The THD column is a placeholder that
//! falls linearly with `m`. Nothing here is harmonically optimized.

use core::f64::consts::PI;

use libm::acos;

use crate::error::TableError;
use crate::table::{
    GridIndex, ANGLES_OFFSET, BLOCK_BYTES, GRID_POINTS, MODULATION_AXIS_OFFSET,
    MODULATION_POINTS, RATIO_AXIS_OFFSET, RATIO_POINTS, TABLE_BYTES, THD_OFFSET,
    V1_ERROR_OFFSET,
};
use crate::NUM_MODULES;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticTable {
    pub ratio_axis: [f32; RATIO_POINTS],
    pub modulation_axis: [f32; MODULATION_POINTS],
    /// Offset added to each module's equal share of the fundamental.
    /// Decreasing shares make later modules switch in later.
    pub shares: [f64; NUM_MODULES],
}

impl Default for SyntheticTable {
    fn default() -> Self {
        Self {
            ratio_axis: core::array::from_fn(|i| (0.95 + 0.025 * i as f64) as f32),
            modulation_axis: core::array::from_fn(|i| (0.75 + 0.05 * i as f64) as f32),
            shares: [0.15, 0.05, -0.05, -0.15],
        }
    }
}

impl SyntheticTable {
    /// Quadrant angles that hit `pi * m` exactly for `ratios`.
    pub fn ideal_angles(&self, ratios: [f64; NUM_MODULES], m: f64) -> [f64; NUM_MODULES] {
        let per_module = PI * m / NUM_MODULES as f64;
        core::array::from_fn(|k| acos(((per_module + self.shares[k]) / ratios[k]).clamp(-1.0, 1.0)))
    }

    /// Serialize the table into `out`, which must be exactly
    /// [`TABLE_BYTES`] long.
    pub fn write(&self, out: &mut [u8]) -> Result<(), TableError> {
        if out.len() < TABLE_BYTES {
            return Err(TableError::Truncated {
                expected: TABLE_BYTES,
                actual: out.len(),
            });
        }
        if out.len() > TABLE_BYTES {
            return Err(TableError::TrailingData {
                extra: out.len() - TABLE_BYTES,
            });
        }

        out[0..4].copy_from_slice(&(RATIO_POINTS as i32).to_le_bytes());
        out[4..8].copy_from_slice(&(MODULATION_POINTS as i32).to_le_bytes());
        for (i, &value) in self.ratio_axis.iter().enumerate() {
            put_f32(out, RATIO_AXIS_OFFSET + 4 * i, value);
        }
        for (i, &value) in self.modulation_axis.iter().enumerate() {
            put_f32(out, MODULATION_AXIS_OFFSET + 4 * i, value);
        }

        for point in 0..GRID_POINTS {
            let index = GridIndex::from_offset(point);
            let ratios = index.ratios.map(|i| self.ratio_axis[i] as f64);
            let m = self.modulation_axis[index.modulation] as f64;
            let at = 4 * point;

            for (module, &angle) in self.ideal_angles(ratios, m).iter().enumerate() {
                put_f32(out, ANGLES_OFFSET + module * BLOCK_BYTES + at, angle as f32);
            }
            put_f32(out, THD_OFFSET + at, (0.05 + 0.1 * (1.0 - m)) as f32);
            put_f32(out, V1_ERROR_OFFSET + at, 0.0);
        }
        Ok(())
    }
}

fn put_f32(out: &mut [u8], offset: usize, value: f32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::AngleTable;

    #[test]
    fn written_table_loads_and_hits_the_fundamental() {
        let synthetic = SyntheticTable::default();
        let mut blob = vec![0; TABLE_BYTES];
        synthetic.write(&mut blob).unwrap();
        let table = AngleTable::from_bytes(&blob).unwrap();

        let index = GridIndex::new([3, 1, 4, 0], 4);
        let ratios = index.ratios.map(|i| table.ratio_axis()[i]);
        let m = table.modulation_axis()[index.modulation];
        let v1: f64 = (0..NUM_MODULES)
            .map(|k| ratios[k] as f64 * (table.angle(k, &index) as f64).cos())
            .sum();
        assert!((v1 - PI * m as f64).abs() < 1e-5, "{v1}");
        assert_eq!(table.v1_error(&index), 0.0);
    }

    #[test]
    fn buffer_must_match_table_size() {
        let synthetic = SyntheticTable::default();
        let mut short = vec![0; TABLE_BYTES - 4];
        assert_eq!(
            synthetic.write(&mut short),
            Err(TableError::Truncated {
                expected: TABLE_BYTES,
                actual: TABLE_BYTES - 4
            })
        );
        let mut long = vec![0; TABLE_BYTES + 1];
        assert_eq!(
            synthetic.write(&mut long),
            Err(TableError::TrailingData { extra: 1 })
        );
    }
}
