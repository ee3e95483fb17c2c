//! Offline-computed switching angle table.
//!
//! The table is a 5-D grid over four module voltage ratios and the
//! modulation index. Every grid point stores one quadrant switching angle
//! per module, the THD of the resulting staircase and its fundamental (V1)
//! error. It is produced by an external optimizer and shipped as a
//! little-endian binary blob:
//!
//! | field | type | count |
//! |---|---|---|
//! | ratio point count | `i32` | 1 |
//! | modulation point count | `i32` | 1 |
//! | ratio axis (shared by all four ratio axes) | `f32` | `RATIO_POINTS` |
//! | modulation axis | `f32` | `MODULATION_POINTS` |
//! | angles, one block per module | `f32` | `NUM_MODULES * GRID_POINTS` |
//! | THD | `f32` | `GRID_POINTS` |
//! | V1 error | `f32` | `GRID_POINTS` |
//!
//! Each block is flattened row-major over `(r1, r2, r3, r4, m)`.
//!
//! [`AngleTable`] borrows the blob and reads grid values on demand, so a
//! table embedded with `include_bytes!` costs no RAM. The whole blob is
//! validated once in [`AngleTable::from_bytes`]; after that every access is
//! infallible.

use core::f32::consts::FRAC_PI_2;

use crate::error::TableError;
use crate::NUM_MODULES;

/// Grid points along each voltage-ratio axis.
pub const RATIO_POINTS: usize = 5;

/// Grid points along the modulation-index axis.
pub const MODULATION_POINTS: usize = 6;

/// Number of voltage-ratio axes, one per module.
pub const RATIO_AXES: usize = NUM_MODULES;

/// Values in one flattened 5-D block.
pub const GRID_POINTS: usize =
    RATIO_POINTS * RATIO_POINTS * RATIO_POINTS * RATIO_POINTS * MODULATION_POINTS;

pub(crate) const HEADER_BYTES: usize = 2 * 4;
pub(crate) const RATIO_AXIS_OFFSET: usize = HEADER_BYTES;
pub(crate) const MODULATION_AXIS_OFFSET: usize = RATIO_AXIS_OFFSET + RATIO_POINTS * 4;
pub(crate) const ANGLES_OFFSET: usize = MODULATION_AXIS_OFFSET + MODULATION_POINTS * 4;
pub(crate) const BLOCK_BYTES: usize = GRID_POINTS * 4;
pub(crate) const THD_OFFSET: usize = ANGLES_OFFSET + NUM_MODULES * BLOCK_BYTES;
pub(crate) const V1_ERROR_OFFSET: usize = THD_OFFSET + BLOCK_BYTES;

/// Exact size of a well-formed table blob.
pub const TABLE_BYTES: usize = V1_ERROR_OFFSET + BLOCK_BYTES;

// Small tolerance for angles that were rounded from f64 on export.
const ANGLE_TOLERANCE: f32 = 1e-6;

const _: () = assert!(RATIO_POINTS >= 2 && MODULATION_POINTS >= 2);

/// Integer coordinates of one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndex {
    pub ratios: [usize; RATIO_AXES],
    pub modulation: usize,
}

impl GridIndex {
    pub const fn new(ratios: [usize; RATIO_AXES], modulation: usize) -> Self {
        Self { ratios, modulation }
    }

    /// Row-major position of this point inside a flattened block.
    ///
    /// This is the only place that knows the memory order of the grid.
    pub fn offset(&self) -> usize {
        let ratio = self
            .ratios
            .iter()
            .fold(0, |acc, &index| acc * RATIO_POINTS + index);
        ratio * MODULATION_POINTS + self.modulation
    }

    /// Inverse of [`offset`](Self::offset) for `offset < GRID_POINTS`.
    pub fn from_offset(offset: usize) -> Self {
        let modulation = offset % MODULATION_POINTS;
        let mut rest = offset / MODULATION_POINTS;
        let mut ratios = [0; RATIO_AXES];
        for index in ratios.iter_mut().rev() {
            *index = rest % RATIO_POINTS;
            rest /= RATIO_POINTS;
        }
        Self { ratios, modulation }
    }
}

/// Position of a value between two neighbouring grid points.
///
/// `upper == lower` only at the top edge of an axis, where `fraction` is 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub lower: usize,
    pub upper: usize,
    pub fraction: f32,
}

impl Bracket {
    /// Locate `value` on a strictly increasing axis, clamping at both ends.
    pub fn locate(axis: &[f32], value: f32) -> Self {
        let last = axis.len() - 1;
        if value <= axis[0] {
            return Self {
                lower: 0,
                upper: 1,
                fraction: 0.0,
            };
        }
        if value >= axis[last] {
            return Self {
                lower: last,
                upper: last,
                fraction: 0.0,
            };
        }

        let mut lower = 0;
        while lower + 1 < last && axis[lower + 1] <= value {
            lower += 1;
        }
        let fraction = (value - axis[lower]) / (axis[lower + 1] - axis[lower]);
        Self {
            lower,
            upper: lower + 1,
            fraction,
        }
    }
}

/// Brackets for every axis of one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridBrackets {
    pub ratios: [Bracket; RATIO_AXES],
    pub modulation: Bracket,
}

/// Table values estimated at an off-grid point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLookup {
    pub theta: [f32; NUM_MODULES],
    pub thd: f32,
    pub v1_error: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AngleTable<'a> {
    bytes: &'a [u8],
    ratio_axis: [f32; RATIO_POINTS],
    modulation_axis: [f32; MODULATION_POINTS],
}

impl<'a> AngleTable<'a> {
    /// Validate a table blob and wrap it.
    ///
    /// Rejects blobs whose header does not declare the compiled grid shape,
    /// blobs of the wrong length, axes that are not strictly increasing, and
    /// any non-finite value or out-of-range angle.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, TableError> {
        match Self::validate(bytes) {
            Ok(table) => {
                info!(
                    "Angle table loaded: {}x{} grid, {} bytes",
                    RATIO_POINTS,
                    MODULATION_POINTS,
                    bytes.len()
                );
                Ok(table)
            }
            Err(e) => {
                error!("Angle table rejected: {}", e);
                Err(e)
            }
        }
    }

    fn validate(bytes: &'a [u8]) -> Result<Self, TableError> {
        if bytes.len() < HEADER_BYTES {
            return Err(TableError::Truncated {
                expected: TABLE_BYTES,
                actual: bytes.len(),
            });
        }

        let ratio_points = read_i32(bytes, 0);
        let m_points = read_i32(bytes, 4);
        if ratio_points != RATIO_POINTS as i32 || m_points != MODULATION_POINTS as i32 {
            return Err(TableError::DimensionMismatch {
                ratio_points,
                m_points,
                expected_ratio_points: RATIO_POINTS,
                expected_m_points: MODULATION_POINTS,
            });
        }

        if bytes.len() < TABLE_BYTES {
            return Err(TableError::Truncated {
                expected: TABLE_BYTES,
                actual: bytes.len(),
            });
        }
        if bytes.len() > TABLE_BYTES {
            return Err(TableError::TrailingData {
                extra: bytes.len() - TABLE_BYTES,
            });
        }

        let mut ratio_axis = [0.0; RATIO_POINTS];
        read_axis(bytes, RATIO_AXIS_OFFSET, &mut ratio_axis)?;
        let mut modulation_axis = [0.0; MODULATION_POINTS];
        read_axis(bytes, MODULATION_AXIS_OFFSET, &mut modulation_axis)?;

        for module in 0..NUM_MODULES {
            let block = ANGLES_OFFSET + module * BLOCK_BYTES;
            for point in 0..GRID_POINTS {
                let offset = block + point * 4;
                let angle = read_f32(bytes, offset);
                if !angle.is_finite() {
                    return Err(TableError::NonFinite { offset });
                }
                if !(0.0..=FRAC_PI_2 + ANGLE_TOLERANCE).contains(&angle) {
                    return Err(TableError::AngleOutOfRange { module, offset });
                }
            }
        }

        for offset in (THD_OFFSET..TABLE_BYTES).step_by(4) {
            if !read_f32(bytes, offset).is_finite() {
                return Err(TableError::NonFinite { offset });
            }
        }

        Ok(Self {
            bytes,
            ratio_axis,
            modulation_axis,
        })
    }

    /// Breakpoints shared by all four voltage-ratio axes.
    pub fn ratio_axis(&self) -> &[f32; RATIO_POINTS] {
        &self.ratio_axis
    }

    pub fn modulation_axis(&self) -> &[f32; MODULATION_POINTS] {
        &self.modulation_axis
    }

    /// Stored quadrant angle of `module` at a grid point.
    pub fn angle(&self, module: usize, index: &GridIndex) -> f32 {
        let angle = read_f32(self.bytes, ANGLES_OFFSET + module * BLOCK_BYTES + index.offset() * 4);
        angle.min(FRAC_PI_2)
    }

    pub fn thd(&self, index: &GridIndex) -> f32 {
        read_f32(self.bytes, THD_OFFSET + index.offset() * 4)
    }

    pub fn v1_error(&self, index: &GridIndex) -> f32 {
        read_f32(self.bytes, V1_ERROR_OFFSET + index.offset() * 4)
    }

    /// Bracket each query coordinate on its axis.
    pub fn brackets(&self, ratios: &[f32; RATIO_AXES], modulation: f32) -> GridBrackets {
        GridBrackets {
            ratios: ratios.map(|ratio| Bracket::locate(&self.ratio_axis, ratio)),
            modulation: Bracket::locate(&self.modulation_axis, modulation),
        }
    }

    /// Estimate every stored quantity at an off-grid point.
    ///
    /// This is a first-order (Taylor-style) estimate, not a true 5-linear
    /// interpolation: starting from the lower corner of the cell, the
    /// difference to the neighbour along each axis is scaled by that axis'
    /// fraction and the five contributions are summed independently. Cross
    /// terms between axes are ignored. At any grid point the estimate is the
    /// stored value exactly.
    pub fn lookup(&self, ratios: &[f32; RATIO_AXES], modulation: f32) -> RawLookup {
        let brackets = self.brackets(ratios, modulation);
        let mut theta = [0.0; NUM_MODULES];
        for (module, angle) in theta.iter_mut().enumerate() {
            *angle = first_order(&brackets, |index| self.angle(module, index));
        }
        RawLookup {
            theta,
            thd: first_order(&brackets, |index| self.thd(index)),
            v1_error: first_order(&brackets, |index| self.v1_error(index)),
        }
    }
}

fn first_order(brackets: &GridBrackets, value_at: impl Fn(&GridIndex) -> f32) -> f32 {
    let base_index = GridIndex::new(
        brackets.ratios.map(|bracket| bracket.lower),
        brackets.modulation.lower,
    );
    let base = value_at(&base_index);

    let mut delta = 0.0;
    for (axis, bracket) in brackets.ratios.iter().enumerate() {
        let mut neighbour = base_index;
        neighbour.ratios[axis] = bracket.upper;
        delta += (value_at(&neighbour) - base) * bracket.fraction;
    }
    let mut neighbour = base_index;
    neighbour.modulation = brackets.modulation.upper;
    delta += (value_at(&neighbour) - base) * brackets.modulation.fraction;

    base + delta
}

fn read_axis(bytes: &[u8], offset: usize, axis: &mut [f32]) -> Result<(), TableError> {
    for (i, value) in axis.iter_mut().enumerate() {
        let at = offset + i * 4;
        *value = read_f32(bytes, at);
        if !value.is_finite() {
            return Err(TableError::NonFinite { offset: at });
        }
    }
    for (i, pair) in axis.windows(2).enumerate() {
        if pair[0] >= pair[1] {
            return Err(TableError::NonMonotonicAxis { index: i + 1 });
        }
    }
    Ok(())
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    f32::from_le_bytes(raw)
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    i32::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticTable;
    use crate::test_support;

    #[test]
    fn offset_is_row_major() {
        assert_eq!(GridIndex::new([0, 0, 0, 0], 0).offset(), 0);
        assert_eq!(GridIndex::new([0, 0, 0, 0], 5).offset(), 5);
        assert_eq!(GridIndex::new([0, 0, 0, 1], 0).offset(), MODULATION_POINTS);
        assert_eq!(
            GridIndex::new([1, 0, 0, 0], 0).offset(),
            RATIO_POINTS * RATIO_POINTS * RATIO_POINTS * MODULATION_POINTS
        );
        assert_eq!(GridIndex::new([4, 4, 4, 4], 5).offset(), GRID_POINTS - 1);
        assert_eq!(GridIndex::from_offset(GRID_POINTS - 1), GridIndex::new([4, 4, 4, 4], 5));
        assert_eq!(GridIndex::from_offset(MODULATION_POINTS + 2), GridIndex::new([0, 0, 0, 1], 2));
    }

    #[test]
    fn loads_well_formed_blob() {
        let blob = test_support::table_blob();
        assert_eq!(blob.len(), TABLE_BYTES);
        let table = AngleTable::from_bytes(&blob).unwrap();
        dbg!(table.ratio_axis(), table.modulation_axis());
        assert!((table.ratio_axis()[0] - 0.95).abs() < 1e-6);
        assert!((table.ratio_axis()[RATIO_POINTS - 1] - 1.05).abs() < 1e-6);
        assert!((table.modulation_axis()[0] - 0.75).abs() < 1e-6);
        assert!((table.modulation_axis()[MODULATION_POINTS - 1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let mut blob = test_support::table_blob();
        blob[0..4].copy_from_slice(&7i32.to_le_bytes());
        assert_eq!(
            AngleTable::from_bytes(&blob).unwrap_err(),
            TableError::DimensionMismatch {
                ratio_points: 7,
                m_points: MODULATION_POINTS as i32,
                expected_ratio_points: RATIO_POINTS,
                expected_m_points: MODULATION_POINTS,
            }
        );
    }

    #[test]
    fn rejects_truncated_blob() {
        let blob = test_support::table_blob();
        let short = &blob[..TABLE_BYTES - 1];
        assert_eq!(
            AngleTable::from_bytes(short).unwrap_err(),
            TableError::Truncated {
                expected: TABLE_BYTES,
                actual: TABLE_BYTES - 1
            }
        );
        assert!(matches!(
            AngleTable::from_bytes(&blob[..3]),
            Err(TableError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut blob = test_support::table_blob();
        blob.extend_from_slice(&[0, 0]);
        assert_eq!(
            AngleTable::from_bytes(&blob).unwrap_err(),
            TableError::TrailingData { extra: 2 }
        );
    }

    #[test]
    fn rejects_unsorted_axis() {
        let axes = SyntheticTable {
            ratio_axis: [0.95, 0.975, 0.975, 1.025, 1.05],
            ..SyntheticTable::default()
        };
        assert_eq!(
            AngleTable::from_bytes(&test_support::encode(&axes)).unwrap_err(),
            TableError::NonMonotonicAxis { index: 2 }
        );
    }

    #[test]
    fn rejects_out_of_range_angle() {
        let mut blob = test_support::table_blob();
        let offset = ANGLES_OFFSET + 2 * BLOCK_BYTES + 40;
        blob[offset..offset + 4].copy_from_slice(&2.0f32.to_le_bytes());
        assert_eq!(
            AngleTable::from_bytes(&blob).unwrap_err(),
            TableError::AngleOutOfRange { module: 2, offset }
        );
    }

    #[test]
    fn rejects_non_finite_v1_error() {
        let mut blob = test_support::table_blob();
        let offset = V1_ERROR_OFFSET + 8;
        blob[offset..offset + 4].copy_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(
            AngleTable::from_bytes(&blob).unwrap_err(),
            TableError::NonFinite { offset }
        );
    }

    #[test]
    fn bracket_clamps_and_hits_grid_points() {
        let axis = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(
            Bracket::locate(&axis, -5.0),
            Bracket { lower: 0, upper: 1, fraction: 0.0 }
        );
        assert_eq!(
            Bracket::locate(&axis, 9.0),
            Bracket { lower: 3, upper: 3, fraction: 0.0 }
        );
        assert_eq!(
            Bracket::locate(&axis, 2.0),
            Bracket { lower: 2, upper: 3, fraction: 0.0 }
        );
        let mid = Bracket::locate(&axis, 1.25);
        assert_eq!((mid.lower, mid.upper), (1, 2));
        assert!((mid.fraction - 0.25).abs() < 1e-6);
    }

    #[test]
    fn lookup_at_grid_point_returns_stored_values() {
        let blob = test_support::table_blob();
        let table = AngleTable::from_bytes(&blob).unwrap();
        let r = *table.ratio_axis();
        let m = *table.modulation_axis();

        for (ratios, mi) in [
            ([1, 2, 3, 4], 2),
            ([0, 0, 0, 0], 0),
            ([4, 4, 4, 4], 5),
            ([2, 2, 2, 2], 1),
            ([3, 1, 4, 0], 4),
        ] {
            let index = GridIndex::new(ratios, mi);
            let lookup = table.lookup(&ratios.map(|i| r[i]), m[mi]);
            for module in 0..NUM_MODULES {
                assert!(
                    (lookup.theta[module] - table.angle(module, &index)).abs() < 1e-6,
                    "module {module} at {index:?}"
                );
            }
            assert!((lookup.thd - table.thd(&index)).abs() < 1e-6);
            assert!((lookup.v1_error - table.v1_error(&index)).abs() < 1e-6);
        }
    }

    #[test]
    fn lookup_adds_axis_contributions_independently() {
        let blob = test_support::table_blob();
        let table = AngleTable::from_bytes(&blob).unwrap();
        let r = *table.ratio_axis();
        let m = *table.modulation_axis();

        // halfway along r1 and along m, on-grid elsewhere
        let ratios = [(r[1] + r[2]) / 2.0, r[2], r[2], r[2]];
        let lookup = table.lookup(&ratios, (m[1] + m[2]) / 2.0);

        let base = GridIndex::new([1, 2, 2, 2], 1);
        let along_r1 = GridIndex::new([2, 2, 2, 2], 1);
        let along_m = GridIndex::new([1, 2, 2, 2], 2);
        for module in 0..NUM_MODULES {
            let b = table.angle(module, &base);
            let expected = b
                + 0.5 * (table.angle(module, &along_r1) - b)
                + 0.5 * (table.angle(module, &along_m) - b);
            assert!((lookup.theta[module] - expected).abs() < 1e-5);
        }
    }
}
