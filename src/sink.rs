//! Hardware boundary for gate patterns.
//!
//! The modulator never touches registers. It hands every module's gate bits
//! to an [`OutputSink`], which the board support code implements on top of
//! its PWM or GPIO peripheral.

use core::convert::Infallible;

use thiserror::Error;

/// Receives one gate pattern per H-bridge.
pub trait OutputSink {
    type Error;

    /// Drive output `index` with `bits` (see [`gate`](crate::module::gate)).
    fn write_gate_bits(&mut self, index: u8, bits: u8) -> Result<(), Self::Error>;
}

impl<S: OutputSink + ?Sized> OutputSink for &mut S {
    type Error = S::Error;

    fn write_gate_bits(&mut self, index: u8, bits: u8) -> Result<(), Self::Error> {
        (**self).write_gate_bits(index, bits)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    type Error = Infallible;

    fn write_gate_bits(&mut self, _index: u8, _bits: u8) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[error("no output with index {index}")]
pub struct UnknownOutput {
    pub index: u8,
}

/// Keeps the last pattern written to each of `N` outputs.
#[derive(Debug, Clone)]
pub struct MemorySink<const N: usize> {
    outputs: [u8; N],
    writes: u32,
}

impl<const N: usize> MemorySink<N> {
    pub const fn new() -> Self {
        Self {
            outputs: [0; N],
            writes: 0,
        }
    }

    pub fn outputs(&self) -> &[u8; N] {
        &self.outputs
    }

    pub fn get(&self, index: u8) -> Option<u8> {
        self.outputs.get(index as usize).copied()
    }

    /// Total successful writes since construction.
    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl<const N: usize> Default for MemorySink<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> OutputSink for MemorySink<N> {
    type Error = UnknownOutput;

    fn write_gate_bits(&mut self, index: u8, bits: u8) -> Result<(), Self::Error> {
        let slot = self
            .outputs
            .get_mut(index as usize)
            .ok_or(UnknownOutput { index })?;
        *slot = bits;
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_last_pattern() {
        let mut sink = MemorySink::<4>::new();
        sink.write_gate_bits(2, 0b1010_0000).unwrap();
        sink.write_gate_bits(2, 0b0101_0000).unwrap();
        assert_eq!(sink.get(2), Some(0b0101_0000));
        assert_eq!(sink.outputs(), &[0, 0, 0b0101_0000, 0]);
        assert_eq!(sink.writes(), 2);
    }

    #[test]
    fn memory_sink_rejects_unknown_output() {
        let mut sink = MemorySink::<2>::new();
        assert_eq!(
            sink.write_gate_bits(2, 0xff),
            Err(UnknownOutput { index: 2 })
        );
        assert_eq!(sink.writes(), 0);
    }

    fn drive<S: OutputSink>(mut sink: S, bits: u8) -> Result<(), S::Error> {
        sink.write_gate_bits(0, bits)
    }

    #[test]
    fn borrowed_sink_forwards() {
        let mut sink = MemorySink::<1>::new();
        drive(&mut sink, 0b1100_0000).unwrap();
        assert_eq!(sink.get(0), Some(0b1100_0000));
        assert!(NullSink.write_gate_bits(200, 0).is_ok());
    }
}
