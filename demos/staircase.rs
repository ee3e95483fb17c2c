//! Runs the modulator over a few line cycles and records every tick to
//! `out.mcap` as CBOR.
//!
//! Pass a path to use a real angle table; otherwise a synthetic one is
//! generated that hits the target fundamental exactly at every grid point.
//! Sources are re-sorted by SOC once per line cycle.

use std::{
    borrow::Cow, collections::BTreeMap, f64::consts::PI, fs::File, io::BufWriter, sync::Arc,
};

use fixed::types::I16F16;
use serde::Serialize;
use staircase::{
    allocator::Trigger,
    module::SourceMeasurement,
    synthetic::SyntheticTable,
    table::{AngleTable, TABLE_BYTES},
    waveform, MemorySink, ModulatorConfig, StaircaseModulator, NUM_MODULES,
};

#[derive(Serialize)]
struct Values {
    time_ns: u64,
    angle_rad: f32,
    level: i8,
    reference_level: f32,
    output_voltage: f32,
    phase_to_next_rad: f32,
    gate_bits: [u8; NUM_MODULES],
    soc: [f32; NUM_MODULES],
}

fn main() -> Result<(), anyhow::Error> {
    let blob = match std::env::args().nth(1) {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut blob = vec![0; TABLE_BYTES];
            SyntheticTable::default().write(&mut blob)?;
            blob
        }
    };
    let table = AngleTable::from_bytes(&blob)?;
    let mut modulator =
        StaircaseModulator::new(table, ModulatorConfig::default(), MemorySink::<NUM_MODULES>::new());

    let mut writer = mcap::Writer::new(BufWriter::new(File::create("out.mcap")?))?;
    let channel = mcap::Channel {
        topic: String::from("staircase"),
        schema: Some(Arc::new(mcap::Schema {
            name: "".to_owned(),
            encoding: "".to_owned(),
            data: Cow::default(),
        })),
        message_encoding: "cbor".to_owned(),
        metadata: BTreeMap::default(),
    };
    let channel_id = writer.add_channel(&channel)?;

    let line_hz = 50.0f32;
    let dt_ns = 20_000u64;
    let modulation_index = 0.9f32;
    let mut vdc = [48.0f32, 49.5, 47.0, 48.5];
    let mut soc = [0.80f32, 0.70, 0.75, 0.60];

    let mut time_ns = 0u64;
    let mut cycle = u64::MAX;
    while time_ns <= 100_000_000 {
        let cycles = time_ns as f64 * 1e-9 * line_hz as f64;
        let angle_rad = (cycles.fract() * 2.0 * PI) as f32;
        let angle = I16F16::from_num(angle_rad);

        // control rate: once per line cycle
        if cycles as u64 != cycle {
            cycle = cycles as u64;
            let sources: [SourceMeasurement; NUM_MODULES] =
                std::array::from_fn(|i| SourceMeasurement::new(vdc[i], soc[i]));
            modulator.update_sources(
                &sources,
                modulation_index,
                I16F16::ZERO,
                Trigger::SocBalance,
            )?;
        }

        let output = modulator.tick(angle)?;

        // crude discharge model: conducting modules lose charge and voltage
        for module in modulator.modules() {
            if module.state.polarity() != 0 {
                let i = module.index as usize;
                soc[i] = (soc[i] - 2e-6).max(0.0);
                vdc[i] -= 1e-4;
            }
        }

        let reference = waveform::reference_level(angle, I16F16::from_num(modulation_index));
        let mut buffer = Vec::with_capacity(128);
        ciborium::into_writer(
            &Values {
                time_ns,
                angle_rad,
                level: output.dispatch.level,
                reference_level: reference.to_num(),
                output_voltage: waveform::synthesized_voltage(modulator.modules()),
                phase_to_next_rad: output.dispatch.phase_to_next.to_num(),
                gate_bits: output.gate_bits,
                soc,
            },
            &mut buffer,
        )?;
        writer.write_to_known_channel(
            &mcap::records::MessageHeader {
                channel_id,
                sequence: 0,
                log_time: time_ns,
                publish_time: time_ns,
            },
            &buffer,
        )?;

        time_ns += dt_ns;
    }

    modulator.all_off()?;
    writer.finish()?;

    if let Some(solution) = modulator.solution() {
        println!(
            "theta = {:?}, V1 error = {:.5}, table THD = {:.4}, iterations = {}",
            solution.theta, solution.v1_error, solution.thd, solution.iterations
        );
    }

    Ok(())
}
