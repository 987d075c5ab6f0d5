//! Radio environment map
//!
//! Diagnostic mode samples the downlink SINR over a horizontal grid, taking
//! the strongest base station as the wanted signal and every other one as
//! interference, and writes gnuplot label files for the node positions.

use crate::attach::OperatorNodes;
use crate::config::RemConfig;
use crate::errors::Result;
use spectrum_sim::propagation::{dbm_to_mw, mw_to_dbm, thermal_noise_dbm};
use spectrum_sim::radio::CHANNEL_BANDWIDTH_HZ;
use spectrum_sim::{NodeId, Position, PropagationModel, RadioParams, World};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const REM_FILE_NAME: &str = "laa-wifi-simple.rem";

/// A transmitter contributing to the map
#[derive(Clone, Copy, Debug)]
pub struct RemSource {
    pub position: Position,
    pub radio: RadioParams,
}

/// Downlink SINR in dB at `point` for a receiver with `receiver` parameters.
pub fn sinr_db(
    model: &PropagationModel,
    sources: &[RemSource],
    receiver: &RadioParams,
    point: &Position,
) -> f64 {
    let powers: Vec<f64> = sources
        .iter()
        .map(|s| {
            dbm_to_mw(model.rx_power_dbm(
                s.radio.tx_power_dbm,
                s.radio.tx_gain_db,
                receiver.rx_gain_db,
                s.position.distance_to(point),
            ))
        })
        .collect();
    let noise = dbm_to_mw(thermal_noise_dbm(CHANNEL_BANDWIDTH_HZ, receiver.noise_figure_db));
    let total: f64 = powers.iter().sum();
    let wanted = powers.iter().copied().fold(0.0, f64::max);
    mw_to_dbm(wanted) - mw_to_dbm(total - wanted + noise)
}

fn axis(min: f64, max: f64, points: u32) -> impl Iterator<Item = f64> {
    let step = (max - min) / f64::from(points.saturating_sub(1).max(1));
    (0..points).map(move |i| min + step * f64::from(i))
}

/// Write the SINR grid as `x y z sinr_db` lines. Returns the file path.
pub fn write_rem(
    config: &RemConfig,
    model: &PropagationModel,
    sources: &[RemSource],
    receiver: &RadioParams,
) -> Result<PathBuf> {
    let path = config.dir.join(REM_FILE_NAME);
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(&path)?;

    for x in axis(config.x_min, config.x_max, config.x_resolution) {
        for y in axis(config.y_min, config.y_max, config.y_resolution) {
            let point = Position::new(x, y, config.z);
            let sinr = sinr_db(model, sources, receiver, &point);
            wtr.write_record(&[x.to_string(), y.to_string(), config.z.to_string(), sinr.to_string()])?;
        }
    }
    wtr.flush()?;
    info!(
        "Wrote {}x{} REM to {}",
        config.x_resolution,
        config.y_resolution,
        path.display()
    );
    Ok(path)
}

/// Write one gnuplot `set label` line per node. With `id_prefix`, labels
/// read `<prefix><node id>`; otherwise they are empty and only the point
/// style marks the node.
pub fn write_node_labels(
    path: &Path,
    world: &World,
    nodes: &[NodeId],
    id_prefix: Option<&str>,
    style: &str,
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for node in nodes {
        let position = world.position(*node)?;
        let label = id_prefix.map(|p| format!("{}{}", p, node)).unwrap_or_default();
        writeln!(out, "set label \"{}\" at {},{} {}", label, position.x, position.y, style)?;
    }
    out.flush()?;
    debug!("Wrote {} node labels to {}", nodes.len(), path.display());
    Ok(())
}

/// Label files for both operators' base stations and UEs
pub fn write_gnuplot_files(dir: &Path, world: &World, a: &OperatorNodes, b: &OperatorNodes) -> Result<()> {
    for (nodes, name, color) in [(a, "A", "cyan"), (b, "B", "chartreuse")] {
        let (bs_point, ue_point) = if name == "A" { (5, 4) } else { (7, 6) };
        for (role, members, point) in [
            ("bs", &nodes.base_stations, bs_point),
            ("ue", &nodes.user_equipment, ue_point),
        ] {
            let prefix = format!("{}_{}_", name, role.to_uppercase());
            write_node_labels(
                &dir.join(format!("{}_{}_labels.gnuplot", role, name)),
                world,
                members,
                Some(&prefix),
                &format!(
                    " center textcolor rgb \"{c}\" front point pt {p} lc rgb \"{c}\" offset 0,0.5",
                    c = color,
                    p = point
                ),
            )?;
            write_node_labels(
                &dir.join(format!("{}_{}.gnuplot", role, name)),
                world,
                members,
                None,
                &format!(" point pt {} lc rgb \"{}\" front ", point, color),
            )?;
        }
    }
    Ok(())
}
