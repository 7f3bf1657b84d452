//! Rendering of collected stat nodes: fixed-width table, CSV and JSON.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::statistics::{clever_format, Scale};
use crate::stat_tree::StatNode;

const HEADERS: [&str; 8] = [
    "module name",
    "input shape",
    "output shape",
    "params",
    "memory (MB)",
    "duration (s)",
    "MAdd",
    "Flops",
];

fn shape_string(shape: &[usize]) -> String {
    if shape.is_empty() {
        return "-".to_string();
    }
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

fn row_cells(node: &StatNode) -> [String; 8] {
    [
        node.name.clone(),
        shape_string(&node.input_shape),
        shape_string(&node.output_shape),
        node.parameter_quantity.to_string(),
        format!("{:.2}", node.memory[1] as f64 / (1 << 20) as f64),
        format!("{:.6}", node.duration),
        node.madd.to_string(),
        node.flops.to_string(),
    ]
}

/// Render collected nodes as a fixed-width table with a total row and a
/// clever-formatted summary.
pub fn report_format(nodes: &[StatNode]) -> String {
    let total_params: u64 = nodes.iter().map(|n| n.parameter_quantity).sum();
    let total_memory: u64 = nodes.iter().map(|n| n.memory[0] + n.memory[1]).sum();
    let total_activations: u64 = nodes.iter().map(|n| n.memory[1]).sum();
    let total_madd: u64 = nodes.iter().map(|n| n.madd).sum();
    let total_flops: u64 = nodes.iter().map(|n| n.flops).sum();

    let mut rows: Vec<[String; 8]> = nodes.iter().map(row_cells).collect();
    rows.push([
        "total".to_string(),
        "-".to_string(),
        "-".to_string(),
        total_params.to_string(),
        format!("{:.2}", total_activations as f64 / (1 << 20) as f64),
        "-".to_string(),
        total_madd.to_string(),
        total_flops.to_string(),
    ]);

    let mut widths: Vec<usize> = HEADERS.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let render_row = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let header_cells: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
    let rule_width = widths.iter().sum::<usize>() + 2 * (widths.len() - 1);

    let mut out = String::new();
    out.push_str(&render_row(&header_cells));
    out.push('\n');
    out.push_str(&"-".repeat(rule_width));
    out.push('\n');
    for row in &rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out.push_str(&"=".repeat(rule_width));
    out.push('\n');
    out.push_str(&format!(
        "Total params: {}\n",
        clever_format(total_params, Scale::Decimal)
    ));
    out.push_str(&format!(
        "Total memory: {}B\n",
        clever_format(total_memory, Scale::Binary)
    ));
    out.push_str(&format!(
        "Total MAdd: {}MAdd\n",
        clever_format(total_madd, Scale::Decimal)
    ));
    out.push_str(&format!(
        "Total Flops: {}Flops\n",
        clever_format(total_flops, Scale::Decimal)
    ));
    out
}

#[derive(Serialize)]
struct ReportRow<'a> {
    module_name: &'a str,
    input_shape: String,
    output_shape: String,
    parameter_quantity: u64,
    inference_memory: u64,
    madd: u64,
    flops: u64,
    duration: f64,
    parameter_bytes: u64,
    activation_bytes: u64,
}

/// Write collected nodes as CSV rows
pub fn write_csv<W: Write>(nodes: &[StatNode], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for node in nodes {
        csv_writer.serialize(ReportRow {
            module_name: &node.name,
            input_shape: shape_string(&node.input_shape),
            output_shape: shape_string(&node.output_shape),
            parameter_quantity: node.parameter_quantity,
            inference_memory: node.inference_memory,
            madd: node.madd,
            flops: node.flops,
            duration: node.duration,
            parameter_bytes: node.memory[0],
            activation_bytes: node.memory[1],
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Serialize collected nodes to pretty JSON
pub fn to_json(nodes: &[StatNode]) -> Result<String> {
    Ok(serde_json::to_string_pretty(nodes)?)
}
