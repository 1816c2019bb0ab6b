use std::path::{Path, PathBuf};

use atmexp::cache::CacheEntry;
use atmexp::selection::Selection;
use atmexp::variables::VariableConfig;
use comfy_table::{presets::NOTHING, *};
use itertools::Itertools;

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
                .collect_vec(),
        )
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn file_size(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|m| format!("{:.1} kB", m.len() as f64 / 1024.0))
        .unwrap_or_default()
}

pub fn display_cache_entries(entries: &[CacheEntry]) -> anyhow::Result<()> {
    if entries.is_empty() {
        println!("\nNo cached data files.");
        return Ok(());
    }
    let mut table = new_table(&["File", "Size", "Directory"]);
    for entry in entries {
        table.add_row(vec![
            entry.file_name().to_string(),
            file_size(entry.path()),
            entry
                .path()
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        ]);
    }
    let column = table
        .column_mut(1)
        .ok_or_else(|| anyhow::anyhow!("missing size column"))?;
    column.set_cell_alignment(CellAlignment::Right);
    println!("\n{}", table);
    Ok(())
}

pub fn display_shapefiles(root: &Path, dirs: &[PathBuf]) -> anyhow::Result<()> {
    if dirs.is_empty() {
        println!("\nNo cached shapefiles.");
        return Ok(());
    }
    let mut table = new_table(&["Resolution", "Map category", "Name"]);
    for dir in dirs {
        let parts = dir
            .strip_prefix(root)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect_vec();
        table.add_row(parts);
    }
    println!("\n{}", table);
    Ok(())
}

pub fn display_variables(variables: &VariableConfig, dataset: Option<&str>) -> anyhow::Result<()> {
    let mut table = new_table(&["Dataset", "Variable", "Code", "Unit", "Conversion"]);
    let datasets = match dataset {
        Some(dataset) => vec![dataset],
        None => variables.datasets().collect_vec(),
    };
    for dataset in datasets {
        for (name, spec) in variables.variables(dataset) {
            let conversion = spec
                .conversion
                .as_ref()
                .map(|c| format!("{} -> {}", c.formula, c.convert_unit))
                .unwrap_or_default();
            table.add_row(vec![
                dataset.to_string(),
                name.to_string(),
                spec.var_name.clone(),
                spec.unit.clone(),
                conversion,
            ]);
        }
    }
    println!("\n{}", table);
    Ok(())
}

pub fn display_selection(selection: &Selection) -> anyhow::Result<()> {
    let level = selection
        .level()
        .map(|level| level.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut table = new_table(&["Label", "Level"]);
    for label in selection.labels() {
        table.add_row(vec![label, level.clone()]);
    }
    println!("\n{}", table);
    Ok(())
}
