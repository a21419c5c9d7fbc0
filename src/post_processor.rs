use std::io::Write;

use serde::Serialize;

use crate::{
    datatypes::NodeRef,
    error::FieldSolverError,
    mesh::SpatialMesh,
    region::{InnerRegion, InnerRegionsManager, InteractionModel, Shape},
};

fn create_file(path: &str) -> Result<std::io::BufWriter<std::fs::File>, FieldSolverError> {
    match std::fs::File::create(path) {
        Ok(f) => Ok(std::io::BufWriter::new(f)),
        Err(err) => Err(FieldSolverError::PostProcessor(format!(
            "Failed to create {path}: {err}"
        ))),
    }
}

fn write_failed(path: &str, err: std::io::Error) -> FieldSolverError {
    FieldSolverError::PostProcessor(format!("Failed to write {path}: {err}"))
}

/// Writes node positions, charge density, potential and field to a CSV file
///
/// # Arguments
/// * `mesh` - The post-solve mesh
/// * `output` - The filename of the output csv
pub fn csv_output(mesh: &SpatialMesh, output: &str) -> Result<(), FieldSolverError> {
    let mut file = create_file(output)?;

    file.write_all("i,j,k,x,y,z,charge_density,potential,ex,ey,ez\n".as_bytes())
        .map_err(|e| write_failed(output, e))?;

    for ((i, j, k), phi) in mesh.potential.indexed_iter() {
        let position = mesh.node_position(&NodeRef::new(i, j, k));
        let e = &mesh.electric_field[[i, j, k]];
        file.write_all(
            format!(
                "{i},{j},{k},{x},{y},{z},{rho},{phi},{ex},{ey},{ez}\n",
                x = position.x,
                y = position.y,
                z = position.z,
                rho = mesh.charge_density[[i, j, k]],
                ex = e.x,
                ey = e.y,
                ez = e.z,
            )
            .as_bytes(),
        )
        .map_err(|e| write_failed(output, e))?;
    }

    file.flush().map_err(|e| write_failed(output, e))?;

    println!("info: wrote nodes to {}", output);
    Ok(())
}

#[derive(Debug, Serialize)]
struct RegionSummary<'a> {
    name: &'a str,
    shape: &'a Shape,
    potential: f64,
    model: Option<InteractionModel>,
    inner_nodes: usize,
    inner_nodes_not_at_domain_edge: usize,
    near_boundary_nodes: usize,
    near_boundary_nodes_not_at_domain_edge: usize,
    total_absorbed_particles: u64,
    total_absorbed_charge: f64,
}

impl<'a> RegionSummary<'a> {
    fn of(region: &'a InnerRegion) -> RegionSummary<'a> {
        RegionSummary {
            name: &region.name,
            shape: &region.shape,
            potential: region.potential,
            model: region.model,
            inner_nodes: region.inner_nodes().len(),
            inner_nodes_not_at_domain_edge: region.inner_nodes_not_at_domain_edge().len(),
            near_boundary_nodes: region.near_boundary_nodes().len(),
            near_boundary_nodes_not_at_domain_edge: region.near_boundary_nodes_not_at_domain_edge().len(),
            total_absorbed_particles: region.total_absorbed_particles,
            total_absorbed_charge: region.total_absorbed_charge,
        }
    }
}

#[derive(Debug, Serialize)]
struct RegionsSummary<'a> {
    number_of_regions: usize,
    regions: Vec<RegionSummary<'a>>,
}

/// Summary of the inner regions as pretty-printed json
pub fn regions_to_json(regions: &InnerRegionsManager) -> Result<String, FieldSolverError> {
    let summary = RegionsSummary {
        number_of_regions: regions.len(),
        regions: regions.iter().map(RegionSummary::of).collect(),
    };
    match serde_json::to_string_pretty(&summary) {
        Ok(s) => Ok(s),
        Err(err) => Err(FieldSolverError::PostProcessor(format!(
            "Failed to serialize inner regions: {err}"
        ))),
    }
}

/// Writes the inner regions summary to a json file
///
/// # Arguments
/// * `regions` - The regions of the simulation
/// * `output` - The filename of the output json
pub fn write_regions(regions: &InnerRegionsManager, output: &str) -> Result<(), FieldSolverError> {
    let contents = regions_to_json(regions)?;
    let mut file = create_file(output)?;
    file.write_all(contents.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| write_failed(output, e))?;

    println!("info: wrote {} inner regions to {}", regions.len(), output);
    Ok(())
}
