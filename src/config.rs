use json::JsonValue;

use crate::{
    datatypes::BoundaryPotentials,
    error::FieldSolverError,
    mesh::SpatialMesh,
    region::{InnerRegion, InnerRegionsManager, InteractionModel, Shape},
};

pub const DEFAULT_RTOL: f64 = 1e-12;
pub const DEFAULT_ATOL: f64 = 1e-50;
pub const DEFAULT_MAX_ITERATIONS: u64 = 10_000;

/// Tolerances and reporting options of the linear backend
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub rtol: f64,
    pub atol: f64,
    pub max_iterations: u64,
    pub progress: bool,
    pub log_iterations: bool,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            rtol: DEFAULT_RTOL,
            atol: DEFAULT_ATOL,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            progress: false,
            log_iterations: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionConfig {
    pub name: String,
    pub potential: f64,
    pub shape: Shape,
    pub model: Option<InteractionModel>,
}

/// Everything read from an input file
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub volume_size: [f64; 3],
    pub cell_size: [f64; 3],
    pub boundary: BoundaryPotentials,
    pub charge_density: f64,
    pub regions: Vec<RegionConfig>,
    pub solver: SolverConfig,
}

impl SimulationConfig {
    /// Builds the mesh with boundary potentials and background charge applied
    pub fn build_mesh(&self) -> Result<SpatialMesh, FieldSolverError> {
        let mut mesh = SpatialMesh::from_volume(self.volume_size, self.cell_size)?;
        mesh.set_boundary_potentials(&self.boundary);
        mesh.charge_density.fill(self.charge_density);
        Ok(mesh)
    }

    /// Builds the regions in file order, classified against `mesh`
    pub fn build_regions(&self, mesh: &SpatialMesh) -> Result<InnerRegionsManager, FieldSolverError> {
        let mut regions = InnerRegionsManager::default();
        for conf in &self.regions {
            regions.push(InnerRegion::new(
                &conf.name,
                conf.potential,
                conf.shape.clone(),
                conf.model,
                mesh,
            )?);
        }
        Ok(regions)
    }
}

/// Parses the input json into a JsonValue object
///
/// # Arguments
/// * `input_file` - The path to the input json file
///
/// # Returns
/// A JsonValue object
pub fn load_input_file(input_file: &str) -> Result<JsonValue, FieldSolverError> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(s) => s,
        Err(err) => {
            return Err(FieldSolverError::Input(format!(
                "Unable to open input file {input_file}: {err}"
            )));
        }
    };

    match json::parse(&file_string) {
        Ok(v) => Ok(v),
        Err(err) => Err(FieldSolverError::Input(format!("Error in input file json: {err}"))),
    }
}

fn required_f64(section: &JsonValue, section_name: &str, key: &str) -> Result<f64, FieldSolverError> {
    if !section.has_key(key) {
        return Err(FieldSolverError::Input(format!(
            "Input json missing {key} field in {section_name} section"
        )));
    }
    match section[key].as_f64() {
        Some(v) => Ok(v),
        None => Err(FieldSolverError::Input(format!(
            "{key} in {section_name} section must be a number"
        ))),
    }
}

fn optional_f64(section: &JsonValue, section_name: &str, key: &str, default: f64) -> Result<f64, FieldSolverError> {
    if section.has_key(key) {
        required_f64(section, section_name, key)
    } else {
        Ok(default)
    }
}

fn optional_bool(section: &JsonValue, section_name: &str, key: &str) -> Result<bool, FieldSolverError> {
    if !section.has_key(key) {
        return Ok(false);
    }
    match section[key].as_bool() {
        Some(v) => Ok(v),
        None => Err(FieldSolverError::Input(format!(
            "{key} in {section_name} section must be true or false"
        ))),
    }
}

fn parse_spatial_mesh(input_json: &JsonValue) -> Result<([f64; 3], [f64; 3]), FieldSolverError> {
    let section = &input_json["spatial_mesh"];
    let mut size = [0.0; 3];
    let mut step = [0.0; 3];
    for (axis, name) in ["x", "y", "z"].iter().enumerate() {
        size[axis] = required_f64(section, "spatial_mesh", &format!("grid_{name}_size"))?;
        step[axis] = required_f64(section, "spatial_mesh", &format!("grid_{name}_step"))?;
    }
    Ok((size, step))
}

fn parse_boundary_conditions(input_json: &JsonValue) -> Result<BoundaryPotentials, FieldSolverError> {
    let section = &input_json["boundary_conditions"];
    let name = "boundary_conditions";
    Ok(BoundaryPotentials {
        left: required_f64(section, name, "boundary_phi_left")?,
        right: required_f64(section, name, "boundary_phi_right")?,
        bottom: required_f64(section, name, "boundary_phi_bottom")?,
        top: required_f64(section, name, "boundary_phi_top")?,
        near: required_f64(section, name, "boundary_phi_near")?,
        far: required_f64(section, name, "boundary_phi_far")?,
    })
}

fn parse_solver(input_json: &JsonValue) -> Result<SolverConfig, FieldSolverError> {
    if !input_json.has_key("solver") {
        return Ok(SolverConfig::default());
    }
    let section = &input_json["solver"];
    let name = "solver";

    let rtol = optional_f64(section, name, "rtol", DEFAULT_RTOL)?;
    let atol = optional_f64(section, name, "atol", DEFAULT_ATOL)?;
    if !(rtol > 0.0 && atol >= 0.0) {
        return Err(FieldSolverError::Configuration(format!(
            "solver tolerances must be positive, got rtol {rtol} and atol {atol}"
        )));
    }

    let max_iterations = if section.has_key("max_iterations") {
        match section["max_iterations"].as_u64() {
            Some(n) if n > 0 => n,
            _ => {
                return Err(FieldSolverError::Input(
                    "max_iterations in solver section must be a positive integer".to_owned(),
                ))
            }
        }
    } else {
        DEFAULT_MAX_ITERATIONS
    };

    Ok(SolverConfig {
        rtol,
        atol,
        max_iterations,
        progress: optional_bool(section, name, "progress")?,
        log_iterations: optional_bool(section, name, "log_iterations")?,
    })
}

/// Parses one entry of the inner_regions section
///
/// # Arguments
/// * `name` - Key of the entry, used as the region name
/// * `region_json` - The entry itself
pub fn parse_inner_region(name: &str, region_json: &JsonValue) -> Result<RegionConfig, FieldSolverError> {
    let section_name = format!("inner_regions.{name}");
    let get = |key: &str| required_f64(region_json, &section_name, key);

    let region_type = match region_json["type"].as_str() {
        Some(t) => t,
        None => {
            return Err(FieldSolverError::Input(format!(
                "Input json missing type field in {section_name} section"
            )))
        }
    };

    let shape = match region_type {
        "box" => Shape::Box {
            x_left: get("box_x_left")?,
            x_right: get("box_x_right")?,
            y_bottom: get("box_y_bottom")?,
            y_top: get("box_y_top")?,
            z_near: get("box_z_near")?,
            z_far: get("box_z_far")?,
        },
        "sphere" => Shape::Sphere {
            origin_x: get("sphere_origin_x")?,
            origin_y: get("sphere_origin_y")?,
            origin_z: get("sphere_origin_z")?,
            radius: get("sphere_radius")?,
        },
        "cylinder" => Shape::Cylinder {
            axis_start_x: get("cylinder_axis_start_x")?,
            axis_start_y: get("cylinder_axis_start_y")?,
            axis_start_z: get("cylinder_axis_start_z")?,
            axis_end_x: get("cylinder_axis_end_x")?,
            axis_end_y: get("cylinder_axis_end_y")?,
            axis_end_z: get("cylinder_axis_end_z")?,
            radius: get("cylinder_radius")?,
        },
        "tube" => Shape::Tube {
            axis_start_x: get("tube_axis_start_x")?,
            axis_start_y: get("tube_axis_start_y")?,
            axis_start_z: get("tube_axis_start_z")?,
            axis_end_x: get("tube_axis_end_x")?,
            axis_end_y: get("tube_axis_end_y")?,
            axis_end_z: get("tube_axis_end_z")?,
            inner_radius: get("tube_inner_radius")?,
            outer_radius: get("tube_outer_radius")?,
        },
        other => {
            return Err(FieldSolverError::Configuration(format!(
                "Unknown type '{other}' of inner region '{name}'. Supports box, sphere, cylinder and tube"
            )))
        }
    };
    shape.validate()?;

    let model = match region_json["model"].as_str() {
        None => None,
        Some("absorbing") => Some(InteractionModel::Absorbing),
        Some(other) => {
            return Err(FieldSolverError::Configuration(format!(
                "Unknown model '{other}' of inner region '{name}'"
            )))
        }
    };

    Ok(RegionConfig {
        name: name.to_owned(),
        potential: get("potential")?,
        shape,
        model,
    })
}

/// Parses a whole input file already loaded as json
pub fn parse_input(input_json: &JsonValue) -> Result<SimulationConfig, FieldSolverError> {
    for section in ["spatial_mesh", "boundary_conditions"] {
        if !input_json.has_key(section) {
            return Err(FieldSolverError::Input(format!("Input json missing {section} field")));
        }
    }

    let (volume_size, cell_size) = parse_spatial_mesh(input_json)?;
    let boundary = parse_boundary_conditions(input_json)?;
    let charge_density = optional_f64(input_json, "root", "charge_density", 0.0)?;

    let mut regions = Vec::new();
    if input_json.has_key("inner_regions") {
        if !input_json["inner_regions"].is_object() {
            return Err(FieldSolverError::Input(
                "inner_regions must be an object keyed by region name".to_owned(),
            ));
        }
        for (name, region_json) in input_json["inner_regions"].entries() {
            regions.push(parse_inner_region(name, region_json)?);
        }
    }

    Ok(SimulationConfig {
        volume_size,
        cell_size,
        boundary,
        charge_density,
        regions,
        solver: parse_solver(input_json)?,
    })
}

pub fn parse_input_str(contents: &str) -> Result<SimulationConfig, FieldSolverError> {
    match json::parse(contents) {
        Ok(v) => parse_input(&v),
        Err(err) => Err(FieldSolverError::Input(format!("Error in input file json: {err}"))),
    }
}
