/// A grid node addressed by its integer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub i: usize,
    pub j: usize,
    pub k: usize,
}

/// Position of an adjacent node relative to a reference node.
///
/// Left/right run along x, bottom/top along y, near/far along z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Bottom,
    Top,
    Near,
    Far,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::Left,
        Direction::Right,
        Direction::Bottom,
        Direction::Top,
        Direction::Near,
        Direction::Far,
    ];

    /// The cross-axis product of squared cell sizes that scales the stencil
    /// coupling in this direction
    ///
    /// # Arguments
    /// * `dx`, `dy`, `dz` - The cell sizes of the mesh
    ///
    /// # Returns
    /// `dy²dz²` along x, `dx²dz²` along y, `dx²dy²` along z
    pub fn stencil_factor(&self, dx: f64, dy: f64, dz: f64) -> f64 {
        match self {
            Direction::Left | Direction::Right => dy * dy * dz * dz,
            Direction::Bottom | Direction::Top => dx * dx * dz * dz,
            Direction::Near | Direction::Far => dx * dx * dy * dy,
        }
    }
}

impl NodeRef {
    pub fn new(i: usize, j: usize, k: usize) -> NodeRef {
        NodeRef { i, j, k }
    }

    /// Whether the node lies on the outer layer of a grid with `n` nodes
    /// along each axis
    pub fn at_domain_edge(&self, nx: usize, ny: usize, nz: usize) -> bool {
        self.i == 0
            || self.i + 1 >= nx
            || self.j == 0
            || self.j + 1 >= ny
            || self.k == 0
            || self.k + 1 >= nz
    }

    /// The neighbour in `direction`, if it lies inside the grid
    pub fn neighbour(&self, direction: Direction, nx: usize, ny: usize, nz: usize) -> Option<NodeRef> {
        let NodeRef { i, j, k } = *self;
        let adjacent = match direction {
            Direction::Left => NodeRef::new(i.checked_sub(1)?, j, k),
            Direction::Right => NodeRef::new(i + 1, j, k),
            Direction::Bottom => NodeRef::new(i, j.checked_sub(1)?, k),
            Direction::Top => NodeRef::new(i, j + 1, k),
            Direction::Near => NodeRef::new(i, j, k.checked_sub(1)?),
            Direction::Far => NodeRef::new(i, j, k + 1),
        };

        if adjacent.i < nx && adjacent.j < ny && adjacent.k < nz {
            Some(adjacent)
        } else {
            None
        }
    }

    /// Lists the up-to-six axis-aligned neighbours that lie inside the grid,
    /// paired with the direction in which they sit
    pub fn adjacent_nodes(&self, nx: usize, ny: usize, nz: usize) -> Vec<(Direction, NodeRef)> {
        Direction::ALL
            .iter()
            .filter_map(|d| self.neighbour(*d, nx, ny, nz).map(|n| (*d, n)))
            .collect()
    }
}

/// Fixed potentials on the six faces of the computational domain
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundaryPotentials {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
    pub near: f64,
    pub far: f64,
}

impl BoundaryPotentials {
    pub fn uniform(value: f64) -> BoundaryPotentials {
        BoundaryPotentials {
            left: value,
            right: value,
            bottom: value,
            top: value,
            near: value,
            far: value,
        }
    }
}
