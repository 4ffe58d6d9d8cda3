use crate::{Bounds, Dir, Point3};

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// The integer position of a node within one depth of the tree. At depth `d`
/// each component ranges over `0..2^d`.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Xyz {
    pub x: u64,
    pub y: u64,
    pub z: u64,
}

impl Xyz {
    #[inline]
    pub const fn new(x: u64, y: u64, z: u64) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Xyz {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}-{}", self.x, self.y, self.z)
    }
}

/// The identifier of a node within the whole tree: a depth plus a position.
///
/// The derived `Ord` is lexicographic on `(depth, x, y, z)`, which is what
/// ranks deeper nodes as greater. The eviction pool leans on that order.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct Dxyz {
    pub depth: u64,
    pub position: Xyz,
}

impl Dxyz {
    #[inline]
    pub const fn new(depth: u64, position: Xyz) -> Self {
        Self { depth, position }
    }
}

impl fmt::Display for Dxyz {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.depth, self.position)
    }
}

/// Failure to parse a `d-x-y-z` node name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseDxyzError(pub String);

impl fmt::Display for ParseDxyzError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid node name: {:?}", self.0)
    }
}

impl std::error::Error for ParseDxyzError {}

impl FromStr for Dxyz {
    type Err = ParseDxyzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split('-')
            .map(u64::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseDxyzError(s.to_owned()))?;
        match fields.as_slice() {
            &[depth, x, y, z] => Ok(Self::new(depth, Xyz::new(x, y, z))),
            _ => Err(ParseDxyzError(s.to_owned())),
        }
    }
}

/// The key for one chunk: its tree identifier plus the geometry needed to
/// keep descending, its bounds and the cell span of its grid.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChunkKey {
    dxyz: Dxyz,
    bounds: Bounds,
    span: u64,
}

impl ChunkKey {
    /// The key of the tree's root chunk.
    pub fn root(bounds: Bounds, span: u64) -> Self {
        assert!(span > 0);
        Self {
            dxyz: Dxyz::default(),
            bounds,
            span,
        }
    }

    #[inline]
    pub fn dxyz(&self) -> Dxyz {
        self.dxyz
    }

    #[inline]
    pub fn depth(&self) -> u64 {
        self.dxyz.depth
    }

    #[inline]
    pub fn position(&self) -> Xyz {
        self.dxyz.position
    }

    #[inline]
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Cells per axis of this chunk's grid. Constant across depths, so each
    /// level of descent doubles the tree's overall resolution.
    #[inline]
    pub fn span(&self) -> u64 {
        self.span
    }

    /// The key of the child chunk in direction `dir`.
    pub fn child(&self, dir: Dir) -> Self {
        let p = self.dxyz.position;
        Self {
            dxyz: Dxyz::new(
                self.dxyz.depth + 1,
                Xyz::new(
                    p.x * 2 + u64::from(dir.x()),
                    p.y * 2 + u64::from(dir.y()),
                    p.z * 2 + u64::from(dir.z()),
                ),
            ),
            bounds: self.bounds.child(dir),
            span: self.span,
        }
    }
}

/// The descent cursor for a single voxel: the bounds of the node the voxel
/// currently sits at, stepped one level at a time toward its point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Key {
    bounds: Bounds,
    depth: u64,
}

impl Key {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds, depth: 0 }
    }

    #[inline]
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    #[inline]
    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// Descend one level toward `p`.
    pub fn step(&mut self, p: Point3) {
        self.bounds = self.bounds.child(Dir::toward(self.bounds.mid(), p));
        self.depth += 1;
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
