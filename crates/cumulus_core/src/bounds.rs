use crate::Point3;

use serde::{Deserialize, Serialize};

/// One of the 8 octant directions of a cube, encoded in 3 bits: bit 0 is the
/// positive-x half, bit 1 positive-y, bit 2 positive-z.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Dir(u8);

impl Dir {
    #[inline]
    pub fn new(i: u8) -> Self {
        assert!(i < 8);
        Self(i)
    }

    /// The direction from `mid` toward `p`. A component exactly equal to the
    /// midpoint descends to the high child, so repeated descents of the same
    /// point are consistent.
    #[inline]
    pub fn toward(mid: Point3, p: Point3) -> Self {
        Self(
            u8::from(p.x >= mid.x) | (u8::from(p.y >= mid.y) << 1) | (u8::from(p.z >= mid.z) << 2),
        )
    }

    #[inline]
    pub fn index(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn x(&self) -> bool {
        self.0 & 0b001 != 0
    }

    #[inline]
    pub fn y(&self) -> bool {
        self.0 & 0b010 != 0
    }

    #[inline]
    pub fn z(&self) -> bool {
        self.0 & 0b100 != 0
    }
}

/// An axis-aligned cube of space covered by one octree node.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Bounds {
    min: Point3,
    max: Point3,
}

impl Bounds {
    #[inline]
    pub fn new(min: Point3, max: Point3) -> Self {
        assert!(min.x <= max.x && min.y <= max.y && min.z <= max.z);
        Self { min, max }
    }

    /// The smallest cube with minimum `min` containing `max` on every axis.
    /// Roots are cubified so every descendant splits into equal octants.
    pub fn cube(min: Point3, max: Point3) -> Self {
        let width = (max - min).max_component();
        Self::new(min, min + Point3::fill(width))
    }

    #[inline]
    pub fn min(&self) -> Point3 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> Point3 {
        self.max
    }

    #[inline]
    pub fn mid(&self) -> Point3 {
        (self.min + self.max) * 0.5
    }

    /// The edge length. Bounds are cubes, so one scalar covers all axes.
    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn contains(&self, p: &Point3) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }

    /// The octant of these bounds in direction `dir`.
    #[inline]
    pub fn child(&self, dir: Dir) -> Self {
        let mid = self.mid();
        Self {
            min: Point3::new(
                if dir.x() { mid.x } else { self.min.x },
                if dir.y() { mid.y } else { self.min.y },
                if dir.z() { mid.z } else { self.min.z },
            ),
            max: Point3::new(
                if dir.x() { self.max.x } else { mid.x },
                if dir.y() { self.max.y } else { mid.y },
                if dir.z() { self.max.z } else { mid.z },
            ),
        }
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
