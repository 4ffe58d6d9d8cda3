use cumulus_core::Point3;

use serde::{Deserialize, Serialize};

/// One point sample: its position plus the packed attribute bytes carried
/// alongside it (intensity, color, classification, whatever the source had).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Voxel {
    point: Point3,
    data: Vec<u8>,
}

impl Voxel {
    pub fn new(point: Point3) -> Self {
        Self {
            point,
            data: Vec::new(),
        }
    }

    pub fn with_data(point: Point3, data: Vec<u8>) -> Self {
        Self { point, data }
    }

    #[inline]
    pub fn point(&self) -> Point3 {
        self.point
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
