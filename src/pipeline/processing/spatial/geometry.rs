use serde::{Deserialize, Serialize};

/// A planar position; `x` is longitude and `y` latitude once in WGS84
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Box covering every coordinate; `None` for an empty slice
    pub fn from_coords(coords: &[Coord]) -> Option<Self> {
        let first = coords.first()?;
        let mut bbox = BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for c in &coords[1..] {
            bbox.min_x = bbox.min_x.min(c.x);
            bbox.min_y = bbox.min_y.min(c.y);
            bbox.max_x = bbox.max_x.max(c.x);
            bbox.max_y = bbox.max_y.max(c.y);
        }
        Some(bbox)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn contains(&self, point: Coord) -> bool {
        point.x >= self.min_x && point.x <= self.max_x && point.y >= self.min_y && point.y <= self.max_y
    }
}

/// A polygon with one exterior ring and zero or more holes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Coord>,
    pub holes: Vec<Vec<Coord>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Coord>, holes: Vec<Vec<Coord>>) -> Self {
        Self { exterior, holes }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_coords(&self.exterior)
    }

    /// Inside the exterior ring and outside every hole
    pub fn contains(&self, point: Coord) -> bool {
        ring_contains(&self.exterior, point) && !self.holes.iter().any(|h| ring_contains(h, point))
    }

    /// Apply a coordinate transform to every ring
    pub fn map_coords<E>(&self, mut f: impl FnMut(Coord) -> Result<Coord, E>) -> Result<Polygon, E> {
        let exterior = self.exterior.iter().map(|c| f(*c)).collect::<Result<Vec<_>, E>>()?;
        let holes = self
            .holes
            .iter()
            .map(|ring| ring.iter().map(|c| f(*c)).collect::<Result<Vec<_>, E>>())
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Polygon { exterior, holes })
    }
}

/// One or more polygons sharing a district code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPolygon {
    pub polygons: Vec<Polygon>,
}

impl MultiPolygon {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.polygons
            .iter()
            .filter_map(Polygon::bbox)
            .reduce(|acc, b| acc.union(&b))
    }

    pub fn contains(&self, point: Coord) -> bool {
        self.polygons.iter().any(|p| p.contains(point))
    }
}

/// Even-odd ray casting. Works whether or not the ring repeats its first position.
pub fn ring_contains(ring: &[Coord], point: Coord) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let cross_x = (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x;
            if point.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
