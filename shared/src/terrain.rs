//! Deterministic, layered snow terrain generated from a shared session seed.
//!
//! Every peer builds its own [`TerrainField`] from the seed carried in the
//! welcome record. Generation only uses coherent noise and plain arithmetic,
//! so two fields built from the same seed hold bit-identical heights and no
//! terrain ever crosses the wire.
//!
//! Coordinates follow screen convention: `y` grows downward, so a *smaller*
//! height is a *higher* surface.

use noise::{NoiseFn, OpenSimplex};
use serde::{Deserialize, Serialize};

/// Width of one height-map column in world units.
pub const PIXEL_SIZE: f32 = 3.0;
/// Number of height-map columns per generated tile.
pub const REAL_TILE_SIZE: usize = 16;
/// Width of one generated tile in world units.
pub const TILE_SIZE: f32 = REAL_TILE_SIZE as f32 * PIXEL_SIZE;

/// First and last generated tile index (inclusive).
pub const FIRST_TILE: i32 = -63;
pub const LAST_TILE: i32 = 63;

/// Tiles further than this from the origin are raised into walls.
const WALL_TILE: i32 = 42;
const WALL_RAISE: f32 = 400.0;
const NOISE_FREQUENCY: f64 = 0.1;
const NOISE_AMPLITUDE: f64 = 200.0;

/// One of the three parallel depth planes a body can stand on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Near,
    Mid,
    Far,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Near, Layer::Mid, Layer::Far];

    pub fn index(self) -> usize {
        match self {
            Layer::Near => 0,
            Layer::Mid => 1,
            Layer::Far => 2,
        }
    }

    /// The layer a body lands on when it drops through this one.
    pub fn below(self) -> Option<Layer> {
        match self {
            Layer::Near => None,
            Layer::Mid => Some(Layer::Near),
            Layer::Far => Some(Layer::Mid),
        }
    }

    fn seed_offset(self) -> u32 {
        self.index() as u32
    }

    /// Farther layers sit higher on screen so they peek out behind hills.
    fn depth_offset(self) -> f32 {
        match self {
            Layer::Near => 0.0,
            Layer::Mid => -90.0,
            Layer::Far => -180.0,
        }
    }
}

/// Height and incline of a single column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainColumn {
    pub height: f32,
    /// Surface angle in degrees, used for body rotation.
    pub incline: f32,
}

/// How a tile relates to its neighbours; decides the in-tile interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeShape {
    /// Left neighbour is higher, right neighbour lower.
    Downward,
    /// Left neighbour is lower, right neighbour higher.
    Upward,
    /// Both neighbours are lower.
    Peak,
    /// Both neighbours are higher, or the ground is flat.
    Valley,
}

impl SlopeShape {
    pub fn classify(left: f32, height: f32, right: f32) -> Self {
        if right > height && left < height {
            SlopeShape::Downward
        } else if left > height && right < height {
            SlopeShape::Upward
        } else if left > height && right > height {
            SlopeShape::Peak
        } else {
            SlopeShape::Valley
        }
    }

    /// Returns `(interval, offset)`: the height change across the whole tile
    /// and the offset of the tile's first column from the tile height.
    fn interpolation(self, left: f32, height: f32, right: f32) -> (f32, f32) {
        match self {
            SlopeShape::Downward => (right - height, 0.0),
            SlopeShape::Upward => (height - left, left - height),
            SlopeShape::Peak => (right - left, left - height),
            SlopeShape::Valley => (0.0, 0.0),
        }
    }
}

/// Precomputed height map for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundLayer {
    layer: Layer,
    first_column: i64,
    tile_heights: Vec<f32>,
    columns: Vec<TerrainColumn>,
}

impl GroundLayer {
    fn generate(seed: u32, layer: Layer) -> Self {
        let noise = OpenSimplex::new(seed.wrapping_add(layer.seed_offset()));
        let tile_heights: Vec<f32> = (FIRST_TILE..=LAST_TILE)
            .map(|tile| tile_height(&noise, tile) + layer.depth_offset())
            .collect();

        let mut columns = Vec::with_capacity(tile_heights.len() * REAL_TILE_SIZE);
        for (i, &height) in tile_heights.iter().enumerate() {
            // Edge tiles have no neighbour on one side and use their own height.
            let left = if i > 0 { tile_heights[i - 1] } else { height };
            let right = tile_heights.get(i + 1).copied().unwrap_or(height);

            let (interval, offset) = SlopeShape::classify(left, height, right)
                .interpolation(left, height, right);
            let step = interval / REAL_TILE_SIZE as f32;
            let incline = (-step).atan2(PIXEL_SIZE).to_degrees();

            for x in 0..REAL_TILE_SIZE {
                columns.push(TerrainColumn {
                    height: height + x as f32 * step + offset,
                    incline,
                });
            }
        }

        Self {
            layer,
            first_column: FIRST_TILE as i64 * REAL_TILE_SIZE as i64,
            tile_heights,
            columns,
        }
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn columns(&self) -> &[TerrainColumn] {
        &self.columns
    }

    /// Raw noise height of each tile before in-tile interpolation.
    pub fn tile_heights(&self) -> &[f32] {
        &self.tile_heights
    }

    fn index_of(&self, x: f32) -> Option<usize> {
        if !x.is_finite() {
            return None;
        }
        let column = (x / PIXEL_SIZE).floor() as i64 - self.first_column;
        if column < 0 || column as usize >= self.columns.len() {
            None
        } else {
            Some(column as usize)
        }
    }
}

fn tile_height(noise: &OpenSimplex, tile: i32) -> f32 {
    let height = (noise.get([tile as f64 * NOISE_FREQUENCY, 0.0]) * NOISE_AMPLITUDE) as f32;
    if tile.abs() > WALL_TILE {
        height - WALL_RAISE
    } else {
        height
    }
}

/// Three frozen height maps generated from one seed.
///
/// A `TerrainField` only exists once every layer has been generated, so a
/// query can never observe a partially built world.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainField {
    seed: u32,
    layers: [GroundLayer; 3],
}

impl TerrainField {
    pub fn generate(seed: u32) -> Self {
        Self {
            seed,
            layers: Layer::ALL.map(|layer| GroundLayer::generate(seed, layer)),
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn layer(&self, layer: Layer) -> &GroundLayer {
        &self.layers[layer.index()]
    }

    /// Leftmost generated world x.
    pub fn min_x(&self) -> f32 {
        self.layers[0].first_column as f32 * PIXEL_SIZE
    }

    /// World x one past the rightmost generated column.
    pub fn max_x(&self) -> f32 {
        (self.layers[0].first_column + self.layers[0].columns.len() as i64) as f32 * PIXEL_SIZE
    }

    /// Whether `x` falls on a generated column.
    pub fn contains(&self, x: f32) -> bool {
        self.layers[0].index_of(x).is_some()
    }

    /// Surface height at world `x` on `layer`.
    ///
    /// # Panics
    ///
    /// Panics when `x` lies outside the generated range. Every body is
    /// contained well inside it, so reaching this is a logic error; callers
    /// that may legitimately leave the world check [`Self::contains`] first.
    pub fn query(&self, x: f32, layer: Layer) -> f32 {
        self.column(x, layer).height
    }

    pub fn incline(&self, x: f32, layer: Layer) -> f32 {
        self.column(x, layer).incline
    }

    pub fn column(&self, x: f32, layer: Layer) -> &TerrainColumn {
        let ground = self.layer(layer);
        match ground.index_of(x) {
            Some(index) => &ground.columns[index],
            None => panic!(
                "terrain query at x={} on {:?} is outside the generated range [{}, {})",
                x,
                layer,
                self.min_x(),
                self.max_x()
            ),
        }
    }

    /// Heights of all three layers at `x`, indexed by [`Layer::index`].
    pub fn heights_at(&self, x: f32) -> [f32; 3] {
        Layer::ALL.map(|layer| self.query(x, layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_is_bit_identical() {
        let a = TerrainField::generate(1234);
        let b = TerrainField::generate(1234);

        for layer in Layer::ALL {
            let left = a.layer(layer).columns();
            let right = b.layer(layer).columns();
            assert_eq!(left.len(), right.len());
            for (ca, cb) in left.iter().zip(right) {
                assert_eq!(ca.height.to_bits(), cb.height.to_bits());
            }
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = TerrainField::generate(1);
        let b = TerrainField::generate(2);
        let differs = (-200..200).any(|x| {
            let x = x as f32 * PIXEL_SIZE;
            a.query(x, Layer::Near) != b.query(x, Layer::Near)
        });
        assert!(differs);
    }

    #[test]
    fn test_layers_use_distinct_noise() {
        let field = TerrainField::generate(77);
        let near = field.layer(Layer::Near).tile_heights();
        let mid = field.layer(Layer::Mid).tile_heights();
        assert!(near.iter().zip(mid).any(|(n, m)| (n - (m + 90.0)).abs() > 1.0));
    }

    #[test]
    fn test_column_stays_between_neighbours() {
        let field = TerrainField::generate(99);
        let eps = 1e-3;

        for layer in Layer::ALL {
            let ground = field.layer(layer);
            let tiles = ground.tile_heights();
            for i in 1..tiles.len() - 1 {
                let (left, height, right) = (tiles[i - 1], tiles[i], tiles[i + 1]);
                let (lo, hi) = match SlopeShape::classify(left, height, right) {
                    SlopeShape::Downward => (height, right),
                    SlopeShape::Upward => (height, left),
                    SlopeShape::Peak => (left.min(right), left.max(right)),
                    SlopeShape::Valley => (height, height),
                };
                for x in 0..REAL_TILE_SIZE {
                    let column = ground.columns()[i * REAL_TILE_SIZE + x];
                    assert!(
                        column.height >= lo - eps && column.height <= hi + eps,
                        "tile {} column {} height {} outside [{}, {}]",
                        i,
                        x,
                        column.height,
                        lo,
                        hi
                    );
                }
            }
        }
    }

    #[test]
    fn test_slope_classification() {
        assert_eq!(SlopeShape::classify(0.0, 10.0, 20.0), SlopeShape::Downward);
        assert_eq!(SlopeShape::classify(20.0, 10.0, 0.0), SlopeShape::Upward);
        assert_eq!(SlopeShape::classify(20.0, 10.0, 30.0), SlopeShape::Peak);
        assert_eq!(SlopeShape::classify(0.0, 10.0, 5.0), SlopeShape::Valley);
        assert_eq!(SlopeShape::classify(10.0, 10.0, 10.0), SlopeShape::Valley);
    }

    #[test]
    fn test_edge_tiles_default_to_own_height() {
        let field = TerrainField::generate(5);
        let ground = field.layer(Layer::Near);
        let tiles = ground.tile_heights();
        let columns = ground.columns();

        // A missing neighbour counts as level ground, so edge tiles come out flat.
        assert!(columns[..REAL_TILE_SIZE].iter().all(|c| c.height == tiles[0]));
        assert!(columns[columns.len() - REAL_TILE_SIZE..]
            .iter()
            .all(|c| c.height == tiles[tiles.len() - 1]));
    }

    #[test]
    fn test_walls_are_raised() {
        let field = TerrainField::generate(3);
        let tiles = field.layer(Layer::Near).tile_heights();
        let wall_count = (-WALL_TILE - FIRST_TILE) as usize;
        let mean = |slice: &[f32]| slice.iter().sum::<f32>() / slice.len() as f32;

        let wall = mean(&tiles[..wall_count]);
        let arena = mean(&tiles[wall_count..tiles.len() - wall_count]);
        assert!(wall < arena - WALL_RAISE / 2.0);
    }

    #[test]
    fn test_range_and_contains() {
        let field = TerrainField::generate(8);
        assert_eq!(field.min_x(), FIRST_TILE as f32 * TILE_SIZE);
        assert_eq!(field.max_x(), (LAST_TILE + 1) as f32 * TILE_SIZE);
        assert!(field.contains(0.0));
        assert!(field.contains(field.min_x()));
        assert!(!field.contains(field.max_x()));
        assert!(!field.contains(f32::NAN));
    }

    #[test]
    fn test_query_matches_column_lookup() {
        let field = TerrainField::generate(11);
        let x = 301.5;
        let index = (x / PIXEL_SIZE).floor() as i64 - FIRST_TILE as i64 * REAL_TILE_SIZE as i64;
        let expected = field.layer(Layer::Mid).columns()[index as usize].height;
        assert_eq!(field.query(x, Layer::Mid), expected);
        assert_eq!(field.heights_at(x)[Layer::Mid.index()], expected);
    }

    #[test]
    #[should_panic(expected = "outside the generated range")]
    fn test_query_out_of_range_panics() {
        let field = TerrainField::generate(8);
        field.query(field.max_x() + 100.0, Layer::Near);
    }

    #[test]
    fn test_layer_below() {
        assert_eq!(Layer::Far.below(), Some(Layer::Mid));
        assert_eq!(Layer::Mid.below(), Some(Layer::Near));
        assert_eq!(Layer::Near.below(), None);
    }
}
