use std::collections::BTreeMap;
use std::ops::Range;

use nalgebra::{Matrix2x3, Point2, Vector2, Vector3};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;

/// Number of landmark entries per face. The two lip groups repeat four of the
/// 68 detector points, so the feature table tiles 72 entries.
pub const LANDMARK_COUNT: usize = 72;

/// Landmark groups in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacialFeature {
    Chin,
    LeftEyebrow,
    RightEyebrow,
    NoseBridge,
    NoseTip,
    LeftEye,
    RightEye,
    TopLip,
    BottomLip,
}

struct FeatureSpan {
    name: &'static str,
    offset: usize,
    len: usize,
}

const FEATURE_TABLE: [FeatureSpan; 9] = [
    FeatureSpan { name: "chin", offset: 0, len: 17 },
    FeatureSpan { name: "left_eyebrow", offset: 17, len: 5 },
    FeatureSpan { name: "right_eyebrow", offset: 22, len: 5 },
    FeatureSpan { name: "nose_bridge", offset: 27, len: 4 },
    FeatureSpan { name: "nose_tip", offset: 31, len: 5 },
    FeatureSpan { name: "left_eye", offset: 36, len: 6 },
    FeatureSpan { name: "right_eye", offset: 42, len: 6 },
    FeatureSpan { name: "top_lip", offset: 48, len: 12 },
    FeatureSpan { name: "bottom_lip", offset: 60, len: 12 },
];

const fn feature_table_tiles_landmarks() -> bool {
    let mut idx = 0;
    let mut next = 0;
    while idx < FEATURE_TABLE.len() {
        if FEATURE_TABLE[idx].offset != next {
            return false;
        }
        next += FEATURE_TABLE[idx].len;
        idx += 1;
    }
    next == LANDMARK_COUNT
}

const _: () = assert!(feature_table_tiles_landmarks());

impl FacialFeature {
    pub const ALL: [FacialFeature; 9] = [
        FacialFeature::Chin,
        FacialFeature::LeftEyebrow,
        FacialFeature::RightEyebrow,
        FacialFeature::NoseBridge,
        FacialFeature::NoseTip,
        FacialFeature::LeftEye,
        FacialFeature::RightEye,
        FacialFeature::TopLip,
        FacialFeature::BottomLip,
    ];

    fn span(self) -> &'static FeatureSpan {
        &FEATURE_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.span().name
    }

    /// Number of points in this group.
    pub fn size(self) -> usize {
        self.span().len
    }

    pub fn range(self) -> Range<usize> {
        let span = self.span();
        span.offset..span.offset + span.len
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|feature| feature.name() == name)
    }
}

/// Axis aligned box in absolute pixel coordinates of some image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

/// Where the valid image data of a crop sits inside the padded square.
pub type Offsets = BoundingBox;

impl BoundingBox {
    pub fn new(left: i32, right: i32, top: i32, bottom: i32) -> Self {
        BoundingBox { left, right, top, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Eye-levelling rotation: angle in degrees about `center`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub angle: f64,
    pub center: Point2<f64>,
}

impl Rotation {
    /// 2x3 affine matrix with the same layout as OpenCV's `getRotationMatrix2D`
    /// at scale 1: positive angles rotate counter-clockwise on screen.
    pub fn matrix(&self) -> Matrix2x3<f64> {
        let (beta, alpha) = self.angle.to_radians().sin_cos();
        let (cx, cy) = (self.center.x, self.center.y);
        Matrix2x3::new(
            alpha, beta, (1.0 - alpha) * cx - beta * cy,
            -beta, alpha, beta * cx + (1.0 - alpha) * cy,
        )
    }

    pub fn inverse_matrix(&self) -> Matrix2x3<f64> {
        Rotation { angle: -self.angle, center: self.center }.matrix()
    }
}

/// Ordered-map form of a landmark set, as written by detector wrappers:
/// `{"chin": [[x, y], ...], "left_eyebrow": [...], ...}`.
pub type NamedLandmarks = BTreeMap<String, Vec<[f64; 2]>>;

/// All landmarks of one face in canonical feature order.
///
/// Stages never mutate a set in place; each geometric step consumes the set
/// and hands back the transformed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NamedLandmarks", into = "NamedLandmarks")]
pub struct LandmarkSet {
    points: [Point2<f64>; LANDMARK_COUNT],
}

impl LandmarkSet {
    /// Builds a set from the flat canonical sequence (inverse of `points`).
    pub fn from_points(points: Vec<Point2<f64>>) -> Result<Self, ExtractionError> {
        let actual = points.len();
        let points: [Point2<f64>; LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_| ExtractionError::LandmarkCount { expected: LANDMARK_COUNT, actual })?;
        Ok(LandmarkSet { points })
    }

    pub fn from_named(named: &NamedLandmarks) -> Result<Self, ExtractionError> {
        if let Some(unknown) = named.keys().find(|key| FacialFeature::from_name(key).is_none()) {
            return Err(ExtractionError::UnknownFeature(unknown.to_owned()));
        }

        let mut points = Vec::with_capacity(LANDMARK_COUNT);
        for feature in FacialFeature::ALL {
            let group = named.get(feature.name()).map(Vec::as_slice).unwrap_or_default();
            if group.len() != feature.size() {
                return Err(ExtractionError::FeatureSize {
                    feature: feature.name(),
                    expected: feature.size(),
                    actual: group.len(),
                });
            }
            points.extend(group.iter().map(|[x, y]| Point2::new(*x, *y)));
        }
        Self::from_points(points)
    }

    /// Reads an `(N, 2)` array of `(x, y)` rows.
    pub fn from_array(array: &Array2<f64>) -> Result<Self, ExtractionError> {
        if array.ncols() != 2 {
            return Err(ExtractionError::LandmarkCount {
                expected: LANDMARK_COUNT,
                actual: array.len() / 2,
            });
        }
        let points = array.rows().into_iter().map(|row| Point2::new(row[0], row[1])).collect();
        Self::from_points(points)
    }

    /// Flat view in canonical feature order.
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn feature(&self, feature: FacialFeature) -> &[Point2<f64>] {
        &self.points[feature.range()]
    }

    pub fn to_named(&self) -> NamedLandmarks {
        FacialFeature::ALL
            .into_iter()
            .map(|feature| {
                let group = self.feature(feature).iter().map(|p| [p.x, p.y]).collect();
                (feature.name().to_string(), group)
            })
            .collect()
    }

    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((LANDMARK_COUNT, 2), |(row, col)| self.points[row][col])
    }

    /// Applies `transformation` to every point, keeping group structure and order.
    pub fn remap<F>(mut self, transformation: F) -> Self
    where
        F: Fn(Point2<f64>) -> Point2<f64>,
    {
        for point in self.points.iter_mut() {
            *point = transformation(*point);
        }
        self
    }

    pub fn translate(self, delta: Vector2<f64>) -> Self {
        self.remap(|p| p + delta)
    }

    /// Multiplies every homogeneous point `(x, y, 1)` with `matrix`.
    pub fn transform_affine(self, matrix: &Matrix2x3<f64>) -> Self {
        self.remap(|p| Point2::from(matrix * Vector3::new(p.x, p.y, 1.0)))
    }

    pub fn centroid(&self) -> Point2<f64> {
        mean_point(&self.points)
    }

    pub fn feature_centroid(&self, feature: FacialFeature) -> Point2<f64> {
        mean_point(self.feature(feature))
    }

    pub fn max_distance_from(&self, center: &Point2<f64>) -> f64 {
        self.points
            .iter()
            .map(|p| nalgebra::distance(p, center))
            .fold(0.0, f64::max)
    }

    /// Component-wise minimum and maximum over all points.
    pub fn bounds(&self) -> (Point2<f64>, Point2<f64>) {
        let first = self.points[0];
        self.points.iter().fold((first, first), |(lo, hi), p| {
            (
                Point2::new(lo.x.min(p.x), lo.y.min(p.y)),
                Point2::new(hi.x.max(p.x), hi.y.max(p.y)),
            )
        })
    }

    /// Interleaved `x0, y0, x1, y1, ...` divided by the crop size.
    pub fn normalized(&self, size: i32) -> Array1<f32> {
        let size = size as f64;
        self.points
            .iter()
            .flat_map(|p| [(p.x / size) as f32, (p.y / size) as f32])
            .collect()
    }

    /// Handcrafted landmark subsets used as compact model inputs.
    pub fn subset(&self, n: usize) -> Result<Vec<Point2<f64>>, ExtractionError> {
        let p = &self.points;
        let left_eye = self.feature_centroid(FacialFeature::LeftEye);
        let right_eye = self.feature_centroid(FacialFeature::RightEye);
        let nose = self.feature_centroid(FacialFeature::NoseTip);

        match n {
            5 => Ok(vec![left_eye, right_eye, nose, p[48], p[60]]),
            10 => Ok(vec![
                left_eye, right_eye, nose, p[48], p[60],
                p[51], p[63], p[8], p[2], p[14],
            ]),
            28 => {
                let mut subset = Vec::with_capacity(28);
                subset.extend_from_slice(self.feature(FacialFeature::RightEye));
                subset.extend_from_slice(self.feature(FacialFeature::LeftEye));
                subset.extend(self.feature(FacialFeature::Chin).iter().step_by(4));
                subset.push(nose);
                subset.extend([48, 50, 52, 56, 58, 60, 62, 64, 68, 70].iter().map(|&idx| p[idx]));
                Ok(subset)
            }
            _ => Err(ExtractionError::UnsupportedSubset(n)),
        }
    }
}

impl TryFrom<NamedLandmarks> for LandmarkSet {
    type Error = ExtractionError;

    fn try_from(named: NamedLandmarks) -> Result<Self, Self::Error> {
        LandmarkSet::from_named(&named)
    }
}

impl From<LandmarkSet> for NamedLandmarks {
    fn from(landmarks: LandmarkSet) -> Self {
        landmarks.to_named()
    }
}

fn mean_point(points: &[Point2<f64>]) -> Point2<f64> {
    let sum = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords);
    Point2::from(sum / points.len() as f64)
}
