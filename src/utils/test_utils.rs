use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Mutex;

use anyhow::Error;
use nalgebra::Point2;
use opencv::core::{Mat, MatTrait, MatTraitConst, MatTraitConstManual, Scalar, Vec3b, CV_8UC3};

use crate::modules::landmark_source::LandmarkSource;
use crate::utils::coordinate::LandmarkSet;

/// Face-like 72 point layout in unit coordinates, eyes on a horizontal line.
fn unit_face() -> Vec<(f64, f64)> {
    let mut points = Vec::with_capacity(72);
    // chin: half ellipse from the left temple over the chin to the right temple
    for i in 0..17 {
        let t = PI * i as f64 / 16.0;
        points.push((-t.cos(), -0.1 + 1.1 * t.sin()));
    }
    for i in 0..5 {
        points.push((-0.8 + 0.15 * i as f64, -0.55));
    }
    for i in 0..5 {
        points.push((0.2 + 0.15 * i as f64, -0.55));
    }
    for i in 0..4 {
        points.push((0.0, -0.35 + 0.13 * i as f64));
    }
    for i in 0..5 {
        points.push((-0.2 + 0.1 * i as f64, 0.2));
    }
    for eye_x in [-0.45, 0.45] {
        for i in 0..6 {
            let t = PI * i as f64 / 3.0;
            points.push((eye_x + 0.12 * t.cos(), -0.3 + 0.06 * t.sin()));
        }
    }
    for (mouth_y, bulge) in [(0.5, -0.08), (0.6, 0.08)] {
        for i in 0..12 {
            let t = PI * i as f64 / 11.0;
            points.push((-0.3 * t.cos(), mouth_y + bulge * t.sin()));
        }
    }
    points
}

/// Synthetic landmarks centred at `center`, scaled by `scale` pixels and
/// rotated by `angle` degrees (screen-space, y pointing down).
pub fn synthetic_landmarks(center: (f64, f64), scale: f64, angle: f64) -> LandmarkSet {
    let (sin, cos) = angle.to_radians().sin_cos();
    let points = unit_face()
        .into_iter()
        .map(|(x, y)| {
            let (x, y) = (x * scale, y * scale);
            Point2::new(center.0 + x * cos - y * sin, center.1 + x * sin + y * cos)
        })
        .collect();
    LandmarkSet::from_points(points).unwrap()
}

/// RGB image with a distinct value pattern per channel, never zero.
pub fn gradient_image(rows: i32, cols: i32) -> Mat {
    let mut image = Mat::new_rows_cols_with_default(rows, cols, CV_8UC3, Scalar::all(0.0)).unwrap();
    for y in 0..rows {
        for x in 0..cols {
            let pixel = image.at_2d_mut::<Vec3b>(y, x).unwrap();
            pixel[0] = (1 + (x + y) % 250) as u8;
            pixel[1] = (1 + (2 * x) % 250) as u8;
            pixel[2] = (1 + (3 * y) % 250) as u8;
        }
    }
    image
}

pub fn solid_image(rows: i32, cols: i32, color: [u8; 3]) -> Mat {
    Mat::new_rows_cols_with_default(
        rows,
        cols,
        CV_8UC3,
        Scalar::new(color[0] as f64, color[1] as f64, color[2] as f64, 0.0),
    )
    .unwrap()
}

pub fn mats_equal(a: &Mat, b: &Mat) -> bool {
    a.size().unwrap() == b.size().unwrap()
        && a.typ() == b.typ()
        && a.data_bytes().unwrap() == b.data_bytes().unwrap()
}

/// Replays a fixed sequence of detections, then reports no face.
pub struct ScriptedLandmarkSource {
    script: Mutex<VecDeque<Option<LandmarkSet>>>,
}

impl ScriptedLandmarkSource {
    pub fn new(script: Vec<Option<LandmarkSet>>) -> Self {
        ScriptedLandmarkSource { script: Mutex::new(script.into()) }
    }
}

impl LandmarkSource for ScriptedLandmarkSource {
    fn detect(&self, _image: &Mat) -> Result<Option<LandmarkSet>, Error> {
        Ok(self.script.lock().unwrap().pop_front().flatten())
    }
}
