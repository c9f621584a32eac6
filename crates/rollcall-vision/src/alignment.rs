//! Face alignment to the canonical 112×112 ArcFace crop.
//!
//! A similarity transform (uniform scale, rotation, translation) is fitted
//! in closed form from the five detected landmarks to the reference
//! positions, then the face is resampled through its inverse.

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use rollcall_core::BoundingBox;

pub const ALIGNED_SIZE: u32 = 112;

/// Landmark positions in the aligned crop: eyes, nose tip, mouth corners.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// `(x, y) -> (a·x − b·y + tx, b·x + a·y + ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`. `None` when the source
    /// points coincide.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts
                .iter()
                .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (px, py) = centroid(src);
        let (qx, qy) = centroid(dst);

        let (mut dot, mut cross, mut spread) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (ux, uy) = (sx - px, sy - py);
            let (vx, vy) = (dx - qx, dy - qy);
            dot += ux * vx + uy * vy;
            cross += ux * vy - uy * vx;
            spread += ux * ux + uy * uy;
        }
        if spread < 1e-6 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: qx - (a * px - b * py),
            ty: qy - (b * px + a * py),
        })
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp the face described by `landmarks` into the canonical crop.
///
/// Returns `None` if the landmarks are degenerate.
pub fn align(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let to_source = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS)?.invert()?;
    Some(RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = to_source.apply((ox as f32, oy as f32));
        bilinear(image, sx, sy)
    }))
}

/// Square crop centred on `face`, resized to the canonical size. Used when
/// the locator supplied no landmarks.
pub fn centre_crop(image: &RgbImage, face: &BoundingBox) -> Option<RgbImage> {
    let side = face.width.max(face.height);
    let square = BoundingBox::new(
        face.x + (face.width - side) / 2.0,
        face.y + (face.height - side) / 2.0,
        side,
        side,
    );
    let (x, y, w, h) = square.pixel_rect(image.width(), image.height())?;
    let crop = image::imageops::crop_imm(image, x, y, w, h).to_image();
    Some(image::imageops::resize(
        &crop,
        ALIGNED_SIZE,
        ALIGNED_SIZE,
        FilterType::Triangle,
    ))
}

/// Bilinear sample; outside the image reads as black.
fn bilinear(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let texel = |px: f32, py: f32| -> [f32; 3] {
        if px < 0.0 || py < 0.0 || px >= image.width() as f32 || py >= image.height() as f32 {
            return [0.0; 3];
        }
        image.get_pixel(px as u32, py as u32).0.map(f32::from)
    };

    let corners = [
        (texel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (texel(x0 + 1.0, y0), fx * (1.0 - fy)),
        (texel(x0, y0 + 1.0), (1.0 - fx) * fy),
        (texel(x0 + 1.0, y0 + 1.0), fx * fy),
    ];
    Rgb(std::array::from_fn(|c| {
        let v: f32 = corners.iter().map(|(t, w)| t[c] * w).sum();
        v.round().clamp(0.0, 255.0) as u8
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_estimate_identity() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS, &REFERENCE_LANDMARKS).unwrap();
        assert!(close(t.a, 1.0, 1e-4) && close(t.b, 0.0, 1e-4));
        assert!(close(t.tx, 0.0, 1e-3) && close(t.ty, 0.0, 1e-3));
    }

    #[test]
    fn test_estimate_recovers_scale_and_rotation() {
        let truth = Similarity {
            a: 0.0,
            b: 2.0,
            tx: 10.0,
            ty: -4.0,
        };
        let src = REFERENCE_LANDMARKS;
        let dst = src.map(|p| truth.apply(p));
        let t = Similarity::estimate(&src, &dst).unwrap();
        assert!(close(t.a, 0.0, 1e-3) && close(t.b, 2.0, 1e-3), "{t:?}");
        assert!(close(t.tx, 10.0, 1e-2) && close(t.ty, -4.0, 1e-2), "{t:?}");
    }

    #[test]
    fn test_invert_round_trip() {
        let t = Similarity {
            a: 0.6,
            b: -0.3,
            tx: 12.0,
            ty: 7.5,
        };
        let inv = t.invert().unwrap();
        let (x, y) = inv.apply(t.apply((31.0, -8.0)));
        assert!(close(x, 31.0, 1e-3) && close(y, -8.0, 1e-3));
    }

    #[test]
    fn test_degenerate_landmarks_rejected() {
        let collapsed = [(5.0, 5.0); 5];
        assert!(Similarity::estimate(&collapsed, &REFERENCE_LANDMARKS).is_none());
        assert!(align(&RgbImage::new(10, 10), &collapsed).is_none());
    }

    #[test]
    fn test_align_moves_eye_to_reference() {
        let mut image = RgbImage::new(200, 200);
        let landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let aligned = align(&image, &landmarks).unwrap();
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        let (rx, ry) = REFERENCE_LANDMARKS[0];
        let eye = aligned.get_pixel(rx.round() as u32, ry.round() as u32);
        assert!(eye[0] > 100, "left eye should be bright, got {eye:?}");
        assert_eq!(aligned.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn test_centre_crop_is_square_and_canonical() {
        let image = RgbImage::from_pixel(100, 80, Rgb([50, 100, 150]));
        let crop = centre_crop(&image, &BoundingBox::new(20.0, 10.0, 30.0, 50.0)).unwrap();
        assert_eq!(crop.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(crop.get_pixel(56, 56), &Rgb([50, 100, 150]));
        assert!(centre_crop(&image, &BoundingBox::new(500.0, 500.0, 10.0, 10.0)).is_none());
    }
}
