//! Test doubles shared by the unit tests of this crate.

use crate::capability::{
    CapabilityError, CredentialProvider, FaceCapability, FrameSource, OperatorCommand,
    OperatorConsole, SourceError,
};
use crate::ledger::{AttendanceLedger, AttendanceRecord, LedgerError, MarkOutcome, SqliteLedger};
use crate::session::SessionKey;
use crate::types::{BoundingBox, Comparator, Encoding, Frame};
use image::{Rgb, RgbImage};
use std::cell::Cell;
use std::collections::VecDeque;

pub const ALICE: [u8; 3] = [200, 60, 60];
pub const BOB: [u8; 3] = [60, 60, 200];
pub const CAROL: [u8; 3] = [60, 200, 60];

/// Pixels at or below this channel sum count as background.
const BACKGROUND_SUM: u32 = 96;

/// Face capability for tests: every horizontal run of bright columns is one
/// face, and a face's encoding is its mean colour scaled to [0, 1].
#[derive(Default)]
pub struct FakeCapability {
    /// When set, `locate` finds nothing.
    pub blind: bool,
    pub locate_calls: usize,
}

impl Comparator for FakeCapability {
    fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        a.euclidean_distance(b)
    }
}

impl FaceCapability for FakeCapability {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, CapabilityError> {
        self.locate_calls += 1;
        if self.blind {
            return Ok(Vec::new());
        }
        Ok(bright_regions(image))
    }

    fn encode(
        &mut self,
        image: &RgbImage,
        boxes: &[BoundingBox],
    ) -> Result<Vec<Encoding>, CapabilityError> {
        boxes
            .iter()
            .map(|b| {
                mean_colour(image, b)
                    .ok_or_else(|| CapabilityError::Encode("box outside image".into()))
            })
            .collect()
    }
}

fn is_bright(pixel: &Rgb<u8>) -> bool {
    pixel.0.iter().map(|&c| c as u32).sum::<u32>() > BACKGROUND_SUM
}

fn bright_regions(image: &RgbImage) -> Vec<BoundingBox> {
    let (width, height) = image.dimensions();
    let column_bright = |x: u32| (0..height).any(|y| is_bright(image.get_pixel(x, y)));

    let mut boxes = Vec::new();
    let mut run_start: Option<u32> = None;
    for x in 0..=width {
        let bright = x < width && column_bright(x);
        match (bright, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(x0)) => {
                let mut y0 = height;
                let mut y1 = 0;
                for cx in x0..x {
                    for y in 0..height {
                        if is_bright(image.get_pixel(cx, y)) {
                            y0 = y0.min(y);
                            y1 = y1.max(y + 1);
                        }
                    }
                }
                boxes.push(BoundingBox::new(
                    x0 as f32,
                    y0 as f32,
                    (x - x0) as f32,
                    (y1 - y0) as f32,
                ));
                run_start = None;
            }
            _ => {}
        }
    }
    boxes
}

fn mean_colour(image: &RgbImage, bbox: &BoundingBox) -> Option<Encoding> {
    let (x, y, w, h) = bbox.pixel_rect(image.width(), image.height())?;
    let mut sums = [0f32; 3];
    for py in y..y + h {
        for px in x..x + w {
            for (sum, &channel) in sums.iter_mut().zip(image.get_pixel(px, py).0.iter()) {
                *sum += channel as f32;
            }
        }
    }
    let count = (w * h) as f32;
    Some(Encoding::new(sums.iter().map(|s| s / count / 255.0).collect()))
}

/// Encoding the fake capability produces for a face painted in `colour`.
pub fn encoding_of(colour: [u8; 3]) -> Encoding {
    Encoding::new(colour.iter().map(|&c| c as f32 / 255.0).collect())
}

/// A lone face filling a 16×16 image, as stored in the enrollment collection.
pub fn face_image(colour: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb(colour))
}

/// A black 160×120 frame with one 20×24 face per colour, side by side.
pub fn scene(faces: &[[u8; 3]]) -> RgbImage {
    let mut image = RgbImage::new(160, 120);
    for (i, colour) in faces.iter().enumerate() {
        let x0 = 10 + i as u32 * 40;
        for y in 40..64 {
            for x in x0..x0 + 20 {
                image.put_pixel(x, y, Rgb(*colour));
            }
        }
    }
    image
}

pub fn frame(faces: &[[u8; 3]], sequence: u64) -> Frame {
    Frame::new(scene(faces), sequence)
}

/// SQLite ledger that counts calls reaching storage.
pub struct CountingLedger {
    pub inner: SqliteLedger,
    pub marks: Cell<usize>,
    /// When set, `mark_attendance` fails as if the session table vanished.
    pub fail_marks: Cell<bool>,
}

impl CountingLedger {
    pub fn new() -> Self {
        Self {
            inner: SqliteLedger::open_in_memory().unwrap(),
            marks: Cell::new(0),
            fail_marks: Cell::new(false),
        }
    }
}

impl AttendanceLedger for CountingLedger {
    fn ensure_session(&self, session: &SessionKey) -> Result<(), LedgerError> {
        self.inner.ensure_session(session)
    }

    fn mark_attendance(
        &self,
        session: &SessionKey,
        identity: &str,
    ) -> Result<MarkOutcome, LedgerError> {
        self.marks.set(self.marks.get() + 1);
        if self.fail_marks.get() {
            return Err(LedgerError::SessionNotFound(session.clone()));
        }
        self.inner.mark_attendance(session, identity)
    }

    fn retrieve(&self, session: &SessionKey) -> Result<Vec<AttendanceRecord>, LedgerError> {
        self.inner.retrieve(session)
    }

    fn sessions(&self) -> Result<Vec<SessionKey>, LedgerError> {
        self.inner.sessions()
    }
}

/// Frame source replaying a fixed script.
pub struct ScriptedSource {
    pub frames: VecDeque<Result<Option<Frame>, SourceError>>,
    pub pulls: usize,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into_iter().map(|f| Ok(Some(f))).collect(),
            pulls: 0,
        }
    }

    pub fn failing_after(frames: Vec<Frame>, reason: &str) -> Self {
        let mut source = Self::new(frames);
        source
            .frames
            .push_back(Err(SourceError::Unavailable(reason.to_string())));
        source
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        self.pulls += 1;
        self.frames.pop_front().unwrap_or(Ok(None))
    }
}

/// Operator console replaying scripted input.
#[derive(Default)]
pub struct ScriptedConsole {
    /// Command returned by each poll, in order; `None` entries mean "nothing pending".
    pub commands: VecDeque<Option<OperatorCommand>>,
    pub credentials: VecDeque<String>,
    pub identities: VecDeque<String>,
    pub credential_requests: u32,
    pub notices: Vec<String>,
}

impl ScriptedConsole {
    pub fn with_credentials(credentials: &[&str]) -> Self {
        Self {
            credentials: credentials.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl CredentialProvider for ScriptedConsole {
    fn request_credential(&mut self, _attempt: u32) -> Option<String> {
        self.credential_requests += 1;
        self.credentials.pop_front()
    }
}

impl OperatorConsole for ScriptedConsole {
    fn poll_command(&mut self) -> Option<OperatorCommand> {
        self.commands.pop_front().flatten()
    }

    fn request_identity(&mut self) -> Option<String> {
        self.identities.pop_front()
    }

    fn notify(&mut self, message: &str) {
        self.notices.push(message.to_string());
    }
}
