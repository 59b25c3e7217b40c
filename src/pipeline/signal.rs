//! Signals: the tagged envelope exchanged between stages.
//!
//! A `Signal` wraps exactly one `Payload` variant. The tag (`SignalKind`) is a
//! function of the variant and cannot change once the signal exists, so a
//! consumer matches on `kind()` (or calls `expect_kind`) before touching the
//! payload.
//!
//! Large payloads (images, tensors, keypoint sets, box lists) keep their data
//! behind `Arc`, which makes the clones needed for output fan-out cheap and
//! keeps the data itself immutable.

use crate::pipeline::error::{SignalError, WorkerError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Closed set of payload tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Unknown,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Bool,
    String,
    Tensor,
    BBox,
    BBoxList,
    KeyPoints,
    ImageBgr,
    ImageRgb,
    ImageGray,
    ImageRgba,
    ImageBgra,
    ImageYuv,
}

impl SignalKind {
    /// Whether this tag denotes an image buffer.
    pub fn is_image(self) -> bool {
        matches!(
            self,
            SignalKind::ImageBgr
                | SignalKind::ImageRgb
                | SignalKind::ImageGray
                | SignalKind::ImageRgba
                | SignalKind::ImageBgra
                | SignalKind::ImageYuv
        )
    }

    /// Whether this tag denotes a scalar number or bool.
    pub fn is_scalar(self) -> bool {
        matches!(
            self,
            SignalKind::Int8
                | SignalKind::UInt8
                | SignalKind::Int16
                | SignalKind::UInt16
                | SignalKind::Int32
                | SignalKind::UInt32
                | SignalKind::Int64
                | SignalKind::UInt64
                | SignalKind::Float32
                | SignalKind::Float64
                | SignalKind::Bool
        )
    }
}

/// Pixel layout of an image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgr,
    Rgb,
    Gray,
    Rgba,
    Bgra,
    /// Planar YUV 4:2:0 (I420).
    Yuv420,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` frame in this layout, or `None`
    /// when that does not fit in `usize`.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Gray => Some(pixels),
            PixelFormat::Bgr | PixelFormat::Rgb => pixels.checked_mul(3),
            PixelFormat::Rgba | PixelFormat::Bgra => pixels.checked_mul(4),
            PixelFormat::Yuv420 => (width.div_ceil(2) as usize)
                .checked_mul(height.div_ceil(2) as usize)?
                .checked_mul(2)?
                .checked_add(pixels),
        }
    }

    pub fn kind(self) -> SignalKind {
        match self {
            PixelFormat::Bgr => SignalKind::ImageBgr,
            PixelFormat::Rgb => SignalKind::ImageRgb,
            PixelFormat::Gray => SignalKind::ImageGray,
            PixelFormat::Rgba => SignalKind::ImageRgba,
            PixelFormat::Bgra => SignalKind::ImageBgra,
            PixelFormat::Yuv420 => SignalKind::ImageYuv,
        }
    }
}

/// Raw image frame. Validated on construction, immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<[u8]>,
}

impl Image {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Arc<[u8]>>,
    ) -> Result<Self, SignalError> {
        let data = data.into();
        if data.is_empty() || width == 0 || height == 0 {
            return Err(SignalError::EmptyImage);
        }
        let expected = format
            .frame_size(width, height)
            .ok_or(SignalError::ImageTooLarge {
                width,
                height,
                format,
            })?;
        if data.len() != expected {
            return Err(SignalError::ImageSize {
                width,
                height,
                format,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
    pub score: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
            score: 1.0,
            class_id: 0,
        }
    }

    pub fn with_score(mut self, score: f32, class_id: u32) -> Self {
        self.score = score;
        self.class_id = class_id;
        self
    }

    pub fn width(&self) -> f32 {
        (self.x_max - self.x_min).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y_max - self.y_min).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// A single landmark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

/// Dense f32 tensor in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Arc<[usize]>,
    data: Arc<[f32]>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: impl Into<Arc<[f32]>>) -> Result<Self, SignalError> {
        let data = data.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(SignalError::TensorShape {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape: shape.into(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// The payload carried by a signal. Each variant maps to exactly one tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Unknown,
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bool(bool),
    String(String),
    Tensor(Tensor),
    BBox(BBox),
    BBoxList(Arc<[BBox]>),
    KeyPoints(Arc<[KeyPoint]>),
    Image(Image),
}

impl Payload {
    pub fn kind(&self) -> SignalKind {
        match self {
            Payload::Unknown => SignalKind::Unknown,
            Payload::Int8(_) => SignalKind::Int8,
            Payload::UInt8(_) => SignalKind::UInt8,
            Payload::Int16(_) => SignalKind::Int16,
            Payload::UInt16(_) => SignalKind::UInt16,
            Payload::Int32(_) => SignalKind::Int32,
            Payload::UInt32(_) => SignalKind::UInt32,
            Payload::Int64(_) => SignalKind::Int64,
            Payload::UInt64(_) => SignalKind::UInt64,
            Payload::Float32(_) => SignalKind::Float32,
            Payload::Float64(_) => SignalKind::Float64,
            Payload::Bool(_) => SignalKind::Bool,
            Payload::String(_) => SignalKind::String,
            Payload::Tensor(_) => SignalKind::Tensor,
            Payload::BBox(_) => SignalKind::BBox,
            Payload::BBoxList(_) => SignalKind::BBoxList,
            Payload::KeyPoints(_) => SignalKind::KeyPoints,
            Payload::Image(image) => image.format().kind(),
        }
    }
}

/// A stage boundary crossing, recorded for latency measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    pub stage: Arc<str>,
    pub at: Instant,
}

/// Tagged data envelope passed between nodes.
///
/// Ownership moves with the signal: popping it from a queue hands the consumer
/// the only copy, so `stamp` and `derive` never race with another stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    payload: Payload,
    frame_index: u64,
    created_at: Instant,
    stamps: Vec<Stamp>,
}

impl Signal {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            frame_index: 0,
            created_at: Instant::now(),
            stamps: Vec::new(),
        }
    }

    pub fn with_frame_index(mut self, frame_index: u64) -> Self {
        self.frame_index = frame_index;
        self
    }

    /// New signal carrying `payload` that keeps this signal's frame index,
    /// creation time and stage stamps.
    pub fn derive(&self, payload: Payload) -> Self {
        Self {
            payload,
            frame_index: self.frame_index,
            created_at: self.created_at,
            stamps: self.stamps.clone(),
        }
    }

    #[inline]
    pub fn kind(&self) -> SignalKind {
        self.payload.kind()
    }

    #[inline]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Record that this signal left `stage`.
    pub fn stamp(&mut self, stage: &Arc<str>) {
        self.stamps.push(Stamp {
            stage: Arc::clone(stage),
            at: Instant::now(),
        });
    }

    pub fn stamps(&self) -> &[Stamp] {
        &self.stamps
    }

    /// Time from creation to the most recent stamp.
    pub fn latency(&self) -> Duration {
        self.stamps
            .last()
            .map(|s| s.at.saturating_duration_since(self.created_at))
            .unwrap_or(Duration::ZERO)
    }

    /// Borrow the payload if the tag matches, or report the mismatch.
    pub fn expect_kind(&self, expected: SignalKind) -> Result<&Payload, WorkerError> {
        let found = self.kind();
        if found == expected {
            Ok(&self.payload)
        } else {
            Err(WorkerError::TagMismatch { expected, found })
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.payload {
            Payload::Int8(v) => Some(v as i64),
            Payload::UInt8(v) => Some(v as i64),
            Payload::Int16(v) => Some(v as i64),
            Payload::UInt16(v) => Some(v as i64),
            Payload::Int32(v) => Some(v as i64),
            Payload::UInt32(v) => Some(v as i64),
            Payload::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self.payload {
            Payload::UInt8(v) => Some(v as u64),
            Payload::UInt16(v) => Some(v as u64),
            Payload::UInt32(v) => Some(v as u64),
            Payload::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.payload {
            Payload::Float32(v) => Some(v as f64),
            Payload::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.payload {
            Payload::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.payload {
            Payload::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&Image> {
        match &self.payload {
            Payload::Image(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match &self.payload {
            Payload::Tensor(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bboxes(&self) -> Option<&[BBox]> {
        match &self.payload {
            Payload::BBoxList(v) => Some(v),
            Payload::BBox(v) => Some(std::slice::from_ref(v)),
            _ => None,
        }
    }

    pub fn as_keypoints(&self) -> Option<&[KeyPoint]> {
        match &self.payload {
            Payload::KeyPoints(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Payload> for Signal {
    fn from(payload: Payload) -> Self {
        Signal::new(payload)
    }
}

macro_rules! impl_payload_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Payload {
                fn from(value: $ty) -> Self {
                    Payload::$variant(value)
                }
            }

            impl From<$ty> for Signal {
                fn from(value: $ty) -> Self {
                    Signal::new(Payload::$variant(value))
                }
            }
        )*
    };
}

impl_payload_from! {
    i64 => Int64,
    u64 => UInt64,
    f64 => Float64,
    bool => Bool,
    String => String,
    Image => Image,
    Tensor => Tensor,
    BBox => BBox,
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::String(value.to_string())
    }
}

impl From<&str> for Signal {
    fn from(value: &str) -> Self {
        Signal::new(value.into())
    }
}
