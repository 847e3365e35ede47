//! Annotation data model and registry
//!
//! The registry is the sole owner of every annotation. Pages keep only the
//! ids bound to them, and each registry record names its owning page by
//! [`PageId`], so ownership follows a page through moves without any
//! renumbering. Coordinates are page-local PDF points.

use crate::document::{DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use crate::events::ChangeEvent;
use crate::pages::{PageId, PageTable};
use folio_cache::IndexChange;
use folio_engine::AnnotationAppearance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for an annotation
///
/// Generated using UUID v4 and never reused after deletion.
pub type AnnotationId = uuid::Uuid;

/// Page-local coordinate in PDF page space
///
/// Origin at bottom-left, y increasing upward, units in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageCoordinate {
    pub x: f32,
    pub y: f32,
}

impl PageCoordinate {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// RGBA color representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Normalized RGB components (0.0 to 1.0)
    pub fn to_rgb_f32(&self) -> [f32; 3] {
        [self.r as f32 / 255.0, self.g as f32 / 255.0, self.b as f32 / 255.0]
    }

    pub fn alpha_f32(&self) -> f32 {
        self.a as f32 / 255.0
    }

    /// Opaque color from normalized components, clamped to 0.0..=1.0.
    pub fn from_rgb_f32([r, g, b]: [f32; 3]) -> Self {
        let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self::rgb(channel(r), channel(g), channel(b))
    }
}

impl Color {
    pub const RED: Color = Color { r: 255, g: 0, b: 0, a: 255 };
    pub const GREEN: Color = Color { r: 0, g: 255, b: 0, a: 255 };
    pub const BLUE: Color = Color { r: 0, g: 0, b: 255, a: 255 };
    pub const YELLOW: Color = Color { r: 255, g: 255, b: 0, a: 255 };
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0, a: 255 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255, a: 255 };
}

/// Annotation kinds the editor can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationKind {
    Highlight,
    Underline,
    StrikeOut,
    /// Sticky note
    Note,
    FreeText,
    Rectangle,
    Circle,
    Line,
    Ink,
    Stamp,
    Redaction,
}

impl AnnotationKind {
    /// PDF annotation subtype written to /Subtype.
    pub fn subtype(self) -> &'static str {
        match self {
            Self::Highlight => "Highlight",
            Self::Underline => "Underline",
            Self::StrikeOut => "StrikeOut",
            Self::Note => "Text",
            Self::FreeText => "FreeText",
            Self::Rectangle => "Square",
            Self::Circle => "Circle",
            Self::Line => "Line",
            Self::Ink => "Ink",
            Self::Stamp => "Stamp",
            Self::Redaction => "Redact",
        }
    }

    /// Kind written as `subtype`, if the editor models it.
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        Some(match subtype {
            "Highlight" => Self::Highlight,
            "Underline" => Self::Underline,
            "StrikeOut" => Self::StrikeOut,
            "Text" => Self::Note,
            "FreeText" => Self::FreeText,
            "Square" => Self::Rectangle,
            "Circle" => Self::Circle,
            "Line" => Self::Line,
            "Ink" => Self::Ink,
            "Stamp" => Self::Stamp,
            "Redact" => Self::Redaction,
            _ => return None,
        })
    }

    fn accepts(self, geometry: &AnnotationGeometry) -> bool {
        match (self, geometry) {
            (Self::Line, AnnotationGeometry::Line { .. }) => true,
            (Self::Ink, AnnotationGeometry::Ink { .. }) => true,
            (Self::Note, AnnotationGeometry::Point { .. } | AnnotationGeometry::Rect { .. }) => true,
            (Self::Line | Self::Ink | Self::Note, _) => false,
            (_, AnnotationGeometry::Rect { .. }) => true,
            _ => false,
        }
    }
}

/// Size of the icon box drawn for point-anchored notes.
const NOTE_ICON_SIZE: f32 = 24.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationGeometry {
    /// Axis-aligned rectangle given by two opposite corners
    Rect { lower_left: PageCoordinate, upper_right: PageCoordinate },
    Line { start: PageCoordinate, end: PageCoordinate },
    /// Freehand strokes
    Ink { paths: Vec<Vec<PageCoordinate>> },
    /// Anchor point (sticky notes)
    Point { position: PageCoordinate },
}

impl AnnotationGeometry {
    /// Bounding rectangle `[x0, y0, x1, y1]` with `x0 <= x1` and `y0 <= y1`.
    pub fn bounding_box(&self) -> [f32; 4] {
        match self {
            Self::Rect { lower_left, upper_right } => bounds([*lower_left, *upper_right].iter()),
            Self::Line { start, end } => bounds([*start, *end].iter()),
            Self::Ink { paths } => bounds(paths.iter().flatten()),
            Self::Point { position } => [
                position.x,
                position.y - NOTE_ICON_SIZE,
                position.x + NOTE_ICON_SIZE,
                position.y,
            ],
        }
    }

    fn validate(&self) -> DocumentResult<()> {
        let finite = match self {
            Self::Rect { lower_left, upper_right } => lower_left.is_finite() && upper_right.is_finite(),
            Self::Line { start, end } => start.is_finite() && end.is_finite(),
            Self::Ink { paths } => {
                if paths.iter().all(Vec::is_empty) {
                    return Err(DocumentError::UnsupportedOperation(
                        "ink annotations need at least one point".to_string(),
                    ));
                }
                paths.iter().flatten().all(PageCoordinate::is_finite)
            }
            Self::Point { position } => position.is_finite(),
        };
        if finite {
            Ok(())
        } else {
            Err(DocumentError::UnsupportedOperation("annotation coordinates must be finite".to_string()))
        }
    }
}

fn bounds<'a>(points: impl Iterator<Item = &'a PageCoordinate>) -> [f32; 4] {
    let mut rect = [f32::MAX, f32::MAX, f32::MIN, f32::MIN];
    for point in points {
        rect[0] = rect[0].min(point.x);
        rect[1] = rect[1].min(point.y);
        rect[2] = rect[2].max(point.x);
        rect[3] = rect[3].max(point.y);
    }
    if rect[0] > rect[2] {
        [0.0; 4]
    } else {
        rect
    }
}

/// Visual styling for annotation rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationStyle {
    pub stroke_color: Color,
    pub fill_color: Option<Color>,
    /// Stroke width in points
    pub stroke_width: f32,
    /// Overall opacity (0.0 to 1.0)
    pub opacity: f32,
    /// Font size for free text
    pub font_size: f32,
}

impl AnnotationStyle {
    pub fn new() -> Self {
        Self {
            stroke_color: Color::BLACK,
            fill_color: None,
            stroke_width: 1.0,
            opacity: 1.0,
            font_size: 12.0,
        }
    }

    /// Red markup style for review comments
    pub fn red_markup() -> Self {
        Self { stroke_color: Color::RED, stroke_width: 2.0, ..Self::new() }
    }

    /// Yellow highlight style
    pub fn yellow_highlight() -> Self {
        Self {
            stroke_color: Color::YELLOW,
            fill_color: Some(Color::YELLOW),
            stroke_width: 0.0,
            opacity: 0.3,
            ..Self::new()
        }
    }

    fn validate(&self) -> DocumentResult<()> {
        let valid = self.stroke_width.is_finite()
            && self.stroke_width >= 0.0
            && (0.0..=1.0).contains(&self.opacity)
            && self.font_size.is_finite()
            && self.font_size > 0.0;
        if valid {
            Ok(())
        } else {
            Err(DocumentError::UnsupportedOperation("invalid annotation style".to_string()))
        }
    }
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Snapshot of one annotation.
///
/// `page_index` is the owning page's position when the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub geometry: AnnotationGeometry,
    pub style: AnnotationStyle,
    pub contents: Option<String>,
    pub author: Option<String>,
    /// Unix timestamp in seconds
    pub created_at: i64,
    pub modified_at: i64,
    pub page_index: usize,
}

impl Annotation {
    fn new(kind: AnnotationKind, geometry: AnnotationGeometry, style: AnnotationStyle) -> Self {
        let now = unix_now();
        Self {
            id: AnnotationId::new_v4(),
            kind,
            geometry,
            style,
            contents: None,
            author: None,
            created_at: now,
            modified_at: now,
            page_index: 0,
        }
    }

    fn touch(&mut self) {
        self.modified_at = unix_now();
    }

    /// Copy with a fresh identity.
    fn duplicate(&self) -> Self {
        Self { id: AnnotationId::new_v4(), ..self.clone() }
    }

    pub fn bounding_box(&self) -> [f32; 4] {
        self.geometry.bounding_box()
    }

    /// Rebuild an annotation read from a file.
    ///
    /// Inverse of [`appearance`](Self::appearance): the stroke padding is
    /// taken back off the rectangle, and a note whose box is the icon size
    /// becomes point-anchored again. A /NM that is not a UUID gets a fresh
    /// id. `None` for subtypes the editor does not model.
    pub(crate) fn from_appearance(appearance: &AnnotationAppearance) -> Option<Self> {
        let kind = AnnotationKind::from_subtype(&appearance.subtype)?;
        let width = if appearance.border_width.is_finite() { appearance.border_width.max(0.0) } else { 1.0 };
        let pad = width / 2.0;
        let [x0, y0, x1, y1] = appearance.rect;
        let (x0, y0, x1, y1) = (x0 + pad, y0 + pad, x1 - pad, y1 - pad);
        let (x0, x1) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (y0, y1) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        let lower_left = PageCoordinate::new(x0, y0);
        let upper_right = PageCoordinate::new(x1, y1);

        let geometry = match kind {
            AnnotationKind::Line => {
                let [sx, sy, ex, ey] = appearance.line.unwrap_or([x0, y0, x1, y1]);
                AnnotationGeometry::Line { start: PageCoordinate::new(sx, sy), end: PageCoordinate::new(ex, ey) }
            }
            AnnotationKind::Ink => {
                let paths: Vec<Vec<PageCoordinate>> = appearance
                    .ink
                    .iter()
                    .map(|path| path.iter().map(|&(x, y)| PageCoordinate::new(x, y)).collect())
                    .filter(|path: &Vec<PageCoordinate>| !path.is_empty())
                    .collect();
                let paths = if paths.is_empty() { vec![vec![lower_left, upper_right]] } else { paths };
                AnnotationGeometry::Ink { paths }
            }
            AnnotationKind::Note
                if ((x1 - x0) - NOTE_ICON_SIZE).abs() < 0.01 && ((y1 - y0) - NOTE_ICON_SIZE).abs() < 0.01 =>
            {
                AnnotationGeometry::Point { position: PageCoordinate::new(x0, y1) }
            }
            _ => AnnotationGeometry::Rect { lower_left, upper_right },
        };

        let now = unix_now();
        Some(Self {
            id: appearance.name.parse().unwrap_or_else(|_| AnnotationId::new_v4()),
            kind,
            geometry,
            style: AnnotationStyle {
                stroke_color: appearance.color.map_or(Color::BLACK, Color::from_rgb_f32),
                fill_color: appearance.interior_color.map(Color::from_rgb_f32),
                stroke_width: width,
                opacity: if appearance.opacity.is_finite() { appearance.opacity.clamp(0.0, 1.0) } else { 1.0 },
                ..AnnotationStyle::new()
            },
            contents: appearance.contents.clone(),
            author: appearance.author.clone(),
            created_at: now,
            modified_at: now,
            page_index: 0,
        })
    }

    /// Dictionary contents handed to the codec on save.
    pub(crate) fn appearance(&self) -> AnnotationAppearance {
        let pad = self.style.stroke_width / 2.0;
        let [x0, y0, x1, y1] = self.bounding_box();
        let line = match &self.geometry {
            AnnotationGeometry::Line { start, end } => Some([start.x, start.y, end.x, end.y]),
            _ => None,
        };
        let ink = match &self.geometry {
            AnnotationGeometry::Ink { paths } => paths
                .iter()
                .map(|path| path.iter().map(|point| (point.x, point.y)).collect())
                .collect(),
            _ => Vec::new(),
        };

        AnnotationAppearance {
            subtype: self.kind.subtype().to_string(),
            rect: [x0 - pad, y0 - pad, x1 + pad, y1 + pad],
            color: Some(self.style.stroke_color.to_rgb_f32()),
            interior_color: self.style.fill_color.map(|color| color.to_rgb_f32()),
            border_width: self.style.stroke_width,
            opacity: self.style.opacity * self.style.stroke_color.alpha_f32(),
            contents: self.contents.clone(),
            author: self.author.clone(),
            line,
            ink,
            name: self.id.to_string(),
        }
    }
}

struct Record {
    owner: PageId,
    annotation: Annotation,
}

/// Owner-keyed store of all annotations in one document.
#[derive(Default)]
pub(crate) struct AnnotationRegistry {
    records: HashMap<AnnotationId, Record>,
}

impl AnnotationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn owner(&self, id: AnnotationId) -> DocumentResult<PageId> {
        self.records.get(&id).map(|record| record.owner).ok_or(DocumentError::AnnotationNotFound(id))
    }

    /// Snapshot with `page_index` filled from the current page order.
    pub fn snapshot(&self, id: AnnotationId, pages: &PageTable) -> DocumentResult<Annotation> {
        let record = self.records.get(&id).ok_or(DocumentError::AnnotationNotFound(id))?;
        let mut annotation = record.annotation.clone();
        annotation.page_index = pages.index_of(record.owner).unwrap_or_default();
        Ok(annotation)
    }

    /// Bind `annotation` to `owner`. The caller records the id on the page.
    pub fn insert(&mut self, owner: PageId, annotation: Annotation) -> AnnotationId {
        let id = annotation.id;
        self.records.insert(id, Record { owner, annotation });
        id
    }

    pub fn remove(&mut self, id: AnnotationId) -> Option<Annotation> {
        self.records.remove(&id).map(|record| record.annotation)
    }

    /// Cascade for deleted pages. Returns how many annotations went away.
    pub fn remove_all(&mut self, ids: &[AnnotationId]) -> usize {
        ids.iter().filter(|id| self.records.remove(id).is_some()).count()
    }

    fn get_mut(&mut self, id: AnnotationId) -> DocumentResult<&mut Annotation> {
        self.records
            .get_mut(&id)
            .map(|record| &mut record.annotation)
            .ok_or(DocumentError::AnnotationNotFound(id))
    }

    /// Deep copies of `ids` with new identities, ready to bind to another page.
    pub fn duplicates(&self, ids: &[AnnotationId]) -> Vec<Annotation> {
        ids.iter()
            .filter_map(|id| self.records.get(id))
            .map(|record| record.annotation.duplicate())
            .collect()
    }

    pub fn appearances(&self, ids: &[AnnotationId]) -> Vec<AnnotationAppearance> {
        ids.iter()
            .filter_map(|id| self.records.get(id))
            .map(|record| record.annotation.appearance())
            .collect()
    }
}

/// Bind freshly copied annotations to `owner`. Returns how many were bound.
pub(crate) fn bind_annotations(
    pages: &mut PageTable,
    registry: &mut AnnotationRegistry,
    owner: PageId,
    annotations: Vec<Annotation>,
) -> usize {
    let count = annotations.len();
    for annotation in annotations {
        let id = registry.insert(owner, annotation);
        if let Some(slot) = pages.slot_mut(owner) {
            slot.annotations.push(id);
        }
    }
    count
}

fn content_changed(pages: &PageTable, owner: PageId) -> Effects {
    let index = pages.index_of(owner).unwrap_or_default();
    Effects::modified()
        .with_change(IndexChange::ContentChanged { index })
        .with_event(ChangeEvent::AnnotationsChanged { pages: vec![index] })
}

impl DocumentHandle {
    /// Create an annotation on a page and return its id.
    pub fn create_annotation(
        &self,
        page_index: usize,
        kind: AnnotationKind,
        geometry: AnnotationGeometry,
        style: AnnotationStyle,
    ) -> DocumentResult<AnnotationId> {
        self.mutate(|doc| {
            let owner = doc.pages.id_at(page_index)?;
            if !kind.accepts(&geometry) {
                return Err(DocumentError::UnsupportedOperation(format!(
                    "{kind:?} annotations cannot use {geometry:?}"
                )));
            }
            geometry.validate()?;
            style.validate()?;

            let id = doc.annotations.insert(owner, Annotation::new(kind, geometry, style));
            if let Some(slot) = doc.pages.slot_mut(owner) {
                slot.annotations.push(id);
            }
            log::debug!("created {kind:?} annotation {id} on page {page_index}");
            Ok((id, content_changed(&doc.pages, owner)))
        })
    }

    pub fn delete_annotation(&self, id: AnnotationId) -> DocumentResult<()> {
        self.mutate(|doc| {
            let owner = doc.annotations.owner(id)?;
            let effects = content_changed(&doc.pages, owner);
            doc.annotations.remove(id);
            if let Some(slot) = doc.pages.slot_mut(owner) {
                slot.annotations.retain(|candidate| *candidate != id);
            }
            log::debug!("deleted annotation {id}");
            Ok(((), effects))
        })
    }

    pub fn annotation(&self, id: AnnotationId) -> DocumentResult<Annotation> {
        self.read(|doc| doc.annotations.snapshot(id, &doc.pages))
    }

    /// Annotations on one page, in creation order.
    pub fn annotations_for_page(&self, page_index: usize) -> DocumentResult<Vec<Annotation>> {
        self.read(|doc| {
            let slot = doc.pages.at(page_index)?;
            slot.annotations.iter().map(|id| doc.annotations.snapshot(*id, &doc.pages)).collect()
        })
    }

    pub fn annotation_count(&self) -> DocumentResult<usize> {
        self.read(|doc| Ok(doc.annotations.len()))
    }

    pub fn update_annotation_geometry(
        &self,
        id: AnnotationId,
        geometry: AnnotationGeometry,
    ) -> DocumentResult<()> {
        self.mutate(|doc| {
            let owner = doc.annotations.owner(id)?;
            let annotation = doc.annotations.get_mut(id)?;
            if !annotation.kind.accepts(&geometry) {
                return Err(DocumentError::UnsupportedOperation(format!(
                    "{:?} annotations cannot use {geometry:?}",
                    annotation.kind
                )));
            }
            geometry.validate()?;
            annotation.geometry = geometry;
            annotation.touch();
            Ok(((), content_changed(&doc.pages, owner)))
        })
    }

    pub fn update_annotation_style(
        &self,
        id: AnnotationId,
        style: AnnotationStyle,
    ) -> DocumentResult<()> {
        self.mutate(|doc| {
            style.validate()?;
            let owner = doc.annotations.owner(id)?;
            let annotation = doc.annotations.get_mut(id)?;
            annotation.style = style;
            annotation.touch();
            Ok(((), content_changed(&doc.pages, owner)))
        })
    }

    /// Set the popup text and author.
    pub fn update_annotation_contents(
        &self,
        id: AnnotationId,
        contents: Option<String>,
        author: Option<String>,
    ) -> DocumentResult<()> {
        self.mutate(|doc| {
            let owner = doc.annotations.owner(id)?;
            let annotation = doc.annotations.get_mut(id)?;
            annotation.contents = contents;
            annotation.author = author;
            annotation.touch();
            Ok(((), content_changed(&doc.pages, owner)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32, y: f32) -> PageCoordinate {
        PageCoordinate::new(x, y)
    }

    #[test]
    fn test_bounding_box_normalizes_corners() {
        let geometry = AnnotationGeometry::Rect { lower_left: point(50.0, 80.0), upper_right: point(10.0, 20.0) };
        assert_eq!(geometry.bounding_box(), [10.0, 20.0, 50.0, 80.0]);

        let ink = AnnotationGeometry::Ink {
            paths: vec![vec![point(5.0, 5.0), point(9.0, 1.0)], vec![point(-2.0, 3.0)]],
        };
        assert_eq!(ink.bounding_box(), [-2.0, 1.0, 9.0, 5.0]);

        let note = AnnotationGeometry::Point { position: point(100.0, 100.0) };
        assert_eq!(note.bounding_box(), [100.0, 76.0, 124.0, 100.0]);
    }

    #[test]
    fn test_appearance_reads_back_into_the_same_annotation() {
        let style = AnnotationStyle { opacity: 0.5, ..AnnotationStyle::red_markup() };
        let mut note = Annotation::new(
            AnnotationKind::Note,
            AnnotationGeometry::Point { position: point(100.0, 300.0) },
            style.clone(),
        );
        note.contents = Some("check".to_string());

        let read = Annotation::from_appearance(&note.appearance()).unwrap();
        assert_eq!(read.id, note.id);
        assert_eq!(read.kind, AnnotationKind::Note);
        assert_eq!(read.geometry, note.geometry);
        assert_eq!(read.style, style);
        assert_eq!(read.contents.as_deref(), Some("check"));

        let line = Annotation::new(
            AnnotationKind::Line,
            AnnotationGeometry::Line { start: point(10.0, 10.0), end: point(60.0, 30.0) },
            AnnotationStyle::new(),
        );
        assert_eq!(Annotation::from_appearance(&line.appearance()).unwrap().geometry, line.geometry);
    }

    #[test]
    fn test_unmodeled_subtype_is_not_read() {
        let mut appearance = Annotation::new(
            AnnotationKind::Rectangle,
            AnnotationGeometry::Rect { lower_left: point(0.0, 0.0), upper_right: point(10.0, 10.0) },
            AnnotationStyle::new(),
        )
        .appearance();
        appearance.name = "not-a-uuid".to_string();
        let read = Annotation::from_appearance(&appearance).unwrap();
        assert_eq!(read.kind, AnnotationKind::Rectangle);
        assert_ne!(read.id.to_string(), "not-a-uuid");

        appearance.subtype = "Link".to_string();
        assert!(Annotation::from_appearance(&appearance).is_none());
    }

    #[test]
    fn test_kind_geometry_compatibility() {
        let rect = AnnotationGeometry::Rect { lower_left: point(0.0, 0.0), upper_right: point(1.0, 1.0) };
        let line = AnnotationGeometry::Line { start: point(0.0, 0.0), end: point(1.0, 1.0) };
        let spot = AnnotationGeometry::Point { position: point(0.0, 0.0) };

        assert!(AnnotationKind::Highlight.accepts(&rect));
        assert!(!AnnotationKind::Highlight.accepts(&line));
        assert!(AnnotationKind::Line.accepts(&line));
        assert!(!AnnotationKind::Line.accepts(&rect));
        assert!(AnnotationKind::Note.accepts(&spot));
        assert!(!AnnotationKind::Stamp.accepts(&spot));
    }

    #[test]
    fn test_empty_ink_is_rejected() {
        let ink = AnnotationGeometry::Ink { paths: vec![vec![]] };
        assert!(ink.validate().is_err());
        let nan = AnnotationGeometry::Point { position: point(f32::NAN, 0.0) };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_appearance_mapping() {
        let mut annotation = Annotation::new(
            AnnotationKind::Line,
            AnnotationGeometry::Line { start: point(10.0, 10.0), end: point(110.0, 60.0) },
            AnnotationStyle::red_markup(),
        );
        annotation.contents = Some("check this".to_string());

        let appearance = annotation.appearance();
        assert_eq!(appearance.subtype, "Line");
        assert_eq!(appearance.rect, [9.0, 9.0, 111.0, 61.0]);
        assert_eq!(appearance.line, Some([10.0, 10.0, 110.0, 60.0]));
        assert_eq!(appearance.color, Some([1.0, 0.0, 0.0]));
        assert_eq!(appearance.name, annotation.id.to_string());
        assert_eq!(appearance.contents.as_deref(), Some("check this"));
    }

    #[test]
    fn test_duplicate_gets_new_identity() {
        let annotation = Annotation::new(
            AnnotationKind::Highlight,
            AnnotationGeometry::Rect { lower_left: point(0.0, 0.0), upper_right: point(5.0, 5.0) },
            AnnotationStyle::yellow_highlight(),
        );
        let copy = annotation.duplicate();
        assert_ne!(copy.id, annotation.id);
        assert_eq!(copy.geometry, annotation.geometry);
        assert_eq!(copy.style, annotation.style);
    }

    #[test]
    fn test_registry_remove_all_counts_hits() {
        let mut registry = AnnotationRegistry::new();
        let geometry = AnnotationGeometry::Rect { lower_left: point(0.0, 0.0), upper_right: point(1.0, 1.0) };
        let a = registry.insert(1, Annotation::new(AnnotationKind::Stamp, geometry.clone(), AnnotationStyle::new()));
        let b = registry.insert(2, Annotation::new(AnnotationKind::Stamp, geometry, AnnotationStyle::new()));

        assert_eq!(registry.owner(b).unwrap(), 2);
        assert_eq!(registry.remove_all(&[a, AnnotationId::new_v4()]), 1);
        assert_eq!(registry.len(), 1);
        assert!(matches!(registry.owner(a), Err(DocumentError::AnnotationNotFound(_))));
    }
}
