use crate::content;
use crate::outline;
use crate::page_tree::{self, resolve, Transplant};
use crate::security::{self, StandardSecurity};
use crate::{
    AnnotationAppearance, EncryptionSettings, EngineError, EngineHandle, EngineResult,
    InfoFields, OpenOutcome, OpenSource, OutlineItem, PageGeometry, PageImage, PageRef, PageSpec,
    PdfEngine, Permissions, RgbaImage, Rotation, TextRun, WriteOptions,
};
use image::Rgba;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct DocumentRecord {
    doc: Document,
    pages_root: ObjectId,
    order: Vec<ObjectId>,
    /// Applied when writing; the in-memory document is always plaintext.
    security: Option<StandardSecurity>,
    /// Annotation objects owned by the caller: written through
    /// `set_annotations` or handed out by `annotations`.
    managed_annots: HashSet<ObjectId>,
}

impl DocumentRecord {
    fn from_document(mut doc: Document) -> EngineResult<Self> {
        let (pages_root, order) = page_tree::flatten(&mut doc)?;
        Ok(Self { doc, pages_root, order, security: None, managed_annots: HashSet::new() })
    }

    fn position_of(&self, page: PageRef) -> EngineResult<usize> {
        let id = page.object_id();
        self.order.iter().position(|candidate| *candidate == id).ok_or(EngineError::UnknownPage(page))
    }

    fn sync_kids(&mut self) -> EngineResult<()> {
        page_tree::sync_kids(&mut self.doc, self.pages_root, &self.order)
    }
}

enum Unlocked {
    Plain,
    Decrypted(StandardSecurity),
    NeedsPassword,
}

#[derive(Debug, Default)]
struct EngineState {
    next_handle: u64,
    docs: HashMap<EngineHandle, DocumentRecord>,
}

impl EngineState {
    fn record(&self, handle: EngineHandle) -> EngineResult<&DocumentRecord> {
        self.docs.get(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn record_mut(&mut self, handle: EngineHandle) -> EngineResult<&mut DocumentRecord> {
        self.docs.get_mut(&handle).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn insert(&mut self, record: DocumentRecord) -> EngineHandle {
        self.next_handle += 1;
        let handle = EngineHandle(self.next_handle);
        self.docs.insert(handle, record);
        handle
    }
}

/// Largest raster [`LopdfEngine::rasterize`] will allocate, in pixels.
pub const MAX_RASTER_PIXELS: u64 = 1 << 28;

/// [`PdfEngine`] backed by `lopdf`.
///
/// Rasterization produces a page-sized placeholder (white page with a thin
/// border); it does not interpret content streams. Encrypted files using
/// the RC4 standard security handler are decrypted on open and encrypted
/// again on write.
#[derive(Debug, Default)]
pub struct LopdfEngine {
    state: Mutex<EngineState>,
}

impl LopdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decoded content stream bytes of a page.
    pub fn page_content(&self, handle: EngineHandle, page: PageRef) -> EngineResult<Vec<u8>> {
        let state = self.state();
        let record = state.record(handle)?;
        record.position_of(page)?;
        Ok(record.doc.get_page_content(page.object_id())?)
    }

    /// Decrypts `doc` in place if its trailer names an /Encrypt dictionary.
    ///
    /// Without a password the empty user password is tried first, since
    /// many files are encrypted only to carry permission flags.
    fn unlock(doc: &mut Document, password: Option<&str>) -> EngineResult<Unlocked> {
        if !doc.trailer.has(b"Encrypt") {
            return Ok(Unlocked::Plain);
        }
        let handler = match password {
            Some(password) => {
                StandardSecurity::unlock(doc, password)?.ok_or(EngineError::AuthenticationFailed)?
            }
            None => match StandardSecurity::unlock(doc, "")? {
                Some(handler) => handler,
                None => return Ok(Unlocked::NeedsPassword),
            },
        };
        handler.decrypt_document(doc);
        Ok(Unlocked::Decrypted(handler))
    }

    /// Runs `edit` against one page of a handle after checking the page
    /// belongs to it.
    fn edit_page<T>(
        &self,
        handle: EngineHandle,
        page: PageRef,
        edit: impl FnOnce(&mut Document, ObjectId) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        record.position_of(page)?;
        edit(&mut record.doc, page.object_id())
    }
}

impl PdfEngine for LopdfEngine {
    fn open(&self, source: OpenSource, password: Option<&str>) -> EngineResult<OpenOutcome> {
        let bytes = match source {
            OpenSource::Path(path) => fs::read(path)?,
            OpenSource::Bytes(bytes) => bytes,
        };

        let mut doc = Document::load_mem(&bytes)?;
        let security = match Self::unlock(&mut doc, password)? {
            Unlocked::Plain => None,
            Unlocked::Decrypted(handler) => Some(handler),
            Unlocked::NeedsPassword => return Ok(OpenOutcome::NeedsPassword),
        };

        let mut record = DocumentRecord::from_document(doc)?;
        if record.order.is_empty() {
            return Err(EngineError::Corrupt("document has no pages".to_owned()));
        }
        record.security = security;

        let page_count = record.order.len();
        let encrypted = record.security.is_some();
        let handle = self.state().insert(record);
        log::debug!("lopdf: opened handle {} with {page_count} pages (encrypted: {encrypted})", handle.raw());
        Ok(OpenOutcome::Opened(handle))
    }

    fn create(&self) -> EngineResult<EngineHandle> {
        let mut doc = Document::with_version("1.7");
        let pages_root = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_root),
        });
        doc.trailer.set("Root", Object::Reference(catalog));

        let record = DocumentRecord::from_document(doc)?;
        Ok(self.state().insert(record))
    }

    fn close(&self, handle: EngineHandle) -> EngineResult<()> {
        self.state().docs.remove(&handle).map(|_| ()).ok_or(EngineError::InvalidHandle(handle.raw()))
    }

    fn page_refs(&self, handle: EngineHandle) -> EngineResult<Vec<PageRef>> {
        let state = self.state();
        Ok(state.record(handle)?.order.iter().map(|id| PageRef::from_object_id(*id)).collect())
    }

    fn page_count(&self, handle: EngineHandle) -> EngineResult<usize> {
        Ok(self.state().record(handle)?.order.len())
    }

    fn page_geometry(&self, handle: EngineHandle, page: PageRef) -> EngineResult<PageGeometry> {
        let state = self.state();
        let record = state.record(handle)?;
        record.position_of(page)?;
        page_tree::read_geometry(&record.doc, page.object_id())
    }

    fn rasterize(
        &self,
        handle: EngineHandle,
        page: PageRef,
        zoom: f32,
        rotation: Rotation,
    ) -> EngineResult<RgbaImage> {
        if !(zoom.is_finite() && zoom > 0.0) {
            return Err(EngineError::InvalidArgument(format!("zoom {zoom} must be finite and positive")));
        }
        let geometry = self.page_geometry(handle, page)?;

        let width = (geometry.width * zoom).round().max(1.0);
        let height = (geometry.height * zoom).round().max(1.0);
        if f64::from(width) * f64::from(height) > MAX_RASTER_PIXELS as f64 {
            return Err(EngineError::InvalidArgument(format!(
                "{width}x{height} raster exceeds {MAX_RASTER_PIXELS} pixels"
            )));
        }
        let (mut width, mut height) = (width as u32, height as u32);
        if geometry.rotation.rotate_by(rotation).is_sideways() {
            std::mem::swap(&mut width, &mut height);
        }

        let mut image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        if width >= 4 && height >= 4 {
            for x in 0..width {
                image.put_pixel(x, 0, Rgba([220, 220, 220, 255]));
                image.put_pixel(x, height - 1, Rgba([220, 220, 220, 255]));
            }
            for y in 0..height {
                image.put_pixel(0, y, Rgba([220, 220, 220, 255]));
                image.put_pixel(width - 1, y, Rgba([220, 220, 220, 255]));
            }
        }

        Ok(image)
    }

    fn insert_page(
        &self,
        handle: EngineHandle,
        position: usize,
        spec: &PageSpec,
    ) -> EngineResult<PageRef> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        if position > record.order.len() {
            return Err(EngineError::PositionOutOfRange {
                position,
                page_count: record.order.len(),
            });
        }

        let PageSpec::Blank { width, height } = *spec;
        let id = page_tree::new_blank_page(&mut record.doc, record.pages_root, width, height);
        record.order.insert(position, id);
        record.sync_kids()?;
        Ok(PageRef::from_object_id(id))
    }

    fn delete_pages(&self, handle: EngineHandle, pages: &[PageRef]) -> EngineResult<()> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        for page in pages {
            record.position_of(*page)?;
        }

        let doomed: HashSet<ObjectId> = pages.iter().map(|page| page.object_id()).collect();
        record.order.retain(|id| !doomed.contains(id));
        for id in &doomed {
            record.doc.objects.remove(id);
        }
        record.sync_kids()
    }

    fn move_page(&self, handle: EngineHandle, page: PageRef, to: usize) -> EngineResult<()> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        let from = record.position_of(page)?;
        if to >= record.order.len() {
            return Err(EngineError::PositionOutOfRange {
                position: to,
                page_count: record.order.len(),
            });
        }

        let id = record.order.remove(from);
        record.order.insert(to, id);
        record.sync_kids()
    }

    fn set_rotation(
        &self,
        handle: EngineHandle,
        page: PageRef,
        rotation: Rotation,
    ) -> EngineResult<()> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        record.position_of(page)?;
        record
            .doc
            .get_dictionary_mut(page.object_id())?
            .set("Rotate", Object::Integer(i64::from(rotation.degrees())));
        Ok(())
    }

    fn insert_text(&self, handle: EngineHandle, page: PageRef, text: &str) -> EngineResult<()> {
        self.edit_page(handle, page, |doc, id| {
            let geometry = page_tree::read_geometry(doc, id)?;
            page_tree::ensure_text_font(doc, id)?;
            page_tree::append_content(doc, id, content::invisible_text_content(text, geometry.height))
        })
    }

    fn add_text(&self, handle: EngineHandle, page: PageRef, run: &TextRun) -> EngineResult<()> {
        if !(run.font_size.is_finite() && run.font_size > 0.0) {
            return Err(EngineError::InvalidArgument(format!("font size {}", run.font_size)));
        }
        self.edit_page(handle, page, |doc, id| {
            page_tree::ensure_text_font(doc, id)?;
            let state = content::ensure_opacity_state(doc, id, run.opacity)?;
            page_tree::append_content(doc, id, content::text_run_content(run, state.as_deref()))
        })
    }

    fn insert_image(
        &self,
        handle: EngineHandle,
        page: PageRef,
        image: &RgbaImage,
        rect: [f32; 4],
        opacity: f32,
    ) -> EngineResult<()> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::InvalidArgument("image has no pixels".to_owned()));
        }
        if !rect.iter().all(|value| value.is_finite()) {
            return Err(EngineError::InvalidArgument(format!("image rectangle {rect:?}")));
        }
        self.edit_page(handle, page, |doc, id| {
            let image_id = content::add_image_xobject(doc, image)?;
            let name = format!("FolioIm{}", image_id.0);
            page_tree::add_resource(doc, id, b"XObject", name.as_bytes(), |_| Object::Reference(image_id))?;
            let state = content::ensure_opacity_state(doc, id, opacity)?;
            page_tree::append_content(doc, id, content::image_content(&name, rect, state.as_deref()))
        })
    }

    fn page_text(&self, handle: EngineHandle, page: PageRef) -> EngineResult<String> {
        let state = self.state();
        let record = state.record(handle)?;
        let position = record.position_of(page)?;
        // Kids are kept in `order`, so page numbers follow it.
        Ok(record.doc.extract_text(&[position as u32 + 1])?)
    }

    fn page_images(&self, handle: EngineHandle, page: PageRef) -> EngineResult<Vec<PageImage>> {
        let state = self.state();
        let record = state.record(handle)?;
        record.position_of(page)?;
        Ok(content::page_images(&record.doc, page.object_id()))
    }

    fn transplant_pages(
        &self,
        src: EngineHandle,
        dst: EngineHandle,
        pages: &[PageRef],
        dst_position: usize,
    ) -> EngineResult<Vec<PageRef>> {
        let mut state = self.state();

        let output = {
            let source = state.record(src)?;
            let destination = state.record(dst)?;
            if dst_position > destination.order.len() {
                return Err(EngineError::PositionOutOfRange {
                    position: dst_position,
                    page_count: destination.order.len(),
                });
            }
            for page in pages {
                source.position_of(*page)?;
            }
            let ids: Vec<ObjectId> = pages.iter().map(|page| page.object_id()).collect();
            Transplant::new(&source.doc, &source.managed_annots, destination.doc.max_id)
                .run(&ids, destination.pages_root)?
        };

        let destination = state.record_mut(dst)?;
        destination.doc.objects.extend(output.objects);
        destination.doc.max_id = output.max_id;
        for (offset, id) in output.pages.iter().enumerate() {
            destination.order.insert(dst_position + offset, *id);
        }
        destination.sync_kids()?;

        log::debug!(
            "lopdf: transplanted {} pages from handle {} into handle {} at {dst_position}",
            output.pages.len(),
            src.raw(),
            dst.raw()
        );
        Ok(output.pages.into_iter().map(PageRef::from_object_id).collect())
    }

    fn apply_encryption(
        &self,
        handle: EngineHandle,
        settings: Option<&EncryptionSettings>,
    ) -> EngineResult<()> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        record.security = settings.map(|settings| {
            let file_id = security::ensure_file_id(&mut record.doc);
            StandardSecurity::new(settings, file_id)
        });
        Ok(())
    }

    fn is_encrypted(&self, handle: EngineHandle) -> EngineResult<bool> {
        Ok(self.state().record(handle)?.security.is_some())
    }

    fn authenticate(&self, handle: EngineHandle, password: &str) -> EngineResult<bool> {
        let state = self.state();
        Ok(state.record(handle)?.security.as_ref().map_or(true, |security| security.accepts(password)))
    }

    fn permissions(&self, handle: EngineHandle) -> EngineResult<Option<Permissions>> {
        Ok(self.state().record(handle)?.security.as_ref().map(StandardSecurity::permissions))
    }

    fn metadata(&self, handle: EngineHandle) -> EngineResult<InfoFields> {
        Ok(outline::read_info(&self.state().record(handle)?.doc))
    }

    fn set_metadata(&self, handle: EngineHandle, info: &InfoFields) -> EngineResult<()> {
        let mut state = self.state();
        outline::write_info(&mut state.record_mut(handle)?.doc, info)
    }

    fn outline(&self, handle: EngineHandle) -> EngineResult<Vec<OutlineItem>> {
        let state = self.state();
        let record = state.record(handle)?;
        outline::read_outline(&record.doc, &record.order)
    }

    fn set_outline(&self, handle: EngineHandle, items: &[OutlineItem]) -> EngineResult<()> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        for item in items {
            record.position_of(item.page)?;
        }
        outline::write_outline(&mut record.doc, items)
    }

    fn annotations(&self, handle: EngineHandle, page: PageRef) -> EngineResult<Vec<AnnotationAppearance>> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        record.position_of(page)?;

        let mut found = Vec::new();
        for item in page_annots(&record.doc, page.object_id())? {
            let Object::Reference(id) = item else { continue };
            let Some(appearance) =
                record.doc.get_dictionary(id).ok().and_then(|dict| read_annotation(&record.doc, dict))
            else {
                continue;
            };
            record.managed_annots.insert(id);
            found.push(appearance);
        }
        Ok(found)
    }

    fn set_annotations(
        &self,
        handle: EngineHandle,
        page: PageRef,
        annotations: &[AnnotationAppearance],
    ) -> EngineResult<()> {
        let mut state = self.state();
        let record = state.record_mut(handle)?;
        record.position_of(page)?;
        let page_id = page.object_id();

        let existing = page_annots(&record.doc, page_id)?;

        let mut annots: Vec<Object> = Vec::with_capacity(existing.len() + annotations.len());
        for item in existing {
            match item {
                Object::Reference(id) if record.managed_annots.remove(&id) => {
                    record.doc.objects.remove(&id);
                }
                other => annots.push(other),
            }
        }

        for appearance in annotations {
            let id = record.doc.add_object(annotation_dictionary(appearance, page_id));
            record.managed_annots.insert(id);
            annots.push(Object::Reference(id));
        }

        let dict = record.doc.get_dictionary_mut(page_id)?;
        if annots.is_empty() {
            dict.remove(b"Annots");
        } else {
            dict.set("Annots", Object::Array(annots));
        }
        Ok(())
    }

    fn write(&self, handle: EngineHandle, path: &Path, options: &WriteOptions) -> EngineResult<()> {
        let (mut doc, security) = {
            let state = self.state();
            let record = state.record(handle)?;
            (record.doc.clone(), record.security.clone())
        };

        if options.incremental {
            log::debug!("lopdf: incremental save not available, writing full file");
        }
        if options.garbage {
            doc.prune_objects();
        }
        if options.deflate {
            doc.compress();
        }
        if let Some(security) = &security {
            security.encrypt_document(&mut doc);
        }
        doc.save(path)?;
        log::debug!("lopdf: wrote handle {} to {}", handle.raw(), path.display());
        Ok(())
    }
}

/// Subtypes the editor models; anything else stays untouched in /Annots.
const MODELED_SUBTYPES: [&str; 11] = [
    "Highlight", "Underline", "StrikeOut", "Text", "FreeText", "Square", "Circle", "Line", "Ink", "Stamp",
    "Redact",
];

fn page_annots(doc: &Document, page: ObjectId) -> EngineResult<Vec<Object>> {
    Ok(match doc.get_dictionary(page)?.get(b"Annots").ok() {
        Some(Object::Array(items)) => items.clone(),
        Some(Object::Reference(id)) => doc.get_object(*id).and_then(|obj| obj.as_array()).cloned().unwrap_or_default(),
        _ => Vec::new(),
    })
}

fn numbers(doc: &Document, object: &Object) -> Option<Vec<f32>> {
    resolve(doc, object)
        .as_array()
        .ok()?
        .iter()
        .map(|item| resolve(doc, item).as_float().ok().filter(|value| value.is_finite()))
        .collect()
}

fn quad(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<[f32; 4]> {
    let values = numbers(doc, dict.get(key).ok()?)?;
    values.try_into().ok()
}

/// Reads /C or /IC: gray, RGB or CMYK components. An empty array means
/// no color.
fn color_of(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<[f32; 3]> {
    let values = numbers(doc, dict.get(key).ok()?)?;
    match values.as_slice() {
        [gray] => Some([*gray; 3]),
        [r, g, b] => Some([*r, *g, *b]),
        [c, m, y, k] => Some([(1.0 - c) * (1.0 - k), (1.0 - m) * (1.0 - k), (1.0 - y) * (1.0 - k)]),
        _ => None,
    }
}

fn read_annotation(doc: &Document, dict: &Dictionary) -> Option<AnnotationAppearance> {
    let subtype = dict.get(b"Subtype").ok().map(|obj| resolve(doc, obj)).and_then(|obj| obj.as_name_str().ok())?;
    if !MODELED_SUBTYPES.contains(&subtype) {
        return None;
    }
    let [x0, y0, x1, y1] = quad(doc, dict, b"Rect")?;
    let line = match subtype {
        "Line" => Some(quad(doc, dict, b"L")?),
        _ => None,
    };
    let ink = match subtype {
        "Ink" => {
            let paths = resolve(doc, dict.get(b"InkList").ok()?).as_array().ok()?;
            let paths: Vec<Vec<(f32, f32)>> = paths
                .iter()
                .filter_map(|path| numbers(doc, path))
                .map(|values| values.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect())
                .collect();
            if paths.iter().all(Vec::is_empty) {
                return None;
            }
            paths
        }
        _ => Vec::new(),
    };

    let border_width = dict
        .get(b"BS")
        .ok()
        .and_then(|bs| resolve(doc, bs).as_dict().ok())
        .and_then(|bs| bs.get(b"W").ok())
        .and_then(|width| resolve(doc, width).as_float().ok())
        .or_else(|| numbers(doc, dict.get(b"Border").ok()?)?.get(2).copied())
        .filter(|width| width.is_finite() && *width >= 0.0)
        .unwrap_or(1.0);
    let opacity = dict
        .get(b"CA")
        .ok()
        .and_then(|ca| resolve(doc, ca).as_float().ok())
        .filter(|ca| ca.is_finite())
        .map_or(1.0, |ca| ca.clamp(0.0, 1.0));

    Some(AnnotationAppearance {
        subtype: subtype.to_owned(),
        rect: [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)],
        color: color_of(doc, dict, b"C"),
        interior_color: color_of(doc, dict, b"IC"),
        border_width,
        opacity,
        contents: outline::text_field(doc, dict, b"Contents"),
        author: outline::text_field(doc, dict, b"T"),
        line,
        ink,
        name: outline::text_field(doc, dict, b"NM").unwrap_or_default(),
    })
}

fn color_array(color: [f32; 3]) -> Object {
    Object::Array(color.iter().map(|c| page_tree::real(*c)).collect())
}

fn annotation_dictionary(appearance: &AnnotationAppearance, page: ObjectId) -> Object {
    let rect = appearance.rect.iter().map(|v| page_tree::real(*v)).collect::<Vec<_>>();
    let mut dict = dictionary! {
        "Type" => "Annot",
        "Subtype" => Object::Name(appearance.subtype.as_bytes().to_vec()),
        "Rect" => rect,
        "NM" => outline::encode_text(&appearance.name),
        "P" => Object::Reference(page),
        "F" => 4,
        "BS" => dictionary! { "W" => page_tree::real(appearance.border_width) },
        "CA" => page_tree::real(appearance.opacity),
    };
    if let Some(color) = appearance.color {
        dict.set("C", color_array(color));
    }
    if let Some(color) = appearance.interior_color {
        dict.set("IC", color_array(color));
    }
    if let Some(contents) = &appearance.contents {
        dict.set("Contents", outline::encode_text(contents));
    }
    if let Some(author) = &appearance.author {
        dict.set("T", outline::encode_text(author));
    }
    if let Some(line) = appearance.line {
        dict.set("L", Object::Array(line.iter().map(|v| page_tree::real(*v)).collect()));
    }
    if !appearance.ink.is_empty() {
        let paths = appearance
            .ink
            .iter()
            .map(|path| {
                Object::Array(
                    path.iter()
                        .flat_map(|(x, y)| [page_tree::real(*x), page_tree::real(*y)])
                        .collect(),
                )
            })
            .collect::<Vec<_>>();
        dict.set("InkList", Object::Array(paths));
    }
    if matches!(appearance.subtype.as_str(), "Highlight" | "Underline" | "StrikeOut") {
        let [x0, y0, x1, y1] = appearance.rect;
        let quad = [x0, y1, x1, y1, x0, y0, x1, y0];
        dict.set("QuadPoints", Object::Array(quad.iter().map(|v| page_tree::real(*v)).collect()));
    }
    Object::Dictionary(dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutlineDestination, DEFAULT_PAGE_HEIGHT, DEFAULT_PAGE_WIDTH};

    fn engine_with_pages(engine: &LopdfEngine, count: usize) -> EngineHandle {
        let handle = engine.create().expect("create should succeed");
        for index in 0..count {
            let page = engine
                .insert_page(handle, index, &PageSpec::default())
                .expect("insert should succeed");
            engine.insert_text(handle, page, &format!("page {index}")).expect("text");
        }
        handle
    }

    fn contents(engine: &LopdfEngine, handle: EngineHandle) -> Vec<String> {
        engine
            .page_refs(handle)
            .unwrap()
            .into_iter()
            .map(|page| String::from_utf8_lossy(&engine.page_content(handle, page).unwrap()).into_owned())
            .collect()
    }

    #[test]
    fn create_insert_write_and_reopen() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        engine.write(handle, &path, &WriteOptions::default()).expect("write should succeed");

        let OpenOutcome::Opened(reopened) = engine.open(path.as_path().into(), None).unwrap() else {
            panic!("plain document should open");
        };
        assert_eq!(engine.page_count(reopened).unwrap(), 3);
        let texts = contents(&engine, reopened);
        assert!(texts[2].contains("(page 2)"));

        let page = engine.page_refs(reopened).unwrap()[0];
        let geometry = engine.page_geometry(reopened, page).unwrap();
        assert_eq!(geometry.width, DEFAULT_PAGE_WIDTH);
        assert_eq!(geometry.height, DEFAULT_PAGE_HEIGHT);
    }

    #[test]
    fn invalid_handle_returns_error() {
        let engine = LopdfEngine::new();
        let err = engine.page_count(EngineHandle(999)).expect_err("should fail for unknown handle");

        assert!(matches!(err, EngineError::InvalidHandle(999)));
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let engine = LopdfEngine::new();
        let err = engine.open(OpenSource::Bytes(b"not a pdf".to_vec()), None).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    fn encryption(user: &str, owner: &str) -> EncryptionSettings {
        EncryptionSettings {
            user_password: user.into(),
            owner_password: owner.into(),
            permissions: Permissions::PRINT,
            method: crate::EncryptionMethod::default(),
        }
    }

    fn write_bytes(engine: &LopdfEngine, handle: EngineHandle) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        engine.write(handle, &path, &WriteOptions::default()).unwrap();
        fs::read(path).unwrap()
    }

    #[test]
    fn encrypted_source_needs_password() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 2);
        engine.apply_encryption(handle, Some(&encryption("reader", "admin"))).unwrap();
        let bytes = write_bytes(&engine, handle);

        assert_eq!(engine.open(OpenSource::Bytes(bytes.clone()), None).unwrap(), OpenOutcome::NeedsPassword);
        assert!(matches!(
            engine.open(OpenSource::Bytes(bytes.clone()), Some("wrong")),
            Err(EngineError::AuthenticationFailed)
        ));

        for password in ["reader", "admin"] {
            let OpenOutcome::Opened(reopened) = engine.open(OpenSource::Bytes(bytes.clone()), Some(password)).unwrap()
            else {
                panic!("{password} should open the document");
            };
            assert!(engine.is_encrypted(reopened).unwrap());
            assert_eq!(engine.permissions(reopened).unwrap(), Some(Permissions::PRINT));
            assert!(contents(&engine, reopened)[1].contains("(page 1)"));
        }
    }

    #[test]
    fn empty_user_password_opens_without_prompt() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 1);
        engine.apply_encryption(handle, Some(&encryption("", "admin"))).unwrap();
        let bytes = write_bytes(&engine, handle);
        assert!(!String::from_utf8_lossy(&bytes).contains("(page 0)"));

        let OpenOutcome::Opened(reopened) = engine.open(OpenSource::Bytes(bytes), None).unwrap() else {
            panic!("empty user password should open");
        };
        assert!(engine.is_encrypted(reopened).unwrap());
        assert!(engine.authenticate(reopened, "admin").unwrap());
        assert!(!engine.authenticate(reopened, "x").unwrap());
    }

    #[test]
    fn unparseable_bytes_mentioning_encrypt_are_corrupt() {
        let engine = LopdfEngine::new();
        let err = engine.open(OpenSource::Bytes(b"%PDF-1.7 /Encrypt garbage".to_vec()), None).unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn delete_pages_is_atomic() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 3);
        let refs = engine.page_refs(handle).unwrap();
        let other = engine_with_pages(&engine, 1);
        let foreign = engine.page_refs(other).unwrap()[0];

        let err = engine.delete_pages(handle, &[refs[0], foreign]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownPage(_)));
        assert_eq!(engine.page_count(handle).unwrap(), 3);

        engine.delete_pages(handle, &[refs[0], refs[2]]).unwrap();
        assert_eq!(engine.page_refs(handle).unwrap(), vec![refs[1]]);
    }

    #[test]
    fn move_page_reorders_kids() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 3);
        let refs = engine.page_refs(handle).unwrap();

        engine.move_page(handle, refs[0], 2).unwrap();
        assert_eq!(engine.page_refs(handle).unwrap(), vec![refs[1], refs[2], refs[0]]);
        assert!(engine.move_page(handle, refs[0], 3).is_err());
    }

    #[test]
    fn transplant_copies_pages_between_documents() {
        let engine = LopdfEngine::new();
        let src = engine_with_pages(&engine, 3);
        let dst = engine.create().unwrap();
        let refs = engine.page_refs(src).unwrap();

        let copied = engine.transplant_pages(src, dst, &[refs[2], refs[0]], 0).unwrap();
        assert_eq!(copied.len(), 2);
        let texts = contents(&engine, dst);
        assert!(texts[0].contains("(page 2)"));
        assert!(texts[1].contains("(page 0)"));
        assert_eq!(engine.page_count(src).unwrap(), 3);
    }

    #[test]
    fn transplant_within_one_document_duplicates() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 2);
        let refs = engine.page_refs(handle).unwrap();

        let copies = engine.transplant_pages(handle, handle, &[refs[0]], 2).unwrap();
        assert_eq!(engine.page_count(handle).unwrap(), 3);
        assert_ne!(copies[0], refs[0]);
        assert!(contents(&engine, handle)[2].contains("(page 0)"));
    }

    #[test]
    fn transplant_rejects_bad_position_without_changes() {
        let engine = LopdfEngine::new();
        let src = engine_with_pages(&engine, 1);
        let dst = engine_with_pages(&engine, 1);
        let refs = engine.page_refs(src).unwrap();

        assert!(engine.transplant_pages(src, dst, &refs, 5).is_err());
        assert_eq!(engine.page_count(dst).unwrap(), 1);
    }

    #[test]
    fn rotation_swaps_raster_dimensions() {
        let engine = LopdfEngine::new();
        let handle = engine.create().unwrap();
        let page = engine.insert_page(handle, 0, &PageSpec::Blank { width: 100.0, height: 50.0 }).unwrap();

        let upright = engine.rasterize(handle, page, 2.0, Rotation::Deg0).unwrap();
        assert_eq!(upright.dimensions(), (200, 100));

        engine.set_rotation(handle, page, Rotation::Deg90).unwrap();
        assert_eq!(engine.page_geometry(handle, page).unwrap().rotation, Rotation::Deg90);
        let sideways = engine.rasterize(handle, page, 2.0, Rotation::Deg0).unwrap();
        assert_eq!(sideways.dimensions(), (100, 200));
    }

    #[test]
    fn outline_and_metadata_survive_write() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 3);
        let refs = engine.page_refs(handle).unwrap();
        let items = vec![
            OutlineItem { level: 1, title: "Intro".into(), page: refs[0], destination: None },
            OutlineItem {
                level: 2,
                title: "D\u{e9}tails".into(),
                page: refs[1],
                destination: Some(OutlineDestination { left: Some(10.0), top: Some(700.0), zoom: None }),
            },
            OutlineItem { level: 1, title: "End".into(), page: refs[2], destination: None },
        ];
        engine.set_outline(handle, &items).unwrap();
        let info = InfoFields { title: Some("Report".into()), author: Some("Ada".into()), ..Default::default() };
        engine.set_metadata(handle, &info).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outline.pdf");
        engine.write(handle, &path, &WriteOptions::default()).unwrap();
        let OpenOutcome::Opened(reopened) = engine.open(path.as_path().into(), None).unwrap() else {
            panic!("should open");
        };

        let outline = engine.outline(reopened).unwrap();
        let titles: Vec<_> = outline.iter().map(|item| (item.level, item.title.as_str())).collect();
        assert_eq!(titles, vec![(1, "Intro"), (2, "D\u{e9}tails"), (1, "End")]);
        let new_refs = engine.page_refs(reopened).unwrap();
        assert_eq!(outline[2].page, new_refs[2]);
        assert_eq!(outline[1].destination.and_then(|d| d.top), Some(700.0));

        let read_back = engine.metadata(reopened).unwrap();
        assert_eq!(read_back.title.as_deref(), Some("Report"));
        assert_eq!(read_back.author.as_deref(), Some("Ada"));
        assert_eq!(read_back.subject, None);
    }

    #[test]
    fn set_annotations_replaces_previous_set() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 1);
        let page = engine.page_refs(handle).unwrap()[0];
        let appearance = AnnotationAppearance {
            subtype: "Highlight".into(),
            rect: [10.0, 10.0, 100.0, 30.0],
            color: Some([1.0, 1.0, 0.0]),
            interior_color: None,
            border_width: 1.0,
            opacity: 0.5,
            contents: None,
            author: None,
            line: None,
            ink: Vec::new(),
            name: "a".into(),
        };

        engine.set_annotations(handle, page, &[appearance.clone(), appearance.clone()]).unwrap();
        engine.set_annotations(handle, page, &[appearance]).unwrap();

        let state = engine.state();
        let record = state.record(handle).unwrap();
        let annots = record.doc.get_dictionary(page.object_id()).unwrap().get(b"Annots").unwrap();
        assert_eq!(annots.as_array().unwrap().len(), 1);
    }

    #[test]
    fn removing_encryption_writes_plaintext() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 1);
        engine.apply_encryption(handle, Some(&encryption("u", "o"))).unwrap();
        assert!(engine.authenticate(handle, "o").unwrap());
        engine.apply_encryption(handle, None).unwrap();
        assert!(!engine.is_encrypted(handle).unwrap());

        let bytes = write_bytes(&engine, handle);
        assert!(matches!(engine.open(OpenSource::Bytes(bytes), None).unwrap(), OpenOutcome::Opened(_)));
    }

    #[test]
    fn rasterize_rejects_unusable_zoom() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 1);
        let page = engine.page_refs(handle).unwrap()[0];

        for zoom in [0.0, -1.0, f32::NAN, f32::INFINITY, 100_000.0] {
            let err = engine.rasterize(handle, page, zoom, Rotation::Deg0).unwrap_err();
            assert!(matches!(err, EngineError::InvalidArgument(_)), "zoom {zoom}");
        }
    }

    #[test]
    fn annotations_are_read_back_and_replaced() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 1);
        let page = engine.page_refs(handle).unwrap()[0];
        let ink = AnnotationAppearance {
            subtype: "Ink".into(),
            rect: [9.0, 9.0, 51.0, 41.0],
            color: Some([0.0, 0.0, 1.0]),
            interior_color: None,
            border_width: 2.0,
            opacity: 0.75,
            contents: Some("sketch".into()),
            author: Some("Ada".into()),
            line: None,
            ink: vec![vec![(10.0, 10.0), (50.0, 40.0)]],
            name: "ink-1".into(),
        };
        engine.set_annotations(handle, page, std::slice::from_ref(&ink)).unwrap();
        // A link the editor does not model.
        let link = engine.state().record_mut(handle).unwrap().doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![0.into(), 0.into(), 5.into(), 5.into()],
        });
        {
            let mut state = engine.state();
            let dict = state.record_mut(handle).unwrap().doc.get_dictionary_mut(page.object_id()).unwrap();
            let mut annots = dict.get(b"Annots").unwrap().as_array().unwrap().clone();
            annots.push(Object::Reference(link));
            dict.set("Annots", annots);
        }

        let bytes = write_bytes(&engine, handle);
        let OpenOutcome::Opened(reopened) = engine.open(OpenSource::Bytes(bytes), None).unwrap() else {
            panic!("should open");
        };
        let page = engine.page_refs(reopened).unwrap()[0];
        let read = engine.annotations(reopened, page).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].subtype, "Ink");
        assert_eq!(read[0].rect, ink.rect);
        assert_eq!(read[0].ink, ink.ink);
        assert_eq!(read[0].name, "ink-1");
        assert_eq!(read[0].author.as_deref(), Some("Ada"));
        assert_eq!(read[0].color, Some([0.0, 0.0, 1.0]));

        engine.set_annotations(reopened, page, &[]).unwrap();
        let state = engine.state();
        let record = state.record(reopened).unwrap();
        let annots = record.doc.get_dictionary(page.object_id()).unwrap().get(b"Annots").unwrap();
        assert_eq!(annots.as_array().unwrap().len(), 1, "the link survives");
    }

    #[test]
    fn added_text_is_extracted() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 2);
        let page = engine.page_refs(handle).unwrap()[1];
        let mut run = TextRun::new("Approved\nby finance", 72.0, 400.0);
        run.opacity = 0.5;
        engine.add_text(handle, page, &run).unwrap();

        let text = engine.page_text(handle, page).unwrap();
        assert!(text.contains("page 1"));
        assert!(text.contains("Approved"));
        assert!(text.contains("by finance"));

        run.font_size = 0.0;
        assert!(matches!(engine.add_text(handle, page, &run), Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn inserted_image_is_extracted_as_pixels() {
        let engine = LopdfEngine::new();
        let handle = engine_with_pages(&engine, 1);
        let page = engine.page_refs(handle).unwrap()[0];
        let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        engine.insert_image(handle, page, &image, [0.0, 0.0, 300.0, 200.0], 1.0).unwrap();

        let images = engine.page_images(handle, page).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].width, images[0].height), (3, 2));
        match &images[0].data {
            crate::ImageData::Pixels(pixels) => assert_eq!(pixels.get_pixel(2, 1), &Rgba([10, 20, 30, 255])),
            other => panic!("expected decoded pixels, got {other:?}"),
        }
        assert!(String::from_utf8_lossy(&engine.page_content(handle, page).unwrap()).contains("Do"));
    }
}
