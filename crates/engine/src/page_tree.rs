//! Page tree plumbing on top of `lopdf`: flattening, geometry, blank pages,
//! content appends and cross-document page copies.

use crate::{EngineError, EngineResult, PageGeometry, Rotation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::{HashMap, HashSet};

/// Page attributes a page inherits from its `/Pages` ancestors.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

const FALLBACK_WIDTH: f32 = 612.0;
const FALLBACK_HEIGHT: f32 = 792.0;
const MAX_TREE_DEPTH: usize = 64;

/// Resource name of the Helvetica font used for added and recognized text.
pub(crate) const TEXT_FONT_KEY: &[u8] = b"FolioHelv";

pub(crate) fn real(value: f32) -> Object {
    Object::Real(value.into())
}

pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

pub(crate) fn catalog_id(doc: &Document) -> EngineResult<ObjectId> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

pub(crate) fn pages_root(doc: &Document) -> EngineResult<ObjectId> {
    let catalog = doc.get_dictionary(catalog_id(doc)?)?;
    Ok(catalog.get(b"Pages")?.as_reference()?)
}

/// Rewrites the page tree so every page hangs directly off the root
/// `/Pages` node, with inherited attributes copied onto the page itself.
///
/// Returns the root node and the pages in document order.
pub(crate) fn flatten(doc: &mut Document) -> EngineResult<(ObjectId, Vec<ObjectId>)> {
    let root = pages_root(doc)?;
    let order: Vec<ObjectId> = doc.get_pages().into_values().collect();

    for &page in &order {
        let inherited = inherited_attributes(doc, page)?;
        let dict = doc.get_dictionary_mut(page)?;
        for (key, value) in inherited {
            if !dict.has(key) {
                dict.set(key, value);
            }
        }
        dict.set("Parent", Object::Reference(root));
    }

    let root_dict = doc.get_dictionary_mut(root)?;
    for key in INHERITABLE {
        root_dict.remove(key);
    }
    root_dict.remove(b"Parent");

    sync_kids(doc, root, &order)?;
    Ok((root, order))
}

fn inherited_attributes(doc: &Document, page: ObjectId) -> EngineResult<Vec<(&'static [u8], Object)>> {
    let mut found: Vec<(&'static [u8], Object)> = Vec::new();
    let mut current = doc.get_dictionary(page)?.get(b"Parent").and_then(|o| o.as_reference()).ok();
    let mut depth = 0;

    while let Some(node_id) = current {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Err(EngineError::Corrupt("page tree is too deep or cyclic".to_owned()));
        }
        let node = doc.get_dictionary(node_id)?;
        for key in INHERITABLE {
            if found.iter().any(|(existing, _)| *existing == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key, value.clone()));
            }
        }
        current = node.get(b"Parent").and_then(|o| o.as_reference()).ok();
    }

    Ok(found)
}

/// Points the root `/Pages` node at `order`.
pub(crate) fn sync_kids(doc: &mut Document, root: ObjectId, order: &[ObjectId]) -> EngineResult<()> {
    let kids: Vec<Object> = order.iter().map(|id| Object::Reference(*id)).collect();
    let root_dict = doc.get_dictionary_mut(root)?;
    root_dict.set("Kids", Object::Array(kids));
    root_dict.set("Count", Object::Integer(order.len() as i64));
    Ok(())
}

pub(crate) fn read_geometry(doc: &Document, page: ObjectId) -> EngineResult<PageGeometry> {
    let dict = doc.get_dictionary(page)?;
    let (width, height) = dict
        .get(b"MediaBox")
        .ok()
        .map(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_array().ok())
        .and_then(|array| {
            if array.len() != 4 {
                return None;
            }
            let x0 = array[0].as_float().ok()?;
            let y0 = array[1].as_float().ok()?;
            let x1 = array[2].as_float().ok()?;
            let y1 = array[3].as_float().ok()?;
            Some(((x1 - x0).abs(), (y1 - y0).abs()))
        })
        .unwrap_or((FALLBACK_WIDTH, FALLBACK_HEIGHT));

    let rotation = dict
        .get(b"Rotate")
        .ok()
        .map(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_i64().ok())
        .and_then(|degrees| Rotation::from_degrees(degrees as i32))
        .unwrap_or_default();

    Ok(PageGeometry { width, height, rotation })
}

pub(crate) fn new_blank_page(doc: &mut Document, root: ObjectId, width: f32, height: f32) -> ObjectId {
    let contents = doc.add_object(Stream::new(Dictionary::new(), Vec::new()));
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => Object::Reference(root),
        "MediaBox" => vec![Object::Integer(0), Object::Integer(0), real(width), real(height)],
        "Resources" => Dictionary::new(),
        "Contents" => Object::Reference(contents),
    })
}

/// Appends `content` as a new content stream after the page's existing ones.
pub(crate) fn append_content(doc: &mut Document, page: ObjectId, content: Vec<u8>) -> EngineResult<()> {
    let stream_id = doc.add_object(Stream::new(Dictionary::new(), content));
    let dict = doc.get_dictionary_mut(page)?;
    let contents = match dict.get(b"Contents").ok().cloned() {
        Some(Object::Array(mut items)) => {
            items.push(Object::Reference(stream_id));
            Object::Array(items)
        }
        Some(existing @ Object::Reference(_)) => {
            Object::Array(vec![existing, Object::Reference(stream_id)])
        }
        _ => Object::Reference(stream_id),
    };
    dict.set("Contents", contents);
    Ok(())
}

/// Adds an entry to the page's `/Resources/<category>` dictionary under
/// `name`, building it with `make` only when the name is still free.
pub(crate) fn add_resource(
    doc: &mut Document,
    page: ObjectId,
    category: &[u8],
    name: &[u8],
    make: impl FnOnce(&mut Document) -> Object,
) -> EngineResult<()> {
    let mut resources = match doc.get_dictionary(page)?.get(b"Resources").ok().cloned() {
        Some(Object::Reference(id)) => doc.get_dictionary(id)?.clone(),
        Some(Object::Dictionary(dict)) => dict,
        _ => Dictionary::new(),
    };
    let mut entries = match resources.get(category).ok().cloned() {
        Some(Object::Reference(id)) => doc.get_dictionary(id)?.clone(),
        Some(Object::Dictionary(dict)) => dict,
        _ => Dictionary::new(),
    };
    if entries.has(name) {
        return Ok(());
    }
    let value = make(doc);
    entries.set(name, value);
    resources.set(category, Object::Dictionary(entries));

    // Resource dictionaries may be shared between pages; give this page its own copy.
    doc.get_dictionary_mut(page)?.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Makes sure the page resources carry Helvetica under [`TEXT_FONT_KEY`].
pub(crate) fn ensure_text_font(doc: &mut Document, page: ObjectId) -> EngineResult<()> {
    add_resource(doc, page, b"Font", TEXT_FONT_KEY, |doc| {
        Object::Reference(doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        }))
    })
}

/// Result of copying pages out of a source document.
pub(crate) struct TransplantOutput {
    pub pages: Vec<ObjectId>,
    pub objects: Vec<(ObjectId, Object)>,
    pub max_id: u32,
}

/// Deep copy of a set of pages and every object they reference, renumbered
/// to start after the destination's `max_id`.
///
/// References to pages outside the copied set, to `/Pages` nodes and to
/// objects listed in `skip` are replaced with `null`.
pub(crate) struct Transplant<'a> {
    src: &'a Document,
    skip: &'a HashSet<ObjectId>,
    next_id: u32,
    page_targets: HashMap<ObjectId, ObjectId>,
    copied: HashMap<ObjectId, ObjectId>,
    pending: Vec<ObjectId>,
    objects: Vec<(ObjectId, Object)>,
}

impl<'a> Transplant<'a> {
    pub(crate) fn new(src: &'a Document, skip: &'a HashSet<ObjectId>, max_id: u32) -> Self {
        Self {
            src,
            skip,
            next_id: max_id,
            page_targets: HashMap::new(),
            copied: HashMap::new(),
            pending: Vec::new(),
            objects: Vec::new(),
        }
    }

    fn allocate(&mut self) -> ObjectId {
        self.next_id += 1;
        (self.next_id, 0)
    }

    pub(crate) fn run(mut self, pages: &[ObjectId], parent: ObjectId) -> EngineResult<TransplantOutput> {
        let mut assignments = Vec::with_capacity(pages.len());
        for &page in pages {
            let new_id = self.allocate();
            self.page_targets.entry(page).or_insert(new_id);
            assignments.push((page, new_id));
        }

        let mut new_pages = Vec::with_capacity(pages.len());
        for (old_id, new_id) in assignments {
            let mut dict = self.src.get_dictionary(old_id)?.clone();
            dict.remove(b"Parent");
            let mut dict = self.remap_dict(&dict)?;
            if let Ok(Object::Array(annots)) = dict.get_mut(b"Annots") {
                annots.retain(|item| !matches!(item, Object::Null));
            }
            dict.set("Parent", Object::Reference(parent));
            self.objects.push((new_id, Object::Dictionary(dict)));
            new_pages.push(new_id);
        }

        while let Some(old_id) = self.pending.pop() {
            let new_id = self.copied[&old_id];
            let object = self.src.get_object(old_id)?.clone();
            let object = self.remap(object)?;
            self.objects.push((new_id, object));
        }

        Ok(TransplantOutput { pages: new_pages, objects: self.objects, max_id: self.next_id })
    }

    fn remap(&mut self, object: Object) -> EngineResult<Object> {
        Ok(match object {
            Object::Reference(id) => self.map_reference(id),
            Object::Array(items) => Object::Array(
                items.into_iter().map(|item| self.remap(item)).collect::<EngineResult<Vec<_>>>()?,
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.remap_dict(&dict)?),
            Object::Stream(mut stream) => {
                stream.dict = self.remap_dict(&stream.dict)?;
                Object::Stream(stream)
            }
            other => other,
        })
    }

    fn remap_dict(&mut self, dict: &Dictionary) -> EngineResult<Dictionary> {
        let mut out = Dictionary::new();
        for (key, value) in dict.iter() {
            out.set(key.clone(), self.remap(value.clone())?);
        }
        Ok(out)
    }

    fn map_reference(&mut self, id: ObjectId) -> Object {
        if let Some(new_id) = self.page_targets.get(&id) {
            return Object::Reference(*new_id);
        }
        if let Some(new_id) = self.copied.get(&id) {
            return Object::Reference(*new_id);
        }
        if self.skip.contains(&id) {
            return Object::Null;
        }
        let Ok(object) = self.src.get_object(id) else {
            return Object::Null;
        };
        if is_page_node(object) {
            return Object::Null;
        }
        let new_id = self.allocate();
        self.copied.insert(id, new_id);
        self.pending.push(id);
        Object::Reference(new_id)
    }
}

fn is_page_node(object: &Object) -> bool {
    object
        .as_dict()
        .ok()
        .and_then(|dict| dict.get(b"Type").ok())
        .and_then(|kind| kind.as_name().ok())
        .is_some_and(|name| name == b"Page" || name == b"Pages")
}

/// Escapes text for a PDF literal string, replacing anything outside
/// printable ASCII with `?`.
pub(crate) fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            ' '..='~' => out.push(ch),
            _ => out.push('?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_literal_escapes_delimiters() {
        assert_eq!(escape_literal("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(escape_literal("caf\u{e9}"), "caf?");
    }

    #[test]
    fn flatten_copies_inherited_attributes() {
        let mut doc = Document::with_version("1.7");
        let root = doc.new_object_id();
        let middle = doc.new_object_id();
        let page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(middle),
        });
        doc.objects.insert(
            middle,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Parent" => Object::Reference(root),
                "Kids" => vec![Object::Reference(page)],
                "Count" => 1,
                "Rotate" => 90,
            }),
        );
        doc.objects.insert(
            root,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(middle)],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
            }),
        );
        let catalog = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(root),
        });
        doc.trailer.set("Root", Object::Reference(catalog));

        let (flat_root, order) = flatten(&mut doc).unwrap();
        assert_eq!(flat_root, root);
        assert_eq!(order, vec![page]);

        let geometry = read_geometry(&doc, page).unwrap();
        assert_eq!(geometry.width, 200.0);
        assert_eq!(geometry.height, 300.0);
        assert_eq!(geometry.rotation, Rotation::Deg90);
        assert!(!doc.get_dictionary(root).unwrap().has(b"MediaBox"));
    }
}
