//! `/Outlines` and `/Info` reading and writing.

use crate::page_tree::{catalog_id, real, resolve};
use crate::{EngineResult, InfoFields, OutlineDestination, OutlineItem, PageRef};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use std::collections::HashSet;

const MAX_OUTLINE_ITEMS: usize = 100_000;

/// Encodes a PDF text string: literal for printable ASCII, UTF-16BE with a
/// byte order mark otherwise.
pub(crate) fn encode_text(text: &str) -> Object {
    if text.chars().all(|ch| (' '..='~').contains(&ch)) {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn decode_text(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> =
            bytes[2..].chunks_exact(2).map(|pair| u16::from_be_bytes([pair[0], pair[1]])).collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| char::from(b)).collect()
}

pub(crate) fn text_field(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok().map(|obj| resolve(doc, obj))? {
        Object::String(bytes, _) => Some(decode_text(bytes)),
        _ => None,
    }
}

fn info_id(doc: &Document) -> Option<ObjectId> {
    doc.trailer.get(b"Info").and_then(|obj| obj.as_reference()).ok()
}

pub(crate) fn read_info(doc: &Document) -> InfoFields {
    let dict = match doc.trailer.get(b"Info").ok().map(|obj| resolve(doc, obj)) {
        Some(Object::Dictionary(dict)) => dict,
        _ => return InfoFields::default(),
    };
    InfoFields {
        title: text_field(doc, dict, b"Title"),
        author: text_field(doc, dict, b"Author"),
        subject: text_field(doc, dict, b"Subject"),
        keywords: text_field(doc, dict, b"Keywords"),
        creator: text_field(doc, dict, b"Creator"),
        producer: text_field(doc, dict, b"Producer"),
        creation_date: text_field(doc, dict, b"CreationDate"),
        modification_date: text_field(doc, dict, b"ModDate"),
    }
}

pub(crate) fn write_info(doc: &mut Document, info: &InfoFields) -> EngineResult<()> {
    let fields: [(&str, &Option<String>); 8] = [
        ("Title", &info.title),
        ("Author", &info.author),
        ("Subject", &info.subject),
        ("Keywords", &info.keywords),
        ("Creator", &info.creator),
        ("Producer", &info.producer),
        ("CreationDate", &info.creation_date),
        ("ModDate", &info.modification_date),
    ];

    let id = match info_id(doc) {
        Some(id) if doc.get_dictionary(id).is_ok() => id,
        _ => {
            let id = doc.add_object(Dictionary::new());
            doc.trailer.set("Info", Object::Reference(id));
            id
        }
    };
    let dict = doc.get_dictionary_mut(id)?;
    for (key, value) in fields {
        match value {
            Some(text) => dict.set(key, encode_text(text)),
            None => {
                dict.remove(key.as_bytes());
            }
        }
    }
    Ok(())
}

/// Reads the outline tree as a flat, depth-first list.
///
/// Entries whose destination is not an explicit reference to one of `pages`
/// (named destinations, remote targets) are skipped.
pub(crate) fn read_outline(doc: &Document, pages: &[ObjectId]) -> EngineResult<Vec<OutlineItem>> {
    let catalog = doc.get_dictionary(catalog_id(doc)?)?;
    let root = match catalog.get(b"Outlines").ok().map(|obj| resolve(doc, obj)) {
        Some(Object::Dictionary(dict)) => dict,
        _ => return Ok(Vec::new()),
    };
    let known: HashSet<ObjectId> = pages.iter().copied().collect();

    let mut items = Vec::new();
    let mut visited = HashSet::new();
    let mut stack: Vec<(Option<ObjectId>, u32)> =
        vec![(root.get(b"First").and_then(|obj| obj.as_reference()).ok(), 1)];

    // Explicit stack of sibling chains; each entry is the next sibling to visit.
    while let Some((current, level)) = stack.pop() {
        let Some(id) = current else {
            continue;
        };
        if !visited.insert(id) || visited.len() > MAX_OUTLINE_ITEMS {
            continue;
        }
        let Ok(node) = doc.get_dictionary(id) else {
            continue;
        };

        let next = node.get(b"Next").and_then(|obj| obj.as_reference()).ok();
        let first_child = node.get(b"First").and_then(|obj| obj.as_reference()).ok();
        stack.push((next, level));
        stack.push((first_child, level + 1));

        let title = text_field(doc, node, b"Title").unwrap_or_default();
        if let Some((page, destination)) = destination_of(doc, node) {
            if known.contains(&page) {
                items.push(OutlineItem {
                    level,
                    title,
                    page: PageRef::from_object_id(page),
                    destination,
                });
            }
        }
    }

    Ok(items)
}

fn destination_of(doc: &Document, node: &Dictionary) -> Option<(ObjectId, Option<OutlineDestination>)> {
    let dest = match node.get(b"Dest").ok() {
        Some(dest) => resolve(doc, dest),
        None => {
            let action = resolve(doc, node.get(b"A").ok()?).as_dict().ok()?;
            if action.get(b"S").ok()?.as_name().ok()? != b"GoTo" {
                return None;
            }
            resolve(doc, action.get(b"D").ok()?)
        }
    };
    let array = dest.as_array().ok()?;
    let page = array.first()?.as_reference().ok()?;
    let is_xyz = array.get(1).and_then(|kind| kind.as_name().ok()) == Some(b"XYZ".as_slice());
    let destination = is_xyz.then(|| {
        let number = |index: usize| array.get(index).and_then(|obj| obj.as_float().ok());
        OutlineDestination { left: number(2), top: number(3), zoom: number(4) }
    });
    Some((page, destination))
}

/// Replaces the document outline with `items` (a flat, depth-first list).
///
/// Levels are clamped so a child is never more than one level deeper than
/// its predecessor.
pub(crate) fn write_outline(doc: &mut Document, items: &[OutlineItem]) -> EngineResult<()> {
    let catalog = catalog_id(doc)?;
    if items.is_empty() {
        doc.get_dictionary_mut(catalog)?.remove(b"Outlines");
        return Ok(());
    }

    let root = doc.new_object_id();
    let ids: Vec<ObjectId> = items.iter().map(|_| doc.new_object_id()).collect();

    // parents[i] is the index of item i's parent, None for top-level items.
    let mut parents: Vec<Option<usize>> = Vec::with_capacity(items.len());
    let mut levels: Vec<u32> = Vec::with_capacity(items.len());
    let mut chain: Vec<usize> = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let max_level = levels.last().map_or(1, |prev| prev + 1);
        let level = item.level.clamp(1, max_level);
        chain.truncate(level as usize - 1);
        parents.push(chain.last().copied());
        chain.push(index);
        levels.push(level);
    }

    let children_of = |parent: Option<usize>| -> Vec<usize> {
        (0..items.len()).filter(|&i| parents[i] == parent).collect()
    };
    let descendants = |index: usize| -> usize {
        let level = levels[index];
        items[index + 1..].iter().zip(&levels[index + 1..]).take_while(|(_, l)| **l > level).count()
    };

    for (index, item) in items.iter().enumerate() {
        let siblings = children_of(parents[index]);
        let position = siblings.iter().position(|&i| i == index).unwrap_or(0);
        let children = children_of(Some(index));

        let destination = item.destination.unwrap_or_default();
        let optional = |value: Option<f32>| value.map(real).unwrap_or(Object::Null);
        let mut node = dictionary! {
            "Title" => encode_text(&item.title),
            "Parent" => Object::Reference(parents[index].map_or(root, |p| ids[p])),
            "Dest" => vec![
                Object::Reference(item.page.object_id()),
                Object::Name(b"XYZ".to_vec()),
                optional(destination.left),
                optional(destination.top),
                optional(destination.zoom),
            ],
        };
        if position > 0 {
            node.set("Prev", Object::Reference(ids[siblings[position - 1]]));
        }
        if let Some(&next) = siblings.get(position + 1) {
            node.set("Next", Object::Reference(ids[next]));
        }
        if let (Some(&first), Some(&last)) = (children.first(), children.last()) {
            node.set("First", Object::Reference(ids[first]));
            node.set("Last", Object::Reference(ids[last]));
            node.set("Count", Object::Integer(descendants(index) as i64));
        }
        doc.objects.insert(ids[index], Object::Dictionary(node));
    }

    let top = children_of(None);
    let mut root_dict = dictionary! { "Type" => "Outlines", "Count" => Object::Integer(items.len() as i64) };
    if let (Some(&first), Some(&last)) = (top.first(), top.last()) {
        root_dict.set("First", Object::Reference(ids[first]));
        root_dict.set("Last", Object::Reference(ids[last]));
    }
    doc.objects.insert(root, Object::Dictionary(root_dict));
    doc.get_dictionary_mut(catalog)?.set("Outlines", Object::Reference(root));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_strings_round_trip() {
        for text in ["Chapter 1", "Caf\u{e9} \u{2013} r\u{e9}sum\u{e9}", ""] {
            let Object::String(bytes, _) = encode_text(text) else {
                panic!("expected a string object");
            };
            assert_eq!(decode_text(&bytes), text);
        }
    }

    #[test]
    fn ascii_titles_stay_literal() {
        assert!(matches!(encode_text("Intro"), Object::String(_, StringFormat::Literal)));
    }
}
