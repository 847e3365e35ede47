//! Standard security handler (revisions 2 and 3): RC4 with MD5-derived keys.
//!
//! Documents are decrypted completely on open and kept in plaintext while
//! they are edited. Encryption is applied to a copy right before writing.

use crate::{EncryptionMethod, EncryptionSettings, EngineError, EngineResult, Permissions};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use md5::{Digest, Md5};

/// Password padding string (ISO 32000-1, 7.6.3.3).
const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Permission bits a handler must leave set: 7-8 and 13-32.
const RESERVED_PERMISSION_BITS: u32 = 0xFFFF_F0C0;

struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (index, value) in s.iter_mut().enumerate() {
            *value = index as u8;
        }
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
            s.swap(i, j as usize);
        }
        Self { s, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.s[self.i as usize]);
            self.s.swap(self.i as usize, self.j as usize);
            let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
            *byte ^= self.s[k as usize];
        }
    }
}

/// RC4 is symmetric: the same call encrypts and decrypts.
fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    if !key.is_empty() {
        Rc4::new(key).apply(&mut out);
    }
    out
}

/// Runs RC4 once per round with the key XORed by the round number.
fn rc4_rounds(key: &[u8], data: &[u8], rounds: impl Iterator<Item = u8>) -> Vec<u8> {
    let mut out = data.to_vec();
    for round in rounds {
        let round_key: Vec<u8> = key.iter().map(|byte| byte ^ round).collect();
        out = rc4(&round_key, &out);
    }
    out
}

/// Passwords for these revisions are byte strings; characters outside
/// Latin-1 have no encoding and become `?`.
fn password_bytes(password: &str) -> Vec<u8> {
    password.chars().map(|ch| u8::try_from(u32::from(ch)).unwrap_or(b'?')).collect()
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let len = password.len().min(32);
    let mut padded = [0u8; 32];
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PADDING[..32 - len]);
    padded
}

/// Revision-dependent parameters of a standard handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Revision {
    revision: i64,
    key_length: usize,
}

impl Revision {
    fn for_method(method: EncryptionMethod) -> Self {
        match method {
            EncryptionMethod::Rc4_40 => Self { revision: 2, key_length: 5 },
            EncryptionMethod::Rc4_128 => Self { revision: 3, key_length: 16 },
        }
    }

    fn version(self) -> i64 {
        if self.revision >= 3 {
            2
        } else {
            1
        }
    }

    fn rounds(self) -> std::ops::RangeInclusive<u8> {
        if self.revision >= 3 {
            0..=19
        } else {
            0..=0
        }
    }

    fn stretch(self, mut hash: Vec<u8>) -> Vec<u8> {
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = Md5::digest(&hash[..self.key_length]).to_vec();
            }
        }
        hash.truncate(self.key_length);
        hash
    }

    /// RC4 key protecting the /O entry.
    fn owner_key(self, owner: &[u8]) -> Vec<u8> {
        self.stretch(Md5::digest(pad_password(owner)).to_vec())
    }

    fn owner_entry(self, owner: &[u8], user: &[u8]) -> Vec<u8> {
        rc4_rounds(&self.owner_key(owner), &pad_password(user), self.rounds())
    }

    /// Padded user password recovered from /O with an owner password.
    fn user_from_owner(self, owner: &[u8], owner_entry: &[u8]) -> Vec<u8> {
        rc4_rounds(&self.owner_key(owner), owner_entry, self.rounds().rev())
    }

    fn file_key(self, user: &[u8], owner_entry: &[u8], permissions: i32, file_id: &[u8]) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(pad_password(user));
        hasher.update(owner_entry);
        hasher.update(permissions.to_le_bytes());
        hasher.update(file_id);
        self.stretch(hasher.finalize().to_vec())
    }

    fn user_entry(self, key: &[u8], file_id: &[u8]) -> Vec<u8> {
        if self.revision < 3 {
            return rc4(key, &PADDING);
        }
        let mut hasher = Md5::new();
        hasher.update(PADDING);
        hasher.update(file_id);
        let mut entry = rc4_rounds(key, &hasher.finalize(), self.rounds());
        entry.extend_from_slice(&[0u8; 16]);
        entry
    }

    /// Revision 3 only defines the first 16 bytes of /U.
    fn user_entry_matches(self, key: &[u8], file_id: &[u8], stored: &[u8]) -> bool {
        let expected = self.user_entry(key, file_id);
        let checked = if self.revision >= 3 { 16 } else { 32 };
        stored.len() >= checked && expected[..checked] == stored[..checked]
    }
}

/// Keys and dictionary entries of one encrypted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StandardSecurity {
    revision: Revision,
    key: Vec<u8>,
    owner_entry: Vec<u8>,
    user_entry: Vec<u8>,
    permissions: i32,
    file_id: Vec<u8>,
}

impl StandardSecurity {
    /// Builds a handler for new passwords. `file_id` is the first element
    /// of the trailer /ID.
    pub fn new(settings: &EncryptionSettings, file_id: Vec<u8>) -> Self {
        let revision = Revision::for_method(settings.method);
        let user = password_bytes(&settings.user_password);
        let owner = password_bytes(&settings.owner_password);
        let owner_entry = revision.owner_entry(&owner, &user);
        let permissions = (settings.permissions.bits() | RESERVED_PERMISSION_BITS) as i32;
        let key = revision.file_key(&user, &owner_entry, permissions, &file_id);
        let user_entry = revision.user_entry(&key, &file_id);
        Self { revision, key, owner_entry, user_entry, permissions, file_id }
    }

    /// Reads the trailer's /Encrypt dictionary and checks `password` as the
    /// user password, then as the owner password.
    ///
    /// Returns `Ok(None)` when the password matches neither.
    pub fn unlock(doc: &Document, password: &str) -> EngineResult<Option<Self>> {
        let dict = doc.get_encrypted()?;
        let filter = dict.get(b"Filter").and_then(Object::as_name).unwrap_or_default();
        let version = dict.get(b"V").and_then(Object::as_i64).unwrap_or(0);
        let revision = dict.get(b"R").and_then(Object::as_i64).unwrap_or(0);
        let bits = dict.get(b"Length").and_then(Object::as_i64).unwrap_or(40);
        let supported = filter == b"Standard"
            && matches!((version, revision), (1, 2) | (2, 3))
            && (40..=128).contains(&bits)
            && bits % 8 == 0;
        if !supported {
            return Err(EngineError::Unsupported(format!(
                "{} security handler V{version} R{revision} ({bits}-bit)",
                String::from_utf8_lossy(filter)
            )));
        }

        let revision = Revision { revision, key_length: if version == 1 { 5 } else { bits as usize / 8 } };
        let owner_entry = dict.get(b"O").and_then(Object::as_str)?.to_vec();
        let user_entry = dict.get(b"U").and_then(Object::as_str)?.to_vec();
        let permissions = dict.get(b"P").and_then(Object::as_i64)? as i32;
        let file_id = first_file_id(doc).unwrap_or_default();

        let handler = Self { revision, key: Vec::new(), owner_entry, user_entry, permissions, file_id };
        Ok(handler.key_for(password).map(|key| Self { key, ..handler }))
    }

    fn key_for(&self, password: &str) -> Option<Vec<u8>> {
        let candidate = password_bytes(password);
        let as_user = self.revision.file_key(&candidate, &self.owner_entry, self.permissions, &self.file_id);
        if self.revision.user_entry_matches(&as_user, &self.file_id, &self.user_entry) {
            return Some(as_user);
        }
        let user = self.revision.user_from_owner(&candidate, &self.owner_entry);
        let as_owner = self.revision.file_key(&user, &self.owner_entry, self.permissions, &self.file_id);
        self.revision
            .user_entry_matches(&as_owner, &self.file_id, &self.user_entry)
            .then_some(as_owner)
    }

    /// True if `password` is the user or the owner password.
    pub fn accepts(&self, password: &str) -> bool {
        self.key_for(password).is_some()
    }

    pub fn permissions(&self) -> Permissions {
        Permissions::from_bits_truncate(self.permissions as u32)
    }

    fn object_key(&self, id: ObjectId) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.key);
        hasher.update(&id.0.to_le_bytes()[..3]);
        hasher.update(&id.1.to_le_bytes()[..2]);
        let mut key = hasher.finalize().to_vec();
        key.truncate((self.key.len() + 5).min(16));
        key
    }

    fn dictionary(&self) -> Dictionary {
        dictionary! {
            "Filter" => "Standard",
            "V" => self.revision.version(),
            "R" => self.revision.revision,
            "Length" => (self.revision.key_length * 8) as i64,
            "O" => Object::String(self.owner_entry.clone(), StringFormat::Hexadecimal),
            "U" => Object::String(self.user_entry.clone(), StringFormat::Hexadecimal),
            "P" => i64::from(self.permissions),
        }
    }

    /// Decrypts every string and stream in place and drops /Encrypt from
    /// the trailer.
    pub fn decrypt_document(&self, doc: &mut Document) {
        let encrypt_id = doc.trailer.get(b"Encrypt").and_then(Object::as_reference).ok();
        self.crypt_objects(doc, encrypt_id);
        if let Some(id) = encrypt_id {
            doc.objects.remove(&id);
        }
        doc.trailer.remove(b"Encrypt");
    }

    /// Encrypts every string and stream in place and adds the /Encrypt
    /// dictionary. The trailer /ID must already hold this handler's file id.
    pub fn encrypt_document(&self, doc: &mut Document) {
        self.crypt_objects(doc, None);
        let encrypt_id = doc.add_object(self.dictionary());
        doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
    }

    fn crypt_objects(&self, doc: &mut Document, skip: Option<ObjectId>) {
        for (&id, object) in doc.objects.iter_mut() {
            if Some(id) == skip || is_xref_stream(object) {
                continue;
            }
            let key = self.object_key(id);
            crypt(&key, object);
        }
    }
}

fn crypt(key: &[u8], object: &mut Object) {
    match object {
        Object::String(bytes, format) => {
            *bytes = rc4(key, bytes);
            *format = StringFormat::Hexadecimal;
        }
        Object::Array(items) => items.iter_mut().for_each(|item| crypt(key, item)),
        Object::Dictionary(dict) => dict.iter_mut().for_each(|(_, value)| crypt(key, value)),
        Object::Stream(stream) => {
            stream.dict.iter_mut().for_each(|(_, value)| crypt(key, value));
            let content = rc4(key, &stream.content);
            stream.set_content(content);
        }
        _ => {}
    }
}

fn is_xref_stream(object: &Object) -> bool {
    matches!(object, Object::Stream(stream) if stream.dict.get(b"Type").and_then(Object::as_name).is_ok_and(|name| name == b"XRef"))
}

fn first_file_id(doc: &Document) -> Option<Vec<u8>> {
    let ids = doc.trailer.get(b"ID").and_then(Object::as_array).ok()?;
    ids.first().and_then(|id| id.as_str().ok()).map(<[u8]>::to_vec)
}

/// The document's file id, creating a trailer /ID when there is none.
pub(crate) fn ensure_file_id(doc: &mut Document) -> Vec<u8> {
    if let Some(id) = first_file_id(doc) {
        return id;
    }
    let id = uuid::Uuid::new_v4().as_bytes().to_vec();
    let entry = Object::String(id.clone(), StringFormat::Hexadecimal);
    doc.trailer.set("ID", Object::Array(vec![entry.clone(), entry]));
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(user: &str, owner: &str, method: EncryptionMethod) -> EncryptionSettings {
        EncryptionSettings {
            user_password: user.to_owned(),
            owner_password: owner.to_owned(),
            permissions: Permissions::PRINT | Permissions::COPY,
            method,
        }
    }

    fn sample_document() -> Document {
        let mut doc = Document::with_version("1.7");
        let info = doc.add_object(dictionary! { "Title" => Object::string_literal("Quarterly") });
        let content = doc.add_object(lopdf::Stream::new(Dictionary::new(), b"BT (secret) Tj ET".to_vec()));
        doc.trailer.set("Info", Object::Reference(info));
        doc.trailer.set("Root", Object::Reference(content));
        doc
    }

    #[test]
    fn rc4_matches_known_vector() {
        // "Key" / "Plaintext" from the original RC4 test vectors.
        let out = rc4(b"Key", b"Plaintext");
        assert_eq!(out, [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]);
        assert_eq!(rc4(b"Key", &out), b"Plaintext");
    }

    #[test]
    fn pad_password_truncates_and_pads() {
        let padded = pad_password(b"abc");
        assert_eq!(&padded[..3], b"abc");
        assert_eq!(&padded[3..], &PADDING[..29]);
        assert_eq!(pad_password(&[b'x'; 40]), [b'x'; 32]);
    }

    #[test]
    fn both_passwords_unlock_and_others_do_not() {
        for method in [EncryptionMethod::Rc4_40, EncryptionMethod::Rc4_128] {
            let mut doc = sample_document();
            let file_id = ensure_file_id(&mut doc);
            StandardSecurity::new(&settings("reader", "admin", method), file_id).encrypt_document(&mut doc);

            let by_user = StandardSecurity::unlock(&doc, "reader").unwrap().expect("user password");
            let by_owner = StandardSecurity::unlock(&doc, "admin").unwrap().expect("owner password");
            assert_eq!(by_user.key, by_owner.key);
            assert!(StandardSecurity::unlock(&doc, "guess").unwrap().is_none());
            assert!(by_user.accepts("admin"));
            assert!(!by_user.accepts(""));
        }
    }

    #[test]
    fn encrypt_then_decrypt_restores_strings_and_streams() {
        let mut doc = sample_document();
        let plain = doc.clone();
        let file_id = ensure_file_id(&mut doc);
        let handler = StandardSecurity::new(&settings("", "admin", EncryptionMethod::Rc4_128), file_id);
        handler.encrypt_document(&mut doc);

        let content_id = doc.trailer.get(b"Root").and_then(Object::as_reference).unwrap();
        let encrypted = doc.get_object(content_id).and_then(Object::as_stream).unwrap();
        assert_ne!(encrypted.content, b"BT (secret) Tj ET");

        let handler = StandardSecurity::unlock(&doc, "").unwrap().expect("empty user password");
        handler.decrypt_document(&mut doc);
        assert!(!doc.trailer.has(b"Encrypt"));
        let decrypted = doc.get_object(content_id).and_then(Object::as_stream).unwrap();
        assert_eq!(decrypted.content, b"BT (secret) Tj ET");

        let info_id = plain.trailer.get(b"Info").and_then(Object::as_reference).unwrap();
        let title = doc.get_dictionary(info_id).unwrap().get(b"Title").and_then(Object::as_str).unwrap();
        assert_eq!(title, b"Quarterly");
    }

    #[test]
    fn permissions_keep_reserved_bits_out_of_flags() {
        let handler = StandardSecurity::new(&settings("u", "o", EncryptionMethod::Rc4_128), vec![1; 16]);
        assert!(handler.permissions < 0);
        assert_eq!(handler.permissions(), Permissions::PRINT | Permissions::COPY);
    }

    #[test]
    fn unknown_handler_is_unsupported() {
        let mut doc = sample_document();
        let encrypt = doc.add_object(dictionary! { "Filter" => "Standard", "V" => 5, "R" => 6 });
        doc.trailer.set("Encrypt", Object::Reference(encrypt));
        assert!(matches!(StandardSecurity::unlock(&doc, ""), Err(EngineError::Unsupported(_))));
    }
}
