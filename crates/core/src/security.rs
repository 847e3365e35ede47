//! Encryption and permissions
//!
//! Passwords live in memory only for as long as the document is open. They
//! are dropped on close and never formatted by `Debug`.

use crate::document::{DocumentHandle, Effects};
use crate::error::{DocumentError, DocumentResult};
use crate::events::ChangeEvent;
use folio_engine::{EncryptionMethod, EncryptionSettings, Permissions};

/// A password held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(<redacted>)")
    }
}

#[derive(Debug, Default)]
pub(crate) struct SecurityState {
    /// Password the document was opened with, if any
    opened_with: Option<Password>,
    /// Encryption requested this session
    applied: Option<EncryptionSettings>,
}

impl SecurityState {
    pub fn remember(&mut self, password: Password) {
        self.opened_with = Some(password);
    }

    pub fn permissions(&self) -> Option<Permissions> {
        self.applied.as_ref().map(|settings| settings.permissions)
    }

    pub fn has_password(&self) -> bool {
        self.opened_with.is_some() || self.applied.is_some()
    }
}

impl DocumentHandle {
    /// Encrypt the document with 128-bit RC4 when it is next written.
    ///
    /// An empty owner password falls back to the user password.
    pub fn encrypt(
        &self,
        user_password: &str,
        owner_password: &str,
        permissions: Permissions,
    ) -> DocumentResult<bool> {
        self.encrypt_with(user_password, owner_password, permissions, EncryptionMethod::default())
    }

    pub fn encrypt_with(
        &self,
        user_password: &str,
        owner_password: &str,
        permissions: Permissions,
        method: EncryptionMethod,
    ) -> DocumentResult<bool> {
        let owner_password = if owner_password.is_empty() { user_password } else { owner_password };
        if owner_password.is_empty() {
            return Err(DocumentError::UnsupportedOperation(
                "encryption needs a user or owner password".to_string(),
            ));
        }
        let settings = EncryptionSettings {
            user_password: user_password.to_string(),
            owner_password: owner_password.to_string(),
            permissions,
            method,
        };

        self.mutate(|doc| {
            doc.engine.apply_encryption(doc.handle, Some(&settings))?;
            log::info!("encryption applied ({method:?}, permissions {permissions:?})");
            doc.security.applied = Some(settings);
            Ok((true, Effects::modified().with_event(ChangeEvent::MetadataChanged)))
        })
    }

    /// Remove encryption after checking `password` against the user or
    /// owner password.
    ///
    /// A wrong password fails with [`DocumentError::AuthenticationFailed`]
    /// and leaves the document encrypted.
    pub fn decrypt(&self, password: &str) -> DocumentResult<bool> {
        self.mutate(|doc| {
            if !doc.engine.is_encrypted(doc.handle)? {
                return Err(DocumentError::UnsupportedOperation(
                    "document is not encrypted".to_string(),
                ));
            }
            if !doc.engine.authenticate(doc.handle, password)? {
                log::warn!("decrypt rejected: wrong password");
                return Err(DocumentError::AuthenticationFailed);
            }
            doc.engine.apply_encryption(doc.handle, None)?;
            doc.security.applied = None;
            log::info!("encryption removed");
            Ok((true, Effects::modified().with_event(ChangeEvent::MetadataChanged)))
        })
    }

    pub fn is_encrypted(&self) -> DocumentResult<bool> {
        self.read(|doc| Ok(doc.engine.is_encrypted(doc.handle)?))
    }

    /// Permissions set by [`encrypt`](Self::encrypt) this session, or
    /// those the file was encrypted with. `None` when not encrypted.
    pub fn permissions(&self) -> DocumentResult<Option<Permissions>> {
        self.read(|doc| match doc.security.permissions() {
            Some(permissions) => Ok(Some(permissions)),
            None => Ok(doc.engine.permissions(doc.handle)?),
        })
    }

    /// True if the document was opened with a password or has one set
    /// this session.
    pub fn has_password(&self) -> DocumentResult<bool> {
        self.read(|doc| Ok(doc.security.has_password()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EditorConfig, InsertPosition};

    fn handle() -> DocumentHandle {
        let handle = DocumentHandle::with_config(EditorConfig::new().with_render_workers(0));
        handle.create_new().unwrap();
        handle.insert_blank(InsertPosition::End, 100.0, 100.0).unwrap();
        handle
    }

    #[test]
    fn test_password_debug_is_redacted() {
        let password = Password::new("hunter2");
        assert_eq!(format!("{password:?}"), "Password(<redacted>)");
        assert_eq!(password.as_str(), "hunter2");

        let mut state = SecurityState::default();
        state.remember(password);
        assert!(!format!("{state:?}").contains("hunter2"));
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let handle = handle();
        assert!(!handle.is_encrypted().unwrap());

        assert!(handle.encrypt("user", "owner", Permissions::PRINT).unwrap());
        assert!(handle.is_encrypted().unwrap());
        assert_eq!(handle.permissions().unwrap(), Some(Permissions::PRINT));
        assert!(handle.has_password().unwrap());

        assert!(matches!(handle.decrypt("nope"), Err(DocumentError::AuthenticationFailed)));
        assert!(handle.is_encrypted().unwrap());

        assert!(handle.decrypt("owner").unwrap());
        assert!(!handle.is_encrypted().unwrap());
        assert_eq!(handle.permissions().unwrap(), None);
    }

    #[test]
    fn test_decrypt_keeps_the_opening_password() {
        let mut state = SecurityState::default();
        state.remember(Password::new("reader"));
        state.applied = Some(EncryptionSettings {
            user_password: "reader".to_string(),
            owner_password: "admin".to_string(),
            permissions: Permissions::PRINT,
            method: EncryptionMethod::default(),
        });
        assert!(state.has_password());

        state.applied = None;
        assert!(state.has_password());
        assert_eq!(state.permissions(), None);
    }

    #[test]
    fn test_decrypt_unencrypted_is_unsupported() {
        let handle = handle();
        assert!(matches!(handle.decrypt("x"), Err(DocumentError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_encrypt_needs_a_password() {
        let handle = handle();
        assert!(matches!(
            handle.encrypt("", "", Permissions::all()),
            Err(DocumentError::UnsupportedOperation(_))
        ));
        assert!(!handle.is_encrypted().unwrap());
    }
}
