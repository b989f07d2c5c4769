//! Binary item content codec.
//!
//! Serializes the structured item payload (metadata plus the typed extra
//! fields of each item kind) to a fixed protobuf schema, independent of
//! encryption. Unknown field numbers are skipped on decode so newer
//! writers remain readable by older clients.

use prost::Message;

/// Content format version written into new revisions.
pub const CONTENT_FORMAT_VERSION: u32 = 1;

/// Structured, decrypted item payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemContents {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ItemMetadata>,
    #[prost(oneof = "ItemExt", tags = "10, 11, 12, 13")]
    pub ext: Option<ItemExt>,
}

/// Plaintext metadata common to every item kind.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ItemMetadata {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub note: String,
}

/// Typed extra fields, one variant per item kind.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum ItemExt {
    #[prost(message, tag = "10")]
    Login(LoginExt),
    #[prost(message, tag = "11")]
    Note(NoteExt),
    #[prost(message, tag = "12")]
    Alias(AliasExt),
    #[prost(message, tag = "13")]
    Password(PasswordExt),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LoginExt {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
    #[prost(string, repeated, tag = "3")]
    pub urls: Vec<String>,
    #[prost(string, tag = "4")]
    pub totp_uri: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoteExt {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AliasExt {
    #[prost(string, tag = "1")]
    pub alias_email: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PasswordExt {
    #[prost(string, tag = "1")]
    pub password: String,
}

impl ItemContents {
    /// Build a login item payload.
    pub fn login(
        name: &str,
        note: &str,
        username: &str,
        password: &str,
        urls: Vec<String>,
    ) -> Self {
        Self {
            metadata: Some(ItemMetadata {
                name: name.to_string(),
                note: note.to_string(),
            }),
            ext: Some(ItemExt::Login(LoginExt {
                username: username.to_string(),
                password: password.to_string(),
                urls,
                totp_uri: String::new(),
            })),
        }
    }

    /// Build a plain note payload.
    pub fn note(name: &str, note: &str) -> Self {
        Self {
            metadata: Some(ItemMetadata {
                name: name.to_string(),
                note: note.to_string(),
            }),
            ext: Some(ItemExt::Note(NoteExt {})),
        }
    }

    /// Build an alias payload.
    pub fn alias(name: &str, note: &str, alias_email: &str) -> Self {
        Self {
            metadata: Some(ItemMetadata {
                name: name.to_string(),
                note: note.to_string(),
            }),
            ext: Some(ItemExt::Alias(AliasExt {
                alias_email: alias_email.to_string(),
            })),
        }
    }

    /// Build a standalone password payload.
    pub fn password(name: &str, note: &str, password: &str) -> Self {
        Self {
            metadata: Some(ItemMetadata {
                name: name.to_string(),
                note: note.to_string(),
            }),
            ext: Some(ItemExt::Password(PasswordExt {
                password: password.to_string(),
            })),
        }
    }

    /// Item name, empty if metadata is absent.
    pub fn name(&self) -> &str {
        self.metadata.as_ref().map(|m| m.name.as_str()).unwrap_or("")
    }

    /// Item note, empty if metadata is absent.
    pub fn note_text(&self) -> &str {
        self.metadata.as_ref().map(|m| m.note.as_str()).unwrap_or("")
    }
}

/// Serialize item contents to the fixed binary schema.
pub fn serialize(contents: &ItemContents) -> Vec<u8> {
    contents.encode_to_vec()
}

/// Parse item contents from the fixed binary schema.
///
/// Unknown field numbers are skipped without error.
pub fn parse(bytes: &[u8]) -> Result<ItemContents, prost::DecodeError> {
    ItemContents::decode(bytes)
}
