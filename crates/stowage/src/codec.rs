//! Value capabilities for the file tier.
//!
//! A type stored as a durable item implements [`Storable`]: it names the file
//! suffix it is stored under and converts to and from bytes.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StowageError, StowageResult};
use crate::sanitize::sanitize;

/// File suffix a value type is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileExtension {
    Jpg,
    Png,
    Mp4,
    Mp3,
    /// Text documents, including serialized JSON.
    Txt,
    /// Raw bytes.
    Bin,
    /// Custom suffix; sanitized, with a leading dot added when missing. A
    /// suffix with nothing left after sanitizing falls back to `.bin`.
    Other(&'static str),
}

impl FileExtension {
    pub fn suffix(&self) -> String {
        match self {
            Self::Jpg => ".jpg".to_string(),
            Self::Png => ".png".to_string(),
            Self::Mp4 => ".mp4".to_string(),
            Self::Mp3 => ".mp3".to_string(),
            Self::Txt => ".txt".to_string(),
            Self::Bin => ".bin".to_string(),
            Self::Other(ext) => match sanitize(ext.trim_start_matches('.')) {
                ext if ext.is_empty() => Self::Bin.suffix(),
                ext => format!(".{ext}"),
            },
        }
    }
}

impl fmt::Display for FileExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// Encodable-to-bytes and decodable-from-bytes capability.
pub trait Storable: Sized + Send + Sync + 'static {
    const EXTENSION: FileExtension;

    fn to_bytes(&self) -> StowageResult<Vec<u8>>;

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self>;
}

/// Any serde value stored as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Storable for Json<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    const EXTENSION: FileExtension = FileExtension::Txt;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|e| StowageError::InvalidData {
            message: format!("failed to serialize value: {e}"),
        })
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        serde_json::from_slice(bytes)
            .map(Json)
            .map_err(|e| StowageError::InvalidData {
                message: format!("failed to deserialize value: {e}"),
            })
    }
}

impl Storable for String {
    const EXTENSION: FileExtension = FileExtension::Txt;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| StowageError::InvalidData {
            message: format!("text is not valid UTF-8: {e}"),
        })
    }
}

/// Raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

impl Storable for Blob {
    const EXTENSION: FileExtension = FileExtension::Bin;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        Ok(Blob(bytes.to_vec()))
    }
}

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

fn check_magic(bytes: &[u8], magic: &[u8], kind: &str) -> StowageResult<()> {
    if bytes.starts_with(magic) {
        Ok(())
    } else {
        Err(StowageError::InvalidData {
            message: format!("bytes are not a {kind} image"),
        })
    }
}

/// Encoded JPEG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jpeg(Vec<u8>);

impl Jpeg {
    pub fn new(bytes: Vec<u8>) -> StowageResult<Self> {
        check_magic(&bytes, JPEG_MAGIC, "JPEG")?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Storable for Jpeg {
    const EXTENSION: FileExtension = FileExtension::Jpg;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        Self::new(bytes.to_vec())
    }
}

/// Encoded PNG image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Png(Vec<u8>);

impl Png {
    pub fn new(bytes: Vec<u8>) -> StowageResult<Self> {
        check_magic(&bytes, PNG_MAGIC, "PNG")?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Storable for Png {
    const EXTENSION: FileExtension = FileExtension::Png;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        Self::new(bytes.to_vec())
    }
}

/// MP3 audio, stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mp3(pub Vec<u8>);

impl Storable for Mp3 {
    const EXTENSION: FileExtension = FileExtension::Mp3;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        Ok(Mp3(bytes.to_vec()))
    }
}

/// MP4 video, stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mp4(pub Vec<u8>);

impl Storable for Mp4 {
    const EXTENSION: FileExtension = FileExtension::Mp4;

    fn to_bytes(&self) -> StowageResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn from_bytes(bytes: &[u8]) -> StowageResult<Self> {
        Ok(Mp4(bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
    }

    #[test]
    fn test_suffixes() {
        assert_eq!(FileExtension::Jpg.suffix(), ".jpg");
        assert_eq!(FileExtension::Txt.to_string(), ".txt");
        assert_eq!(FileExtension::Other("json").suffix(), ".json");
        assert_eq!(FileExtension::Other(".Tar-GZ").suffix(), ".tar_gz");
        assert_eq!(FileExtension::Other("...").suffix(), ".bin");
        assert_eq!(FileExtension::Other("").suffix(), ".bin");
    }

    #[test]
    fn test_json_value() {
        let profile = Json(Profile {
            name: "Ada".to_string(),
            age: 36,
        });
        let bytes = profile.to_bytes().unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"name":"Ada","age":36}"#
        );
        assert_eq!(Json::<Profile>::from_bytes(&bytes).unwrap(), profile);
    }

    #[test]
    fn test_json_rejects_wrong_shape() {
        let err = Json::<Profile>::from_bytes(br#"{"name":"Ada"}"#).unwrap_err();
        assert!(matches!(err, StowageError::InvalidData { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_string_requires_utf8() {
        assert!(String::from_bytes(&[0xC3, 0x28]).is_err());
        assert_eq!(String::from_bytes(b"plain").unwrap(), "plain");
    }

    #[test]
    fn test_image_magic() {
        let png = [PNG_MAGIC, b"rest".as_slice()].concat();
        assert!(Png::new(png.clone()).is_ok());
        assert!(Png::from_bytes(b"GIF89a").is_err());
        assert!(Jpeg::from_bytes(&png).is_err());
        assert!(Jpeg::new(vec![0xFF, 0xD8, 0xFF, 0xE0]).is_ok());
    }
}
