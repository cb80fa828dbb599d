//! Template images referenced by image conditions.
//!
//! Persisted inside the scheme as `{ template_ref: "<base64 PNG>" }`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, RgbaImage};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;

/// Template decoding/encoding failures.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Named template images.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateLibrary {
    templates: HashMap<String, RgbaImage>,
}

impl TemplateLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, image: RgbaImage) {
        self.templates.insert(name.into(), image);
    }

    pub fn get(&self, name: &str) -> Option<&RgbaImage> {
        self.templates.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RgbaImage> {
        self.templates.remove(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Encode an image as base64 PNG.
pub fn encode_png_base64(image: &RgbaImage) -> Result<String, TemplateError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(STANDARD.encode(buf))
}

/// Decode a base64 image (any format the `image` crate was built with).
pub fn decode_base64_image(data: &str) -> Result<RgbaImage, TemplateError> {
    let bytes = STANDARD.decode(data.trim())?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

impl Serialize for TemplateLibrary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut encoded = BTreeMap::new();
        for (name, image) in &self.templates {
            let data = encode_png_base64(image).map_err(serde::ser::Error::custom)?;
            encoded.insert(name.as_str(), data);
        }
        encoded.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TemplateLibrary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = HashMap::<String, String>::deserialize(deserializer)?;
        let mut templates = HashMap::with_capacity(encoded.len());
        for (name, data) in encoded {
            let image = decode_base64_image(&data)
                .map_err(|e| D::Error::custom(format!("template {name}: {e}")))?;
            templates.insert(name, image);
        }
        Ok(Self { templates })
    }
}
