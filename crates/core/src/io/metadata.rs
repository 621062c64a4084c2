//! GDAL-style dataset metadata stored in the GDAL_METADATA TIFF tag (42112).
//!
//! The tag holds a small XML document:
//!
//! ```text
//! <GDALMetadata>
//!   <Item name="WB_ID_to_UID">{"1": "k3v0q8x2jh"}</Item>
//! </GDALMetadata>
//! ```

use std::collections::BTreeMap;

/// Key/value metadata items attached to a GeoTIFF
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoTiffMetadata {
    items: BTreeMap<String, String>,
}

impl GeoTiffMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an item, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.items.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize into the XML form GDAL writes
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<GDALMetadata>\n");
        for (name, value) in &self.items {
            xml.push_str(&format!(
                "  <Item name=\"{}\">{}</Item>\n",
                escape(name),
                escape(value)
            ));
        }
        xml.push_str("</GDALMetadata>");
        xml
    }

    /// Parse the XML form. Items without a `name` attribute are ignored.
    pub fn from_xml(xml: &str) -> Self {
        let mut metadata = Self::new();
        let mut rest = xml;

        while let Some(start) = rest.find("<Item") {
            rest = &rest[start + "<Item".len()..];
            let Some(tag_end) = rest.find('>') else {
                break;
            };
            let attrs = &rest[..tag_end];
            rest = &rest[tag_end + 1..];

            let Some(close) = rest.find("</Item>") else {
                break;
            };
            let value = &rest[..close];
            rest = &rest[close + "</Item>".len()..];

            if let Some(name) = attribute(attrs, "name") {
                metadata.insert(unescape(name), unescape(value));
            }
        }

        metadata
    }
}

fn attribute<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", key);
    let start = attrs.find(&needle)? + needle.len();
    let len = attrs[start..].find('"')?;
    Some(&attrs[start..start + len])
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
