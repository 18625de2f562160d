//! Namespace-aware field lookup over a parsed alarm document.
//!
//! Firmware versions nest the same field at different depths, so lookups
//! are not anchored at the root: a path such as
//! `ResourcesName/pictureResolution/height` matches the first
//! `ResourcesName` element anywhere in the document that has a
//! `pictureResolution` child with a `height` child. Every segment must live
//! in the root element's namespace.

use crate::error::{DecodeError, DecodeResult};
use xmltree::{Element, XMLNode};

/// A parsed XML document with its default namespace bound for lookups.
#[derive(Debug, Clone)]
pub struct AlarmDocument {
    root: Element,
    namespace: Option<String>,
}

impl AlarmDocument {
    /// Parse `text` into a document.
    ///
    /// Fails with [`DecodeError::MalformedXml`] when the text is not
    /// well-formed or has no root element.
    pub fn parse(text: &str) -> DecodeResult<Self> {
        let root = Element::parse(text.as_bytes())
            .map_err(|e| DecodeError::MalformedXml(e.to_string()))?;
        let namespace = root.namespace.clone();
        Ok(Self { root, namespace })
    }

    /// Namespace of the root element, if it declared one.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn root_name(&self) -> &str {
        &self.root.name
    }

    /// Inner text of the first element matching `path`, or an empty string.
    pub fn text(&self, path: &str) -> String {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return String::new();
        }
        self.find_descendant(&self.root, &segments)
            .map(inner_text)
            .unwrap_or_default()
    }

    /// Depth-first, document-order search for the first element that starts
    /// the path and resolves every remaining segment through its children.
    fn find_descendant<'a>(&self, element: &'a Element, segments: &[&str]) -> Option<&'a Element> {
        if self.matches(element, segments[0]) {
            if let Some(found) = self.resolve_children(element, &segments[1..]) {
                return Some(found);
            }
        }
        child_elements(element).find_map(|child| self.find_descendant(child, segments))
    }

    fn resolve_children<'a>(&self, element: &'a Element, segments: &[&str]) -> Option<&'a Element> {
        let Some((first, rest)) = segments.split_first() else {
            return Some(element);
        };
        child_elements(element)
            .filter(|child| self.matches(child, first))
            .find_map(|child| self.resolve_children(child, rest))
    }

    fn matches(&self, element: &Element, name: &str) -> bool {
        element.name == name && element.namespace == self.namespace
    }
}

fn child_elements(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(|node| match node {
        XMLNode::Element(child) => Some(child),
        _ => None,
    })
}

/// Concatenated text of an element and all of its descendants.
fn inner_text(element: &Element) -> String {
    let mut text = String::new();
    collect_text(element, &mut text);
    text
}

fn collect_text(element: &Element, out: &mut String) {
    for node in &element.children {
        match node {
            XMLNode::Text(t) | XMLNode::CData(t) => out.push_str(t),
            XMLNode::Element(child) => collect_text(child, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://www.hikvision.com/ver20/XMLSchema";

    fn doc(body: &str) -> AlarmDocument {
        AlarmDocument::parse(&format!(r#"<EventNotificationAlert xmlns="{NS}">{body}</EventNotificationAlert>"#))
            .unwrap()
    }

    #[test]
    fn test_namespace_is_bound_from_root() {
        let document = doc("<eventType>audioexception</eventType>");
        assert_eq!(document.namespace(), Some(NS));
        assert_eq!(document.root_name(), "EventNotificationAlert");
        assert_eq!(document.text("eventType"), "audioexception");
    }

    #[test]
    fn test_lookup_finds_nested_fields_anywhere() {
        let document = doc(
            "<Extra><Deeper><channelID>3</channelID></Deeper></Extra>\
             <AudioExceptionDetection><alarmType>audioInputException</alarmType></AudioExceptionDetection>",
        );
        assert_eq!(document.text("channelID"), "3");
        assert_eq!(document.text("AudioExceptionDetection/alarmType"), "audioInputException");
    }

    #[test]
    fn test_lookup_returns_first_match_in_document_order() {
        let document = doc("<a><eventType>first</eventType></a><eventType>second</eventType>");
        assert_eq!(document.text("eventType"), "first");
    }

    #[test]
    fn test_path_requires_direct_children() {
        let document = doc("<ResourcesName><wrapper><pictureResolution><height>1080</height></pictureResolution></wrapper></ResourcesName>");
        assert_eq!(document.text("ResourcesName/pictureResolution/height"), "");
        assert_eq!(document.text("pictureResolution/height"), "1080");
    }

    #[test]
    fn test_path_skips_parents_without_matching_child() {
        let document = doc(
            "<ResourcesName><other>x</other></ResourcesName>\
             <ResourcesName><resourcesContentType>url</resourcesContentType></ResourcesName>",
        );
        assert_eq!(document.text("ResourcesName/resourcesContentType"), "url");
    }

    #[test]
    fn test_foreign_namespace_is_ignored() {
        let document = doc(r#"<x:eventType xmlns:x="urn:other">foreign</x:eventType>"#);
        assert_eq!(document.text("eventType"), "");
    }

    #[test]
    fn test_root_without_namespace() {
        let document = AlarmDocument::parse("<Alert><eventType>motion</eventType></Alert>").unwrap();
        assert_eq!(document.namespace(), None);
        assert_eq!(document.text("eventType"), "motion");
    }

    #[test]
    fn test_inner_text_concatenates_descendants() {
        let document = doc("<eventDescription>Audio <b>exception</b> detected</eventDescription>");
        assert!(document.text("eventDescription").contains("exception"));
        assert!(document.text("eventDescription").starts_with("Audio"));
    }

    #[test]
    fn test_missing_field_is_empty() {
        let document = doc("<eventType>motion</eventType>");
        assert_eq!(document.text("macAddress"), "");
        assert_eq!(document.text(""), "");
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            AlarmDocument::parse("<EventNotificationAlert><eventType>"),
            Err(DecodeError::MalformedXml(_))
        ));
        assert!(matches!(AlarmDocument::parse(""), Err(DecodeError::MalformedXml(_))));
        assert!(matches!(AlarmDocument::parse("not xml"), Err(DecodeError::MalformedXml(_))));
    }
}
