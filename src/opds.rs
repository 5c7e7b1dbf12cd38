//! OPDS catalog documents.

use chrono::{DateTime, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

/// Content type of links to other catalog feeds.
pub const CATALOG_MIME: &str = "application/atom+xml;profile=opds-catalog";

/// Content type of navigation feeds.
pub const NAVIGATION_MIME: &str = "application/atom+xml;profile=opds-catalog;kind=navigation";

/// Content type of acquisition feeds.
pub const ACQUISITION_MIME: &str = "application/atom+xml;profile=opds-catalog;kind=acquisition";

/// Content type of a standalone entry document.
pub const ENTRY_MIME: &str = "application/atom+xml;type=entry;profile=opds-catalog";

/// Link relation for downloading the book.
pub const REL_ACQUISITION: &str = "http://opds-spec.org/acquisition";

/// Link relation for the cover image.
pub const REL_IMAGE: &str = "http://opds-spec.org/image";

/// Link relation for the cover thumbnail.
pub const REL_THUMBNAIL: &str = "http://opds-spec.org/image/thumbnail";

/// Link relation for a child catalog.
pub const REL_SUBSECTION: &str = "subsection";

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const OPDS_NS: &str = "http://opds-spec.org/2010/catalog";
const DC_NS: &str = "http://purl.org/dc/terms/";

/// OPDS feed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Link relation type (e.g., "self", "subsection", "acquisition").
    pub rel: String,
    /// URL of the linked resource.
    pub href: String,
    /// MIME type of the linked resource.
    pub link_type: String,
    /// Optional title for the link.
    pub title: Option<String>,
}

impl Link {
    /// Link to another catalog feed.
    pub fn feed(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            href: href.into(),
            link_type: CATALOG_MIME.to_string(),
            title: None,
        }
    }
}

/// OPDS feed entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Unique identifier for the entry.
    pub id: String,
    /// Entry title.
    pub title: String,
    /// Last update timestamp.
    pub updated: DateTime<Utc>,
    /// Authors list.
    pub authors: Vec<String>,
    /// Short summary text.
    pub summary: Option<String>,
    /// Language code.
    pub language: Option<String>,
    /// Publication date, free text.
    pub issued: Option<String>,
    /// Links associated with this entry.
    pub links: Vec<Link>,
}

impl Entry {
    /// Navigation entry pointing at a sub-catalog.
    pub fn subsection(id: impl Into<String>, title: impl Into<String>, href: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            updated: Utc::now(),
            authors: Vec::new(),
            summary: None,
            language: None,
            issued: None,
            links: vec![Link {
                rel: REL_SUBSECTION.to_string(),
                href: href.into(),
                link_type: CATALOG_MIME.to_string(),
                title: Some(title.clone()),
            }],
            title,
        }
    }

    /// Serialize as a standalone Atom entry document.
    pub fn to_xml_document(&self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        // Writing to Vec can't fail
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
        write_entry(&mut writer, self, true);

        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

/// A rendered catalog feed.
#[derive(Debug, Clone)]
pub struct Feed {
    /// Feed identifier.
    pub id: String,
    /// Feed title.
    pub title: String,
    /// Generation timestamp.
    pub updated: DateTime<Utc>,
    /// Feed author.
    pub author_name: Option<String>,
    /// Navigation links (self, start, up).
    pub links: Vec<Link>,
    /// Entries in display order.
    pub entries: Vec<Entry>,
}

impl Feed {
    /// Create an empty feed.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated: Utc::now(),
            author_name: None,
            links: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Set the feed author.
    pub fn author(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    /// Add a navigation link.
    pub fn link(mut self, rel: &str, href: impl Into<String>) -> Self {
        self.links.push(Link::feed(rel, href));
        self
    }

    /// First link with the given relation.
    pub fn find_link(&self, rel: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.rel == rel)
    }

    /// Serialize to Atom XML.
    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        // XML declaration - writing to Vec can't fail
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));

        let mut feed = BytesStart::new("feed");
        push_namespaces(&mut feed);
        let _ = writer.write_event(Event::Start(feed));

        write_text_element(&mut writer, "id", &self.id);
        write_text_element(&mut writer, "title", &self.title);
        write_text_element(&mut writer, "updated", &self.updated.to_rfc3339());

        if let Some(name) = &self.author_name {
            let _ = writer.write_event(Event::Start(BytesStart::new("author")));
            write_text_element(&mut writer, "name", name);
            let _ = writer.write_event(Event::End(BytesEnd::new("author")));
        }

        for link in &self.links {
            write_link(&mut writer, link);
        }

        for entry in &self.entries {
            write_entry(&mut writer, entry, false);
        }

        let _ = writer.write_event(Event::End(BytesEnd::new("feed")));

        String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
    }
}

fn push_namespaces(elem: &mut BytesStart<'_>) {
    elem.push_attribute(("xmlns", ATOM_NS));
    elem.push_attribute(("xmlns:opds", OPDS_NS));
    elem.push_attribute(("xmlns:dc", DC_NS));
}

/// Write a simple text element.
fn write_text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, text: &str) {
    let _ = writer.write_event(Event::Start(BytesStart::new(name)));
    let _ = writer.write_event(Event::Text(BytesText::new(text)));
    let _ = writer.write_event(Event::End(BytesEnd::new(name)));
}

/// Write a link element.
fn write_link<W: std::io::Write>(writer: &mut Writer<W>, link: &Link) {
    let mut elem = BytesStart::new("link");
    elem.push_attribute(("rel", link.rel.as_str()));
    elem.push_attribute(("href", link.href.as_str()));
    elem.push_attribute(("type", link.link_type.as_str()));
    if let Some(title) = &link.title {
        elem.push_attribute(("title", title.as_str()));
    }
    let _ = writer.write_event(Event::Empty(elem));
}

/// Write an entry element; standalone entries carry the namespace declarations.
fn write_entry<W: std::io::Write>(writer: &mut Writer<W>, entry: &Entry, standalone: bool) {
    let mut start = BytesStart::new("entry");
    if standalone {
        push_namespaces(&mut start);
    }
    let _ = writer.write_event(Event::Start(start));

    write_text_element(writer, "id", &entry.id);
    write_text_element(writer, "title", &entry.title);
    write_text_element(writer, "updated", &entry.updated.to_rfc3339());

    for author in &entry.authors {
        let _ = writer.write_event(Event::Start(BytesStart::new("author")));
        write_text_element(writer, "name", author);
        let _ = writer.write_event(Event::End(BytesEnd::new("author")));
    }

    if let Some(language) = &entry.language {
        write_text_element(writer, "dc:language", language);
    }

    if let Some(issued) = &entry.issued {
        write_text_element(writer, "dc:issued", issued);
    }

    if let Some(summary) = &entry.summary {
        let mut elem = BytesStart::new("summary");
        elem.push_attribute(("type", "text"));
        let _ = writer.write_event(Event::Start(elem));
        let _ = writer.write_event(Event::Text(BytesText::new(summary)));
        let _ = writer.write_event(Event::End(BytesEnd::new("summary")));
    }

    for link in &entry.links {
        write_link(writer, link);
    }

    let _ = writer.write_event(Event::End(BytesEnd::new("entry")));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_xml_shape() {
        let mut feed = Feed::new("urn:uuid:root", "Books & Comics")
            .author("shelf-opds")
            .link("self", "/catalog")
            .link("start", "/");
        feed.entries
            .push(Entry::subsection("urn:uuid:sub", "Sci-Fi", "/catalog/Sci-Fi"));

        let xml = feed.to_xml();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<title>Books &amp; Comics</title>"));
        assert!(xml.contains(r#"<link rel="self" href="/catalog""#));
        assert!(xml.contains(r#"rel="subsection" href="/catalog/Sci-Fi""#));

        let doc = roxmltree::Document::parse(&xml).unwrap();
        let entries = doc
            .descendants()
            .filter(|n| n.has_tag_name((ATOM_NS, "entry")))
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_feed_links_use_catalog_type() {
        let feed = Feed::new("urn:uuid:root", "Library").link("up", "/catalog/a");
        assert_eq!(feed.find_link("up").unwrap().link_type, CATALOG_MIME);

        let sub = Entry::subsection("urn:uuid:sub", "Sci-Fi", "/catalog/Sci-Fi");
        assert_eq!(sub.links[0].link_type, CATALOG_MIME);

        let xml = Feed::new("urn:uuid:root", "Library")
            .link("self", "/")
            .to_xml();
        assert!(xml.contains(r#"type="application/atom+xml;profile=opds-catalog""#));
        assert!(!xml.contains("kind=acquisition"));
    }

    #[test]
    fn test_entry_document_has_namespaces() {
        let entry = Entry {
            id: "urn:sha1:X".to_string(),
            title: "Dune".to_string(),
            updated: Utc::now(),
            authors: vec!["Frank Herbert".to_string()],
            summary: Some("Desert".to_string()),
            language: Some("en".to_string()),
            issued: Some("1965".to_string()),
            links: Vec::new(),
        };

        let xml = entry.to_xml_document();
        let doc = roxmltree::Document::parse(&xml).unwrap();
        let root = doc.root_element();
        assert!(root.has_tag_name((ATOM_NS, "entry")));
        let language = root
            .children()
            .find(|n| n.has_tag_name((DC_NS, "language")))
            .and_then(|n| n.text());
        assert_eq!(language, Some("en"));
    }
}
