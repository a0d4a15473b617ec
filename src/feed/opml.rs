use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

use crate::storage::Source;

/// Outlines nested deeper than this are rejected.
const MAX_OPML_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),
}

/// A subscription read from an OPML file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlOutline {
    /// `title`, else `text`, else the feed URL
    pub name: String,
    pub xml_url: String,
    /// Comma-separated: enclosing folder names, outermost first, then the
    /// outline's own `category` list
    pub tags: String,
}

/// Read and parse an OPML file. See [`parse_opml`].
pub async fn read_opml(path: &Path) -> Result<Vec<OpmlOutline>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OPML file '{}'", path.display()))?;
    parse_opml(&content)
}

/// Extract every `outline` carrying an `xmlUrl`, at any depth.
///
/// Outlines without `xmlUrl` are folders; their names become tags of the
/// subscriptions inside them. URLs are not validated here, registration
/// does that per source.
///
/// quick-xml never expands `<!ENTITY>` declarations: an unknown entity in
/// an attribute is a parse error, not a file read.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlOutline>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut outlines = Vec::new();
    // One slot per open outline: the folder name, or None for a feed outline
    let mut open: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if open.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH).into());
                }
                let folder = match read_outline(&e, &reader, &open)? {
                    Parsed::Feed(outline) => {
                        outlines.push(outline);
                        None
                    }
                    Parsed::Folder(name) => name,
                };
                open.push(folder);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                if let Parsed::Feed(outline) = read_outline(&e, &reader, &open)? {
                    outlines.push(outline);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                open.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string()).into()),
            _ => {}
        }
    }

    tracing::debug!(outlines = outlines.len(), "Parsed OPML");
    Ok(outlines)
}

enum Parsed {
    Feed(OpmlOutline),
    /// Folder outline and its label, if it has one
    Folder(Option<String>),
}

fn read_outline(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    open: &[Option<String>],
) -> Result<Parsed> {
    let mut xml_url = None;
    let mut title = None;
    let mut text = None;
    let mut category = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || -> Result<String> {
            Ok(attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))?
                .trim()
                .to_string())
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value()?),
            b"title" => title = Some(value()?),
            b"text" => text = Some(value()?),
            b"category" => category = Some(value()?),
            _ => {}
        }
    }

    let label = title.filter(|t| !t.is_empty()).or(text.filter(|t| !t.is_empty()));

    let Some(xml_url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(Parsed::Folder(label));
    };

    let mut tags: Vec<&str> = open.iter().flatten().map(String::as_str).collect();
    if let Some(ref category) = category {
        // OPML categories may be slash paths ("/tech/rust")
        tags.extend(
            category
                .split(',')
                .map(|c| c.trim().trim_matches('/'))
                .filter(|c| !c.is_empty()),
        );
    }

    Ok(Parsed::Feed(OpmlOutline {
        name: label.unwrap_or_else(|| xml_url.clone()),
        tags: tags.join(","),
        xml_url,
    }))
}

/// Serialize sources as an OPML 2.0 subscription list.
///
/// The output parses back with [`parse_opml`] to the same names, URLs and tags.
///
/// One `outline` per source, carrying `xmlUrl`, the site `htmlUrl` when
/// known and the source's tags as a comma-separated `category`.
pub fn export_opml(sources: &[Source]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("prophet subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    for source in sources {
        let tags = source.tags_list();
        let mut outline = BytesStart::new("outline");
        outline.push_attribute(("type", "rss"));
        outline.push_attribute(("text", source.name.as_str()));
        outline.push_attribute(("title", source.name.as_str()));
        outline.push_attribute(("xmlUrl", source.url.as_str()));
        if let Some(ref html_url) = source.html_url {
            outline.push_attribute(("htmlUrl", html_url.as_str()));
        }
        if !tags.is_empty() {
            outline.push_attribute(("category", tags.as_str()));
        }
        writer
            .write_event(Event::Empty(outline))
            .context("Failed to write outline element")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

/// Write the OPML export to `path` atomically (temp file, fsync, rename).
pub fn export_to_file(sources: &[Source], path: &Path) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = export_opml(sources)?;

    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temporary file '{}'", temp_path.display()))?;

    let written = std::io::Write::write_all(&mut file, content.as_bytes())
        .and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e).with_context(|| format!("Failed to write '{}'", temp_path.display()));
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    tracing::info!(path = %path.display(), sources = sources.len(), "Exported OPML");
    Ok(())
}
