/**
 * `<d:multistatus>` XML bodies (spec §4.3.1, §6). Two shapes are
 * produced: a PROPFIND listing, and a partial-failure report for
 * COPY/MOVE.
 */
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesText, Event};
use quick_xml::writer::Writer;
use std::io::Cursor;

use crate::application::copy_move::ResourceError;

pub struct PropfindEntry {
    pub href: String,
    pub is_directory: bool,
    pub size: u64,
    pub mtime_ms: i64,
}

fn http_date(mtime_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(mtime_ms)
        .unwrap_or_else(Utc::now)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

fn percent_encode_path(path: &str) -> String {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, NON_ALPHANUMERIC).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn propfind_multistatus(entries: &[PropfindEntry]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))
        .expect("writing to an in-memory buffer cannot fail");

    writer
        .create_element("d:multistatus")
        .with_attribute(("xmlns:d", "DAV:"))
        .write_inner_content(|writer| {
            for entry in entries {
                write_response(writer, entry)?;
            }
            Ok(())
        })
        .expect("writing to an in-memory buffer cannot fail");

    String::from_utf8(writer.into_inner().into_inner()).expect("generated XML is always valid UTF-8")
}

fn write_response(writer: &mut Writer<Cursor<Vec<u8>>>, entry: &PropfindEntry) -> quick_xml::Result<()> {
    writer
        .create_element("d:response")
        .write_inner_content::<_, quick_xml::Error>(|writer| {
            writer
                .create_element("d:href")
                .write_text_content(BytesText::new(&percent_encode_path(&entry.href)))?;

            writer
                .create_element("d:propstat")
                .write_inner_content(|writer| {
                    writer.create_element("d:prop").write_inner_content(|writer| {
                        let display_name = entry.href.rsplit('/').find(|s| !s.is_empty()).unwrap_or("/");
                        writer.create_element("d:displayname").write_text_content(BytesText::new(display_name))?;

                        if entry.is_directory {
                            writer.create_element("d:resourcetype").write_inner_content(|writer| {
                                writer.create_element("d:collection").write_empty()?;
                                Ok(())
                            })?;
                            writer
                                .create_element("d:getcontenttype")
                                .write_text_content(BytesText::new("httpd/unix-directory"))?;
                        } else {
                            writer.create_element("d:resourcetype").write_empty()?;
                            writer
                                .create_element("d:getcontentlength")
                                .write_text_content(BytesText::new(&entry.size.to_string()))?;
                            writer
                                .create_element("d:getcontenttype")
                                .write_text_content(BytesText::new("application/octet-stream"))?;
                        }

                        writer
                            .create_element("d:getlastmodified")
                            .write_text_content(BytesText::new(&http_date(entry.mtime_ms)))?;
                        Ok(())
                    })?;

                    writer
                        .create_element("d:status")
                        .write_text_content(BytesText::new("HTTP/1.1 200 OK"))?;
                    Ok(())
                })?;
            Ok(())
        })?;
    Ok(())
}

/// Partial-failure body for a recursive COPY/MOVE (spec §6).
pub fn errors_multistatus(errors: &[ResourceError]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new("1.0", Some("UTF-8"), Some("no"))))
        .expect("writing to an in-memory buffer cannot fail");

    writer
        .create_element("d:multistatus")
        .with_attribute(("xmlns:d", "DAV:"))
        .write_inner_content(|writer| {
            for err in errors {
                writer
                    .create_element("d:response")
                    .write_inner_content::<_, quick_xml::Error>(|writer| {
                        writer
                            .create_element("d:href")
                            .write_text_content(BytesText::new(&percent_encode_path(&err.href)))?;
                        writer.create_element("d:status").write_text_content(BytesText::new(&format!(
                            "HTTP/1.1 {} {}",
                            err.status.as_u16(),
                            err.status.canonical_reason().unwrap_or("")
                        )))?;
                        writer
                            .create_element("d:responsedescription")
                            .write_text_content(BytesText::new(&err.description))?;
                        Ok(())
                    })?;
            }
            Ok(())
        })
        .expect("writing to an in-memory buffer cannot fail");

    String::from_utf8(writer.into_inner().into_inner()).expect("generated XML is always valid UTF-8")
}
