//! TwiML call instructions.
//!
//! Twilio does not forward query parameters to the media websocket, so the
//! call language and target year travel as `<Parameter>` elements and come
//! back in the stream's `start` event.

pub const MEDIA_STREAM_PATH: &str = "/outbound-media-stream";

/// `<Connect><Stream>` document pointing Twilio at our media websocket.
pub fn connect_stream(host: &str, lang: &str, year: i32) -> String {
    let url = format!("wss://{}{}", host, MEDIA_STREAM_PATH);
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "<Response><Connect>",
            r#"<Stream url="{url}">"#,
            r#"<Parameter name="lang" value="{lang}"/>"#,
            r#"<Parameter name="year" value="{year}"/>"#,
            "</Stream>",
            "</Connect></Response>"
        ),
        url = escape_attribute(&url),
        lang = escape_attribute(lang),
        year = year,
    )
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
