//! # HTTP Wire Layer
//!
//! Request parsing and response writing for the executor front-end.
//! Parsing reads up to 8 KiB of headers, splits on the blank line, then
//! parses the request line (`METHOD SP PATH SP HTTP/1.1`) and headers.
//! `POST` requires `Content-Length`; whatever part of the body the header
//! read already buffered is kept and the remainder is read exactly.
//!
//! Responses always carry the CORS headers. Writers return the status
//! code, negated when the client socket died mid-write so the caller can
//! recycle the connection.

use std::io::{Read, Write};

use crate::error::{HttpError, HttpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
        }
    }
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    /// Query parameters in request order, duplicates preserved
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

fn malformed(msg: impl Into<String>) -> HttpError {
    HttpError::Malformed(msg.into())
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// `%HH` decoding; a `%` without two hex digits or an encoded NUL fails
fn url_decode(s: &str) -> HttpResult<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return Err(malformed("truncated %-escape"));
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .map_err(|_| malformed("bad %-escape"))?;
            let c = u8::from_str_radix(hex, 16).map_err(|_| malformed("bad %-escape"))?;
            if c == 0 {
                return Err(malformed("encoded NUL"));
            }
            out.push(c);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| malformed("non-utf8 query"))
}

fn parse_query(raw: &str) -> HttpResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| malformed(format!("query pair '{pair}' has no value")))?;
        out.push((url_decode(name)?, url_decode(value)?));
    }
    Ok(out)
}

/// Parse one request off the stream. `Err(Closed)` means the client went
/// away between requests; any other error maps to a 400.
pub fn parse_request<R: Read>(r: &mut R) -> HttpResult<Request> {
    let mut buf = vec![0u8; 8192];
    let mut read = 0;
    let header_end = loop {
        if read == buf.len() {
            return Err(malformed("headers exceed 8 KiB"));
        }
        let n = r.read(&mut buf[read..]).map_err(|_| HttpError::Closed)?;
        if n == 0 {
            if read == 0 {
                return Err(HttpError::Closed);
            }
            return Err(malformed("truncated request"));
        }
        read += n;
        if let Some(pos) = find_blank_line(&buf[..read]) {
            break pos;
        }
    };
    let body_start = header_end + 4;

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| malformed("non-utf8 headers"))?
        .to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| malformed("empty request"))?;

    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or_else(|| malformed("missing method"))?;
    let target = parts.next().ok_or_else(|| malformed("missing path"))?;
    let version = parts.next().ok_or_else(|| malformed("missing version"))?;
    if version.trim() != "HTTP/1.1" || parts.next().is_some() {
        return Err(malformed("only HTTP/1.1 is spoken here"));
    }

    let method = match method {
        "GET" => Method::Get,
        "POST" => Method::Post,
        "OPTIONS" => Method::Options,
        other => return Err(malformed(format!("unsupported method '{other}'"))),
    };

    let mut content_length: Option<usize> = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| malformed("bad Content-Length"))?;
                content_length = Some(len);
            }
        }
    }

    let mut body = buf[body_start..read].to_vec();
    if method == Method::Post {
        let len = content_length.ok_or_else(|| malformed("POST without Content-Length"))?;
        if body.len() < len {
            let mut rest = vec![0u8; len - body.len()];
            r.read_exact(&mut rest)
                .map_err(|_| malformed("body shorter than Content-Length"))?;
            body.extend_from_slice(&rest);
        } else {
            body.truncate(len);
        }
    } else {
        body.clear();
    }

    let (path, query) = match target.split_once('?') {
        Some((path, raw)) => (path, parse_query(raw)?),
        None => (target, Vec::new()),
    };

    Ok(Request {
        method,
        path: url_decode(path)?,
        query,
        body,
    })
}

// ---- responses --------------------------------------------------------

const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Methods: OPTIONS, GET, POST\r\n\
     Access-Control-Allow-Headers: Content-Type, Content-Length\r\n";

fn reason(code: i32) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

fn write_response<W: Write>(w: &mut W, code: i32, extra: &str, body: &str) -> i32 {
    let text = format!(
        "HTTP/1.1 {} {}\r\n{}{}Content-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        code,
        reason(code),
        CORS_HEADERS,
        extra,
        body.len(),
        body
    );
    match w.write_all(text.as_bytes()).and_then(|()| w.flush()) {
        Ok(()) => code,
        Err(_) => -code,
    }
}

pub fn respond_400<W: Write>(w: &mut W) -> i32 {
    write_response(w, 400, "", "")
}

/// 404 with the diagnostic in the body
pub fn respond_404<W: Write>(w: &mut W, msg: &str) -> i32 {
    write_response(w, 404, "", msg)
}

/// 405 naming the method the function does accept
pub fn respond_405<W: Write>(w: &mut W, allow: Method) -> i32 {
    write_response(w, 405, &format!("Allow: {}\r\n", allow.as_str()), "")
}

pub fn respond_500<W: Write>(w: &mut W) -> i32 {
    write_response(w, 500, "", "")
}

pub fn respond_options<W: Write>(w: &mut W) -> i32 {
    write_response(w, 200, "", "")
}

/// The 200 header block opening a chunked response
pub fn respond_200_chunked<W: Write>(w: &mut W) -> i32 {
    let text = format!(
        "HTTP/1.1 200 OK\r\n{CORS_HEADERS}Content-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n"
    );
    match w.write_all(text.as_bytes()) {
        Ok(()) => 200,
        Err(_) => -200,
    }
}

/// One response chunk; an empty payload is the terminal chunk
pub fn write_chunk<W: Write>(w: &mut W, data: &[u8]) -> i32 {
    let res = write!(w, "{:X}\r\n", data.len())
        .and_then(|()| w.write_all(data))
        .and_then(|()| w.write_all(b"\r\n"))
        .and_then(|()| w.flush());
    match res {
        Ok(()) => 200,
        Err(_) => -200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &[u8]) -> HttpResult<Request> {
        parse_request(&mut &raw[..])
    }

    #[test]
    fn test_get_with_query() {
        let req = parse(b"GET /Cheap?limit=2.5&tag=a%20b HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/Cheap");
        assert_eq!(
            req.query,
            vec![
                ("limit".to_string(), "2.5".to_string()),
                ("tag".to_string(), "a b".to_string())
            ]
        );
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_post_reads_content_length() {
        let req = parse(
            b"POST /Echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn test_post_without_length_is_malformed() {
        assert!(matches!(
            parse(b"POST /Echo HTTP/1.1\r\n\r\nhello"),
            Err(HttpError::Malformed(_))
        ));
    }

    #[test]
    fn test_post_with_short_body_is_malformed() {
        assert!(matches!(
            parse(b"POST /Echo HTTP/1.1\r\nContent-Length: 10\r\n\r\nhi"),
            Err(HttpError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_other_versions_and_methods() {
        assert!(parse(b"GET / HTTP/1.0\r\n\r\n").is_err());
        assert!(parse(b"PUT / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_closed_connection() {
        assert!(matches!(parse(b""), Err(HttpError::Closed)));
    }

    #[test]
    fn test_bad_escape() {
        assert!(parse(b"GET /x?a=%zz HTTP/1.1\r\n\r\n").is_err());
        assert!(parse(b"GET /x?a=%2 HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_query_without_value_is_malformed() {
        assert!(parse(b"GET /x?flag HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_duplicates_are_preserved_for_the_dispatcher() {
        let req = parse(b"GET /x?a=1&a=2 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.query.len(), 2);
    }

    #[test]
    fn test_response_shapes() {
        let mut out = Vec::new();
        assert_eq!(respond_404(&mut out, "unknown function 'X'"), 404);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *"));
        assert!(text.ends_with("unknown function 'X'"));

        let mut out = Vec::new();
        assert_eq!(respond_405(&mut out, Method::Post), 405);
        assert!(String::from_utf8(out).unwrap().contains("Allow: POST"));

        let mut out = Vec::new();
        assert_eq!(respond_200_chunked(&mut out), 200);
        assert_eq!(write_chunk(&mut out, b"a int\n"), 200);
        assert_eq!(write_chunk(&mut out, b""), 200);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(text.ends_with("6\r\na int\n\r\n0\r\n\r\n"));
    }
}
