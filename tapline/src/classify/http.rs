//! HTTP/1.x interpreters.

use anyhow::Result;
use log::trace;

use super::{Handler, Interpreter};
use crate::{
    core::events::Message,
    events::{
        Direction, EventMetadata, EventTag, HttpRequestSection, HttpResponseSection, ReportEvent,
    },
};

/// Number of headers parsed on the stack. Messages with more headers are
/// parsed again with room for up to `MAX_HEADERS`.
const INLINE_HEADERS: usize = 64;
/// Maximum number of headers parsed.
const MAX_HEADERS: usize = 1024;

/// A parsed HTTP request.
#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    /// Minor version, HTTP/1.x.
    pub(crate) version: u8,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    /// IP of the pod the request was captured in.
    pub(crate) remote_addr: Option<String>,
}

impl HttpRequest {
    /// First value of a header, case insensitive.
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        header(&self.headers, name)
    }

    /// Host the request is for, without the port.
    pub(crate) fn host(&self) -> Option<&str> {
        let host = self.header("host")?;
        Some(match host.rsplit_once(':') {
            Some((name, port)) if port.parse::<u16>().is_ok() => name,
            _ => host,
        })
    }
}

/// A parsed HTTP response.
#[derive(Debug)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) reason: Option<String>,
    pub(crate) version: u8,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Run a parser with the inline header storage, then with the larger one
/// when the message carries too many headers.
fn with_headers<'b, T, F>(parse: F) -> Option<T>
where
    F: Fn(&mut [httparse::Header<'b>]) -> Result<Option<T>, httparse::Error>,
{
    let mut headers = [httparse::EMPTY_HEADER; INLINE_HEADERS];
    match parse(&mut headers) {
        Ok(parsed) => parsed,
        Err(httparse::Error::TooManyHeaders) => {
            let mut headers = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
            parse(&mut headers).ok().flatten()
        }
        Err(_) => None,
    }
}

fn collect_headers(headers: &[httparse::Header]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

pub(crate) struct HttpRequestInterpreter;

impl Interpreter for HttpRequestInterpreter {
    type Output = HttpRequest;

    fn name(&self) -> &'static str {
        "http-request"
    }

    fn parse(&self, msg: &Message) -> Option<HttpRequest> {
        with_headers(|headers| {
            let mut req = httparse::Request::new(headers);

            let offset = match req.parse(&msg.data)? {
                httparse::Status::Complete(offset) => offset,
                httparse::Status::Partial => {
                    trace!("Incomplete HTTP request headers (pid {})", msg.pid);
                    return Ok(None);
                }
            };

            let (Some(method), Some(path), Some(version)) = (req.method, req.path, req.version)
            else {
                return Ok(None);
            };
            Ok(Some(HttpRequest {
                method: method.to_string(),
                path: path.to_string(),
                version,
                headers: collect_headers(req.headers),
                body: msg.data[offset..].to_vec(),
                remote_addr: msg.container.as_ref().and_then(|c| c.pod_ip.clone()),
            }))
        })
    }

    fn summarize(&self, req: &HttpRequest, event: &mut ReportEvent) {
        event.http_request = Some(HttpRequestSection {
            method: req.method.clone(),
            path: req.path.clone(),
            version: req.version,
            host: req.header("host").map(str::to_string),
            body_len: req.body.len(),
        });
    }
}

pub(crate) struct HttpResponseInterpreter;

impl Interpreter for HttpResponseInterpreter {
    type Output = HttpResponse;

    fn name(&self) -> &'static str {
        "http-response"
    }

    fn parse(&self, msg: &Message) -> Option<HttpResponse> {
        with_headers(|headers| {
            let mut resp = httparse::Response::new(headers);

            let httparse::Status::Complete(offset) = resp.parse(&msg.data)? else {
                return Ok(None);
            };

            let (Some(status), Some(version)) = (resp.code, resp.version) else {
                return Ok(None);
            };
            Ok(Some(HttpResponse {
                status,
                reason: resp
                    .reason
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
                version,
                headers: collect_headers(resp.headers),
                body: msg.data[offset..].to_vec(),
            }))
        })
    }

    fn summarize(&self, resp: &HttpResponse, event: &mut ReportEvent) {
        event.http_response = Some(HttpResponseSection {
            status: resp.status,
            reason: resp.reason.clone(),
            version: resp.version,
            body_len: resp.body.len(),
        });
    }
}

/// Domain of the AWS API endpoints.
const AWS_DOMAIN: &str = "amazonaws.com";

/// Tags outgoing requests to AWS APIs.
pub(crate) struct AwsApiHandler;

impl Handler<HttpRequest> for AwsApiHandler {
    fn name(&self) -> &'static str {
        "aws-api"
    }

    fn handle(&self, msg: &Message, req: &HttpRequest, metadata: &mut EventMetadata) -> Result<()> {
        if msg.direction != Direction::Egress {
            return Ok(());
        }

        if let Some(host) = req.host() {
            let domain = host.trim_end_matches('.').to_ascii_lowercase();
            if domain == AWS_DOMAIN || domain.ends_with(&format!(".{AWS_DOMAIN}")) {
                trace!(
                    "AWS API call from {}: {} {}{}",
                    req.remote_addr.as_deref().unwrap_or("unknown"),
                    req.method,
                    host,
                    req.path
                );
                metadata.add_tag(EventTag::AwsApi);
            }
        }
        Ok(())
    }
}
