//! Request handler: decode an inbound query, resolve it, encode the
//! response. This is the only layer that maps errors onto RCODEs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::iterative::ResolveError;
use crate::logging::QueryLogger;
use crate::packet::{
    self, DnsHeader, DnsMessage, FLAG_QR, FLAG_RA, FLAG_RD, RCODE_FORMERR, RCODE_NOERROR,
    RCODE_NOTIMPL, RCODE_NXDOMAIN, RCODE_SERVFAIL,
};
use crate::records::{DnsRecord, RecordType};
use crate::resolver::Resolver;

pub struct RequestHandler {
    resolver: Arc<Resolver>,
    enable_recursion: bool,
    query_logger: Option<QueryLogger>,
}

impl RequestHandler {
    pub fn new(resolver: Arc<Resolver>, config: &ServerConfig) -> Self {
        let query_logger = (!config.query_log_path.is_empty())
            .then(|| QueryLogger::new(&config.query_log_path));
        Self {
            resolver,
            enable_recursion: config.enable_recursion,
            query_logger,
        }
    }

    /// Handle one wire-format query and produce the wire-format response.
    /// Returns None when the packet is too mangled to answer at all.
    pub async fn handle(&self, query_bytes: &[u8], src: SocketAddr) -> Option<Vec<u8>> {
        let query = match packet::parse_message(query_bytes) {
            Ok(query) => query,
            Err(e) => {
                debug!(%src, error = %e, "failed to parse query");
                return formerr_from_raw(query_bytes);
            }
        };

        let started = Instant::now();
        let (answers, rcode, cached) = self.answer(&query).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Some(question) = query.questions.first() {
            debug!(
                domain = %question.name,
                qtype = %question.qtype,
                rcode = packet::rcode_name(rcode),
                cached,
                elapsed_ms,
                "query handled"
            );
            if let Some(logger) = &self.query_logger {
                logger.log(
                    &question.name,
                    &question.qtype.to_string(),
                    &src.ip().to_string(),
                    cached,
                    packet::rcode_name(rcode),
                    elapsed_ms,
                );
            }
        }

        let response = DnsMessage {
            header: response_header(&query.header, rcode),
            questions: query.questions,
            answers,
            ..Default::default()
        };

        match packet::build_message(&response) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(%src, error = %e, "failed to build response");
                None
            }
        }
    }

    async fn answer(&self, query: &DnsMessage) -> (Vec<DnsRecord>, u8, bool) {
        let Some(question) = query.questions.first() else {
            return (vec![], RCODE_FORMERR, false);
        };

        if !self.enable_recursion || question.qtype != RecordType::A {
            return (vec![], RCODE_NOTIMPL, false);
        }

        match self.resolver.resolve(&question.name, question.qtype).await {
            Ok(resolution) => {
                let record = DnsRecord::a(&question.name, resolution.addr, resolution.ttl);
                (vec![record], RCODE_NOERROR, resolution.cached)
            }
            Err(ResolveError::NxDomain) => (vec![], RCODE_NXDOMAIN, false),
            Err(e) => {
                warn!(domain = %question.name, error = %e, "resolution failed");
                (vec![], RCODE_SERVFAIL, false)
            }
        }
    }
}

fn response_header(request: &DnsHeader, rcode: u8) -> DnsHeader {
    let mut flags = FLAG_QR | FLAG_RA | (rcode as u16 & 0x000F);
    if request.recursion_desired() {
        flags |= FLAG_RD;
    }
    DnsHeader {
        id: request.id,
        flags,
        ..Default::default()
    }
}

/// Best-effort FORMERR for a packet that did not parse: echo the id when at
/// least a header's worth of bytes is present, otherwise drop.
fn formerr_from_raw(query_bytes: &[u8]) -> Option<Vec<u8>> {
    if query_bytes.len() < packet::HEADER_LEN {
        return None;
    }
    let id = u16::from_be_bytes([query_bytes[0], query_bytes[1]]);
    let response = DnsMessage {
        header: DnsHeader {
            id,
            flags: FLAG_QR | RCODE_FORMERR as u16,
            ..Default::default()
        },
        ..Default::default()
    };
    packet::build_message(&response).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DnsCache;
    use crate::iterative::IterativeResolver;
    use std::time::Duration;

    fn test_src() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    /// A handler whose engine points at a dead endpoint; fine for every path
    /// that never reaches the network.
    fn offline_handler(config: &ServerConfig) -> RequestHandler {
        let cache = config
            .enable_caching
            .then(|| DnsCache::new(16, Duration::from_secs(60)));
        let engine = IterativeResolver::with_roots(
            vec!["127.0.0.1:1".parse().unwrap()],
            cache.clone(),
            Duration::from_secs(300),
        );
        RequestHandler::new(Arc::new(Resolver::from_parts(engine, cache)), config)
    }

    #[tokio::test]
    async fn test_unparseable_packet_gets_formerr() {
        let handler = offline_handler(&ServerConfig::default());
        // Valid header, garbage question section
        let mut bytes = vec![0xAB, 0xCD, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0xFF, 0xFF]);

        let response = handler.handle(&bytes, test_src()).await.unwrap();
        let parsed = packet::parse_message(&response).unwrap();
        assert_eq!(parsed.header.id, 0xABCD);
        assert!(parsed.header.is_response());
        assert_eq!(parsed.header.rcode(), RCODE_FORMERR);
    }

    #[tokio::test]
    async fn test_tiny_packet_dropped() {
        let handler = offline_handler(&ServerConfig::default());
        assert!(handler.handle(&[0u8; 8], test_src()).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_question_gets_formerr() {
        let handler = offline_handler(&ServerConfig::default());
        let query = DnsMessage {
            header: DnsHeader {
                id: 42,
                flags: FLAG_RD,
                ..Default::default()
            },
            ..Default::default()
        };
        let bytes = packet::build_message(&query).unwrap();

        let response = handler.handle(&bytes, test_src()).await.unwrap();
        let parsed = packet::parse_message(&response).unwrap();
        assert_eq!(parsed.header.rcode(), RCODE_FORMERR);
    }

    #[tokio::test]
    async fn test_non_a_query_gets_notimpl() {
        let handler = offline_handler(&ServerConfig::default());
        let query = DnsMessage::query(7, "example.com", RecordType::AAAA);
        let bytes = packet::build_message(&query).unwrap();

        let response = handler.handle(&bytes, test_src()).await.unwrap();
        let parsed = packet::parse_message(&response).unwrap();
        assert_eq!(parsed.header.rcode(), RCODE_NOTIMPL);
        assert!(parsed.answers.is_empty());
        // The question is echoed back
        assert_eq!(parsed.questions[0].name, "example.com");
    }

    #[tokio::test]
    async fn test_recursion_disabled_gets_notimpl() {
        let config = ServerConfig {
            enable_recursion: false,
            ..Default::default()
        };
        let handler = offline_handler(&config);
        let query = DnsMessage::query(7, "example.com", RecordType::A);
        let bytes = packet::build_message(&query).unwrap();

        let response = handler.handle(&bytes, test_src()).await.unwrap();
        let parsed = packet::parse_message(&response).unwrap();
        assert_eq!(parsed.header.rcode(), RCODE_NOTIMPL);
    }

    #[tokio::test]
    async fn test_response_echoes_rd_and_sets_ra() {
        let handler = offline_handler(&ServerConfig::default());
        let query = DnsMessage::query(7, "example.com", RecordType::AAAA);
        let bytes = packet::build_message(&query).unwrap();

        let response = handler.handle(&bytes, test_src()).await.unwrap();
        let parsed = packet::parse_message(&response).unwrap();
        assert!(parsed.header.recursion_desired());
        assert!(parsed.header.recursion_available());
    }
}
